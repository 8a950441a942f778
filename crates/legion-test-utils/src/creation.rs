use async_trait::async_trait;
use legion_core::{CreatedArtifact, CreationProvider, ProviderError};
use legion_protocol::DeliverableFormat;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Creation double that succeeds unless a format is scripted otherwise.
#[derive(Clone, Default)]
pub struct StubCreation {
    failures: Arc<Mutex<HashMap<DeliverableFormat, ProviderError>>>,
    delays: Arc<Mutex<HashMap<DeliverableFormat, Duration>>>,
    calls: Arc<Mutex<Vec<(DeliverableFormat, String)>>>,
}

impl StubCreation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_format(self, format: DeliverableFormat, error: ProviderError) -> Self {
        self.failures.lock().insert(format, error);
        self
    }

    /// Hold the call for `delay`; long delays stand in for a hung provider.
    pub fn delay_format(self, format: DeliverableFormat, delay: Duration) -> Self {
        self.delays.lock().insert(format, delay);
        self
    }

    /// `(format, idempotency_key)` of every call, in call order.
    pub fn calls(&self) -> Vec<(DeliverableFormat, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CreationProvider for StubCreation {
    async fn create(
        &self,
        format: DeliverableFormat,
        _content: &Value,
        idempotency_key: &str,
    ) -> Result<CreatedArtifact, ProviderError> {
        self.calls
            .lock()
            .push((format, idempotency_key.to_string()));
        let delay = self.delays.lock().get(&format).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failures.lock().get(&format) {
            return Err(error.clone());
        }
        Ok(CreatedArtifact {
            external_ref: format!("artifact://{format}/{idempotency_key}"),
            title: String::new(),
            kind: None,
        })
    }
}
