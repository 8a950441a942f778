//! Interfaces to the external reasoning, search, and creation providers.

use async_trait::async_trait;
use legion_protocol::{DeliverableFormat, DeliverableKind, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Failures reported by an external provider.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// The provider answered with something unusable.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Classification used when the failure is turned into a response.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Unavailable(_) => ErrorKind::ProviderUnavailable,
            ProviderError::RateLimited(_) => ErrorKind::RateLimited,
            ProviderError::InvalidResponse(_) => ErrorKind::Internal,
        }
    }
}

/// Language-understanding calls: prompt in, text out.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    async fn complete(&self, prompt: &str, context: &Value) -> Result<String, ProviderError>;
}

/// One search result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub content: String,
    pub source_url: String,
    #[serde(default)]
    pub credibility_hint: Option<f32>,
}

/// Web search, invoked once per question. An empty result is not an error.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ProviderError>;
}

/// Reference to an artifact the creation provider produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreatedArtifact {
    pub external_ref: String,
    pub title: String,
    /// Overrides the kind derived from the requested format.
    #[serde(default)]
    pub kind: Option<DeliverableKind>,
}

/// Document, spreadsheet, and presentation creation.
///
/// Calls are not assumed idempotent; `idempotency_key` is stable per mission
/// and format so an implementation can de-duplicate on its side.
#[async_trait]
pub trait CreationProvider: Send + Sync {
    async fn create(
        &self,
        format: DeliverableFormat,
        content: &Value,
        idempotency_key: &str,
    ) -> Result<CreatedArtifact, ProviderError>;
}
