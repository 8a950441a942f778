use async_trait::async_trait;
use legion_core::{ProviderError, SearchHit, SearchProvider};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

enum Rule {
    Fail(ProviderError),
    FailFirst(ProviderError, usize),
    Delay(Duration),
    Empty,
}

/// Search double keyed by query substrings.
///
/// Queries that match no rule get two hits from distinct sources.
#[derive(Clone, Default)]
pub struct ScriptedSearch {
    rules: Arc<Mutex<Vec<(String, Rule)>>>,
    queries: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail queries containing `needle`.
    pub fn fail_on(self, needle: impl Into<String>, error: ProviderError) -> Self {
        self.rules.lock().push((needle.into(), Rule::Fail(error)));
        self
    }

    /// Fail the first `times` queries containing `needle`, then answer normally.
    pub fn fail_first(self, needle: impl Into<String>, times: usize, error: ProviderError) -> Self {
        self.rules
            .lock()
            .push((needle.into(), Rule::FailFirst(error, times)));
        self
    }

    /// Delay queries containing `needle`.
    pub fn delay_on(self, needle: impl Into<String>, delay: Duration) -> Self {
        self.rules.lock().push((needle.into(), Rule::Delay(delay)));
        self
    }

    /// Return no hits for queries containing `needle`.
    pub fn empty_on(self, needle: impl Into<String>) -> Self {
        self.rules.lock().push((needle.into(), Rule::Empty));
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }

    /// Most searches seen running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ProviderError> {
        self.queries.lock().push(query.to_string());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.peak.fetch_max(running, Ordering::SeqCst);
        let mut delay = None;
        {
            let mut rules = self.rules.lock();
            for (needle, rule) in rules.iter_mut() {
                if !query.contains(needle.as_str()) {
                    continue;
                }
                match rule {
                    Rule::Fail(error) => return Err(error.clone()),
                    Rule::FailFirst(error, remaining) if *remaining > 0 => {
                        *remaining -= 1;
                        return Err(error.clone());
                    }
                    Rule::FailFirst(..) => {}
                    Rule::Empty => return Ok(Vec::new()),
                    Rule::Delay(duration) => delay = Some(*duration),
                }
            }
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(vec![
            SearchHit {
                content: format!("Finding about {query}"),
                source_url: "https://one.example/report".to_string(),
                credibility_hint: Some(0.9),
            },
            SearchHit {
                content: format!("Another view on {query}"),
                source_url: "https://two.example/article".to_string(),
                credibility_hint: None,
            },
        ])
    }
}
