//! CENTURION: gathers evidence for one research question.

use super::{Agent, AgentCard, ProgressReporter, card, invalid_parameters, unsupported};
use crate::providers::{SearchHit, SearchProvider};
use async_trait::async_trait;
use legion_protocol::{
    A2AError, A2AResponse, A2ATask, AgentRole, CollectRequest, CollectedData, Progress, Snippet,
    TaskType,
};
use log::{debug, warn};
use std::collections::HashSet;
use std::sync::Arc;

pub struct CenturionAgent {
    search: Arc<dyn SearchProvider>,
}

impl CenturionAgent {
    pub fn new(search: Arc<dyn SearchProvider>) -> Self {
        Self { search }
    }

    async fn collect(
        &self,
        task: &A2ATask,
        request: CollectRequest,
        reporter: Arc<dyn ProgressReporter>,
    ) -> A2AResponse {
        reporter.thinking(&format!(
            "Searching for Question #{}: {}",
            request.question_id, request.question
        ));
        reporter.progress(Progress::Note("searching".to_string()));
        let query = request.question.trim().to_string();
        let hits = match self.search.search(&query).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!(
                    "search failed (task_id={}, question_id={}, error={})",
                    task.task_id, request.question_id, err
                );
                return A2AResponse::failed(task.task_id, A2AError::new(err.kind(), err.to_string()));
            }
        };
        let data = collected_from_hits(request.question_id, query, hits);
        debug!(
            "collected snippets (question_id={}, snippets={}, citations={})",
            data.question_id,
            data.snippets.len(),
            data.citations.len()
        );
        reporter.progress(Progress::percent(100));
        A2AResponse::completed(task.task_id, data)
    }
}

#[async_trait]
impl Agent for CenturionAgent {
    fn card(&self) -> AgentCard {
        card(
            AgentRole::Centurion,
            "Data collector: searches the web for evidence per research question",
            vec![TaskType::CollectData],
        )
    }

    async fn handle(&self, task: A2ATask, reporter: Arc<dyn ProgressReporter>) -> A2AResponse {
        if task.task_type != TaskType::CollectData {
            return unsupported(&task, AgentRole::Centurion);
        }
        match task.parameters_as::<CollectRequest>() {
            Ok(request) => self.collect(&task, request, reporter).await,
            Err(err) => invalid_parameters(&task, err),
        }
    }
}

/// Turn raw hits into snippets; citations are distinct URLs in first-seen order.
fn collected_from_hits(question_id: u32, query: String, hits: Vec<SearchHit>) -> CollectedData {
    let mut seen = HashSet::new();
    let mut citations = Vec::new();
    let mut snippets = Vec::with_capacity(hits.len());
    for hit in hits {
        if hit.content.trim().is_empty() {
            continue;
        }
        if !hit.source_url.is_empty() && seen.insert(hit.source_url.clone()) {
            citations.push(hit.source_url.clone());
        }
        snippets.push(Snippet {
            content: hit.content,
            source_url: hit.source_url,
            credibility: hit.credibility_hint.map(|value| value.clamp(0.0, 1.0)),
        });
    }
    CollectedData {
        question_id,
        query,
        snippets,
        citations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::NoopReporter;
    use crate::providers::ProviderError;
    use chrono::Utc;
    use legion_protocol::{ErrorKind, ResponseStatus};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use uuid::Uuid;

    struct FixedSearch(Result<Vec<SearchHit>, ProviderError>);

    #[async_trait]
    impl SearchProvider for FixedSearch {
        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, ProviderError> {
            self.0.clone()
        }
    }

    fn hit(content: &str, url: &str) -> SearchHit {
        SearchHit {
            content: content.to_string(),
            source_url: url.to_string(),
            credibility_hint: None,
        }
    }

    fn collect_task() -> A2ATask {
        A2ATask {
            task_id: Uuid::new_v4(),
            mission_id: Uuid::new_v4(),
            from_role: Some(AgentRole::Consul),
            to_role: AgentRole::Centurion,
            task_type: TaskType::CollectData,
            parameters: json!({
                "question_id": 3,
                "question": "What are the latest trends in heat pumps?",
                "intent": "heat pumps"
            }),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn citations_are_distinct_in_first_seen_order() {
        let data = collected_from_hits(
            1,
            "q".to_string(),
            vec![
                hit("a", "https://b.example"),
                hit("b", "https://a.example"),
                hit("c", "https://b.example"),
                hit("  ", "https://c.example"),
            ],
        );
        assert_eq!(data.snippets.len(), 3);
        assert_eq!(
            data.citations,
            vec!["https://b.example".to_string(), "https://a.example".to_string()]
        );
    }

    #[tokio::test]
    async fn empty_search_is_a_successful_collection() {
        let agent = CenturionAgent::new(Arc::new(FixedSearch(Ok(Vec::new()))));
        let task = collect_task();
        let response = agent.handle(task.clone(), Arc::new(NoopReporter)).await;
        assert_eq!(response.status, ResponseStatus::Completed);
        let data: CollectedData = response.payload_as().expect("payload");
        assert_eq!(data.question_id, 3);
        assert_eq!(data.snippets.len(), 0);
    }

    #[tokio::test]
    async fn provider_failure_becomes_failed_response() {
        let agent = CenturionAgent::new(Arc::new(FixedSearch(Err(ProviderError::RateLimited(
            "slow down".to_string(),
        )))));
        let response = agent.handle(collect_task(), Arc::new(NoopReporter)).await;
        assert_eq!(response.error_kind(), Some(ErrorKind::RateLimited));
    }
}
