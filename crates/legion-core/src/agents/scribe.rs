//! SCRIBE: renders the analysis into a deliverable of one format.

use super::{Agent, AgentCard, ProgressReporter, card, invalid_parameters, unsupported};
use crate::providers::CreationProvider;
use async_trait::async_trait;
use legion_protocol::{
    A2AError, A2AResponse, A2ATask, AgentRole, AnalysisReport, CreateRequest,
    DeliverableDescriptor, DeliverableFormat, DeliverableKind, Progress, TaskType,
};
use log::{info, warn};
use serde_json::{Value, json};
use std::sync::Arc;

pub struct ScribeAgent {
    creation: Arc<dyn CreationProvider>,
}

impl ScribeAgent {
    pub fn new(creation: Arc<dyn CreationProvider>) -> Self {
        Self { creation }
    }

    async fn create(
        &self,
        task: &A2ATask,
        request: CreateRequest,
        reporter: Arc<dyn ProgressReporter>,
    ) -> A2AResponse {
        reporter.thinking(&format!("Composing the {} deliverable", request.format));
        reporter.progress(Progress::percent(20));
        let content = render_content(&request);
        let artifact = match self
            .creation
            .create(request.format, &content, &request.idempotency_key)
            .await
        {
            Ok(artifact) => artifact,
            Err(err) => {
                warn!(
                    "deliverable creation failed (task_id={}, format={}, error={})",
                    task.task_id, request.format, err
                );
                return A2AResponse::failed(task.task_id, A2AError::new(err.kind(), err.to_string()));
            }
        };
        info!(
            "deliverable created (task_id={}, format={}, ref={})",
            task.task_id, request.format, artifact.external_ref
        );
        reporter.progress(Progress::percent(100));
        let title = if artifact.title.trim().is_empty() {
            request.title.clone()
        } else {
            artifact.title
        };
        A2AResponse::completed(
            task.task_id,
            DeliverableDescriptor {
                title,
                kind: artifact
                    .kind
                    .unwrap_or_else(|| DeliverableKind::from(request.format)),
                format: request.format,
                external_ref: artifact.external_ref,
            },
        )
    }
}

#[async_trait]
impl Agent for ScribeAgent {
    fn card(&self) -> AgentCard {
        card(
            AgentRole::Scribe,
            "Creator: produces documents, spreadsheets, and slide decks",
            vec![TaskType::CreateDeliverable],
        )
    }

    async fn handle(&self, task: A2ATask, reporter: Arc<dyn ProgressReporter>) -> A2AResponse {
        if task.task_type != TaskType::CreateDeliverable {
            return unsupported(&task, AgentRole::Scribe);
        }
        match task.parameters_as::<CreateRequest>() {
            Ok(request) => self.create(&task, request, reporter).await,
            Err(err) => invalid_parameters(&task, err),
        }
    }
}

/// Format-specific content handed to the creation provider.
fn render_content(request: &CreateRequest) -> Value {
    let analysis = &request.analysis;
    match request.format {
        DeliverableFormat::Doc => json!({
            "title": request.title,
            "sections": [
                { "heading": "Executive Summary", "body": analysis.summary },
                { "heading": "Key Insights", "body": insight_lines(analysis) },
                { "heading": "Sources", "body": source_lines(analysis) },
            ],
        }),
        DeliverableFormat::Sheet => {
            let rows: Vec<Value> = analysis
                .insights
                .iter()
                .enumerate()
                .map(|(idx, insight)| {
                    let cited: Vec<&str> = insight
                        .citations
                        .iter()
                        .filter_map(|n| analysis.sources.get(n.wrapping_sub(1)))
                        .map(String::as_str)
                        .collect();
                    json!([idx + 1, insight.text, cited.join(", ")])
                })
                .collect();
            json!({
                "title": request.title,
                "header": ["#", "Insight", "Sources"],
                "rows": rows,
            })
        }
        DeliverableFormat::Slides => {
            let mut slides = vec![json!({ "title": request.title, "body": analysis.summary })];
            slides.extend(
                analysis
                    .insights
                    .iter()
                    .enumerate()
                    .map(|(idx, insight)| {
                        json!({ "title": format!("Insight {}", idx + 1), "body": insight.text })
                    }),
            );
            slides.push(json!({ "title": "Sources", "body": source_lines(analysis) }));
            json!({ "title": request.title, "slides": slides })
        }
    }
}

fn insight_lines(analysis: &AnalysisReport) -> Vec<String> {
    analysis
        .insights
        .iter()
        .map(|insight| {
            let markers: String = insight
                .citations
                .iter()
                .map(|idx| format!("[{idx}]"))
                .collect();
            if markers.is_empty() {
                insight.text.clone()
            } else {
                format!("{} {}", insight.text, markers)
            }
        })
        .collect()
}

fn source_lines(analysis: &AnalysisReport) -> Vec<String> {
    analysis
        .sources
        .iter()
        .enumerate()
        .map(|(idx, url)| format!("[{}] {}", idx + 1, url))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::NoopReporter;
    use crate::providers::{CreatedArtifact, ProviderError};
    use chrono::Utc;
    use legion_protocol::{ErrorKind, Insight};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingCreation {
        keys: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl CreationProvider for RecordingCreation {
        async fn create(
            &self,
            format: DeliverableFormat,
            _content: &Value,
            idempotency_key: &str,
        ) -> Result<CreatedArtifact, ProviderError> {
            self.keys.lock().push(idempotency_key.to_string());
            if self.fail {
                return Err(ProviderError::Unavailable("down".to_string()));
            }
            Ok(CreatedArtifact {
                external_ref: format!("ref-{format}"),
                title: String::new(),
                kind: None,
            })
        }
    }

    fn analysis() -> AnalysisReport {
        AnalysisReport {
            summary: "Summary".to_string(),
            insights: vec![Insight {
                text: "Prices fell".to_string(),
                citations: vec![1],
            }],
            sources: vec!["https://one.example".to_string()],
        }
    }

    fn create_task(format: DeliverableFormat) -> A2ATask {
        let request = CreateRequest {
            format,
            title: "Storage Report".to_string(),
            intent: "storage".to_string(),
            analysis: analysis(),
            idempotency_key: format!("m-1:{format}"),
        };
        A2ATask {
            task_id: Uuid::new_v4(),
            mission_id: Uuid::new_v4(),
            from_role: Some(AgentRole::Augur),
            to_role: AgentRole::Scribe,
            task_type: TaskType::CreateDeliverable,
            parameters: serde_json::to_value(request).expect("encode"),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn creates_descriptor_with_kind_from_format() {
        let creation = Arc::new(RecordingCreation::default());
        let agent = ScribeAgent::new(creation.clone());
        let response = agent
            .handle(create_task(DeliverableFormat::Sheet), Arc::new(NoopReporter))
            .await;
        let descriptor: DeliverableDescriptor = response.payload_as().expect("payload");
        assert_eq!(descriptor.kind, DeliverableKind::Sheet);
        assert_eq!(descriptor.title, "Storage Report".to_string());
        assert_eq!(descriptor.external_ref, "ref-sheet".to_string());
        assert_eq!(creation.keys.lock().clone(), vec!["m-1:sheet".to_string()]);
    }

    #[tokio::test]
    async fn creation_failure_is_not_retried() {
        let creation = Arc::new(RecordingCreation {
            keys: Mutex::new(Vec::new()),
            fail: true,
        });
        let agent = ScribeAgent::new(creation.clone());
        let response = agent
            .handle(create_task(DeliverableFormat::Doc), Arc::new(NoopReporter))
            .await;
        assert_eq!(response.error_kind(), Some(ErrorKind::ProviderUnavailable));
        assert_eq!(creation.keys.lock().len(), 1);
    }

    #[test]
    fn sheet_rows_resolve_citations() {
        let request = CreateRequest {
            format: DeliverableFormat::Sheet,
            title: "T".to_string(),
            intent: "i".to_string(),
            analysis: analysis(),
            idempotency_key: "k".to_string(),
        };
        let content = render_content(&request);
        assert_eq!(
            content["rows"],
            json!([[1, "Prices fell", "https://one.example"]])
        );
    }
}
