use async_trait::async_trait;
use legion_core::{ProviderError, ReasoningProvider};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Plan text with three questions and a doc deliverable.
pub const THREE_QUESTION_PLAN: &str = r#"{
  "summary": "Three-part research plan",
  "research_questions": [
    {"question": "What is the current state of the topic?", "category": "current_state", "priority": 1},
    {"question": "Who are the key players in the topic?", "category": "key_players", "priority": 2},
    {"question": "What are the latest trends in the topic?", "category": "trends", "priority": 3}
  ],
  "formats": ["doc"]
}"#;

/// Analysis text with two cited insights.
pub const TWO_INSIGHT_ANALYSIS: &str = r#"{
  "summary": "The topic is growing quickly",
  "insights": [
    {"text": "Adoption doubled over the last year", "citations": [1]},
    {"text": "A handful of vendors dominate supply", "citations": [2]}
  ]
}"#;

/// Reasoning double that answers by task kind (`plan_mission`, `refine_plan`, `analyze`).
#[derive(Clone)]
pub struct ScriptedReasoning {
    plan: String,
    refine: String,
    analysis: String,
    delay: Option<Duration>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedReasoning {
    pub fn new() -> Self {
        Self {
            plan: THREE_QUESTION_PLAN.to_string(),
            refine: THREE_QUESTION_PLAN.to_string(),
            analysis: TWO_INSIGHT_ANALYSIS.to_string(),
            delay: None,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = plan.into();
        self
    }

    pub fn with_refine(mut self, refine: impl Into<String>) -> Self {
        self.refine = refine.into();
        self
    }

    pub fn with_analysis(mut self, analysis: impl Into<String>) -> Self {
        self.analysis = analysis.into();
        self
    }

    /// Wait this long before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

impl Default for ScriptedReasoning {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReasoningProvider for ScriptedReasoning {
    async fn complete(&self, prompt: &str, context: &Value) -> Result<String, ProviderError> {
        self.prompts.lock().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match context.get("task").and_then(Value::as_str) {
            Some("plan_mission") => Ok(self.plan.clone()),
            Some("refine_plan") => Ok(self.refine.clone()),
            Some("analyze") => Ok(self.analysis.clone()),
            other => Err(ProviderError::InvalidResponse(format!(
                "unscripted task: {other:?}"
            ))),
        }
    }
}

/// Reasoning double that fails selected task kinds and scripts the rest.
#[derive(Clone)]
pub struct FailingReasoning {
    inner: ScriptedReasoning,
    failing: Vec<&'static str>,
    error: ProviderError,
}

impl FailingReasoning {
    /// Fail every call with `error`.
    pub fn new(error: ProviderError) -> Self {
        Self {
            inner: ScriptedReasoning::new(),
            failing: vec!["plan_mission", "refine_plan", "analyze"],
            error,
        }
    }

    /// Fail only the listed task kinds; others answer like [`ScriptedReasoning`].
    pub fn only(tasks: Vec<&'static str>, error: ProviderError) -> Self {
        Self {
            inner: ScriptedReasoning::new(),
            failing: tasks,
            error,
        }
    }
}

#[async_trait]
impl ReasoningProvider for FailingReasoning {
    async fn complete(&self, prompt: &str, context: &Value) -> Result<String, ProviderError> {
        let task = context.get("task").and_then(Value::as_str).unwrap_or("");
        if self.failing.iter().any(|failing| *failing == task) {
            return Err(self.error.clone());
        }
        self.inner.complete(prompt, context).await
    }
}
