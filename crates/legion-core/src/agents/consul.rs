//! CONSUL: turns free-text intent into an ordered research plan.

use super::{Agent, AgentCard, ProgressReporter, card, invalid_parameters, unsupported};
use crate::providers::ReasoningProvider;
use async_trait::async_trait;
use legion_protocol::{
    A2AError, A2AResponse, A2ATask, AgentRole, DeliverableFormat, PlanOutcome, PlanRequest,
    PlannedQuestion, Progress, RefineRequest, TaskType,
};
use log::{debug, warn};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Questions extracted from free text below this count are replaced wholesale.
const MIN_EXTRACTED_QUESTIONS: usize = 3;

pub struct ConsulAgent {
    reasoning: Arc<dyn ReasoningProvider>,
}

impl ConsulAgent {
    pub fn new(reasoning: Arc<dyn ReasoningProvider>) -> Self {
        Self { reasoning }
    }

    async fn plan(
        &self,
        task: &A2ATask,
        request: PlanRequest,
        reporter: Arc<dyn ProgressReporter>,
    ) -> A2AResponse {
        reporter.thinking(&format!(
            "Breaking down the mission into research questions: {}",
            request.intent
        ));
        reporter.progress(Progress::percent(10));
        let prompt = plan_prompt(&request.intent, request.max_questions);
        let context = json!({ "task": "plan_mission", "intent": request.intent });
        let text = match self.reasoning.complete(&prompt, &context).await {
            Ok(text) => text,
            Err(err) => {
                warn!("planning call failed (task_id={}, error={})", task.task_id, err);
                return A2AResponse::failed(task.task_id, A2AError::new(err.kind(), err.to_string()));
            }
        };
        let mut outcome = parse_plan(
            &text,
            &request.intent,
            request.max_questions,
            default_questions(&request.intent),
        );
        if !request.requested_formats.is_empty() {
            outcome.formats = dedup_formats(request.requested_formats);
        }
        reporter.progress(Progress::percent(90));
        reporter.thinking(&format!(
            "Drafted {} research questions for approval",
            outcome.questions.len()
        ));
        A2AResponse::completed(task.task_id, outcome)
    }

    async fn refine(
        &self,
        task: &A2ATask,
        request: RefineRequest,
        reporter: Arc<dyn ProgressReporter>,
    ) -> A2AResponse {
        reporter.thinking(&format!("Revising the plan: {}", request.feedback));
        reporter.progress(Progress::percent(10));
        let prompt = refine_prompt(&request);
        let context = json!({
            "task": "refine_plan",
            "intent": request.intent,
            "feedback": request.feedback,
        });
        let text = match self.reasoning.complete(&prompt, &context).await {
            Ok(text) => text,
            Err(err) => {
                warn!("refine call failed (task_id={}, error={})", task.task_id, err);
                return A2AResponse::failed(task.task_id, A2AError::new(err.kind(), err.to_string()));
            }
        };
        let fallback = if request.current_questions.is_empty() {
            default_questions(&request.intent)
        } else {
            request.current_questions.clone()
        };
        let outcome = parse_plan(&text, &request.intent, request.max_questions, fallback);
        reporter.progress(Progress::percent(90));
        A2AResponse::completed(task.task_id, outcome)
    }
}

#[async_trait]
impl Agent for ConsulAgent {
    fn card(&self) -> AgentCard {
        card(
            AgentRole::Consul,
            "Mission planner: decomposes intent into prioritized research questions",
            vec![TaskType::PlanMission, TaskType::RefinePlan],
        )
    }

    async fn handle(&self, task: A2ATask, reporter: Arc<dyn ProgressReporter>) -> A2AResponse {
        match task.task_type {
            TaskType::PlanMission => match task.parameters_as::<PlanRequest>() {
                Ok(request) => self.plan(&task, request, reporter).await,
                Err(err) => invalid_parameters(&task, err),
            },
            TaskType::RefinePlan => match task.parameters_as::<RefineRequest>() {
                Ok(request) => self.refine(&task, request, reporter).await,
                Err(err) => invalid_parameters(&task, err),
            },
            _ => unsupported(&task, AgentRole::Consul),
        }
    }
}

fn plan_prompt(intent: &str, max_questions: usize) -> String {
    format!(
        "Research mission: {intent}\n\n\
         Create up to {max_questions} specific research questions that cover the topic, \
         are answerable through research, and together support a final report.\n\
         Consider: current state, key players, trends, challenges and opportunities, \
         market impact, future outlook.\n\n\
         Respond with JSON:\n\
         {{\"summary\": \"one sentence\", \"research_questions\": [{{\"question\": \"...\", \
         \"category\": \"current_state|key_players|trends|challenges|market_impact|future_outlook\", \
         \"priority\": 1, \"context\": \"why it matters\"}}], \"formats\": [\"doc\"]}}"
    )
}

fn refine_prompt(request: &RefineRequest) -> String {
    let current: Vec<String> = request
        .current_questions
        .iter()
        .enumerate()
        .map(|(idx, question)| format!("{}. {}", idx + 1, question.text))
        .collect();
    format!(
        "Research mission: {}\n\nCurrent questions:\n{}\n\nUser feedback: {}\n\n\
         Revise the questions (at most {}) to address the feedback. \
         Respond with the same JSON shape as the original plan.",
        request.intent,
        current.join("\n"),
        request.feedback,
        request.max_questions
    )
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default, alias = "questions")]
    research_questions: Vec<RawQuestion>,
    #[serde(default)]
    formats: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawQuestion {
    #[serde(default, alias = "text")]
    question: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    priority: Option<Value>,
    #[serde(default)]
    context: Option<String>,
}

/// Parse a plan from provider text.
///
/// Order of preference: the outermost JSON object, then question-mark lines,
/// then `fallback`. Results are capped at `max_questions`.
pub(crate) fn parse_plan(
    text: &str,
    intent: &str,
    max_questions: usize,
    fallback: Vec<PlannedQuestion>,
) -> PlanOutcome {
    let raw = extract_json(text);
    let mut questions = raw
        .as_ref()
        .map(|plan| questions_from_json(plan, intent))
        .unwrap_or_default();
    if questions.is_empty() {
        questions = extract_questions(text, intent);
        if questions.len() < MIN_EXTRACTED_QUESTIONS {
            debug!(
                "plan text yielded too few questions; using fallback (extracted={})",
                questions.len()
            );
            questions = fallback;
        }
    }
    questions.truncate(max_questions.max(1));

    let mut formats = raw
        .as_ref()
        .map(|plan| {
            plan.formats
                .iter()
                .filter_map(|name| name.parse::<DeliverableFormat>().ok())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if formats.is_empty() {
        formats = formats_from_intent(intent);
    }

    let summary = raw
        .and_then(|plan| plan.summary)
        .filter(|summary| !summary.trim().is_empty())
        .unwrap_or_else(|| {
            format!(
                "Research plan for {intent} covering {} questions",
                questions.len()
            )
        });
    PlanOutcome {
        summary,
        questions,
        formats: dedup_formats(formats),
    }
}

fn extract_json(text: &str) -> Option<RawPlan> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn questions_from_json(plan: &RawPlan, intent: &str) -> Vec<PlannedQuestion> {
    plan.research_questions
        .iter()
        .filter(|raw| !raw.question.trim().is_empty())
        .enumerate()
        .map(|(idx, raw)| {
            let text = raw.question.trim().to_string();
            PlannedQuestion {
                category: raw
                    .category
                    .clone()
                    .filter(|category| !category.is_empty())
                    .unwrap_or_else(|| categorize(&text).to_string()),
                priority: raw
                    .priority
                    .as_ref()
                    .and_then(Value::as_u64)
                    .and_then(|priority| u32::try_from(priority).ok())
                    .unwrap_or(idx as u32 + 1),
                context: raw
                    .context
                    .clone()
                    .unwrap_or_else(|| format!("Research question for {intent}")),
                text,
            }
        })
        .collect()
}

/// Pull question-mark lines out of free text, stripping numbering and bullets.
fn extract_questions(text: &str, intent: &str) -> Vec<PlannedQuestion> {
    let Ok(prefix) = Regex::new(r"^[\d.\-*•)\s]+") else {
        return Vec::new();
    };
    text.lines()
        .map(str::trim)
        .filter(|line| line.contains('?'))
        .map(|line| prefix.replace(line, "").trim().to_string())
        .filter(|line| line.chars().count() > 10)
        .enumerate()
        .map(|(idx, line)| PlannedQuestion {
            category: categorize(&line).to_string(),
            priority: idx as u32 + 1,
            context: format!("Research question for {intent}"),
            text: line,
        })
        .collect()
}

fn categorize(question: &str) -> &'static str {
    let lower = question.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|word| lower.contains(word));
    if has(&["current", "status", "state", "today", "now"]) {
        "current_state"
    } else if has(&["who", "companies", "organizations", "players", "leaders"]) {
        "key_players"
    } else if has(&["trends", "developments", "changes", "innovations"]) {
        "trends"
    } else if has(&["challenges", "problems", "opportunities", "solutions"]) {
        "challenges"
    } else if has(&["market", "economic", "financial", "cost", "revenue"]) {
        "market_impact"
    } else if has(&["future", "outlook", "forecast", "prediction", "will"]) {
        "future_outlook"
    } else {
        "general"
    }
}

/// Topic-generic plan used when the provider's answer has no usable questions.
pub(crate) fn default_questions(intent: &str) -> Vec<PlannedQuestion> {
    [
        (format!("What is the current state of {intent}?"), "current_state"),
        (format!("Who are the key players in {intent}?"), "key_players"),
        (format!("What are the latest trends in {intent}?"), "trends"),
        (
            format!("What challenges and opportunities exist in {intent}?"),
            "challenges",
        ),
        (format!("What is the market impact of {intent}?"), "market_impact"),
        (format!("What does the future hold for {intent}?"), "future_outlook"),
    ]
    .into_iter()
    .enumerate()
    .map(|(idx, (text, category))| PlannedQuestion {
        text,
        category: category.to_string(),
        priority: idx as u32 + 1,
        context: format!("Research question for {intent}"),
    })
    .collect()
}

fn formats_from_intent(intent: &str) -> Vec<DeliverableFormat> {
    let lower = intent.to_lowercase();
    let mut formats = Vec::new();
    if ["spreadsheet", "sheet", "table"]
        .iter()
        .any(|word| lower.contains(word))
    {
        formats.push(DeliverableFormat::Sheet);
    }
    if ["slides", "presentation", "deck"]
        .iter()
        .any(|word| lower.contains(word))
    {
        formats.push(DeliverableFormat::Slides);
    }
    if ["report", "document", "doc "]
        .iter()
        .any(|word| lower.contains(word))
    {
        formats.push(DeliverableFormat::Doc);
    }
    formats
}

fn dedup_formats(formats: Vec<DeliverableFormat>) -> Vec<DeliverableFormat> {
    formats
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
