//! AUGUR: synthesizes insights across everything that was collected.

use super::{Agent, AgentCard, ProgressReporter, card, invalid_parameters, unsupported};
use crate::providers::ReasoningProvider;
use async_trait::async_trait;
use legion_protocol::{
    A2AError, A2AResponse, A2ATask, AgentRole, AnalysisReport, AnalyzeRequest, ErrorKind, Insight,
    Progress, QuestionFindings, TaskType,
};
use log::{debug, warn};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Snippets per question included in the analysis prompt.
const SNIPPETS_PER_QUESTION: usize = 5;

pub struct AugurAgent {
    reasoning: Arc<dyn ReasoningProvider>,
}

impl AugurAgent {
    pub fn new(reasoning: Arc<dyn ReasoningProvider>) -> Self {
        Self { reasoning }
    }

    async fn analyze(
        &self,
        task: &A2ATask,
        request: AnalyzeRequest,
        reporter: Arc<dyn ProgressReporter>,
    ) -> A2AResponse {
        let sources = source_index(&request.findings);
        reporter.thinking(&format!(
            "Analyzing findings from {} questions across {} sources",
            request.findings.len(),
            sources.len()
        ));
        reporter.progress(Progress::percent(10));
        let prompt = analysis_prompt(&request, &sources);
        let context = json!({ "task": "analyze", "intent": request.intent });
        let text = match self.reasoning.complete(&prompt, &context).await {
            Ok(text) => text,
            Err(err) => {
                warn!("analysis call failed (task_id={}, error={})", task.task_id, err);
                return A2AResponse::failed(task.task_id, A2AError::new(err.kind(), err.to_string()));
            }
        };
        let report = parse_report(&text, &request.intent, sources);
        if report.insights.is_empty() {
            return A2AResponse::failed(
                task.task_id,
                A2AError::new(ErrorKind::Internal, "analysis produced no insights"),
            );
        }
        debug!(
            "analysis parsed (task_id={}, insights={}, sources={})",
            task.task_id,
            report.insights.len(),
            report.sources.len()
        );
        reporter.progress(Progress::percent(100));
        reporter.thinking(&format!("Identified {} key insights", report.insights.len()));
        A2AResponse::completed(task.task_id, report)
    }
}

#[async_trait]
impl Agent for AugurAgent {
    fn card(&self) -> AgentCard {
        card(
            AgentRole::Augur,
            "Analyst: synthesizes cited insights from collected evidence",
            vec![TaskType::Analyze],
        )
    }

    async fn handle(&self, task: A2ATask, reporter: Arc<dyn ProgressReporter>) -> A2AResponse {
        if task.task_type != TaskType::Analyze {
            return unsupported(&task, AgentRole::Augur);
        }
        match task.parameters_as::<AnalyzeRequest>() {
            Ok(request) => self.analyze(&task, request, reporter).await,
            Err(err) => invalid_parameters(&task, err),
        }
    }
}

/// Distinct source URLs across all findings, in first-seen order.
fn source_index(findings: &[QuestionFindings]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for finding in findings {
        for url in &finding.data.citations {
            if !sources.contains(url) {
                sources.push(url.clone());
            }
        }
    }
    sources
}

fn analysis_prompt(request: &AnalyzeRequest, sources: &[String]) -> String {
    let positions: HashMap<&str, usize> = sources
        .iter()
        .enumerate()
        .map(|(idx, url)| (url.as_str(), idx + 1))
        .collect();
    let mut body = String::new();
    for finding in &request.findings {
        body.push_str(&format!(
            "\nQuestion #{}: {}\n",
            finding.question_id, finding.question
        ));
        for snippet in finding.data.snippets.iter().take(SNIPPETS_PER_QUESTION) {
            let marker = positions
                .get(snippet.source_url.as_str())
                .map(|idx| format!("[{idx}]"))
                .unwrap_or_default();
            body.push_str(&format!("- {} {}\n", snippet.content.trim(), marker));
        }
    }
    let listing: Vec<String> = sources
        .iter()
        .enumerate()
        .map(|(idx, url)| format!("[{}] {}", idx + 1, url))
        .collect();
    format!(
        "Research mission: {}\n\nCollected evidence:{}\nSources:\n{}\n\n\
         Synthesize the key insights. Cite sources by number.\n\
         Respond with JSON: {{\"summary\": \"...\", \"insights\": [{{\"text\": \"...\", \"citations\": [1]}}]}}",
        request.intent,
        body,
        listing.join("\n")
    )
}

#[derive(Debug, Deserialize)]
struct RawReport {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default, alias = "key_insights")]
    insights: Vec<RawInsight>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawInsight {
    Text(String),
    Cited {
        #[serde(alias = "insight")]
        text: String,
        #[serde(default)]
        citations: Vec<usize>,
    },
}

/// Parse the provider's answer into a report.
///
/// Citation indices outside `1..=sources.len()` are dropped.
pub(crate) fn parse_report(text: &str, intent: &str, sources: Vec<String>) -> AnalysisReport {
    let (summary, mut insights) = match extract_json(text) {
        Some(raw) => {
            let insights = raw
                .insights
                .into_iter()
                .map(|insight| match insight {
                    RawInsight::Text(text) => Insight {
                        text,
                        citations: Vec::new(),
                    },
                    RawInsight::Cited { text, citations } => Insight { text, citations },
                })
                .filter(|insight| !insight.text.trim().is_empty())
                .collect();
            (raw.summary, insights)
        }
        None => (None, insights_from_lines(text)),
    };
    for insight in &mut insights {
        insight
            .citations
            .retain(|idx| *idx >= 1 && *idx <= sources.len());
        insight.citations.dedup();
    }
    let summary = summary
        .filter(|summary| !summary.trim().is_empty())
        .unwrap_or_else(|| format!("Analysis of {intent}: {} key insights", insights.len()));
    AnalysisReport {
        summary,
        insights,
        sources,
    }
}

fn extract_json(text: &str) -> Option<RawReport> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Bullet or numbered lines become insights; `[n]` markers become citations.
fn insights_from_lines(text: &str) -> Vec<Insight> {
    let Ok(bullet) = Regex::new(r"^(?:[-*•]|\d+[.)])\s+") else {
        return Vec::new();
    };
    let Ok(marker) = Regex::new(r"\[(\d+)\]") else {
        return Vec::new();
    };
    text.lines()
        .map(str::trim)
        .filter(|line| bullet.is_match(line))
        .filter_map(|line| {
            let body = bullet.replace(line, "");
            let citations: Vec<usize> = marker
                .captures_iter(&body)
                .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
                .collect();
            let text = marker.replace_all(&body, "").trim().to_string();
            (text.chars().count() > 10).then_some(Insight { text, citations })
        })
        .collect()
}
