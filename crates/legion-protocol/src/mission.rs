//! Mission records shared by the state store, the event stream, and observers.

use crate::a2a::{A2AError, AgentRole, TaskType};
use crate::{DeliverableId, MissionId, OperationId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Lifecycle phase of a mission.
///
/// Phases only move forward through
/// `planning -> collecting -> analyzing -> creating -> completed`; `failed`
/// is reachable from every non-terminal phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// CONSUL is drafting the plan, or the plan awaits user approval.
    Planning,
    /// CENTURION is collecting data, one task per question.
    Collecting,
    /// AUGUR is synthesizing insights from the collected data.
    Analyzing,
    /// SCRIBE is producing deliverables, one task per format.
    Creating,
    /// Terminal success.
    Completed,
    /// Terminal failure (including cancellation).
    Failed,
}

impl Phase {
    /// Return the phase as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Collecting => "collecting",
            Phase::Analyzing => "analyzing",
            Phase::Creating => "creating",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }

    /// Whether no further work may happen in this phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    /// The phase that follows this one on the success path.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Planning => Some(Phase::Collecting),
            Phase::Collecting => Some(Phase::Analyzing),
            Phase::Analyzing => Some(Phase::Creating),
            Phase::Creating => Some(Phase::Completed),
            Phase::Completed | Phase::Failed => None,
        }
    }

    /// Check whether moving from `self` to `to` keeps the phase monotonic.
    pub fn can_transition_to(&self, to: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Phase::Failed || self.next() == Some(to)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collection status of a single research question.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Pending,
    Collecting,
    Done,
    Failed,
}

impl QuestionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QuestionStatus::Done | QuestionStatus::Failed)
    }
}

/// One decomposed research sub-goal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    /// Sequence number, unique within the mission (1-based).
    pub id: u32,
    /// The question text.
    pub text: String,
    /// Coarse topic bucket (`trends`, `key_players`, ...).
    #[serde(default = "default_category")]
    pub category: String,
    /// Ordering hint, lower is more important.
    pub priority: u32,
    /// Why the question matters to the mission.
    #[serde(default)]
    pub context: String,
    pub status: QuestionStatus,
    /// Collected snippets once the question is `done`.
    #[serde(default)]
    pub findings: Option<CollectedData>,
    /// Failure reason once the question is `failed`.
    #[serde(default)]
    pub error: Option<String>,
}

fn default_category() -> String {
    "general".to_string()
}

/// Status of a dispatched A2A task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Dispatched,
    Completed,
    Failed,
    TimedOut,
    /// The mission was cancelled while the task was in flight.
    Abandoned,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Dispatched)
    }
}

/// Stored view of an A2A task and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub mission_id: MissionId,
    /// Role the work was handed over from; `None` when it came from the user.
    pub from_role: Option<AgentRole>,
    pub to_role: AgentRole,
    pub task_type: TaskType,
    pub parameters: Value,
    #[serde(default)]
    pub question_id: Option<u32>,
    #[serde(default)]
    pub format: Option<DeliverableFormat>,
    pub status: TaskStatus,
    #[serde(default)]
    pub error: Option<A2AError>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Kind of observer-visible work an operation represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Planning,
    Searching,
    Analyzing,
    Composing,
    QuestionResearch,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Active,
    Waiting,
    Completed,
}

/// Progress of an operation: a percentage or a free-form note.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Progress {
    Percent(u8),
    Note(String),
}

impl Progress {
    /// Build a percentage, clamped to 100.
    pub fn percent(value: u8) -> Self {
        Progress::Percent(value.min(100))
    }
}

/// Observer-visible progress record for one in-flight task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    pub id: OperationId,
    pub agent: AgentRole,
    pub kind: OperationKind,
    pub title: String,
    pub status: OperationStatus,
    pub progress: Progress,
    #[serde(default)]
    pub question_id: Option<u32>,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kind of log entry in the mission message log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Thinking,
    Conversation,
    Announcement,
    Status,
}

/// Entry in the append-only mission message log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Position in the log, assigned by the store (1-based).
    pub seq: u64,
    pub from: String,
    /// Recipient; `None` for broadcasts and announcements.
    #[serde(default)]
    pub to: Option<String>,
    pub text: String,
    pub kind: MessageKind,
    #[serde(default)]
    pub question_id: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

/// Output format a mission can request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DeliverableFormat {
    Doc,
    Sheet,
    Slides,
}

impl DeliverableFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliverableFormat::Doc => "doc",
            DeliverableFormat::Sheet => "sheet",
            DeliverableFormat::Slides => "slides",
        }
    }
}

impl fmt::Display for DeliverableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliverableFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "doc" | "docs" | "document" => Ok(DeliverableFormat::Doc),
            "sheet" | "sheets" | "spreadsheet" => Ok(DeliverableFormat::Sheet),
            "slides" | "slide" | "presentation" => Ok(DeliverableFormat::Slides),
            other => Err(format!("unknown deliverable format: {other}")),
        }
    }
}

/// Kind of artifact a deliverable points to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliverableKind {
    Report,
    Analysis,
    Doc,
    Sheet,
    Slides,
}

impl From<DeliverableFormat> for DeliverableKind {
    fn from(format: DeliverableFormat) -> Self {
        match format {
            DeliverableFormat::Doc => DeliverableKind::Doc,
            DeliverableFormat::Sheet => DeliverableKind::Sheet,
            DeliverableFormat::Slides => DeliverableKind::Slides,
        }
    }
}

/// Finished output artifact reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deliverable {
    pub id: DeliverableId,
    pub title: String,
    pub kind: DeliverableKind,
    pub format: DeliverableFormat,
    /// Reference into the creation provider's namespace.
    pub external_ref: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a format whose creation did not succeed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormatFailure {
    pub format: DeliverableFormat,
    pub error: String,
}

/// A collected piece of evidence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snippet {
    pub content: String,
    pub source_url: String,
    #[serde(default)]
    pub credibility: Option<f32>,
}

/// Everything CENTURION gathered for one question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectedData {
    pub question_id: u32,
    pub query: String,
    pub snippets: Vec<Snippet>,
    /// Distinct source URLs in first-seen order.
    pub citations: Vec<String>,
}

/// A single synthesized finding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Insight {
    pub text: String,
    /// 1-based indices into [`AnalysisReport::sources`].
    #[serde(default)]
    pub citations: Vec<usize>,
}

/// AUGUR's synthesis over all collected data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisReport {
    pub summary: String,
    pub insights: Vec<Insight>,
    pub sources: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn phase_only_moves_forward() {
        assert_eq!(Phase::Planning.can_transition_to(Phase::Collecting), true);
        assert_eq!(Phase::Planning.can_transition_to(Phase::Analyzing), false);
        assert_eq!(Phase::Analyzing.can_transition_to(Phase::Collecting), false);
        assert_eq!(Phase::Creating.can_transition_to(Phase::Completed), true);
        assert_eq!(Phase::Collecting.can_transition_to(Phase::Failed), true);
        assert_eq!(Phase::Completed.can_transition_to(Phase::Failed), false);
        assert_eq!(Phase::Failed.can_transition_to(Phase::Failed), false);
    }

    #[test]
    fn format_parses_aliases() {
        assert_eq!(
            "Spreadsheet".parse::<DeliverableFormat>(),
            Ok(DeliverableFormat::Sheet)
        );
        assert_eq!(
            "presentation".parse::<DeliverableFormat>(),
            Ok(DeliverableFormat::Slides)
        );
        assert_eq!(
            "doc".parse::<DeliverableFormat>(),
            Ok(DeliverableFormat::Doc)
        );
        assert!("video".parse::<DeliverableFormat>().is_err());
    }

    #[test]
    fn progress_serializes_untagged() {
        let percent = serde_json::to_value(Progress::percent(140)).expect("serialize");
        assert_eq!(percent, serde_json::json!(100));
        let note = serde_json::to_value(Progress::Note("waiting".to_string())).expect("serialize");
        assert_eq!(note, serde_json::json!("waiting"));
    }
}
