//! Core data models for survey projects.
//!
//! These types mirror the JSON records exchanged with the survey service:
//! sections and cells (questions or text blocks), topic assignments with
//! AI suggestion batches, and the context (intake) questions answered
//! before a draft is generated.
//!
//! Every record tolerates missing fields on input (`#[serde(default)]`)
//! and keeps fields it does not know about in an `extra` map, so a record
//! loaded from the service can be written back without losing data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Name of the topic that always exists and cannot be deleted.
pub const UNCLASSIFIED: &str = "Unclassified";

/// Title given to sections created with [`add_section`](crate::store::project::ProjectDetailStore::add_section).
pub const DEFAULT_SECTION_TITLE: &str = "New Section";

/// Fresh identifier for a locally created cell.
pub fn new_cell_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Whether a cell is a question or a free text block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    #[default]
    Question,
    Text,
}

/// How respondents answer a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    Open,
    Closed,
    Slider,
    #[default]
    #[serde(rename = "")]
    Unspecified,
}

impl ResponseFormat {
    /// The other format of an open/closed pair. `None` for sliders and
    /// unspecified formats.
    pub fn switched(self) -> Option<Self> {
        match self {
            Self::Open => Some(Self::Closed),
            Self::Closed => Some(Self::Open),
            Self::Slider | Self::Unspecified => None,
        }
    }
}

/// Provenance label for a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanAiStatus {
    #[default]
    Human,
    Ai,
    HumanAi,
}

impl HumanAiStatus {
    /// Label after the AI rewrites the cell: anything a human touched
    /// becomes `HumanAi`.
    pub fn after_ai_edit(self) -> Self {
        match self {
            Self::Human | Self::HumanAi => Self::HumanAi,
            Self::Ai => Self::Ai,
        }
    }
}

/// Kind of engagement the survey is written for. Drives time estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementType {
    Survey,
    Interview,
    Conversation,
    #[default]
    #[serde(rename = "")]
    Unspecified,
}

impl EngagementType {
    /// Map the label shown to users in the context questions
    /// (`"Survey"`, `"Interview"`, `"Conversation Guide"`).
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "survey" => Self::Survey,
            "interview" => Self::Interview,
            "conversation guide" | "conversation" => Self::Conversation,
            _ => Self::Unspecified,
        }
    }
}

/// The user-visible content of a cell.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CellDetails {
    pub cell_type: CellType,
    pub main_text: String,
    pub description: String,
    pub response_format: ResponseFormat,
    pub response_categories: Vec<String>,
}

/// A question or text block, owned by exactly one section.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Cell {
    /// Back-reference to the owning section's `id`.
    pub section_index: usize,
    pub cell_details: CellDetails,
    pub human_ai_status: HumanAiStatus,
    /// Minutes.
    pub time_estimate: f64,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub last_updated: Option<DateTime<Utc>>,
    pub ai_rationale: String,
    pub checks_to_ignore: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Cell {
    /// A human-authored question with the given text.
    pub fn question(main_text: impl Into<String>, response_format: ResponseFormat) -> Self {
        Self {
            cell_details: CellDetails {
                cell_type: CellType::Question,
                main_text: main_text.into(),
                response_format,
                ..CellDetails::default()
            },
            ..Self::default()
        }
    }

    /// A human-authored text block.
    pub fn text(main_text: impl Into<String>) -> Self {
        Self {
            cell_details: CellDetails {
                cell_type: CellType::Text,
                main_text: main_text.into(),
                ..CellDetails::default()
            },
            ..Self::default()
        }
    }

    pub fn is_question(&self) -> bool {
        self.cell_details.cell_type == CellType::Question
    }
}

/// An ordered group of cells. `id` always equals the section's position.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Section {
    pub id: usize,
    pub title: String,
    pub cells: Vec<String>,
}

/// Lightweight project entry returned when logging in.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSummary {
    pub project_id: String,
    pub project_title: String,
}

/// Cells assigned to one topic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Topic {
    pub cells: Vec<String>,
    pub suggestion_rationale: String,
}

/// Discriminant of a [`SuggestionBatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionType {
    Add,
    Delete,
}

/// A candidate question the AI proposes adding to a topic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddSuggestion {
    pub cell_details: CellDetails,
    /// Section the user picked for the new question, if any.
    pub section_id: Option<usize>,
    pub time_estimate: f64,
    pub rationale: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An existing cell the AI proposes removing from the survey.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteSuggestion {
    pub cell_id: String,
    pub rationale: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One batch of AI suggestions for a topic, tagged by `suggestion_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "suggestion_type", rename_all = "lowercase")]
pub enum SuggestionBatch {
    Add {
        #[serde(default)]
        suggestions: Vec<AddSuggestion>,
    },
    Delete {
        #[serde(default)]
        suggestions: Vec<DeleteSuggestion>,
    },
}

impl SuggestionBatch {
    pub fn suggestion_type(&self) -> SuggestionType {
        match self {
            Self::Add { .. } => SuggestionType::Add,
            Self::Delete { .. } => SuggestionType::Delete,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Add { suggestions } => suggestions.len(),
            Self::Delete { suggestions } => suggestions.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An AI rewrite of a cell, as returned by the rewording and format
/// switching endpoints.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Rewording {
    pub cell_details: CellDetails,
    pub time_estimate: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A rewrite proposed by the question check, with the checks it fixes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckSuggestion {
    pub cell_details: CellDetails,
    pub time_estimate: f64,
    pub fixed_checks: Vec<String>,
    pub flagged_checks: Vec<String>,
    pub num_fixed: usize,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<CheckSuggestion> for Rewording {
    fn from(suggestion: CheckSuggestion) -> Self {
        Self {
            cell_details: suggestion.cell_details,
            time_estimate: suggestion.time_estimate,
            extra: suggestion.extra,
        }
    }
}

/// Identifies a single suggestion inside a topic's batches.
///
/// Add suggestions are matched by their main text, delete suggestions by
/// the cell they target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SuggestionKey {
    Add { main_text: String },
    Delete { cell_id: String },
}

/// An intake question with the user's response and its validation state.
///
/// A two-part question carries `part_2_response: Some(..)`; single-part
/// questions leave it `None` and omit it on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextQuestion {
    /// Slider answers arrive as numbers and are kept in string form.
    #[serde(deserialize_with = "string_or_number")]
    pub response: String,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "opt_string_or_number"
    )]
    pub part_2_response: Option<String>,
    /// Required-field violations.
    pub errors: Vec<String>,
    /// Advisory findings from the remote response check.
    pub warnings: Vec<String>,
    /// Whether a remote check ran since the response last changed.
    pub checked_warnings: bool,
    pub ignored_warnings: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContextQuestion {
    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            ..Self::default()
        }
    }

    /// The text sent for checking: `response` or `response: part 2`.
    pub fn full_response(&self) -> String {
        match &self.part_2_response {
            Some(part_2) => format!("{}: {}", self.response, part_2),
            None => self.response.clone(),
        }
    }
}

fn value_to_string(value: Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(format!("expected string or number, got {}", other)),
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_to_string(value).map_err(serde::de::Error::custom)
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        value => value_to_string(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Accepts RFC 3339 strings; `null`, `""` and unparseable values become `None`.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cell_keeps_unknown_fields() {
        let raw = json!({
            "cell_id": "c1",
            "project_id": "p1",
            "section_index": 2,
            "cell_details": {"cell_type": "question", "main_text": "How old are you?", "response_format": "slider"},
            "human_ai_status": "human_ai",
            "time_estimate": 1.5,
            "last_updated": ""
        });
        let cell: Cell = serde_json::from_value(raw).unwrap();
        assert_eq!(cell.section_index, 2);
        assert_eq!(cell.human_ai_status, HumanAiStatus::HumanAi);
        assert_eq!(cell.cell_details.response_format, ResponseFormat::Slider);
        assert!(cell.last_updated.is_none());
        assert_eq!(cell.extra.get("cell_id"), Some(&json!("c1")));

        let back = serde_json::to_value(&cell).unwrap();
        assert_eq!(back["project_id"], json!("p1"));
        assert_eq!(back["cell_details"]["response_format"], json!("slider"));
    }

    #[test]
    fn test_empty_response_format() {
        let details: CellDetails = serde_json::from_value(json!({"response_format": ""})).unwrap();
        assert_eq!(details.response_format, ResponseFormat::Unspecified);
        assert_eq!(details.cell_type, CellType::Question);
    }

    #[test]
    fn test_suggestion_batch_tagging() {
        let batch: SuggestionBatch = serde_json::from_value(json!({
            "suggestion_type": "delete",
            "suggestions": [{"cell_id": "c9", "rationale": "Duplicate"}]
        }))
        .unwrap();
        assert_eq!(batch.suggestion_type(), SuggestionType::Delete);
        assert_eq!(batch.len(), 1);
        let back = serde_json::to_value(&batch).unwrap();
        assert_eq!(back["suggestion_type"], json!("delete"));
    }

    #[test]
    fn test_after_ai_edit_and_switched_format() {
        assert_eq!(HumanAiStatus::Human.after_ai_edit(), HumanAiStatus::HumanAi);
        assert_eq!(HumanAiStatus::HumanAi.after_ai_edit(), HumanAiStatus::HumanAi);
        assert_eq!(HumanAiStatus::Ai.after_ai_edit(), HumanAiStatus::Ai);
        assert_eq!(ResponseFormat::Open.switched(), Some(ResponseFormat::Closed));
        assert_eq!(ResponseFormat::Closed.switched(), Some(ResponseFormat::Open));
        assert_eq!(ResponseFormat::Slider.switched(), None);
    }

    #[test]
    fn test_check_suggestion_into_rewording() {
        let suggestion: CheckSuggestion = serde_json::from_value(json!({
            "cell_details": {"main_text": "How often do you visit the library?"},
            "time_estimate": 0.4,
            "fixed_checks": ["vague_frequency"],
            "flagged_checks": [],
            "num_fixed": 1,
            "cell_id": "c1"
        }))
        .unwrap();
        assert_eq!(suggestion.fixed_checks, vec!["vague_frequency"]);
        let rewording = Rewording::from(suggestion);
        assert_eq!(rewording.cell_details.main_text, "How often do you visit the library?");
        assert_eq!(rewording.extra["cell_id"], json!("c1"));
    }

    #[test]
    fn test_context_question_slider_number() {
        let q: ContextQuestion =
            serde_json::from_value(json!({"question": "Percent open-ended?", "response": 40}))
                .unwrap();
        assert_eq!(q.response, "40");
        assert!(q.part_2_response.is_none());
        assert!(!q.checked_warnings);
        assert!(q.warnings.is_empty());
        let back = serde_json::to_value(&q).unwrap();
        assert!(back.get("part_2_response").is_none());
        assert_eq!(back["question"], json!("Percent open-ended?"));
    }

    #[test]
    fn test_context_question_two_parts() {
        let q: ContextQuestion =
            serde_json::from_value(json!({"response": "Yes", "part_2_response": "weekly"}))
                .unwrap();
        assert_eq!(q.full_response(), "Yes: weekly");
    }

    #[test]
    fn test_engagement_type_from_label() {
        assert_eq!(EngagementType::from_label("Survey"), EngagementType::Survey);
        assert_eq!(
            EngagementType::from_label("Conversation Guide"),
            EngagementType::Conversation
        );
        assert_eq!(EngagementType::from_label("other"), EngagementType::Unspecified);
    }
}
