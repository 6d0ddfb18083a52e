//! User intents: the commands a person editing a survey can issue.
//!
//! Intents are JSON objects tagged by `op`, e.g.
//!
//! ```json
//! {"op": "add_cell", "section_index": 0, "cell": {"cell_details": {"main_text": "Why?"}}}
//! {"op": "classify_cell", "cell_id": "c1", "topics": ["Budget"]}
//! ```
//!
//! Applying an intent enforces the rules the stores leave to callers:
//! `Unclassified` cannot be deleted, an empty topic selection means
//! `["Unclassified"]`, deleting a cell also removes it from every topic,
//! and accepting a suggestion updates both the cells and the topics. Every
//! applied intent is recorded in the event log.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use survey_sync_core::estimate::estimate_time;
use survey_sync_core::models::{
    new_cell_id, Cell, HumanAiStatus, Rewording, SuggestionBatch, SuggestionKey, UNCLASSIFIED,
};

use crate::workspace::{Stores, Workspace};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Intent {
    EditProjectTitle {
        title: String,
    },
    AddSection,
    DeleteSection {
        section_id: usize,
    },
    EditSectionName {
        section_index: usize,
        title: String,
    },
    MoveSection {
        from: usize,
        to: usize,
    },
    AddCell {
        #[serde(default)]
        cell_id: Option<String>,
        section_index: usize,
        cell: Cell,
    },
    EditCell {
        cell_id: String,
        #[serde(default)]
        edit_main_text: bool,
        cell: Cell,
    },
    EditTimeEstimate {
        cell_id: String,
        time_estimate: f64,
    },
    /// Replace a cell's content with an AI rewording. `checks_to_ignore`
    /// carries the checks a check suggestion fixed.
    AcceptRewording {
        cell_id: String,
        rewording: Rewording,
        #[serde(default)]
        checks_to_ignore: Vec<String>,
    },
    DeleteCell {
        cell_id: String,
    },
    MoveCell {
        prev_section_index: usize,
        prev_cell_index: usize,
        new_section_index: usize,
        new_cell_index: usize,
    },
    DuplicateCell {
        cell_id: String,
        #[serde(default)]
        new_cell_id: Option<String>,
    },
    AddTopic {
        name: String,
    },
    DeleteTopic {
        name: String,
    },
    ClassifyCell {
        cell_id: String,
        #[serde(default)]
        topics: Vec<String>,
    },
    AddSuggestions {
        topic: String,
        batch: SuggestionBatch,
    },
    SetSuggestionSection {
        topic: String,
        main_text: String,
        section_id: usize,
    },
    AcceptAddSuggestion {
        topic: String,
        main_text: String,
        #[serde(default)]
        section_index: Option<usize>,
    },
    AcceptDeleteSuggestion {
        topic: String,
        cell_id: String,
    },
    RejectSuggestion {
        topic: String,
        key: SuggestionKey,
    },
    EditResponse {
        question_id: u32,
        response: String,
        #[serde(default)]
        part_2_response: Option<String>,
    },
    IgnoreWarning {
        question_id: u32,
        warning: String,
    },
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::EditProjectTitle { .. } => "edit_project_title",
            Intent::AddSection => "add_section",
            Intent::DeleteSection { .. } => "delete_section",
            Intent::EditSectionName { .. } => "edit_section_name",
            Intent::MoveSection { .. } => "move_section",
            Intent::AddCell { .. } => "add_cell",
            Intent::EditCell { .. } => "edit_cell",
            Intent::EditTimeEstimate { .. } => "edit_time_estimate",
            Intent::AcceptRewording { .. } => "accept_rewording",
            Intent::DeleteCell { .. } => "delete_cell",
            Intent::MoveCell { .. } => "move_cell",
            Intent::DuplicateCell { .. } => "duplicate_cell",
            Intent::AddTopic { .. } => "add_topic",
            Intent::DeleteTopic { .. } => "delete_topic",
            Intent::ClassifyCell { .. } => "classify_cell",
            Intent::AddSuggestions { .. } => "add_suggestions",
            Intent::SetSuggestionSection { .. } => "set_suggestion_section",
            Intent::AcceptAddSuggestion { .. } => "accept_add_suggestion",
            Intent::AcceptDeleteSuggestion { .. } => "accept_delete_suggestion",
            Intent::RejectSuggestion { .. } => "reject_suggestion",
            Intent::EditResponse { .. } => "edit_response",
            Intent::IgnoreWarning { .. } => "ignore_warning",
        }
    }
}

/// Apply one intent to the stores. A rejected intent changes nothing.
pub fn apply(stores: &mut Stores, intent: Intent) -> Result<()> {
    let event_type = intent.name();
    let detail = serde_json::to_value(&intent).unwrap_or_default();

    match intent {
        Intent::EditProjectTitle { title } => stores.details.edit_project_title(title),
        Intent::AddSection => {
            stores.details.add_section();
        }
        Intent::DeleteSection { section_id } => {
            let owned: Vec<String> = stores
                .details
                .sections()
                .get(section_id)
                .map(|s| s.cells.clone())
                .unwrap_or_default();
            stores.details.delete_section(section_id)?;
            for cell_id in &owned {
                stores.topics.delete_cell_from_topic(cell_id);
            }
        }
        Intent::EditSectionName {
            section_index,
            title,
        } => stores.details.edit_section_name(section_index, title)?,
        Intent::MoveSection { from, to } => stores.details.move_section(from, to)?,
        Intent::AddCell {
            cell_id,
            section_index,
            cell,
        } => {
            let cell_id = cell_id.unwrap_or_else(new_cell_id);
            stores.details.add_cell(cell_id, cell, section_index)?;
        }
        Intent::EditCell {
            cell_id,
            edit_main_text,
            cell,
        } => stores.details.edit_cell(&cell_id, edit_main_text, cell)?,
        Intent::EditTimeEstimate {
            cell_id,
            time_estimate,
        } => {
            if !time_estimate.is_finite() || time_estimate < 0.0 {
                bail!("time estimate must be a non-negative number");
            }
            stores.details.edit_time_estimate(&cell_id, time_estimate)?
        }
        Intent::AcceptRewording {
            cell_id,
            rewording,
            checks_to_ignore,
        } => accept_rewording(stores, &cell_id, rewording, checks_to_ignore)?,
        Intent::DeleteCell { cell_id } => delete_cell(stores, &cell_id)?,
        Intent::MoveCell {
            prev_section_index,
            prev_cell_index,
            new_section_index,
            new_cell_index,
        } => stores.details.move_cell(
            prev_section_index,
            prev_cell_index,
            new_section_index,
            new_cell_index,
        )?,
        Intent::DuplicateCell {
            cell_id,
            new_cell_id: copy_id,
        } => {
            let original = stores
                .details
                .cell(&cell_id)
                .cloned()
                .with_context(|| format!("unknown cell: {}", cell_id))?;
            let copy_id = copy_id.unwrap_or_else(new_cell_id);
            stores.details.duplicate_cell(copy_id, original, &cell_id)?;
        }
        Intent::AddTopic { name } => {
            let name = name.trim().to_string();
            if name.is_empty() {
                bail!("topic name must not be empty");
            }
            if !stores.topics.add_topic(name.clone()) {
                bail!("topic {} already exists", name);
            }
        }
        Intent::DeleteTopic { name } => {
            if name == UNCLASSIFIED {
                bail!("the {} topic cannot be deleted", UNCLASSIFIED);
            }
            if stores.topics.topic(&name).is_none() {
                bail!("unknown topic: {}", name);
            }
            stores.topics.delete_topic(&name);
        }
        Intent::ClassifyCell { cell_id, topics } => classify(stores, &cell_id, topics)?,
        Intent::AddSuggestions { topic, batch } => {
            require_topic(stores, &topic)?;
            stores.topics.add_suggestions_for_topic(&topic, batch);
        }
        Intent::SetSuggestionSection {
            topic,
            main_text,
            section_id,
        } => {
            if section_id >= stores.details.sections().len() {
                bail!("section {} does not exist", section_id);
            }
            if stores.topics.find_add_suggestion(&topic, &main_text).is_none() {
                bail!("no add suggestion {:?} under {}", main_text, topic);
            }
            stores
                .topics
                .update_section_id_for_suggestion(&topic, &main_text, section_id);
        }
        Intent::AcceptAddSuggestion {
            topic,
            main_text,
            section_index,
        } => accept_add_suggestion(stores, &topic, &main_text, section_index)?,
        Intent::AcceptDeleteSuggestion { topic, cell_id } => {
            let key = SuggestionKey::Delete {
                cell_id: cell_id.clone(),
            };
            if !has_suggestion(stores, &topic, &key) {
                bail!("no matching suggestion under {}", topic);
            }
            delete_cell(stores, &cell_id)?;
            stores.topics.remove_suggestion_from_topic(&topic, &key);
        }
        Intent::RejectSuggestion { topic, key } => {
            if !has_suggestion(stores, &topic, &key) {
                bail!("no matching suggestion under {}", topic);
            }
            stores.topics.remove_suggestion_from_topic(&topic, &key);
        }
        Intent::EditResponse {
            question_id,
            response,
            part_2_response,
        } => stores
            .context
            .edit_response(question_id, response, part_2_response)?,
        Intent::IgnoreWarning {
            question_id,
            warning,
        } => stores.context.add_ignored_warning(question_id, warning)?,
    }

    stores.log(event_type, detail);
    Ok(())
}

fn require_topic(stores: &Stores, topic: &str) -> Result<()> {
    if stores.topics.topic(topic).is_none() {
        bail!("unknown topic: {}", topic);
    }
    Ok(())
}

fn has_suggestion(stores: &Stores, topic: &str, key: &SuggestionKey) -> bool {
    match key {
        SuggestionKey::Add { main_text } => stores.topics.find_add_suggestion(topic, main_text).is_some(),
        SuggestionKey::Delete { cell_id } => stores
            .topics
            .suggestions()
            .get(topic)
            .into_iter()
            .flatten()
            .any(|batch| match batch {
                SuggestionBatch::Delete { suggestions } => suggestions.iter().any(|s| &s.cell_id == cell_id),
                SuggestionBatch::Add { .. } => false,
            }),
    }
}

fn delete_cell(stores: &mut Stores, cell_id: &str) -> Result<()> {
    let section_index = stores
        .details
        .cell(cell_id)
        .map(|c| c.section_index)
        .with_context(|| format!("unknown cell: {}", cell_id))?;
    stores.details.delete_cell(cell_id, section_index)?;
    stores.topics.delete_cell_from_topic(cell_id);
    Ok(())
}

fn accept_rewording(
    stores: &mut Stores,
    cell_id: &str,
    rewording: Rewording,
    checks_to_ignore: Vec<String>,
) -> Result<()> {
    let current = stores
        .details
        .cell(cell_id)
        .cloned()
        .with_context(|| format!("unknown cell: {}", cell_id))?;
    let cell = Cell {
        cell_details: rewording.cell_details,
        human_ai_status: current.human_ai_status.after_ai_edit(),
        time_estimate: rewording.time_estimate,
        checks_to_ignore,
        ..current
    };
    stores.details.edit_cell(cell_id, true, cell)
}

fn classify(stores: &mut Stores, cell_id: &str, topics: Vec<String>) -> Result<()> {
    if stores.details.cell(cell_id).is_none() {
        bail!("unknown cell: {}", cell_id);
    }
    for topic in &topics {
        require_topic(stores, topic)?;
    }
    let topics = if topics.is_empty() {
        vec![UNCLASSIFIED.to_string()]
    } else {
        topics
    };
    stores.topics.update_topic_classification(cell_id, topics);
    Ok(())
}

fn accept_add_suggestion(
    stores: &mut Stores,
    topic: &str,
    main_text: &str,
    section_index: Option<usize>,
) -> Result<()> {
    let suggestion = stores
        .topics
        .find_add_suggestion(topic, main_text)
        .cloned()
        .with_context(|| format!("no add suggestion {:?} under {}", main_text, topic))?;
    let section_index = section_index.or(suggestion.section_id).unwrap_or(0);

    let mut cell = Cell {
        cell_details: suggestion.cell_details,
        human_ai_status: HumanAiStatus::Ai,
        time_estimate: suggestion.time_estimate,
        ai_rationale: suggestion.rationale,
        ..Cell::default()
    };
    if cell.time_estimate <= 0.0 {
        cell.time_estimate = estimate_time(&cell.cell_details, stores.details.engagement_type());
    }

    let cell_id = new_cell_id();
    stores.details.add_cell(cell_id.clone(), cell, section_index)?;
    stores
        .topics
        .update_topic_classification(&cell_id, vec![topic.to_string()]);
    stores.topics.remove_suggestion_from_topic(
        topic,
        &SuggestionKey::Add {
            main_text: main_text.to_string(),
        },
    );
    Ok(())
}

/// Result of applying a list of intents.
#[derive(Debug, Default)]
pub struct ApplySummary {
    pub applied: usize,
    /// `(index, reason)` for each rejected intent.
    pub rejected: Vec<(usize, String)>,
}

/// Apply intents in order. A rejected intent is reported and skipped.
pub async fn apply_all(workspace: &Workspace, intents: Vec<Intent>) -> ApplySummary {
    let mut summary = ApplySummary::default();
    for (index, intent) in intents.into_iter().enumerate() {
        let op = intent.name();
        let result = {
            let mut stores = workspace.write().await;
            apply(&mut stores, intent)
        };
        match result {
            Ok(()) => summary.applied += 1,
            Err(err) => {
                tracing::warn!(index, op, error = %err, "intent rejected");
                summary.rejected.push((index, format!("{}: {:#}", op, err)));
            }
        }
    }
    summary
}

/// Parse a JSON array of intents.
pub fn parse_intents(json: &str) -> Result<Vec<Intent>> {
    serde_json::from_str(json).with_context(|| "Failed to parse intents")
}
