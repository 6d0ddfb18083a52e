//! Topic classification: topic → cells assignment, human overrides and
//! AI suggestion batches.
//!
//! Topics are keyed by name in insertion order. [`UNCLASSIFIED`] exists in
//! a fresh store. Callers must never delete it; [`TopicStore::delete_topic`]
//! does not check.

use std::collections::{BTreeMap, HashSet};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::models::{AddSuggestion, SuggestionBatch, SuggestionKey, Topic, UNCLASSIFIED};

use super::Persistable;

/// Result of a topic analysis, as loaded with a project or returned by the
/// analysis endpoint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicAnalysis {
    pub summary: String,
    pub topics: IndexMap<String, Topic>,
    pub suggestions: IndexMap<String, Vec<SuggestionBatch>>,
    pub last_analyzed: String,
}

/// Topic state to persist. `revision` ties it to the store mutation it
/// was taken at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicsSnapshot {
    pub summary: String,
    pub topics: IndexMap<String, Topic>,
    pub suggestions: IndexMap<String, Vec<SuggestionBatch>>,
    pub last_analyzed: String,
    pub human_topics: BTreeMap<String, Vec<String>>,
    #[serde(skip)]
    pub revision: u64,
}

#[derive(Debug, Clone)]
pub struct TopicStore {
    topics: IndexMap<String, Topic>,
    suggestions: IndexMap<String, Vec<SuggestionBatch>>,
    human_topics: BTreeMap<String, Vec<String>>,
    added_topics: IndexSet<String>,
    summary: String,
    last_analyzed: String,
    need_to_save: bool,
    revision: u64,
}

impl Default for TopicStore {
    fn default() -> Self {
        Self {
            topics: unclassified_only(),
            suggestions: IndexMap::new(),
            human_topics: BTreeMap::new(),
            added_topics: IndexSet::new(),
            summary: String::new(),
            last_analyzed: String::new(),
            need_to_save: false,
            revision: 0,
        }
    }
}

fn unclassified_only() -> IndexMap<String, Topic> {
    let mut topics = IndexMap::new();
    topics.insert(UNCLASSIFIED.to_string(), Topic::default());
    topics
}

impl TopicStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topics(&self) -> &IndexMap<String, Topic> {
        &self.topics
    }

    pub fn topic(&self, name: &str) -> Option<&Topic> {
        self.topics.get(name)
    }

    pub fn suggestions(&self) -> &IndexMap<String, Vec<SuggestionBatch>> {
        &self.suggestions
    }

    pub fn human_topics(&self) -> &BTreeMap<String, Vec<String>> {
        &self.human_topics
    }

    pub fn added_topics(&self) -> &IndexSet<String> {
        &self.added_topics
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn last_analyzed(&self) -> &str {
        &self.last_analyzed
    }

    pub fn need_to_save(&self) -> bool {
        self.need_to_save
    }

    /// Mutation counter. Compare two readings to tell whether anything
    /// changed in between.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Ids of every cell assigned to at least one topic.
    pub fn cells_in_any_topic(&self) -> HashSet<&str> {
        self.topics
            .values()
            .flat_map(|t| t.cells.iter().map(String::as_str))
            .collect()
    }

    /// Topics a cell currently belongs to, in topic order.
    pub fn topics_for_cell(&self, cell_id: &str) -> Vec<&str> {
        self.topics
            .iter()
            .filter(|(_, t)| t.cells.iter().any(|id| id == cell_id))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn find_add_suggestion(&self, topic: &str, main_text: &str) -> Option<&AddSuggestion> {
        self.suggestions.get(topic)?.iter().find_map(|batch| match batch {
            SuggestionBatch::Add { suggestions } => suggestions
                .iter()
                .find(|s| s.cell_details.main_text == main_text),
            SuggestionBatch::Delete { .. } => None,
        })
    }

    // ============ Bulk replace ============

    /// Install a full analysis loaded from the service. Clears `added_topics`.
    pub fn set_topics(&mut self, analysis: TopicAnalysis, human_topics: BTreeMap<String, Vec<String>>) {
        self.apply_analysis(analysis);
        self.human_topics = human_topics;
        self.added_topics.clear();
        self.touch();
    }

    /// Install a fresh analysis result. Leaves `added_topics` and the human
    /// overrides alone.
    pub fn update_topics(&mut self, analysis: TopicAnalysis) {
        self.apply_analysis(analysis);
        self.touch();
    }

    /// Install an analysis computed from the state at `sent_revision`, whose
    /// request carried `sent_added`. Topics added since then are kept and
    /// stay in `added_topics`. `need_to_save` clears only if the store is
    /// still at `sent_revision`.
    pub fn finish_analysis(&mut self, analysis: TopicAnalysis, sent_added: &[String], sent_revision: u64) {
        let unchanged = self.revision == sent_revision;
        let late: Vec<(String, Topic)> = self
            .added_topics
            .iter()
            .filter(|name| !sent_added.contains(*name))
            .filter_map(|name| self.topics.get(name).map(|t| (name.clone(), t.clone())))
            .collect();

        self.apply_analysis(analysis);
        for (name, topic) in late {
            self.topics.entry(name).or_insert(topic);
        }
        for name in sent_added {
            self.added_topics.shift_remove(name);
        }
        if unchanged {
            self.need_to_save = false;
        }
        self.touch();
    }

    fn apply_analysis(&mut self, analysis: TopicAnalysis) {
        self.topics = analysis.topics;
        self.suggestions = analysis.suggestions;
        self.summary = analysis.summary;
        self.last_analyzed = analysis.last_analyzed;
    }

    // ============ Topics ============

    /// Create an empty topic. Returns `false` and changes nothing if the
    /// name is taken.
    pub fn add_topic(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.topics.contains_key(&name) {
            return false;
        }
        self.topics.insert(name.clone(), Topic::default());
        self.added_topics.insert(name);
        self.mark_dirty();
        true
    }

    /// Remove a topic, its suggestions and every human override naming it.
    ///
    /// Precondition: `name != UNCLASSIFIED`.
    pub fn delete_topic(&mut self, name: &str) {
        self.topics.shift_remove(name);
        self.suggestions.shift_remove(name);
        self.added_topics.shift_remove(name);
        for selected in self.human_topics.values_mut() {
            selected.retain(|t| t != name);
        }
        self.mark_dirty();
    }

    /// Forget a cell everywhere: topic lists, delete suggestions and human
    /// overrides.
    pub fn delete_cell_from_topic(&mut self, cell_id: &str) {
        for topic in self.topics.values_mut() {
            topic.cells.retain(|id| id != cell_id);
        }
        for batches in self.suggestions.values_mut() {
            prune_delete_suggestions(batches, cell_id);
        }
        self.human_topics.remove(cell_id);
        self.mark_dirty();
    }

    /// Make the cell a member of exactly `selected_topics` (among known
    /// topics) and record the selection as a human override.
    ///
    /// An empty selection is stored as-is.
    pub fn update_topic_classification(&mut self, cell_id: &str, selected_topics: Vec<String>) {
        for (name, topic) in self.topics.iter_mut() {
            let selected = selected_topics.contains(name);
            let present = topic.cells.iter().any(|id| id == cell_id);
            if selected && !present {
                topic.cells.push(cell_id.to_string());
            } else if !selected && present {
                topic.cells.retain(|id| id != cell_id);
                if let Some(batches) = self.suggestions.get_mut(name) {
                    prune_delete_suggestions(batches, cell_id);
                }
            }
        }
        self.human_topics.insert(cell_id.to_string(), selected_topics);
        self.mark_dirty();
    }

    // ============ Suggestions ============

    /// Replace the topic's batch of the same type, or put the batch first.
    pub fn add_suggestions_for_topic(&mut self, topic: &str, batch: SuggestionBatch) {
        let batches = self.suggestions.entry(topic.to_string()).or_default();
        match batches
            .iter_mut()
            .find(|b| b.suggestion_type() == batch.suggestion_type())
        {
            Some(existing) => *existing = batch,
            None => batches.insert(0, batch),
        }
        self.mark_dirty();
    }

    /// Drop one suggestion. Returns whether anything matched.
    pub fn remove_suggestion_from_topic(&mut self, topic: &str, key: &SuggestionKey) -> bool {
        let Some(batches) = self.suggestions.get_mut(topic) else {
            return false;
        };
        let mut removed = false;
        for batch in batches.iter_mut() {
            match (batch, key) {
                (SuggestionBatch::Add { suggestions }, SuggestionKey::Add { main_text }) => {
                    let before = suggestions.len();
                    suggestions.retain(|s| &s.cell_details.main_text != main_text);
                    removed |= suggestions.len() != before;
                }
                (SuggestionBatch::Delete { suggestions }, SuggestionKey::Delete { cell_id }) => {
                    let before = suggestions.len();
                    suggestions.retain(|s| &s.cell_id != cell_id);
                    removed |= suggestions.len() != before;
                }
                _ => {}
            }
        }
        self.mark_dirty();
        removed
    }

    /// Record the section the user picked for an add suggestion.
    pub fn update_section_id_for_suggestion(&mut self, topic: &str, main_text: &str, section_id: usize) -> bool {
        let Some(batches) = self.suggestions.get_mut(topic) else {
            return false;
        };
        let mut found = false;
        for batch in batches.iter_mut() {
            if let SuggestionBatch::Add { suggestions } = batch {
                for suggestion in suggestions
                    .iter_mut()
                    .filter(|s| s.cell_details.main_text == main_text)
                {
                    suggestion.section_id = Some(section_id);
                    found = true;
                }
            }
        }
        self.mark_dirty();
        found
    }

    // ============ Resets ============

    pub fn reset_need_to_save(&mut self) {
        self.need_to_save = false;
        self.touch();
    }

    pub fn reset_added_topics(&mut self) {
        self.added_topics.clear();
        self.touch();
    }

    /// Back to a fresh store. `need_to_save` is left as is.
    pub fn reset_topic_slice(&mut self) {
        self.topics = unclassified_only();
        self.suggestions.clear();
        self.human_topics.clear();
        self.added_topics.clear();
        self.summary.clear();
        self.last_analyzed.clear();
        self.touch();
    }

    fn mark_dirty(&mut self) {
        self.need_to_save = true;
        self.touch();
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

fn prune_delete_suggestions(batches: &mut [SuggestionBatch], cell_id: &str) {
    for batch in batches {
        if let SuggestionBatch::Delete { suggestions } = batch {
            suggestions.retain(|s| s.cell_id != cell_id);
        }
    }
}

impl Persistable for TopicStore {
    type Snapshot = TopicsSnapshot;

    fn pending(&self) -> Option<TopicsSnapshot> {
        if !self.need_to_save {
            return None;
        }
        Some(TopicsSnapshot {
            summary: self.summary.clone(),
            topics: self.topics.clone(),
            suggestions: self.suggestions.clone(),
            last_analyzed: self.last_analyzed.clone(),
            human_topics: self.human_topics.clone(),
            revision: self.revision,
        })
    }

    fn acknowledge(&mut self, snapshot: &TopicsSnapshot) {
        if snapshot.revision == self.revision {
            self.need_to_save = false;
        } else {
            tracing::debug!(
                saved = snapshot.revision,
                current = self.revision,
                "topics changed during save; staying dirty"
            );
        }
    }

    fn is_dirty(&self) -> bool {
        self.need_to_save
    }
}
