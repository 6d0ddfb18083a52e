//! Section/cell graph of a project with change tracking.
//!
//! [`ProjectDetailStore`] is the only owner of [`Cell`] records. Other
//! stores refer to cells by id.
//!
//! # Change tracking
//!
//! Three insertion-ordered sets record what changed since the last
//! confirmed save:
//!
//! - `added_cells`: created locally, not yet persisted. A new cell stays
//!   here even if it is edited again before the save.
//! - `edited_cells`: persisted cells whose record changed.
//! - `deleted_cells`: cells removed locally.
//!
//! A cell id is in at most one of `added_cells`/`edited_cells`, and never
//! in `deleted_cells` together with either.
//!
//! Question cells that are added, or whose main text changes, are also
//! queued in `cells_for_classification` until the next topic analysis.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use chrono::Utc;
use indexmap::IndexSet;
use serde::Serialize;

use crate::estimate::estimate_time;
use crate::models::{Cell, CellDetails, EngagementType, Section, DEFAULT_SECTION_TITLE};

use super::Persistable;

/// Everything the service needs to replay local changes: full current
/// records plus the diff envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectDetailsSnapshot {
    pub project_id: String,
    pub project_title: String,
    pub sections: Vec<Section>,
    pub cells: BTreeMap<String, Cell>,
    pub deleted_cells: Vec<String>,
    pub edited_cells: Vec<String>,
    pub added_cells: Vec<String>,
}

/// Authoritative in-memory section/cell graph.
#[derive(Debug, Clone, Default)]
pub struct ProjectDetailStore {
    project_id: String,
    project_title: String,
    sections: Vec<Section>,
    cells: BTreeMap<String, Cell>,
    added_cells: IndexSet<String>,
    edited_cells: IndexSet<String>,
    deleted_cells: IndexSet<String>,
    cells_for_classification: IndexSet<String>,
    edited_title: bool,
    edited_sections: bool,
    engagement_type: EngagementType,
}

impl ProjectDetailStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ============ Accessors ============

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn project_title(&self) -> &str {
        &self.project_title
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn cells(&self) -> &BTreeMap<String, Cell> {
        &self.cells
    }

    pub fn cell(&self, cell_id: &str) -> Option<&Cell> {
        self.cells.get(cell_id)
    }

    pub fn added_cells(&self) -> &IndexSet<String> {
        &self.added_cells
    }

    pub fn edited_cells(&self) -> &IndexSet<String> {
        &self.edited_cells
    }

    pub fn deleted_cells(&self) -> &IndexSet<String> {
        &self.deleted_cells
    }

    pub fn cells_for_classification(&self) -> &IndexSet<String> {
        &self.cells_for_classification
    }

    pub fn edited_title(&self) -> bool {
        self.edited_title
    }

    pub fn edited_sections(&self) -> bool {
        self.edited_sections
    }

    pub fn engagement_type(&self) -> EngagementType {
        self.engagement_type
    }

    /// Sum of all cell time estimates, in minutes.
    pub fn total_time_estimate(&self) -> f64 {
        self.cells.values().map(|c| c.time_estimate).sum()
    }

    // ============ Loading ============

    /// Replace the whole project. Change-tracking sets are left alone;
    /// callers loading a different project reset them separately.
    pub fn set_project_details(
        &mut self,
        project_id: impl Into<String>,
        project_title: impl Into<String>,
        sections: Vec<Section>,
        cells: BTreeMap<String, Cell>,
    ) {
        self.project_id = project_id.into();
        self.project_title = project_title.into();
        self.sections = sections;
        self.cells = cells;
    }

    pub fn update_engagement_type(&mut self, engagement_type: EngagementType) {
        self.engagement_type = engagement_type;
    }

    pub fn edit_project_title(&mut self, project_title: impl Into<String>) {
        self.project_title = project_title.into();
        self.edited_title = true;
    }

    // ============ Sections ============

    /// Append an empty section and return its id.
    pub fn add_section(&mut self) -> usize {
        let id = self.sections.len();
        self.sections.push(Section {
            id,
            title: DEFAULT_SECTION_TITLE.to_string(),
            cells: Vec::new(),
        });
        self.edited_sections = true;
        id
    }

    pub fn edit_section_name(&mut self, section_index: usize, title: impl Into<String>) -> Result<()> {
        self.check_section(section_index)?;
        self.sections[section_index].title = title.into();
        self.edited_sections = true;
        Ok(())
    }

    /// Delete a section together with every cell it owns.
    pub fn delete_section(&mut self, section_id: usize) -> Result<()> {
        self.check_section(section_id)?;
        let removed = self.sections.remove(section_id);
        for cell_id in &removed.cells {
            self.added_cells.shift_remove(cell_id);
            self.edited_cells.shift_remove(cell_id);
            self.cells_for_classification.shift_remove(cell_id);
            self.deleted_cells.insert(cell_id.clone());
            self.cells.remove(cell_id);
        }
        self.reindex_sections();
        self.edited_sections = true;
        Ok(())
    }

    /// Move the section at `from` so it ends up at position `to`.
    pub fn move_section(&mut self, from: usize, to: usize) -> Result<()> {
        self.check_section(from)?;
        self.check_section(to)?;
        let section = self.sections.remove(from);
        self.sections.insert(to, section);
        self.reindex_sections();
        self.edited_sections = true;
        Ok(())
    }

    /// Restore `id == position` and re-stamp cells whose back-reference
    /// went stale, marking them edited.
    fn reindex_sections(&mut self) {
        let mut stale = Vec::new();
        for (index, section) in self.sections.iter_mut().enumerate() {
            section.id = index;
            for cell_id in &section.cells {
                if let Some(cell) = self.cells.get_mut(cell_id) {
                    if cell.section_index != index {
                        cell.section_index = index;
                        stale.push(cell_id.clone());
                    }
                }
            }
        }
        for cell_id in stale {
            self.mark_edited(&cell_id);
        }
    }

    // ============ Cells ============

    /// Insert a cell at the end of a section.
    pub fn add_cell(&mut self, cell_id: impl Into<String>, cell: Cell, section_index: usize) -> Result<()> {
        self.check_section(section_index)?;
        let cell_id = cell_id.into();
        if self.cells.contains_key(&cell_id) {
            self.detach(&cell_id);
        }
        self.track_added(&cell_id, &cell);
        self.cells.insert(
            cell_id.clone(),
            Cell {
                section_index,
                last_updated: Some(Utc::now()),
                ..cell
            },
        );
        self.sections[section_index].cells.push(cell_id);
        Ok(())
    }

    /// Insert a copy of `cell` directly after `original_cell_id`.
    pub fn duplicate_cell(
        &mut self,
        new_cell_id: impl Into<String>,
        cell: Cell,
        original_cell_id: &str,
    ) -> Result<()> {
        let new_cell_id = new_cell_id.into();
        let section_index = match self.cells.get(original_cell_id) {
            Some(original) => original.section_index,
            None => bail!("unknown cell: {}", original_cell_id),
        };
        self.check_section(section_index)?;
        if new_cell_id == original_cell_id {
            bail!("duplicate must use a new cell id");
        }
        if self.cells.contains_key(&new_cell_id) {
            self.detach(&new_cell_id);
        }
        let position = self.sections[section_index]
            .cells
            .iter()
            .position(|id| id == original_cell_id)
            .map(|i| i + 1)
            .unwrap_or(self.sections[section_index].cells.len());

        self.track_added(&new_cell_id, &cell);
        self.cells.insert(
            new_cell_id.clone(),
            Cell {
                section_index,
                last_updated: Some(Utc::now()),
                ..cell
            },
        );
        self.sections[section_index].cells.insert(position, new_cell_id);
        Ok(())
    }

    /// Replace a cell's record.
    ///
    /// The cell keeps its section. A zero time estimate on a cell with text
    /// is replaced by [`estimate_time`].
    pub fn edit_cell(&mut self, cell_id: &str, edit_main_text: bool, cell: Cell) -> Result<()> {
        let section_index = match self.cells.get(cell_id) {
            Some(existing) => existing.section_index,
            None => bail!("unknown cell: {}", cell_id),
        };
        self.mark_edited(cell_id);
        if edit_main_text && cell.is_question() {
            self.cells_for_classification.insert(cell_id.to_string());
        }

        let mut cell = Cell {
            section_index,
            last_updated: Some(Utc::now()),
            ..cell
        };
        if cell.time_estimate == 0.0 && !cell.cell_details.main_text.is_empty() {
            cell.time_estimate = estimate_time(&cell.cell_details, self.engagement_type);
        }
        self.cells.insert(cell_id.to_string(), cell);
        Ok(())
    }

    pub fn edit_time_estimate(&mut self, cell_id: &str, time_estimate: f64) -> Result<()> {
        let Some(cell) = self.cells.get_mut(cell_id) else {
            bail!("unknown cell: {}", cell_id);
        };
        cell.time_estimate = time_estimate;
        cell.last_updated = Some(Utc::now());
        self.mark_edited(cell_id);
        Ok(())
    }

    /// Remove a cell and record the deletion. Deleting twice is a no-op
    /// for the change sets.
    pub fn delete_cell(&mut self, cell_id: &str, section_index: usize) -> Result<()> {
        self.check_section(section_index)?;
        self.deleted_cells.insert(cell_id.to_string());
        self.added_cells.shift_remove(cell_id);
        self.edited_cells.shift_remove(cell_id);
        self.cells_for_classification.shift_remove(cell_id);

        self.sections[section_index].cells.retain(|id| id != cell_id);
        if self.detach(cell_id) {
            tracing::warn!(cell_id, section_index, "cell was listed under a different section");
        }
        self.cells.remove(cell_id);
        Ok(())
    }

    /// Move one cell by position, within or across sections.
    pub fn move_cell(
        &mut self,
        prev_section_index: usize,
        prev_cell_index: usize,
        new_section_index: usize,
        new_cell_index: usize,
    ) -> Result<()> {
        self.check_section(prev_section_index)?;
        self.check_section(new_section_index)?;
        let prev_len = self.sections[prev_section_index].cells.len();
        if prev_cell_index >= prev_len {
            bail!(
                "cell index {} out of range for section {} ({} cells)",
                prev_cell_index,
                prev_section_index,
                prev_len
            );
        }

        let cell_id = self.sections[prev_section_index].cells.remove(prev_cell_index);
        let target = &mut self.sections[new_section_index].cells;
        let position = new_cell_index.min(target.len());
        target.insert(position, cell_id.clone());

        if let Some(cell) = self.cells.get_mut(&cell_id) {
            cell.section_index = new_section_index;
        }
        self.mark_edited(&cell_id);
        Ok(())
    }

    // ============ Resets ============

    /// Clear all change tracking. Called once a save is confirmed or a
    /// different project is loaded.
    pub fn reset_cell_history(&mut self) {
        self.added_cells.clear();
        self.edited_cells.clear();
        self.deleted_cells.clear();
        self.edited_title = false;
        self.edited_sections = false;
    }

    /// Clear the classification queue after a topic analysis round-trip.
    pub fn reset_classification_list(&mut self) {
        self.cells_for_classification.clear();
    }

    /// Queued cells with their current content, to send for classification.
    pub fn classification_snapshot(&self) -> Vec<(String, CellDetails)> {
        self.cells_for_classification
            .iter()
            .filter_map(|id| self.cells.get(id).map(|c| (id.clone(), c.cell_details.clone())))
            .collect()
    }

    /// Dequeue the cells an analysis classified. A cell queued after `sent`
    /// was taken, or edited since, stays queued.
    pub fn acknowledge_classification(&mut self, sent: &[(String, CellDetails)]) {
        let cells = &self.cells;
        self.cells_for_classification.retain(|id| {
            !sent
                .iter()
                .any(|(sent_id, details)| sent_id == id && cells.get(id).map(|c| &c.cell_details) == Some(details))
        });
    }

    // ============ Helpers ============

    fn check_section(&self, section_index: usize) -> Result<()> {
        if section_index >= self.sections.len() {
            bail!(
                "section {} does not exist ({} sections)",
                section_index,
                self.sections.len()
            );
        }
        Ok(())
    }

    /// Remove a cell id from every section list. Returns whether it was found.
    fn detach(&mut self, cell_id: &str) -> bool {
        let mut found = false;
        for section in &mut self.sections {
            let before = section.cells.len();
            section.cells.retain(|id| id != cell_id);
            found |= section.cells.len() != before;
        }
        found
    }

    fn track_added(&mut self, cell_id: &str, cell: &Cell) {
        if self.deleted_cells.shift_remove(cell_id) {
            self.added_cells.insert(cell_id.to_string());
        } else if !self.cells.contains_key(cell_id) && !self.added_cells.contains(cell_id) {
            self.added_cells.insert(cell_id.to_string());
        } else {
            self.mark_edited(cell_id);
        }
        if cell.is_question() && self.added_cells.contains(cell_id) {
            self.cells_for_classification.insert(cell_id.to_string());
        }
    }

    fn mark_edited(&mut self, cell_id: &str) {
        if !self.added_cells.contains(cell_id) {
            self.edited_cells.insert(cell_id.to_string());
        }
    }

    fn has_changes(&self) -> bool {
        !self.added_cells.is_empty()
            || !self.edited_cells.is_empty()
            || !self.deleted_cells.is_empty()
            || self.edited_title
            || self.edited_sections
    }
}

impl Persistable for ProjectDetailStore {
    type Snapshot = ProjectDetailsSnapshot;

    fn pending(&self) -> Option<ProjectDetailsSnapshot> {
        if self.project_id.is_empty() || !self.has_changes() {
            return None;
        }
        Some(ProjectDetailsSnapshot {
            project_id: self.project_id.clone(),
            project_title: self.project_title.clone(),
            sections: self.sections.clone(),
            cells: self.cells.clone(),
            deleted_cells: self.deleted_cells.iter().cloned().collect(),
            edited_cells: self.edited_cells.iter().cloned().collect(),
            added_cells: self.added_cells.iter().cloned().collect(),
        })
    }

    fn acknowledge(&mut self, snapshot: &ProjectDetailsSnapshot) {
        if snapshot.project_id != self.project_id {
            tracing::debug!(
                saved = %snapshot.project_id,
                current = %self.project_id,
                "ignoring acknowledgement for another project"
            );
            return;
        }
        for cell_id in &snapshot.added_cells {
            if self.added_cells.shift_remove(cell_id) {
                // Persisted now; later local changes become an edit.
                if self.cells.get(cell_id) != snapshot.cells.get(cell_id) {
                    self.edited_cells.insert(cell_id.clone());
                }
            }
        }
        for cell_id in &snapshot.edited_cells {
            if self.cells.get(cell_id) == snapshot.cells.get(cell_id) {
                self.edited_cells.shift_remove(cell_id);
            }
        }
        for cell_id in &snapshot.deleted_cells {
            self.deleted_cells.shift_remove(cell_id);
        }
        if self.project_title == snapshot.project_title {
            self.edited_title = false;
        }
        if self.sections == snapshot.sections {
            self.edited_sections = false;
        }
    }

    fn is_dirty(&self) -> bool {
        !self.project_id.is_empty() && self.has_changes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CellType, ResponseFormat};

    fn store_with_cells(ids: &[&str]) -> ProjectDetailStore {
        let mut cells = BTreeMap::new();
        for id in ids {
            cells.insert(id.to_string(), Cell::question(format!("Question {}", id), ResponseFormat::Open));
        }
        let sections = vec![Section {
            id: 0,
            title: "Intro".to_string(),
            cells: ids.iter().map(|s| s.to_string()).collect(),
        }];
        let mut store = ProjectDetailStore::new();
        store.set_project_details("p1", "Project", sections, cells);
        store
    }

    fn assert_exclusive(store: &ProjectDetailStore) {
        for id in store.added_cells() {
            assert!(!store.edited_cells().contains(id), "{} added and edited", id);
            assert!(!store.deleted_cells().contains(id), "{} added and deleted", id);
        }
        for id in store.edited_cells() {
            assert!(!store.deleted_cells().contains(id), "{} edited and deleted", id);
        }
    }

    fn assert_sections_consistent(store: &ProjectDetailStore) {
        for (index, section) in store.sections().iter().enumerate() {
            assert_eq!(section.id, index);
            for cell_id in &section.cells {
                assert_eq!(store.cell(cell_id).unwrap().section_index, section.id);
            }
        }
    }

    #[test]
    fn test_delete_cell_scenario() {
        let mut store = store_with_cells(&["c1", "c2", "c3"]);
        store.delete_cell("c2", 0).unwrap();
        assert_eq!(store.sections()[0].cells, vec!["c1", "c3"]);
        assert!(store.deleted_cells().contains("c2"));
        assert!(store.cell("c2").is_none());
    }

    #[test]
    fn test_delete_cell_idempotent_tracking() {
        let mut store = store_with_cells(&["c1"]);
        store.delete_cell("c1", 0).unwrap();
        store.delete_cell("c1", 0).unwrap();
        assert_eq!(store.deleted_cells().len(), 1);
    }

    #[test]
    fn test_add_cell_tracks_added_and_classification() {
        let mut store = store_with_cells(&[]);
        store
            .add_cell("n1", Cell::question("New?", ResponseFormat::Closed), 0)
            .unwrap();
        store.add_cell("t1", Cell::text("Welcome"), 0).unwrap();
        assert!(store.added_cells().contains("n1"));
        assert!(store.added_cells().contains("t1"));
        assert!(store.cells_for_classification().contains("n1"));
        assert!(!store.cells_for_classification().contains("t1"));
        assert!(store.cell("n1").unwrap().last_updated.is_some());
        assert_eq!(store.sections()[0].cells, vec!["n1", "t1"]);
    }

    #[test]
    fn test_acknowledge_classification_keeps_later_changes() {
        let mut store = store_with_cells(&[]);
        store
            .add_cell("n1", Cell::question("Cost?", ResponseFormat::Open), 0)
            .unwrap();
        store
            .add_cell("n2", Cell::question("Hours?", ResponseFormat::Open), 0)
            .unwrap();
        let sent = store.classification_snapshot();
        assert_eq!(sent.len(), 2);

        store
            .edit_cell("n2", true, Cell::question("Opening hours?", ResponseFormat::Open))
            .unwrap();
        store
            .add_cell("late", Cell::question("Parking?", ResponseFormat::Closed), 0)
            .unwrap();
        store.acknowledge_classification(&sent);

        let queued: Vec<&str> = store.cells_for_classification().iter().map(String::as_str).collect();
        assert_eq!(queued, vec!["n2", "late"]);
    }

    #[test]
    fn test_add_cell_unknown_section_rejected() {
        let mut store = store_with_cells(&["c1"]);
        assert!(store.add_cell("n1", Cell::text("x"), 3).is_err());
        assert!(store.added_cells().is_empty());
        assert!(store.cell("n1").is_none());
    }

    #[test]
    fn test_edit_added_cell_stays_added() {
        let mut store = store_with_cells(&[]);
        store.add_cell("n1", Cell::text("a"), 0).unwrap();
        store.edit_cell("n1", true, Cell::text("b")).unwrap();
        assert!(store.added_cells().contains("n1"));
        assert!(store.edited_cells().is_empty());
    }

    #[test]
    fn test_edit_cell_marks_edited_and_queues_question() {
        let mut store = store_with_cells(&["c1"]);
        let mut cell = store.cell("c1").unwrap().clone();
        cell.cell_details.main_text = "Reworded question".to_string();
        cell.time_estimate = 2.0;
        store.edit_cell("c1", true, cell).unwrap();
        assert!(store.edited_cells().contains("c1"));
        assert!(store.cells_for_classification().contains("c1"));
        assert_eq!(store.cell("c1").unwrap().time_estimate, 2.0);
    }

    #[test]
    fn test_edit_cell_zero_estimate_is_derived() {
        let mut store = store_with_cells(&["c1"]);
        store.update_engagement_type(EngagementType::Survey);
        let mut cell = Cell::question("How satisfied are you with the service?", ResponseFormat::Open);
        cell.time_estimate = 0.0;
        store.edit_cell("c1", false, cell).unwrap();
        let stored = store.cell("c1").unwrap();
        assert!(stored.time_estimate > 0.0);
        assert_eq!(
            stored.time_estimate,
            estimate_time(&stored.cell_details, EngagementType::Survey)
        );
        assert!(!store.cells_for_classification().contains("c1"));
    }

    #[test]
    fn test_edit_cell_keeps_section() {
        let mut store = store_with_cells(&["c1"]);
        let mut cell = store.cell("c1").unwrap().clone();
        cell.section_index = 7;
        store.edit_cell("c1", false, cell).unwrap();
        assert_eq!(store.cell("c1").unwrap().section_index, 0);
    }

    #[test]
    fn test_edit_time_estimate() {
        let mut store = store_with_cells(&["c1"]);
        store.edit_time_estimate("c1", 4.5).unwrap();
        assert_eq!(store.cell("c1").unwrap().time_estimate, 4.5);
        assert!(store.edited_cells().contains("c1"));
        assert!(store.edit_time_estimate("missing", 1.0).is_err());
    }

    #[test]
    fn test_delete_added_cell_moves_to_deleted() {
        let mut store = store_with_cells(&[]);
        store.add_cell("n1", Cell::question("q", ResponseFormat::Open), 0).unwrap();
        store.delete_cell("n1", 0).unwrap();
        assert!(!store.added_cells().contains("n1"));
        assert!(store.deleted_cells().contains("n1"));
        assert!(!store.cells_for_classification().contains("n1"));
        assert_exclusive(&store);
    }

    #[test]
    fn test_move_cell_across_sections() {
        let mut store = store_with_cells(&["c1", "c2"]);
        store.add_section();
        store.move_cell(0, 0, 1, 0).unwrap();
        assert_eq!(store.sections()[0].cells, vec!["c2"]);
        assert_eq!(store.sections()[1].cells, vec!["c1"]);
        assert_eq!(store.cell("c1").unwrap().section_index, 1);
        assert!(store.edited_cells().contains("c1"));
        assert_sections_consistent(&store);
    }

    #[test]
    fn test_move_cell_within_section_clamps_position() {
        let mut store = store_with_cells(&["c1", "c2", "c3"]);
        store.move_cell(0, 0, 0, 10).unwrap();
        assert_eq!(store.sections()[0].cells, vec!["c2", "c3", "c1"]);
        assert!(store.move_cell(0, 5, 0, 0).is_err());
    }

    #[test]
    fn test_duplicate_cell_inserted_after_original() {
        let mut store = store_with_cells(&["c1", "c2"]);
        let copy = store.cell("c1").unwrap().clone();
        store.duplicate_cell("c1-copy", copy, "c1").unwrap();
        assert_eq!(store.sections()[0].cells, vec!["c1", "c1-copy", "c2"]);
        assert!(store.added_cells().contains("c1-copy"));
        assert!(store.cells_for_classification().contains("c1-copy"));
        assert!(store.duplicate_cell("x", Cell::text("x"), "missing").is_err());
    }

    #[test]
    fn test_delete_section_reindexes() {
        let mut store = store_with_cells(&["a"]);
        for n in 1..4 {
            let id = store.add_section();
            store
                .add_cell(format!("s{}", n), Cell::text(format!("text {}", n)), id)
                .unwrap();
        }
        store.reset_cell_history();

        store.delete_section(1).unwrap();
        assert_eq!(store.sections().len(), 3);
        assert_sections_consistent(&store);
        assert!(store.deleted_cells().contains("s1"));
        assert!(store.cell("s1").is_none());
        // cells in the shifted sections were re-stamped
        assert!(store.edited_cells().contains("s2"));
        assert!(store.edited_cells().contains("s3"));
        assert!(!store.edited_cells().contains("a"));
        assert_exclusive(&store);
    }

    #[test]
    fn test_delete_section_keeps_added_cells_added() {
        let mut store = store_with_cells(&[]);
        store.add_section();
        store.add_section();
        store.add_cell("n2", Cell::text("new"), 2).unwrap();
        store.delete_section(0).unwrap();
        assert_eq!(store.cell("n2").unwrap().section_index, 1);
        assert!(store.added_cells().contains("n2"));
        assert!(!store.edited_cells().contains("n2"));
    }

    #[test]
    fn test_move_section() {
        let mut store = store_with_cells(&["a"]);
        let id = store.add_section();
        store.add_cell("b", Cell::text("b"), id).unwrap();
        store.reset_cell_history();
        store.move_section(1, 0).unwrap();
        assert_eq!(store.sections()[0].cells, vec!["b"]);
        assert_sections_consistent(&store);
        assert!(store.edited_cells().contains("a"));
        assert!(store.edited_cells().contains("b"));
        assert!(store.edited_sections());
    }

    #[test]
    fn test_reset_cell_history_twice() {
        let mut store = store_with_cells(&["c1", "c2"]);
        store.add_cell("n1", Cell::text("x"), 0).unwrap();
        store.edit_time_estimate("c1", 1.0).unwrap();
        store.delete_cell("c2", 0).unwrap();
        store.edit_project_title("Renamed");
        for _ in 0..2 {
            store.reset_cell_history();
            assert!(store.added_cells().is_empty());
            assert!(store.edited_cells().is_empty());
            assert!(store.deleted_cells().is_empty());
            assert!(!store.edited_title());
        }
    }

    #[test]
    fn test_change_sets_stay_exclusive() {
        // Deterministic pseudo-random walk over add/edit/delete/move.
        let mut store = store_with_cells(&["c0", "c1", "c2"]);
        store.add_section();
        let mut seed: u64 = 0x5eed;
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as usize
        };
        for step in 0..500 {
            let ids: Vec<String> = store.cells().keys().cloned().collect();
            match next() % 5 {
                0 => {
                    let section = next() % store.sections().len();
                    let cell_type = if next() % 2 == 0 { CellType::Question } else { CellType::Text };
                    let mut cell = Cell::text(format!("cell {}", step));
                    cell.cell_details.cell_type = cell_type;
                    let id = if !ids.is_empty() && next() % 4 == 0 {
                        ids[next() % ids.len()].clone()
                    } else {
                        format!("n{}", step)
                    };
                    store.add_cell(id, cell, section).unwrap();
                }
                1 if !ids.is_empty() => {
                    let id = &ids[next() % ids.len()];
                    let cell = store.cell(id).unwrap().clone();
                    store.edit_cell(id, next() % 2 == 0, cell).unwrap();
                }
                2 if !ids.is_empty() => {
                    let id = ids[next() % ids.len()].clone();
                    let section = store.cell(&id).unwrap().section_index;
                    store.delete_cell(&id, section).unwrap();
                }
                3 => {
                    let from = next() % store.sections().len();
                    let len = store.sections()[from].cells.len();
                    if len > 0 {
                        let to = next() % store.sections().len();
                        store.move_cell(from, next() % len, to, next() % 4).unwrap();
                    }
                }
                _ => {
                    if next() % 10 == 0 {
                        store.reset_cell_history();
                    }
                }
            }
            assert_exclusive(&store);
            assert_sections_consistent(&store);
        }
    }

    #[test]
    fn test_pending_requires_project_and_changes() {
        let mut store = ProjectDetailStore::new();
        store.sections.push(Section::default());
        store.add_cell("n1", Cell::text("x"), 0).unwrap();
        assert!(store.pending().is_none(), "no project id yet");

        let mut store = store_with_cells(&["c1"]);
        assert!(store.pending().is_none());
        store.edit_project_title("New title");
        let snapshot = store.pending().unwrap();
        assert_eq!(snapshot.project_title, "New title");
        assert!(store.is_dirty());
    }

    #[test]
    fn test_acknowledge_clears_saved_changes() {
        let mut store = store_with_cells(&["c1", "c2"]);
        store.add_cell("n1", Cell::text("x"), 0).unwrap();
        store.edit_time_estimate("c1", 2.0).unwrap();
        store.delete_cell("c2", 0).unwrap();
        let snapshot = store.pending().unwrap();
        assert_eq!(snapshot.added_cells, vec!["n1"]);
        assert_eq!(snapshot.edited_cells, vec!["c1"]);
        assert_eq!(snapshot.deleted_cells, vec!["c2"]);

        store.acknowledge(&snapshot);
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_acknowledge_keeps_changes_made_in_flight() {
        let mut store = store_with_cells(&["c1"]);
        store.add_cell("n1", Cell::text("draft"), 0).unwrap();
        store.edit_time_estimate("c1", 2.0).unwrap();
        let snapshot = store.pending().unwrap();

        // edits land while the save is in flight
        store.edit_cell("n1", false, Cell::text("final")).unwrap();
        store.edit_time_estimate("c1", 3.0).unwrap();
        store.add_cell("n2", Cell::text("late"), 0).unwrap();

        store.acknowledge(&snapshot);
        assert!(!store.added_cells().contains("n1"));
        assert!(store.edited_cells().contains("n1"), "added cell changed after snapshot");
        assert!(store.edited_cells().contains("c1"));
        assert!(store.added_cells().contains("n2"));
        assert_exclusive(&store);
    }

    #[test]
    fn test_acknowledge_other_project_ignored() {
        let mut store = store_with_cells(&["c1"]);
        store.edit_time_estimate("c1", 2.0).unwrap();
        let mut snapshot = store.pending().unwrap();
        snapshot.project_id = "other".to_string();
        store.acknowledge(&snapshot);
        assert!(store.edited_cells().contains("c1"));
    }
}
