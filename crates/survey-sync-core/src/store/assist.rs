//! Caches for AI assistance results: rewordings, response format pairs
//! and question checks.
//!
//! Nothing here is persisted. Every entry carries the time it was produced
//! and is only served while it is at least as recent as the cell's
//! `last_updated`; an edit to the cell makes the entry stale.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::{CellDetails, CheckSuggestion, HumanAiStatus, ResponseFormat, Rewording};

/// Whether a result produced `at` still describes a cell last edited at
/// `last_updated`. A cell never edited locally has no edit time.
pub fn is_fresh(at: DateTime<Utc>, last_updated: Option<DateTime<Utc>>) -> bool {
    last_updated.map_or(true, |edited| at >= edited)
}

/// Rewordings generated without a specific request.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneralOptions {
    pub content: Vec<Rewording>,
    pub timestamp: DateTime<Utc>,
}

/// Rewordings generated for one specific request, handed out one at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecificOptions {
    pub request_text: String,
    pub content: Vec<Rewording>,
    /// Index of the next rewording to hand out.
    pub current_id: usize,
    pub timestamp: DateTime<Utc>,
}

/// One side of an open/closed pair.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatVariant {
    pub cell_details: CellDetails,
    pub time_estimate: f64,
    pub human_ai_status: HumanAiStatus,
}

/// Both formats of a question, as last switched.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatPair {
    pub open: FormatVariant,
    pub closed: FormatVariant,
    pub last_switched: DateTime<Utc>,
}

impl FormatPair {
    pub fn variant(&self, format: ResponseFormat) -> Option<&FormatVariant> {
        match format {
            ResponseFormat::Open => Some(&self.open),
            ResponseFormat::Closed => Some(&self.closed),
            ResponseFormat::Slider | ResponseFormat::Unspecified => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptionsStore {
    general: BTreeMap<String, GeneralOptions>,
    specific: BTreeMap<String, SpecificOptions>,
    formats: BTreeMap<String, FormatPair>,
}

impl GenerateOptionsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn general_options(&self, cell_id: &str) -> Option<&GeneralOptions> {
        self.general.get(cell_id)
    }

    pub fn specific_options(&self, cell_id: &str) -> Option<&SpecificOptions> {
        self.specific.get(cell_id)
    }

    pub fn format_pair(&self, cell_id: &str) -> Option<&FormatPair> {
        self.formats.get(cell_id)
    }

    /// Cached rewordings, unless the cell changed since they were made.
    pub fn fresh_general_options(&self, cell_id: &str, last_updated: Option<DateTime<Utc>>) -> Option<&[Rewording]> {
        self.general
            .get(cell_id)
            .filter(|o| is_fresh(o.timestamp, last_updated))
            .map(|o| o.content.as_slice())
    }

    pub fn update_general_options(&mut self, cell_id: &str, content: Vec<Rewording>, at: DateTime<Utc>) {
        self.general.insert(
            cell_id.to_string(),
            GeneralOptions {
                content,
                timestamp: at,
            },
        );
    }

    /// Replace the cell's specific rewordings and start handing them out
    /// from the first.
    pub fn update_specific_options(
        &mut self,
        cell_id: &str,
        request_text: impl Into<String>,
        content: Vec<Rewording>,
        at: DateTime<Utc>,
    ) {
        self.specific.insert(
            cell_id.to_string(),
            SpecificOptions {
                request_text: request_text.into(),
                content,
                current_id: 0,
                timestamp: at,
            },
        );
    }

    /// Hand out the next cached rewording for `request_text` and advance.
    /// `None` when the request differs, the batch is used up, or the cell
    /// changed since the batch was made.
    pub fn next_specific_option(
        &mut self,
        cell_id: &str,
        request_text: &str,
        last_updated: Option<DateTime<Utc>>,
    ) -> Option<Rewording> {
        let options = self.specific.get_mut(cell_id)?;
        if options.request_text != request_text || !is_fresh(options.timestamp, last_updated) {
            return None;
        }
        let next = options.content.get(options.current_id)?.clone();
        options.current_id += 1;
        Some(next)
    }

    /// Cached pair, unless the cell changed since the last switch.
    pub fn fresh_format_pair(&self, cell_id: &str, last_updated: Option<DateTime<Utc>>) -> Option<&FormatPair> {
        self.formats
            .get(cell_id)
            .filter(|p| is_fresh(p.last_switched, last_updated))
    }

    pub fn add_response_format(&mut self, cell_id: &str, open: FormatVariant, closed: FormatVariant, at: DateTime<Utc>) {
        self.formats.insert(
            cell_id.to_string(),
            FormatPair {
                open,
                closed,
                last_switched: at,
            },
        );
    }

    /// Record that a cached pair was just applied. The switch itself edits
    /// the cell, so without this the pair would go stale immediately.
    pub fn update_switch_timestamp(&mut self, cell_id: &str, at: DateTime<Utc>) {
        if let Some(pair) = self.formats.get_mut(cell_id) {
            pair.last_switched = at;
        }
    }

    pub fn reset_generate_options(&mut self) {
        self.general.clear();
        self.specific.clear();
        self.formats.clear();
    }
}

/// Result of the remote question check for one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellChecks {
    pub last_checked: DateTime<Utc>,
    pub cell_checks: Vec<Value>,
    pub check_suggestions: Vec<CheckSuggestion>,
}

#[derive(Debug, Clone, Default)]
pub struct QuestionCheckStore {
    checks: BTreeMap<String, CellChecks>,
}

impl QuestionCheckStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checks(&self, cell_id: &str) -> Option<&CellChecks> {
        self.checks.get(cell_id)
    }

    pub fn fresh_checks(&self, cell_id: &str, last_updated: Option<DateTime<Utc>>) -> Option<&CellChecks> {
        self.checks
            .get(cell_id)
            .filter(|c| is_fresh(c.last_checked, last_updated))
    }

    pub fn update_checks_for_cell(&mut self, cell_id: &str, checks: CellChecks) {
        self.checks.insert(cell_id.to_string(), checks);
    }

    pub fn reset_checks(&mut self) {
        self.checks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn rewording(text: &str) -> Rewording {
        Rewording {
            cell_details: CellDetails {
                main_text: text.to_string(),
                ..CellDetails::default()
            },
            time_estimate: 0.5,
            ..Rewording::default()
        }
    }

    fn variant(text: &str, format: ResponseFormat) -> FormatVariant {
        FormatVariant {
            cell_details: CellDetails {
                main_text: text.to_string(),
                response_format: format,
                ..CellDetails::default()
            },
            time_estimate: 1.0,
            human_ai_status: HumanAiStatus::HumanAi,
        }
    }

    #[test]
    fn test_is_fresh() {
        let t0 = Utc::now();
        assert!(is_fresh(t0, None));
        assert!(is_fresh(t0, Some(t0)));
        assert!(is_fresh(t0, Some(t0 - Duration::seconds(1))));
        assert!(!is_fresh(t0, Some(t0 + Duration::seconds(1))));
    }

    #[test]
    fn test_general_options_go_stale_after_edit() {
        let mut store = GenerateOptionsStore::new();
        let t0 = Utc::now();
        store.update_general_options("c1", vec![rewording("A"), rewording("B")], t0);
        assert_eq!(store.fresh_general_options("c1", Some(t0)).unwrap().len(), 2);
        assert!(store
            .fresh_general_options("c1", Some(t0 + Duration::seconds(5)))
            .is_none());
        assert!(store.general_options("c1").is_some());
        assert!(store.fresh_general_options("c2", None).is_none());
    }

    #[test]
    fn test_specific_options_handed_out_in_order() {
        let mut store = GenerateOptionsStore::new();
        let t0 = Utc::now();
        store.update_specific_options("c1", "shorter", vec![rewording("A"), rewording("B")], t0);

        assert!(store.next_specific_option("c1", "friendlier", Some(t0)).is_none());
        let first = store.next_specific_option("c1", "shorter", Some(t0)).unwrap();
        assert_eq!(first.cell_details.main_text, "A");
        let second = store.next_specific_option("c1", "shorter", Some(t0)).unwrap();
        assert_eq!(second.cell_details.main_text, "B");
        assert!(store.next_specific_option("c1", "shorter", Some(t0)).is_none());
        assert_eq!(store.specific_options("c1").unwrap().current_id, 2);

        store.update_specific_options("c1", "shorter", vec![rewording("C")], t0);
        assert_eq!(store.specific_options("c1").unwrap().current_id, 0);
        assert!(store
            .next_specific_option("c1", "shorter", Some(t0 + Duration::seconds(1)))
            .is_none());
    }

    #[test]
    fn test_format_pair_freshness_follows_last_switched() {
        let mut store = GenerateOptionsStore::new();
        let t0 = Utc::now();
        store.add_response_format(
            "c1",
            variant("Why do you visit?", ResponseFormat::Open),
            variant("Which reason fits best?", ResponseFormat::Closed),
            t0,
        );
        let pair = store.fresh_format_pair("c1", Some(t0)).unwrap();
        assert_eq!(
            pair.variant(ResponseFormat::Closed).unwrap().cell_details.main_text,
            "Which reason fits best?"
        );
        assert!(pair.variant(ResponseFormat::Slider).is_none());

        let edited = t0 + Duration::seconds(2);
        assert!(store.fresh_format_pair("c1", Some(edited)).is_none());
        store.update_switch_timestamp("c1", edited);
        assert!(store.fresh_format_pair("c1", Some(edited)).is_some());

        store.reset_generate_options();
        assert!(store.format_pair("c1").is_none());
    }

    #[test]
    fn test_question_checks_staleness() {
        let mut store = QuestionCheckStore::new();
        let t0 = Utc::now();
        store.update_checks_for_cell(
            "c1",
            CellChecks {
                last_checked: t0,
                cell_checks: vec![serde_json::json!({"check": "double_barreled", "score": 1})],
                check_suggestions: Vec::new(),
            },
        );
        assert!(store.fresh_checks("c1", Some(t0 - Duration::seconds(1))).is_some());
        assert!(store.fresh_checks("c1", Some(t0 + Duration::seconds(1))).is_none());
        assert_eq!(store.checks("c1").unwrap().cell_checks.len(), 1);
        store.reset_checks();
        assert!(store.checks("c1").is_none());
    }
}
