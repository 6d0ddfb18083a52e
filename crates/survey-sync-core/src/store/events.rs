//! Append-only interaction log, flushed separately from project state.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bucket for events not tied to a project.
pub const USER_LEVEL: &str = "user_level";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: String,
    #[serde(default)]
    pub event_detail: Value,
    pub time_stamp: DateTime<Utc>,
}

/// Events to send. `counts` records how many leading events of each
/// bucket the batch covers.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBatch {
    pub events: IndexMap<String, Vec<Event>>,
    pub counts: IndexMap<String, usize>,
}

impl EventBatch {
    pub fn len(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct EventLog {
    events: IndexMap<String, Vec<Event>>,
    events_added: bool,
}

impl Default for EventLog {
    fn default() -> Self {
        let mut events = IndexMap::new();
        events.insert(USER_LEVEL.to_string(), Vec::new());
        Self {
            events,
            events_added: false,
        }
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &IndexMap<String, Vec<Event>> {
        &self.events
    }

    pub fn events_added(&self) -> bool {
        self.events_added
    }

    pub fn len(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record an event now. An empty project id files it under [`USER_LEVEL`].
    pub fn add_event(&mut self, project_id: &str, event_type: impl Into<String>, event_detail: Value) {
        self.add_event_at(project_id, event_type, event_detail, Utc::now());
    }

    pub fn add_event_at(
        &mut self,
        project_id: &str,
        event_type: impl Into<String>,
        event_detail: Value,
        time_stamp: DateTime<Utc>,
    ) {
        let bucket = if project_id.is_empty() { USER_LEVEL } else { project_id };
        self.events.entry(bucket.to_string()).or_default().push(Event {
            event_type: event_type.into(),
            event_detail,
            time_stamp,
        });
        self.events_added = true;
    }

    /// Everything currently logged, if anything is.
    pub fn pending(&self) -> Option<EventBatch> {
        if !self.events_added || self.is_empty() {
            return None;
        }
        let counts = self
            .events
            .iter()
            .map(|(bucket, events)| (bucket.clone(), events.len()))
            .collect();
        Some(EventBatch {
            events: self.events.clone(),
            counts,
        })
    }

    /// Drop the events a delivered batch covered. Buckets only grow at the
    /// back, so those are the first `counts[bucket]` of each. Events logged
    /// after the batch was taken stay queued. Emptied project buckets are
    /// removed.
    pub fn reset_events(&mut self, batch: &EventBatch) {
        for (bucket, sent) in &batch.counts {
            if let Some(events) = self.events.get_mut(bucket) {
                let sent = (*sent).min(events.len());
                events.drain(..sent);
            }
        }
        self.events
            .retain(|bucket, events| bucket == USER_LEVEL || !events.is_empty());
        self.events_added = !self.is_empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_user_level_bucket_always_present() {
        let mut log = EventLog::new();
        assert!(log.events().contains_key(USER_LEVEL));
        assert!(log.pending().is_none());
        log.add_event("", "log_in", json!({}));
        let batch = log.pending().unwrap();
        log.reset_events(&batch);
        assert!(log.events().contains_key(USER_LEVEL));
        assert!(!log.events_added());
        assert!(log.pending().is_none());
    }

    #[test]
    fn test_reset_keeps_events_logged_after_batch() {
        let mut log = EventLog::new();
        let t0 = Utc::now();
        log.add_event_at("p1", "add_cell", json!({"cell_id": "c1"}), t0);
        log.add_event_at("p1", "edit_cell", json!({"cell_id": "c1"}), t0 + Duration::seconds(1));
        let batch = log.pending().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.counts["p1"], 2);

        log.add_event_at("p1", "delete_cell", json!({"cell_id": "c1"}), t0 + Duration::seconds(2));
        log.reset_events(&batch);
        assert_eq!(log.len(), 1);
        assert_eq!(log.events()["p1"][0].event_type, "delete_cell");
        assert!(log.events_added());
    }

    #[test]
    fn test_reset_keeps_late_event_with_older_timestamp() {
        let mut log = EventLog::new();
        let t0 = Utc::now();
        log.add_event_at("p1", "add_cell", json!({}), t0);
        let batch = log.pending().unwrap();
        // wall clock stepped back while the batch was in flight
        log.add_event_at("p1", "edit_cell", json!({}), t0 - Duration::seconds(30));
        log.add_event_at("p1", "move_cell", json!({}), t0);
        log.reset_events(&batch);
        let kept: Vec<&str> = log.events()["p1"].iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(kept, vec!["edit_cell", "move_cell"]);
    }

    #[test]
    fn test_reset_prunes_empty_project_buckets() {
        let mut log = EventLog::new();
        log.add_event("p1", "open_project", json!({}));
        log.add_event("p2", "open_project", json!({}));
        let batch = log.pending().unwrap();
        log.add_event("p2", "add_cell", json!({}));
        log.reset_events(&batch);
        assert!(!log.events().contains_key("p1"));
        assert_eq!(log.events()["p2"].len(), 1);
        assert!(log.events()[USER_LEVEL].is_empty());
    }

    #[test]
    fn test_event_wire_format() {
        let mut log = EventLog::new();
        log.add_event("p1", "move_cell", json!({"from": 0}));
        let value = serde_json::to_value(&log.events()["p1"][0]).unwrap();
        assert_eq!(value["eventType"], "move_cell");
        assert_eq!(value["eventDetail"]["from"], 0);
        assert!(value["timeStamp"].is_string());
    }
}
