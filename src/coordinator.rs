//! Synchronization coordinator: persists dirty store state to the service.
//!
//! A save attempt snapshots every dirty store under one read guard, sends
//! one request per dirty store concurrently (each under the save
//! deadline), and acknowledges each snapshot whose request succeeded. A
//! failed request leaves its store dirty for the next attempt. The
//! "last saved" time only moves when every issued request succeeded.
//!
//! [`SyncCoordinator::run`] drives two independent timers, one for project
//! saves and a shorter one for the event log, and makes a final
//! best-effort flush on shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use survey_sync_core::store::Persistable;

use crate::api::PersistenceApi;
use crate::config::SyncConfig;
use crate::deadline::{call_with_deadline, CallError};
use crate::workspace::Workspace;

/// Outcome of one persistence request.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveStatus {
    /// Nothing to send.
    Skipped,
    Saved,
    Failed(CallError),
}

impl SaveStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, SaveStatus::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveReport {
    pub details: SaveStatus,
    pub context: SaveStatus,
    pub topics: SaveStatus,
    /// Set when at least one request went out and none failed.
    pub saved_at: Option<DateTime<Utc>>,
}

impl SaveReport {
    pub fn any_failed(&self) -> bool {
        self.statuses().iter().any(|s| s.is_failed())
    }

    pub fn anything_sent(&self) -> bool {
        self.statuses().iter().any(|s| **s != SaveStatus::Skipped)
    }

    fn statuses(&self) -> [&SaveStatus; 3] {
        [&self.details, &self.context, &self.topics]
    }
}

pub struct SyncCoordinator {
    workspace: Arc<Workspace>,
    api: Arc<dyn PersistenceApi>,
    config: SyncConfig,
    last_saved: Mutex<Option<DateTime<Utc>>>,
}

impl SyncCoordinator {
    pub fn new(workspace: Arc<Workspace>, api: Arc<dyn PersistenceApi>, config: SyncConfig) -> Self {
        Self {
            workspace,
            api,
            config,
            last_saved: Mutex::new(None),
        }
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    pub async fn last_saved(&self) -> Option<DateTime<Utc>> {
        *self.last_saved.lock().await
    }

    fn deadline(&self) -> Duration {
        self.config.save_timeout()
    }

    // ============ Project state ============

    /// One save attempt across all three project stores.
    pub async fn save_all(&self) -> SaveReport {
        let (details, context, topics, project_id) = {
            let stores = self.workspace.read().await;
            (
                stores.details.pending(),
                stores.context.pending(),
                stores.topics.pending(),
                stores.project_id().to_string(),
            )
        };
        // Topic state is saved against the open project.
        let topics = topics.filter(|_| !project_id.is_empty());

        let deadline = self.deadline();
        let api = &self.api;
        let workspace = &self.workspace;

        let details_fut = send(details, move |snapshot| async move {
            call_with_deadline(deadline, api.update_all_questions(&snapshot)).await?;
            workspace.write().await.details.acknowledge(&snapshot);
            Ok(())
        });
        let context_fut = send(context, move |snapshot| async move {
            call_with_deadline(deadline, api.update_context(&snapshot)).await?;
            workspace.write().await.context.acknowledge(&snapshot);
            Ok(())
        });
        let project_id = project_id.as_str();
        let topics_fut = send(topics, move |snapshot| async move {
            call_with_deadline(deadline, api.save_analyze_topics_info(project_id, &snapshot)).await?;
            workspace.write().await.topics.acknowledge(&snapshot);
            Ok(())
        });

        let (details, context, topics) = futures::join!(details_fut, context_fut, topics_fut);
        let mut report = SaveReport {
            details,
            context,
            topics,
            saved_at: None,
        };

        if report.any_failed() {
            tracing::warn!(
                details = ?report.details,
                context = ?report.context,
                topics = ?report.topics,
                "save attempt incomplete; changes kept for retry"
            );
        } else if report.anything_sent() {
            let now = Utc::now();
            *self.last_saved.lock().await = Some(now);
            report.saved_at = Some(now);
            tracing::info!(project_id, "project saved");
        }
        report
    }

    /// Save only the section/cell graph. Used before topic analysis, which
    /// needs the service to see every cell.
    pub async fn save_details(&self) -> SaveStatus {
        let details = self.workspace.read().await.details.pending();
        let deadline = self.deadline();
        let api = &self.api;
        let workspace = &self.workspace;
        send(details, move |snapshot| async move {
            call_with_deadline(deadline, api.update_all_questions(&snapshot)).await?;
            workspace.write().await.details.acknowledge(&snapshot);
            Ok(())
        })
        .await
    }

    // ============ Event log ============

    /// Send logged events and drop the ones the service confirmed.
    pub async fn flush_events(&self) -> SaveStatus {
        let Some(user_code) = self.workspace.user_code() else {
            return SaveStatus::Skipped;
        };
        let Some(batch) = self.workspace.read().await.events.pending() else {
            return SaveStatus::Skipped;
        };
        let count = batch.len();
        match call_with_deadline(self.deadline(), self.api.track_user_action(user_code, &batch.events)).await {
            Ok(()) => {
                self.workspace.write().await.events.reset_events(&batch);
                tracing::debug!(count, "events flushed");
                SaveStatus::Saved
            }
            Err(err) => {
                tracing::warn!(error = %err, count, "event flush failed");
                SaveStatus::Failed(err)
            }
        }
    }

    // ============ Timers ============

    /// Run both timers until `shutdown` flips to `true` (or its sender is
    /// dropped), then flush once more.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> SaveReport {
        let saves = self.tick_loop(self.config.save_interval(), shutdown.clone(), move || async move {
            if self.workspace.user_code().is_some() {
                self.save_all().await;
            }
        });
        let events = self.tick_loop(self.config.events_interval(), shutdown, move || async move {
            self.flush_events().await;
        });
        futures::join!(saves, events);

        tracing::info!("sync stopping; final flush");
        let (report, _) = futures::join!(self.save_all(), self.flush_events());
        report
    }

    async fn tick_loop<F, Fut>(&self, period: Duration, mut shutdown: watch::Receiver<bool>, mut on_tick: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => on_tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

async fn send<S, F, Fut>(snapshot: Option<S>, call: F) -> SaveStatus
where
    F: FnOnce(S) -> Fut,
    Fut: Future<Output = Result<(), CallError>>,
{
    let Some(snapshot) = snapshot else {
        return SaveStatus::Skipped;
    };
    match call(snapshot).await {
        Ok(()) => SaveStatus::Saved,
        Err(err) => {
            tracing::warn!(error = %err, "save request failed");
            SaveStatus::Failed(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use indexmap::IndexMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use survey_sync_core::models::{Cell, ContextQuestion, ResponseFormat, Section};
    use survey_sync_core::store::context::ContextSnapshot;
    use survey_sync_core::store::events::Event;
    use survey_sync_core::store::project::ProjectDetailsSnapshot;
    use survey_sync_core::store::topics::TopicsSnapshot;

    /// Fake service: each endpoint can hang, fail, or succeed.
    #[derive(Default)]
    struct FakeApi {
        hang_details: bool,
        fail_context: bool,
        fail_events: bool,
        slow_events: bool,
        details_calls: AtomicUsize,
        context_calls: AtomicUsize,
        topics_calls: AtomicUsize,
        event_calls: AtomicUsize,
    }

    #[async_trait]
    impl PersistenceApi for FakeApi {
        async fn update_all_questions(&self, _: &ProjectDetailsSnapshot) -> Result<(), CallError> {
            self.details_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang_details {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(())
        }

        async fn update_context(&self, _: &ContextSnapshot) -> Result<(), CallError> {
            self.context_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_context {
                return Err(CallError::Status(500));
            }
            Ok(())
        }

        async fn save_analyze_topics_info(&self, _: &str, _: &TopicsSnapshot) -> Result<(), CallError> {
            self.topics_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn track_user_action(&self, _: &str, _: &IndexMap<String, Vec<Event>>) -> Result<(), CallError> {
            self.event_calls.fetch_add(1, Ordering::SeqCst);
            if self.slow_events {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            if self.fail_events {
                return Err(CallError::Transport("connection refused".to_string()));
            }
            Ok(())
        }
    }

    async fn workspace_with_project(user_code: Option<&str>) -> Arc<Workspace> {
        let workspace = Arc::new(Workspace::new(user_code.map(str::to_string)));
        {
            let mut stores = workspace.write().await;
            let mut cells = std::collections::BTreeMap::new();
            cells.insert("c1".to_string(), Cell::question("How often?", ResponseFormat::Closed));
            let sections = vec![Section {
                id: 0,
                title: "Intro".to_string(),
                cells: vec!["c1".to_string()],
            }];
            stores.details.set_project_details("p1", "Library", sections, cells);
            let mut context = std::collections::BTreeMap::new();
            context.insert(1, ContextQuestion::with_response("Patrons"));
            stores.context.set_project_context("p1", context);
        }
        workspace
    }

    fn coordinator(workspace: Arc<Workspace>, api: Arc<FakeApi>) -> SyncCoordinator {
        SyncCoordinator::new(workspace, api, SyncConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_dirty_sends_nothing() {
        let workspace = workspace_with_project(Some("u1")).await;
        let api = Arc::new(FakeApi::default());
        let sync = coordinator(workspace, api.clone());
        let report = sync.save_all().await;
        assert!(!report.anything_sent());
        assert!(report.saved_at.is_none());
        assert_eq!(api.details_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detail_timeout_topics_saved() {
        let workspace = workspace_with_project(Some("u1")).await;
        {
            let mut stores = workspace.write().await;
            stores.details.add_cell("n1", Cell::text("Welcome"), 0).unwrap();
            stores.details.edit_time_estimate("c1", 2.0).unwrap();
            stores.details.delete_cell("c1", 0).unwrap();
            stores.topics.add_topic("Budget");
        }
        let api = Arc::new(FakeApi {
            hang_details: true,
            ..FakeApi::default()
        });
        let sync = coordinator(workspace.clone(), api.clone());

        let report = sync.save_all().await;
        assert_eq!(report.details, SaveStatus::Failed(CallError::Timeout(Duration::from_secs(10))));
        assert_eq!(report.topics, SaveStatus::Saved);
        assert!(report.saved_at.is_none());
        assert!(sync.last_saved().await.is_none());

        let stores = workspace.read().await;
        assert!(!stores.topics.need_to_save());
        assert!(!stores.details.added_cells().is_empty());
        assert!(!stores.details.deleted_cells().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_acknowledges_and_records_time() {
        let workspace = workspace_with_project(Some("u1")).await;
        {
            let mut stores = workspace.write().await;
            stores.details.edit_project_title("Library 2024");
            stores.context.edit_response(1, "Adults", None).unwrap();
        }
        let api = Arc::new(FakeApi::default());
        let sync = coordinator(workspace.clone(), api.clone());

        let report = sync.save_all().await;
        assert_eq!(report.details, SaveStatus::Saved);
        assert_eq!(report.context, SaveStatus::Saved);
        assert_eq!(report.topics, SaveStatus::Skipped);
        assert!(report.saved_at.is_some());
        assert_eq!(sync.last_saved().await, report.saved_at);

        let stores = workspace.read().await;
        assert!(!stores.details.is_dirty());
        assert!(!stores.context.edited());
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_failure_keeps_flag() {
        let workspace = workspace_with_project(Some("u1")).await;
        workspace.write().await.context.edit_response(1, "Adults", None).unwrap();
        let api = Arc::new(FakeApi {
            fail_context: true,
            ..FakeApi::default()
        });
        let sync = coordinator(workspace.clone(), api);
        let report = sync.save_all().await;
        assert_eq!(report.context, SaveStatus::Failed(CallError::Status(500)));
        assert!(workspace.read().await.context.edited());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_events_truncates_on_success() {
        let workspace = workspace_with_project(Some("u1")).await;
        workspace.write().await.log("open_project", serde_json::json!({}));
        let api = Arc::new(FakeApi::default());
        let sync = coordinator(workspace.clone(), api.clone());
        assert_eq!(sync.flush_events().await, SaveStatus::Saved);
        assert!(!workspace.read().await.events.events_added());
        assert_eq!(sync.flush_events().await, SaveStatus::Skipped);
        assert_eq!(api.event_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_events_keeps_events_logged_in_flight() {
        let workspace = workspace_with_project(Some("u1")).await;
        workspace.write().await.log("open_project", serde_json::json!({}));
        let api = Arc::new(FakeApi {
            slow_events: true,
            ..FakeApi::default()
        });
        let sync = coordinator(workspace.clone(), api);
        let (status, _) = futures::join!(sync.flush_events(), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            workspace.write().await.log("add_cell", serde_json::json!({"cell_id": "n1"}));
        });
        assert_eq!(status, SaveStatus::Saved);

        let stores = workspace.read().await;
        assert_eq!(stores.events.len(), 1);
        assert_eq!(stores.events.events()["p1"][0].event_type, "add_cell");
        assert!(stores.events.events_added());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_events_failure_keeps_events() {
        let workspace = workspace_with_project(Some("u1")).await;
        workspace.write().await.log("open_project", serde_json::json!({}));
        let api = Arc::new(FakeApi {
            fail_events: true,
            ..FakeApi::default()
        });
        let sync = coordinator(workspace.clone(), api);
        assert!(sync.flush_events().await.is_failed());
        assert_eq!(workspace.read().await.events.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_user_code_no_event_flush() {
        let workspace = workspace_with_project(None).await;
        workspace.write().await.log("open_project", serde_json::json!({}));
        let sync = coordinator(workspace, Arc::new(FakeApi::default()));
        assert_eq!(sync.flush_events().await, SaveStatus::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_and_flushes_on_shutdown() {
        let workspace = workspace_with_project(Some("u1")).await;
        let api = Arc::new(FakeApi::default());
        let sync = Arc::new(coordinator(workspace.clone(), api.clone()));
        let (tx, rx) = watch::channel(false);

        let runner = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.run(rx).await })
        };

        workspace.write().await.details.edit_project_title("First");
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(api.details_calls.load(Ordering::SeqCst), 1);

        workspace.write().await.details.edit_project_title("Second");
        tx.send(true).unwrap();
        let report = runner.await.unwrap();
        assert_eq!(report.details, SaveStatus::Saved);
        assert_eq!(api.details_calls.load(Ordering::SeqCst), 2);
        assert!(api.event_calls.load(Ordering::SeqCst) == 0);
    }
}
