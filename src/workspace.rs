//! Shared ownership of the project stores.
//!
//! All stores sit behind one `tokio::sync::RwLock`. Store commands are
//! synchronous, so a write guard is only held for the length of a single
//! transition; no guard is ever held across a network call.

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use survey_sync_core::store::assist::{GenerateOptionsStore, QuestionCheckStore};
use survey_sync_core::store::context::ProjectContextStore;
use survey_sync_core::store::events::EventLog;
use survey_sync_core::store::project::ProjectDetailStore;
use survey_sync_core::store::topics::TopicStore;

/// The state of the open project plus the interaction log.
#[derive(Debug, Default)]
pub struct Stores {
    pub details: ProjectDetailStore,
    pub context: ProjectContextStore,
    pub topics: TopicStore,
    pub events: EventLog,
    pub options: GenerateOptionsStore,
    pub checks: QuestionCheckStore,
}

impl Stores {
    pub fn project_id(&self) -> &str {
        self.details.project_id()
    }

    /// Log an event against the open project.
    pub fn log(&mut self, event_type: &str, detail: serde_json::Value) {
        let project_id = self.details.project_id().to_string();
        self.events.add_event(&project_id, event_type, detail);
    }
}

#[derive(Debug, Default)]
pub struct Workspace {
    stores: RwLock<Stores>,
    user_code: Option<String>,
}

impl Workspace {
    pub fn new(user_code: Option<String>) -> Self {
        Self {
            stores: RwLock::new(Stores::default()),
            user_code,
        }
    }

    /// Saves only run while a user is logged in.
    pub fn user_code(&self) -> Option<&str> {
        self.user_code.as_deref()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Stores> {
        self.stores.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, Stores> {
        self.stores.write().await
    }
}
