//! In-memory state stores with dirty tracking.
//!
//! Each store owns one normalized slice of project state and exposes a
//! narrow set of command methods. Every command is an atomic transition:
//! inputs are validated before anything is mutated, so a rejected command
//! leaves the store untouched.
//!
//! | Store | Owns | Dirty signal |
//! |-------|------|--------------|
//! | [`ProjectDetailStore`](project::ProjectDetailStore) | sections, cells | change-tracking sets, `edited_title`, `edited_sections` |
//! | [`ProjectContextStore`](context::ProjectContextStore) | intake responses | `edited` |
//! | [`TopicStore`](topics::TopicStore) | topics, suggestions, human overrides | `need_to_save` |
//! | [`EventLog`](events::EventLog) | interaction events | `events_added` |
//! | [`GenerateOptionsStore`](assist::GenerateOptionsStore), [`QuestionCheckStore`](assist::QuestionCheckStore) | AI assistance results | not persisted |
//!
//! The three project stores implement [`Persistable`], which is the only
//! interface the synchronization coordinator needs: take a snapshot of
//! what is unsaved, send it, and acknowledge it once the remote side has
//! confirmed the write.

pub mod assist;
pub mod context;
pub mod events;
pub mod project;
pub mod topics;

/// A store whose unsaved changes can be snapshotted and acknowledged.
///
/// `acknowledge` must only clear markers covered by the snapshot. Changes
/// made between [`pending`](Persistable::pending) and
/// [`acknowledge`](Persistable::acknowledge) stay dirty and are picked up
/// by the next save.
pub trait Persistable {
    /// Serializable copy of the state to persist.
    type Snapshot: Clone + Send + Sync + 'static;

    /// Returns a snapshot if the store has unsaved changes.
    fn pending(&self) -> Option<Self::Snapshot>;

    /// Clear the dirty markers covered by a successfully saved snapshot.
    fn acknowledge(&mut self, snapshot: &Self::Snapshot);

    /// Whether the store has unsaved changes.
    fn is_dirty(&self) -> bool {
        self.pending().is_some()
    }
}
