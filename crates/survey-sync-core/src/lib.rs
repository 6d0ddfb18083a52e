//! # Survey Sync Core
//!
//! Runtime-free state logic for survey-sync: data models, the three
//! dirty-tracking project stores, the interaction event log, and cell
//! time estimation.
//!
//! This crate does no I/O and pulls in no async runtime. Stores are plain
//! values; callers decide how to share them and when to persist them via
//! [`store::Persistable`].

pub mod estimate;
pub mod models;
pub mod store;

pub use store::Persistable;
