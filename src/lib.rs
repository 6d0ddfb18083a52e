//! # Survey Sync
//!
//! Client-side state and synchronization for a survey design service.
//!
//! A project (sections of question and text cells), its topic
//! classification and its intake context are edited locally in the stores
//! from [`survey_sync_core`]. The [`coordinator::SyncCoordinator`] sends
//! whatever is dirty on a timer, each request bounded by a deadline, and
//! only marks state clean once the service confirms it.
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐   ┌─────────┐
//! │ Intents  │──▶│   Stores    │──▶│ Coordinator  │──▶│ Service │
//! │ CLI/JSON │   │ (RwLock)    │◀──│ ack on 2xx   │◀──│  HTTP   │
//! └──────────┘   └─────────────┘   └──────────────┘   └─────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`api`] | HTTP client and the [`api::PersistenceApi`] seam |
//! | [`commands`] | `svsync` subcommand implementations |
//! | [`config`] | TOML configuration loading and validation |
//! | [`coordinator`] | Periodic and on-demand saves |
//! | [`deadline`] | Per-call deadlines and [`deadline::CallError`] |
//! | [`intents`] | JSON edit commands applied to the stores |
//! | [`session`] | Log in, open, check, submit and analyze flows, plus AI assistance for cells and topics |
//! | [`workspace`] | Shared ownership of the stores |

pub mod api;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod deadline;
pub mod intents;
pub mod session;
pub mod workspace;
