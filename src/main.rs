//! # Survey Sync CLI (`svsync`)
//!
//! Command-line client for the survey design service. It opens a project
//! into local stores, applies edits, and keeps the service in sync.
//!
//! ## Usage
//!
//! ```bash
//! svsync --config ./config/svsync.toml --user ABC123 <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `svsync login` | Log in and list projects |
//! | `svsync new` | Create a project |
//! | `svsync show <project>` | Print sections, cells, topics and unsaved state |
//! | `svsync check <project>` | Validate context responses |
//! | `svsync submit <project>` | Submit context and install the AI draft |
//! | `svsync apply <project> <file>` | Apply a JSON array of intents and save |
//! | `svsync analyze <project>` | Run topic analysis |
//! | `svsync edit <project>` | Apply intents from stdin with periodic saves |
//! | `svsync reword <project> <cell> [--request TEXT]` | Print AI rewordings of a cell |
//! | `svsync check-question <project> <cell>` | Run question checks on a cell |
//! | `svsync switch-format <project> <cell>` | Flip a question between open and closed |
//! | `svsync suggest <project> <topic> [--delete]` | Ask for questions to add to or remove from a topic |
//! | `svsync queue-test <a> <b>` | Round-trip a task through the worker queue |
//! | `svsync delete <project>` | Delete a project |
//!
//! Log verbosity follows `RUST_LOG` (default `survey_sync=info`). Logs go
//! to stderr; command output goes to stdout.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use survey_sync::{commands, config};

/// Survey Sync: keep a locally edited survey project in sync with the
/// survey design service.
#[derive(Parser)]
#[command(name = "svsync", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/svsync.toml")]
    config: PathBuf,

    /// User code to log in with. Overrides `session.user_code`.
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and list projects.
    Login,

    /// Create a project and print its context questions.
    New,

    /// Load a project and print its contents.
    Show { project: String },

    /// Validate context responses: required fields plus remote checks.
    Check { project: String },

    /// Submit the context and replace the project with the AI draft.
    Submit { project: String },

    /// Apply a JSON array of intents, then save once.
    Apply {
        project: String,
        /// File containing `[{"op": ...}, ...]`.
        intents: PathBuf,
    },

    /// Classify cells into topics.
    Analyze {
        project: String,
        /// Run even when nothing changed since the last analysis.
        #[arg(long)]
        force: bool,
    },

    /// Read intents as JSON lines from stdin while saving periodically.
    Edit { project: String },

    /// Print AI rewordings of a cell.
    Reword {
        project: String,
        cell: String,
        /// A specific request such as "make it shorter".
        #[arg(long)]
        request: Option<String>,
    },

    /// Run the question checks on a cell.
    CheckQuestion { project: String, cell: String },

    /// Flip a question between open and closed, then save.
    SwitchFormat { project: String, cell: String },

    /// Ask for questions to add to a topic, or with --delete, to remove.
    Suggest {
        project: String,
        topic: String,
        #[arg(long)]
        delete: bool,
    },

    /// Round-trip a trivial task through the service's worker queue.
    QueueTest { a: i64, b: i64 },

    /// Delete a project.
    Delete { project: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("survey_sync=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut cfg = config::load_config(&cli.config)?;
    if let Some(user) = cli.user {
        cfg.session.user_code = Some(user);
    }

    match cli.command {
        Commands::Login => commands::run_login(&cfg).await?,
        Commands::New => commands::run_new(&cfg).await?,
        Commands::Show { project } => commands::run_show(&cfg, &project).await?,
        Commands::Check { project } => commands::run_check(&cfg, &project).await?,
        Commands::Submit { project } => commands::run_submit(&cfg, &project).await?,
        Commands::Apply { project, intents } => {
            commands::run_apply(&cfg, &project, &intents).await?;
        }
        Commands::Analyze { project, force } => {
            commands::run_analyze(&cfg, &project, force).await?;
        }
        Commands::Edit { project } => commands::run_edit(&cfg, &project).await?,
        Commands::Reword { project, cell, request } => {
            commands::run_reword(&cfg, &project, &cell, request.as_deref()).await?;
        }
        Commands::CheckQuestion { project, cell } => {
            commands::run_check_question(&cfg, &project, &cell).await?;
        }
        Commands::SwitchFormat { project, cell } => {
            commands::run_switch_format(&cfg, &project, &cell).await?;
        }
        Commands::Suggest { project, topic, delete } => {
            commands::run_suggest(&cfg, &project, &topic, delete).await?;
        }
        Commands::QueueTest { a, b } => commands::run_queue_test(&cfg, a, b).await?,
        Commands::Delete { project } => commands::run_delete(&cfg, &project).await?,
    }

    Ok(())
}
