//! CLI command implementations.
//!
//! Each `run_*` function backs one `svsync` subcommand. They log in with
//! the resolved user code, drive a [`Session`], print a human-readable
//! result to stdout, and save whatever they changed before returning.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use survey_sync_core::models::{CellDetails, SuggestionBatch, SuggestionType};
use survey_sync_core::store::Persistable;

use crate::config::Config;
use crate::coordinator::{SaveReport, SaveStatus};
use crate::intents::{self, Intent};
use crate::session::Session;

async fn connect(config: &Config) -> Result<Session> {
    let Some(user_code) = config.session.user_code.as_deref() else {
        bail!("No user code configured. Pass --user or set session.user_code");
    };
    let (session, _) = Session::connect(config, user_code).await?;
    Ok(session)
}

async fn open(config: &Config, project_id: &str) -> Result<Session> {
    let session = connect(config).await?;
    session.open_project(project_id).await?;
    Ok(session)
}

/// Save the project and flush events, failing if any request failed.
async fn save(session: &Session) -> Result<SaveReport> {
    let coordinator = session.coordinator();
    let (report, events) = futures::join!(coordinator.save_all(), coordinator.flush_events());
    if let SaveStatus::Failed(err) = events {
        tracing::warn!(error = %err, "events not delivered");
    }
    if report.any_failed() {
        bail!(
            "Save failed (details: {}, context: {}, topics: {}); changes were not persisted",
            describe(&report.details),
            describe(&report.context),
            describe(&report.topics)
        );
    }
    Ok(report)
}

fn describe(status: &SaveStatus) -> String {
    match status {
        SaveStatus::Skipped => "unchanged".to_string(),
        SaveStatus::Saved => "saved".to_string(),
        SaveStatus::Failed(err) => err.to_string(),
    }
}

fn print_saved(report: &SaveReport) {
    match report.saved_at {
        Some(at) => println!("Saved at {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Nothing to save."),
    }
}

pub async fn run_login(config: &Config) -> Result<()> {
    let Some(user_code) = config.session.user_code.as_deref() else {
        bail!("No user code configured. Pass --user or set session.user_code");
    };
    let (session, projects) = Session::connect(config, user_code).await?;
    if projects.is_empty() {
        println!("Logged in as {}. No projects yet.", user_code);
    } else {
        println!("Logged in as {}. {} project(s):", user_code, projects.len());
        for project in &projects {
            println!("  {}  {}", project.project_id, project.project_title);
        }
    }
    session.coordinator().flush_events().await;
    Ok(())
}

pub async fn run_new(config: &Config) -> Result<()> {
    let session = connect(config).await?;
    let created = session.create_project().await?;
    println!("Created project {}", created.project_id);
    if !created.project_title.is_empty() {
        println!("Title: {}", created.project_title);
    }
    if !created.questions.is_empty() {
        println!();
        println!("Context questions:");
        for (id, question) in &created.questions {
            let response = if question.response.is_empty() {
                "(unanswered)"
            } else {
                question.response.as_str()
            };
            println!("  [{}] {}", id, response);
        }
    }
    let report = save(&session).await?;
    print_saved(&report);
    Ok(())
}

pub async fn run_show(config: &Config, project_id: &str) -> Result<()> {
    let session = open(config, project_id).await?;
    let stores = session.workspace().read().await;
    let details = &stores.details;

    println!("Project: {} ({})", details.project_title(), details.project_id());
    println!(
        "Engagement: {:?}, estimated {:.1} min",
        details.engagement_type(),
        details.total_time_estimate()
    );
    for section in details.sections() {
        println!();
        println!("Section {}: {}", section.id, section.title);
        for cell_id in &section.cells {
            let Some(cell) = details.cell(cell_id) else {
                continue;
            };
            let topics = stores.topics.topics_for_cell(cell_id);
            println!(
                "  {} [{:?}, {:.1} min] {}",
                cell_id, cell.cell_details.cell_type, cell.time_estimate, cell.cell_details.main_text
            );
            if !topics.is_empty() {
                println!("      topics: {}", topics.join(", "));
            }
        }
    }

    println!();
    println!("Topics:");
    for (name, topic) in stores.topics.topics() {
        let pending: usize = stores
            .topics
            .suggestions()
            .get(name)
            .map(|batches| batches.iter().map(|b| b.len()).sum())
            .unwrap_or(0);
        println!("  {} ({} cells, {} suggestions)", name, topic.cells.len(), pending);
    }
    if !stores.topics.last_analyzed().is_empty() {
        println!("Last analyzed: {}", stores.topics.last_analyzed());
    }

    println!();
    println!(
        "Context: {} error(s), {} warning(s)",
        stores.context.error_count(),
        stores.context.warning_count()
    );
    println!(
        "Unsaved: details={}, context={}, topics={}",
        details.is_dirty(),
        stores.context.is_dirty(),
        stores.topics.is_dirty()
    );
    Ok(())
}

pub async fn run_check(config: &Config, project_id: &str) -> Result<()> {
    let session = open(config, project_id).await?;
    let check = session.check_context().await?;
    {
        let stores = session.workspace().read().await;
        for (id, question) in stores.context.context() {
            for error in &question.errors {
                println!("  [{}] error: {}", id, error);
            }
            for warning in question
                .warnings
                .iter()
                .filter(|w| !question.ignored_warnings.contains(w))
            {
                println!("  [{}] warning: {}", id, warning);
            }
        }
    }
    println!("{} error(s), {} warning(s)", check.errors, check.warnings);
    save(&session).await?;
    Ok(())
}

pub async fn run_submit(config: &Config, project_id: &str) -> Result<()> {
    let session = open(config, project_id).await?;
    println!("Submitting context; waiting for the draft...");
    session.submit_context().await?;
    {
        let stores = session.workspace().read().await;
        println!(
            "Draft installed: {} section(s), {} cell(s), {} topic(s)",
            stores.details.sections().len(),
            stores.details.cells().len(),
            stores.topics.topics().len()
        );
    }
    let report = save(&session).await?;
    print_saved(&report);
    Ok(())
}

pub async fn run_apply(config: &Config, project_id: &str, intents_path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(intents_path)
        .with_context(|| format!("Failed to read intents file: {}", intents_path.display()))?;
    let parsed = intents::parse_intents(&raw)?;

    let session = open(config, project_id).await?;
    let summary = intents::apply_all(session.workspace(), parsed).await;
    println!("Applied {} intent(s)", summary.applied);
    for (index, reason) in &summary.rejected {
        println!("  rejected #{}: {}", index, reason);
    }

    let report = save(&session).await?;
    print_saved(&report);
    if !summary.rejected.is_empty() {
        bail!("{} intent(s) rejected", summary.rejected.len());
    }
    Ok(())
}

pub async fn run_analyze(config: &Config, project_id: &str, force: bool) -> Result<()> {
    let session = open(config, project_id).await?;
    if !force && !session.should_run_topic_analysis().await {
        println!("Topics are up to date.");
        return Ok(());
    }
    session.run_topic_analysis().await?;
    {
        let stores = session.workspace().read().await;
        for (name, topic) in stores.topics.topics() {
            println!("  {} ({} cells)", name, topic.cells.len());
        }
    }
    let report = save(&session).await?;
    print_saved(&report);
    Ok(())
}

/// Interactive editing. Reads one JSON intent per line from stdin while the
/// save and event timers run; stops on EOF or Ctrl-C with a final flush.
pub async fn run_edit(config: &Config, project_id: &str) -> Result<()> {
    let session = open(config, project_id).await?;
    println!("Editing {}. One JSON intent per line; Ctrl-D to finish.", project_id);
    edit_from(&session, BufReader::new(tokio::io::stdin())).await
}

/// Apply intents read line by line from `input` with the coordinator
/// running. The final save runs however input ends, including on a read
/// error, which is returned after the flush.
pub async fn edit_from<R>(session: &Session, input: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = {
        let coordinator = session.coordinator().clone();
        tokio::spawn(async move { coordinator.run(shutdown_rx).await })
    };

    let read = apply_lines(session, input).await;

    let _ = shutdown_tx.send(true);
    let report = runner.await.with_context(|| "Sync task panicked")?;
    read.with_context(|| "Failed to read stdin")?;
    if report.any_failed() {
        bail!(
            "Final save failed (details: {}, context: {}, topics: {})",
            describe(&report.details),
            describe(&report.context),
            describe(&report.topics)
        );
    }
    match session.coordinator().last_saved().await {
        Some(at) => println!("Last saved {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Nothing to save."),
    }
    Ok(())
}

async fn apply_lines<R>(session: &Session, input: R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line {
                Ok(line) => line,
                Err(err) => {
                    tracing::warn!(error = %err, "input read failed; finishing");
                    return Err(err);
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                None
            }
        };
        let Some(line) = line else {
            return Ok(());
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let intent: Intent = match serde_json::from_str(line) {
            Ok(intent) => intent,
            Err(err) => {
                println!("error: invalid intent: {}", err);
                continue;
            }
        };
        let op = intent.name();
        let result = {
            let mut stores = session.workspace().write().await;
            intents::apply(&mut stores, intent)
        };
        match result {
            Ok(()) => println!("ok: {}", op),
            Err(err) => println!("error: {}: {:#}", op, err),
        }
    }
}

fn print_details(index: usize, details: &CellDetails, time_estimate: f64) {
    println!("  {}. {} ({:.1} min)", index + 1, details.main_text, time_estimate);
    for category in &details.response_categories {
        println!("       - {}", category);
    }
}

/// Print rewordings for a cell. With `request`, print the next rewording
/// for that specific request instead.
pub async fn run_reword(config: &Config, project_id: &str, cell_id: &str, request: Option<&str>) -> Result<()> {
    let session = open(config, project_id).await?;
    match request {
        Some(text) => {
            let rewording = session.specific_rewording(cell_id, text).await?;
            print_details(0, &rewording.cell_details, rewording.time_estimate);
        }
        None => {
            let options = session.reword_question(cell_id, true).await?;
            for (index, rewording) in options.iter().enumerate() {
                print_details(index, &rewording.cell_details, rewording.time_estimate);
            }
        }
    }
    session.coordinator().flush_events().await;
    Ok(())
}

pub async fn run_check_question(config: &Config, project_id: &str, cell_id: &str) -> Result<()> {
    let session = open(config, project_id).await?;
    let checks = session.check_question(cell_id, true).await?;
    for check in &checks.cell_checks {
        println!("  {}", check);
    }
    for (index, suggestion) in checks.check_suggestions.iter().enumerate() {
        print_details(index, &suggestion.cell_details, suggestion.time_estimate);
        println!("       fixes: {}", suggestion.fixed_checks.join(", "));
    }
    session.coordinator().flush_events().await;
    Ok(())
}

pub async fn run_switch_format(config: &Config, project_id: &str, cell_id: &str) -> Result<()> {
    let session = open(config, project_id).await?;
    let switched = session.switch_response_format(cell_id).await?;
    println!("Switched {} to {:?} ({:?})", cell_id, switched.format, switched.source);
    let report = save(&session).await?;
    print_saved(&report);
    Ok(())
}

pub async fn run_suggest(config: &Config, project_id: &str, topic: &str, delete: bool) -> Result<()> {
    let session = open(config, project_id).await?;
    let kind = if delete {
        SuggestionType::Delete
    } else {
        SuggestionType::Add
    };
    let count = session.suggest_for_topic(topic, kind).await?;
    println!("{} suggestion(s) for {}", count, topic);
    {
        let stores = session.workspace().read().await;
        let batch = stores
            .topics
            .suggestions()
            .get(topic)
            .and_then(|batches| batches.iter().find(|b| b.suggestion_type() == kind));
        match batch {
            Some(SuggestionBatch::Add { suggestions }) => {
                for (index, s) in suggestions.iter().enumerate() {
                    print_details(index, &s.cell_details, s.time_estimate);
                    println!("       {}", s.rationale);
                }
            }
            Some(SuggestionBatch::Delete { suggestions }) => {
                for s in suggestions {
                    println!("  remove {}: {}", s.cell_id, s.rationale);
                }
            }
            None => {}
        }
    }
    let report = save(&session).await?;
    print_saved(&report);
    Ok(())
}

pub async fn run_queue_test(config: &Config, a: i64, b: i64) -> Result<()> {
    let session = connect(config).await?;
    let value = session.test_task_queue(a, b).await?;
    println!("{}", value);
    Ok(())
}

pub async fn run_delete(config: &Config, project_id: &str) -> Result<()> {
    let session = connect(config).await?;
    session.delete_project(project_id).await?;
    session.coordinator().flush_events().await;
    println!("Deleted project {}", project_id);
    Ok(())
}
