//! Session-level flows that combine remote calls with store transitions:
//! logging in, opening and creating projects, validating and submitting
//! the intake context, running topic analysis, and the AI assistance for
//! single cells and topics.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::time::Instant;

use survey_sync_core::estimate::estimate_time;
use survey_sync_core::models::{
    new_cell_id, Cell, CellDetails, HumanAiStatus, ProjectSummary, ResponseFormat, Rewording, SuggestionBatch,
    SuggestionType, Topic, UNCLASSIFIED,
};
use survey_sync_core::store::assist::{CellChecks, FormatVariant};
use survey_sync_core::store::topics::TopicAnalysis;

use crate::api::{AnalyzeRequest, ApiClient, CreatedProject, Draft};
use crate::config::Config;
use crate::coordinator::{SaveStatus, SyncCoordinator};
use crate::deadline::call_with_deadline;
use crate::workspace::{Stores, Workspace};

/// Counts after validating the context responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextCheck {
    pub errors: usize,
    pub warnings: usize,
}

/// Where the content of a switched question came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchSource {
    /// The question had no text; only the format changed.
    Blank,
    /// The pair cached by an earlier switch.
    Cached,
    /// Rewritten by the service.
    Generated,
    /// The service failed; only the format and estimate changed.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatSwitch {
    pub format: ResponseFormat,
    pub source: SwitchSource,
}

/// A cell and the rest of its section, as sent with assistance requests.
struct CellRequest {
    project_id: String,
    cell: Cell,
    existing_questions: BTreeMap<String, CellDetails>,
}

pub struct Session {
    config: Config,
    api: ApiClient,
    workspace: Arc<Workspace>,
    coordinator: Arc<SyncCoordinator>,
}

impl Session {
    /// Build a session for `user_code` without contacting the service.
    pub fn new(config: &Config, user_code: Option<String>) -> Result<Self> {
        let api = ApiClient::new(&config.api.base_url).context("Failed to build HTTP client")?;
        let workspace = Arc::new(Workspace::new(user_code));
        let coordinator = Arc::new(SyncCoordinator::new(
            workspace.clone(),
            Arc::new(api.clone()),
            config.sync.clone(),
        ));
        Ok(Self {
            config: config.clone(),
            api,
            workspace,
            coordinator,
        })
    }

    /// Build a session and log in. Returns the user's projects too.
    pub async fn connect(config: &Config, user_code: &str) -> Result<(Self, Vec<ProjectSummary>)> {
        let session = Self::new(config, Some(user_code.to_string()))?;
        let projects = session.log_in().await?;
        Ok((session, projects))
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    // ============ Projects ============

    pub async fn log_in(&self) -> Result<Vec<ProjectSummary>> {
        let Some(user_code) = self.workspace.user_code() else {
            bail!("No user code configured. Pass --user or set session.user_code");
        };
        let projects = call_with_deadline(self.config.timeouts.default_timeout(), self.api.log_in(user_code))
            .await
            .with_context(|| "Log in failed")?;
        self.workspace
            .write()
            .await
            .events
            .add_event("", "log_in", json!({ "projects": projects.len() }));
        tracing::info!(projects = projects.len(), "logged in");
        Ok(projects)
    }

    /// Load a project into the stores, replacing whatever was open.
    pub async fn open_project(&self, project_id: &str) -> Result<()> {
        let loaded = call_with_deadline(self.config.timeouts.default_timeout(), self.api.load_project(project_id))
            .await
            .with_context(|| format!("Failed to load project {}", project_id))?;

        let record = loaded.project;
        let mut stores = self.workspace.write().await;

        stores
            .details
            .set_project_details(project_id, record.project_title, record.sections, loaded.cells);
        stores.details.reset_cell_history();
        stores.details.reset_classification_list();

        stores.context.set_project_context(project_id, record.context_response);
        let engagement = stores.context.engagement_type();
        stores.details.update_engagement_type(engagement);

        let mut analysis = record.analyze_topics_info.unwrap_or_default();
        if !analysis.topics.contains_key(UNCLASSIFIED) {
            analysis.topics.insert(UNCLASSIFIED.to_string(), Topic::default());
        }
        stores.topics.set_topics(analysis, record.human_topics);
        stores.topics.reset_need_to_save();
        stores.options.reset_generate_options();
        stores.checks.reset_checks();

        stores.log("open_project", json!({}));
        tracing::info!(
            project_id,
            sections = stores.details.sections().len(),
            cells = stores.details.cells().len(),
            ?engagement,
            "project loaded"
        );
        Ok(())
    }

    /// Create a project remotely and open it with empty content.
    pub async fn create_project(&self) -> Result<CreatedProject> {
        let created = call_with_deadline(self.config.timeouts.default_timeout(), self.api.create_project())
            .await
            .with_context(|| "Failed to create project")?;

        let mut stores = self.workspace.write().await;
        stores.context.init_project_context(&created.project_id, created.questions.clone());
        stores.details.set_project_details(
            &created.project_id,
            &created.project_title,
            Vec::new(),
            BTreeMap::new(),
        );
        stores.details.reset_cell_history();
        stores.details.reset_classification_list();
        stores.topics.reset_topic_slice();
        stores.options.reset_generate_options();
        stores.checks.reset_checks();
        stores.log("create_project", json!({}));
        tracing::info!(project_id = %created.project_id, "project created");
        Ok(created)
    }

    pub async fn delete_project(&self, project_id: &str) -> Result<()> {
        call_with_deadline(self.config.timeouts.default_timeout(), self.api.delete_project(project_id))
            .await
            .with_context(|| format!("Failed to delete project {}", project_id))?;
        self.workspace
            .write()
            .await
            .events
            .add_event(project_id, "delete_project", json!({}));
        tracing::info!(project_id, "project deleted");
        Ok(())
    }

    // ============ Context ============

    /// Required-field validation followed by concurrent advisory checks of
    /// every answered question not checked since it last changed.
    pub async fn check_context(&self) -> Result<ContextCheck> {
        let (project_id, pending) = {
            let mut stores = self.workspace.write().await;
            stores
                .context
                .check_required_responses(&self.config.context.optional_questions);
            let pending = stores
                .context
                .questions_needing_check(&self.config.context.unchecked_questions);
            (stores.project_id().to_string(), pending)
        };
        if project_id.is_empty() {
            bail!("No project is open");
        }

        let deadline = self.config.timeouts.check_response();
        let results = futures::future::join_all(pending.iter().map(|check| {
            call_with_deadline(
                deadline,
                self.api.check_question_response(
                    &project_id,
                    check.question_id,
                    &check.response_text,
                    &check.ignored_warnings,
                ),
            )
        }))
        .await;

        let mut stores = self.workspace.write().await;
        for (check, result) in pending.iter().zip(results) {
            let unchanged = stores
                .context
                .question(check.question_id)
                .map(|q| q.full_response() == check.response_text)
                .unwrap_or(false);
            if !unchanged {
                tracing::debug!(question_id = check.question_id, "response changed during check");
                continue;
            }
            let warnings = match result {
                Ok(warnings) => warnings,
                Err(err) => {
                    tracing::warn!(question_id = check.question_id, error = %err, "response check failed");
                    vec![self.config.context.support_message.clone()]
                }
            };
            stores.context.edit_warnings(check.question_id, warnings)?;
        }
        stores.log("check_context", json!({ "checked": pending.len() }));

        Ok(ContextCheck {
            errors: stores.context.error_count(),
            warnings: stores.context.warning_count(),
        })
    }

    /// Submit the context, wait for the AI draft, and install it.
    pub async fn submit_context(&self) -> Result<()> {
        let (project_id, context) = {
            let stores = self.workspace.read().await;
            if stores.context.error_count() > 0 {
                bail!(
                    "Context has {} unresolved error(s); fix them before submitting",
                    stores.context.error_count()
                );
            }
            (stores.project_id().to_string(), stores.context.context().clone())
        };
        if project_id.is_empty() {
            bail!("No project is open");
        }

        let timeouts = &self.config.timeouts;
        let task_id = call_with_deadline(timeouts.default_timeout(), self.api.submit_context(&project_id, &context))
            .await
            .with_context(|| "Failed to submit context")?;
        tracing::info!(%task_id, "draft generation started");

        let value = self.wait_for_task(&task_id).await?;
        let draft: Draft = serde_json::from_value(value).with_context(|| "Malformed draft result")?;
        self.install_draft(&project_id, draft).await
    }

    /// Poll a background task until it finishes. Returns its value.
    async fn wait_for_task(&self, task_id: &str) -> Result<Value> {
        let timeouts = &self.config.timeouts;
        let started = Instant::now();
        loop {
            let status = call_with_deadline(timeouts.default_timeout(), self.api.get_result(task_id))
                .await
                .with_context(|| format!("Failed to poll task {}", task_id))?;
            if status.ready {
                if !status.successful {
                    bail!("Task {} failed on the server", task_id);
                }
                return Ok(status.value);
            }
            if started.elapsed() + timeouts.task_poll_interval() > timeouts.task_max_wait() {
                bail!(
                    "Task {} not ready after {}s",
                    task_id,
                    timeouts.task_max_wait().as_secs()
                );
            }
            tracing::debug!(task_id, "task not ready; polling again");
            tokio::time::sleep(timeouts.task_poll_interval()).await;
        }
    }

    async fn install_draft(&self, project_id: &str, draft: Draft) -> Result<()> {
        let mut stores = self.workspace.write().await;
        stores.topics.reset_topic_slice();
        stores.options.reset_generate_options();
        stores.checks.reset_checks();

        let project = draft.project_details.project;
        let sections = project
            .sections
            .into_iter()
            .enumerate()
            .map(|(index, mut section)| {
                section.id = index;
                section.cells.clear();
                section
            })
            .collect();
        stores
            .details
            .set_project_details(project_id, project.project_title, sections, BTreeMap::new());
        let engagement = stores.context.engagement_type();
        stores.details.update_engagement_type(engagement);

        let mut skipped = 0;
        for cell in draft.project_details.cells {
            let section_index = cell.section_index;
            if let Err(err) = stores.details.add_cell(new_cell_id(), cell, section_index) {
                tracing::warn!(error = %err, "dropping drafted cell");
                skipped += 1;
            }
        }
        for topic in &draft.topics {
            stores.topics.add_topic(topic.as_str());
        }
        let cells = stores.details.cells().len();
        stores.log("install_draft", json!({ "cells": cells, "topics": draft.topics.len() }));
        tracing::info!(
            project_id,
            cells,
            skipped,
            topics = draft.topics.len(),
            "draft installed"
        );
        Ok(())
    }

    // ============ Topics ============

    /// Whether anything changed that the topic analysis has not seen.
    pub async fn should_run_topic_analysis(&self) -> bool {
        let stores = self.workspace.read().await;
        !stores.details.cells_for_classification().is_empty()
            || stores.topics.last_analyzed().is_empty()
            || !stores.topics.added_topics().is_empty()
    }

    /// Save the cells, classify them remotely, and install the result.
    pub async fn run_topic_analysis(&self) -> Result<()> {
        if let SaveStatus::Failed(err) = self.coordinator.save_details().await {
            bail!("Could not save project before topic analysis: {}", err);
        }

        let last_analyzed = Utc::now().to_rfc3339();
        let (request, queued, sent_revision) = {
            let stores = self.workspace.read().await;
            let queued = stores.details.classification_snapshot();
            let mut edited_cells: Vec<String> = queued.iter().map(|(id, _)| id.clone()).collect();
            let classified = stores.topics.cells_in_any_topic();
            for (cell_id, cell) in stores.details.cells() {
                if cell.is_question()
                    && !classified.contains(cell_id.as_str())
                    && !edited_cells.contains(cell_id)
                {
                    edited_cells.push(cell_id.clone());
                }
            }
            let request = AnalyzeRequest {
                project_id: stores.project_id().to_string(),
                topics: stores.topics.topics().clone(),
                added_topics: stores.topics.added_topics().iter().cloned().collect(),
                edited_cells,
                human_topics: stores.topics.human_topics().clone(),
                last_analyzed: last_analyzed.clone(),
            };
            (request, queued, stores.topics.revision())
        };
        if request.project_id.is_empty() {
            bail!("No project is open");
        }
        let classified = request.edited_cells.len();

        let result = call_with_deadline(self.config.timeouts.analyze_topics(), self.api.analyze_topics(&request))
            .await
            .with_context(|| "Topic analysis failed")?;

        let analysis = TopicAnalysis {
            topics: empty_topics_last(result.topics),
            last_analyzed,
            ..result
        };
        let mut stores = self.workspace.write().await;
        ensure_project(&stores, &request.project_id)?;
        stores
            .topics
            .finish_analysis(analysis, &request.added_topics, sent_revision);
        stores.details.acknowledge_classification(&queued);
        stores.log("analyze_topics", json!({ "classified": classified }));
        tracing::info!(classified, topics = stores.topics.topics().len(), "topic analysis done");
        Ok(())
    }

    /// Ask for add or delete suggestions for one topic and store the batch,
    /// replacing the topic's previous batch of that type.
    /// Returns the number of suggestions received.
    pub async fn suggest_for_topic(&self, topic: &str, kind: SuggestionType) -> Result<usize> {
        let (project_id, sections, existing_questions) = {
            let mut stores = self.workspace.write().await;
            if stores.project_id().is_empty() {
                bail!("No project is open");
            }
            let Some(cells) = stores.topics.topic(topic).map(|t| t.cells.clone()) else {
                bail!("unknown topic: {}", topic);
            };
            let existing_questions: BTreeMap<String, CellDetails> = cells
                .iter()
                .filter_map(|id| stores.details.cell(id).map(|c| (id.clone(), c.cell_details.clone())))
                .collect();
            let assigned: usize = stores.topics.topics().values().map(|t| t.cells.len()).sum();
            let share = if assigned == 0 {
                0.0
            } else {
                cells.len() as f64 / assigned as f64
            };
            let event_type = match kind {
                SuggestionType::Add => "suggest_additions_to_topic",
                SuggestionType::Delete => "suggest_deletions_from_topic",
            };
            stores.log(
                event_type,
                json!({ "topic_name": topic, "num_questions": cells.len(), "percent_of_total": share }),
            );
            (
                stores.project_id().to_string(),
                stores.details.sections().to_vec(),
                existing_questions,
            )
        };

        let deadline = self.config.timeouts.assist();
        let request = async {
            match kind {
                SuggestionType::Add => {
                    self.api
                        .get_add_suggestions(&project_id, topic, &sections, &existing_questions)
                        .await
                }
                SuggestionType::Delete => {
                    self.api
                        .get_delete_suggestions(&project_id, topic, &existing_questions)
                        .await
                }
            }
        };
        let mut batch = call_with_deadline(deadline, request)
            .await
            .with_context(|| format!("Failed to get suggestions for topic {}", topic))?;
        if batch.suggestion_type() != kind {
            bail!(
                "Asked for {:?} suggestions, received {:?}",
                kind,
                batch.suggestion_type()
            );
        }

        let mut stores = self.workspace.write().await;
        ensure_project(&stores, &project_id)?;
        if stores.topics.topic(topic).is_none() {
            bail!("Topic {} was deleted while suggestions were generated", topic);
        }
        if let SuggestionBatch::Delete { suggestions } = &mut batch {
            suggestions.retain(|s| stores.details.cell(&s.cell_id).is_some());
        }
        let count = batch.len();
        stores.topics.add_suggestions_for_topic(topic, batch);
        tracing::info!(topic, ?kind, count, "topic suggestions stored");
        Ok(count)
    }

    // ============ Cell assistance ============

    /// Rewordings for a cell. Served from the cache unless the cell changed
    /// since they were generated or `refresh` is set.
    pub async fn reword_question(&self, cell_id: &str, refresh: bool) -> Result<Vec<Rewording>> {
        if !refresh {
            let stores = self.workspace.read().await;
            let last_updated = stores.details.cell(cell_id).and_then(|c| c.last_updated);
            if let Some(cached) = stores.options.fresh_general_options(cell_id, last_updated) {
                tracing::debug!(cell_id, "rewordings from cache");
                return Ok(cached.to_vec());
            }
        }

        let request = self.cell_request(cell_id).await?;
        let requested_at = Utc::now();
        let content = call_with_deadline(
            self.config.timeouts.assist(),
            self.api.reword_question(
                &request.project_id,
                cell_id,
                &request.cell.cell_details,
                &request.existing_questions,
            ),
        )
        .await
        .with_context(|| format!("Failed to reword cell {}", cell_id))?;

        let mut stores = self.workspace.write().await;
        ensure_project(&stores, &request.project_id)?;
        stores
            .options
            .update_general_options(cell_id, content.clone(), requested_at);
        stores.log("reword_question", json!({ "cell_id": cell_id, "options": content.len() }));
        Ok(content)
    }

    /// The next rewording for a specific request, e.g. "make it shorter".
    /// A batch is generated per request and handed out one at a time; a
    /// new batch is fetched once it is used up or the cell changes.
    pub async fn specific_rewording(&self, cell_id: &str, specific_request: &str) -> Result<Rewording> {
        {
            let mut stores = self.workspace.write().await;
            let last_updated = stores.details.cell(cell_id).and_then(|c| c.last_updated);
            if let Some(next) = stores
                .options
                .next_specific_option(cell_id, specific_request, last_updated)
            {
                stores.log(
                    "submit_specific_request",
                    json!({ "cell_id": cell_id, "specific_request": specific_request, "cached": true }),
                );
                return Ok(next);
            }
        }

        let request = self.cell_request(cell_id).await?;
        let requested_at = Utc::now();
        let content = call_with_deadline(
            self.config.timeouts.assist(),
            self.api.generate_specific_rewording(
                &request.project_id,
                cell_id,
                &request.cell.cell_details,
                specific_request,
                &request.existing_questions,
            ),
        )
        .await
        .with_context(|| format!("Failed to reword cell {}", cell_id))?;

        let mut stores = self.workspace.write().await;
        ensure_project(&stores, &request.project_id)?;
        stores
            .options
            .update_specific_options(cell_id, specific_request, content, requested_at);
        let next = stores
            .options
            .next_specific_option(cell_id, specific_request, None)
            .with_context(|| "The service returned no rewording")?;
        stores.log(
            "submit_specific_request",
            json!({ "cell_id": cell_id, "specific_request": specific_request, "cached": false }),
        );
        Ok(next)
    }

    /// Run the question checks for a cell, honoring its `checks_to_ignore`.
    /// Served from the cache unless the cell changed or `refresh` is set.
    pub async fn check_question(&self, cell_id: &str, refresh: bool) -> Result<CellChecks> {
        if !refresh {
            let stores = self.workspace.read().await;
            let last_updated = stores.details.cell(cell_id).and_then(|c| c.last_updated);
            if let Some(cached) = stores.checks.fresh_checks(cell_id, last_updated) {
                return Ok(cached.clone());
            }
        }

        let request = self.cell_request(cell_id).await?;
        let requested_at = Utc::now();
        let result = call_with_deadline(
            self.config.timeouts.assist(),
            self.api.check_question(
                &request.project_id,
                cell_id,
                &request.cell.cell_details,
                &request.cell.checks_to_ignore,
            ),
        )
        .await
        .with_context(|| format!("Failed to check cell {}", cell_id))?;

        let checks = CellChecks {
            last_checked: requested_at,
            cell_checks: result.cell_checks,
            check_suggestions: result.check_suggestions,
        };
        let mut stores = self.workspace.write().await;
        ensure_project(&stores, &request.project_id)?;
        stores.checks.update_checks_for_cell(cell_id, checks.clone());
        stores.log(
            "check_question",
            json!({ "cell_id": cell_id, "suggestions": checks.check_suggestions.len() }),
        );
        Ok(checks)
    }

    /// Flip a question between open and closed.
    ///
    /// A blank question just changes format. Otherwise the cached pair is
    /// reused if the cell has not changed since the last switch; if not,
    /// the service rewrites the question and both versions are cached. When
    /// the service fails the format is flipped locally with a fresh time
    /// estimate.
    pub async fn switch_response_format(&self, cell_id: &str) -> Result<FormatSwitch> {
        let (project_id, cell, cached) = {
            let stores = self.workspace.read().await;
            if stores.project_id().is_empty() {
                bail!("No project is open");
            }
            let cell = stores
                .details
                .cell(cell_id)
                .cloned()
                .with_context(|| format!("unknown cell: {}", cell_id))?;
            let cached = stores
                .options
                .fresh_format_pair(cell_id, cell.last_updated)
                .cloned();
            (stores.project_id().to_string(), cell, cached)
        };
        if !cell.is_question() {
            bail!("cell {} is not a question", cell_id);
        }
        let from = cell.cell_details.response_format;
        let Some(target) = from.switched() else {
            bail!("only open and closed questions can be switched");
        };

        if cell.cell_details.main_text.trim().is_empty() {
            let switched = Cell {
                cell_details: CellDetails {
                    response_format: target,
                    ..cell.cell_details.clone()
                },
                human_ai_status: HumanAiStatus::Human,
                ..cell
            };
            let mut stores = self.workspace.write().await;
            stores.details.edit_cell(cell_id, true, switched)?;
            log_switch(&mut stores, cell_id, from, target, SwitchSource::Blank);
            return Ok(FormatSwitch {
                format: target,
                source: SwitchSource::Blank,
            });
        }

        if let Some(variant) = cached.as_ref().and_then(|pair| pair.variant(target)) {
            let switched = Cell {
                cell_details: variant.cell_details.clone(),
                human_ai_status: variant.human_ai_status,
                time_estimate: variant.time_estimate,
                checks_to_ignore: Vec::new(),
                ..cell.clone()
            };
            let format = switched.cell_details.response_format;
            let mut stores = self.workspace.write().await;
            stores.details.edit_cell(cell_id, true, switched)?;
            stores.options.update_switch_timestamp(cell_id, Utc::now());
            log_switch(&mut stores, cell_id, from, format, SwitchSource::Cached);
            return Ok(FormatSwitch {
                format,
                source: SwitchSource::Cached,
            });
        }

        let result = call_with_deadline(
            self.config.timeouts.switch_format(),
            self.api
                .switch_response_format(&project_id, cell_id, &cell.cell_details),
        )
        .await;

        let mut stores = self.workspace.write().await;
        ensure_project(&stores, &project_id)?;
        if stores.details.cell(cell_id).map(|c| &c.cell_details) != Some(&cell.cell_details) {
            bail!("cell {} changed while its format was being switched", cell_id);
        }

        let current = FormatVariant {
            cell_details: cell.cell_details.clone(),
            time_estimate: cell.time_estimate,
            human_ai_status: cell.human_ai_status,
        };
        let (other, source) = match result {
            Ok(rewording) => (
                FormatVariant {
                    cell_details: rewording.cell_details,
                    time_estimate: rewording.time_estimate,
                    human_ai_status: cell.human_ai_status.after_ai_edit(),
                },
                SwitchSource::Generated,
            ),
            Err(err) => {
                tracing::warn!(cell_id, error = %err, "format switch failed; flipping locally");
                let cell_details = CellDetails {
                    response_format: target,
                    ..cell.cell_details.clone()
                };
                let time_estimate = estimate_time(&cell_details, stores.details.engagement_type());
                (
                    FormatVariant {
                        cell_details,
                        time_estimate,
                        human_ai_status: cell.human_ai_status,
                    },
                    SwitchSource::Fallback,
                )
            }
        };

        let switched = Cell {
            cell_details: other.cell_details.clone(),
            human_ai_status: other.human_ai_status,
            time_estimate: other.time_estimate,
            checks_to_ignore: match source {
                SwitchSource::Generated => Vec::new(),
                _ => cell.checks_to_ignore.clone(),
            },
            ..cell
        };
        let format = switched.cell_details.response_format;
        stores.details.edit_cell(cell_id, true, switched)?;
        let (open, closed) = match target {
            ResponseFormat::Open => (other, current),
            _ => (current, other),
        };
        stores
            .options
            .add_response_format(cell_id, open, closed, Utc::now());
        log_switch(&mut stores, cell_id, from, format, source);
        Ok(FormatSwitch { format, source })
    }

    async fn cell_request(&self, cell_id: &str) -> Result<CellRequest> {
        let stores = self.workspace.read().await;
        if stores.project_id().is_empty() {
            bail!("No project is open");
        }
        let cell = stores
            .details
            .cell(cell_id)
            .cloned()
            .with_context(|| format!("unknown cell: {}", cell_id))?;
        let existing_questions: BTreeMap<String, CellDetails> = stores
            .details
            .sections()
            .iter()
            .find(|section| section.id == cell.section_index)
            .map(|section| {
                section
                    .cells
                    .iter()
                    .filter(|id| id.as_str() != cell_id)
                    .filter_map(|id| stores.details.cell(id).map(|c| (id.clone(), c.cell_details.clone())))
                    .collect()
            })
            .unwrap_or_default();
        Ok(CellRequest {
            project_id: stores.project_id().to_string(),
            cell,
            existing_questions,
        })
    }

    // ============ Worker ============

    /// Round-trip a trivial task through the service's worker queue.
    /// Returns the task's value (`a + b`).
    pub async fn test_task_queue(&self, a: i64, b: i64) -> Result<Value> {
        let task_id = call_with_deadline(self.config.timeouts.default_timeout(), self.api.start_add(a, b))
            .await
            .with_context(|| "Failed to start worker task")?;
        tracing::info!(%task_id, "worker task started");
        self.wait_for_task(&task_id).await
    }
}

/// Results computed for one project are dropped if another was opened
/// meanwhile.
fn ensure_project(stores: &Stores, project_id: &str) -> Result<()> {
    if stores.project_id() != project_id {
        bail!("Project changed while the request was in flight; result dropped");
    }
    Ok(())
}

fn log_switch(stores: &mut Stores, cell_id: &str, from: ResponseFormat, to: ResponseFormat, source: SwitchSource) {
    stores.log(
        "switch_response_format",
        json!({
            "edited_cell_id": cell_id,
            "previous_response_format": from,
            "new_response_format": to,
            "source": format!("{:?}", source).to_lowercase(),
        }),
    );
}

/// Stable reorder putting topics with no cells at the end.
fn empty_topics_last(topics: indexmap::IndexMap<String, Topic>) -> indexmap::IndexMap<String, Topic> {
    let (filled, empty): (Vec<_>, Vec<_>) = topics.into_iter().partition(|(_, t)| !t.cells.is_empty());
    filled.into_iter().chain(empty).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_empty_topics_last() {
        let mut topics = IndexMap::new();
        topics.insert("Unclassified".to_string(), Topic::default());
        topics.insert(
            "Budget".to_string(),
            Topic {
                cells: vec!["c1".to_string()],
                ..Topic::default()
            },
        );
        topics.insert("Staff".to_string(), Topic::default());
        topics.insert(
            "Access".to_string(),
            Topic {
                cells: vec!["c2".to_string()],
                ..Topic::default()
            },
        );
        let names: Vec<String> = empty_topics_last(topics).into_keys().collect();
        assert_eq!(names, vec!["Budget", "Access", "Unclassified", "Staff"]);
    }

    #[tokio::test]
    async fn test_log_in_requires_user_code() {
        let session = Session::new(&Config::for_base_url("http://127.0.0.1:9"), None).unwrap();
        assert!(session.log_in().await.is_err());
    }
}
