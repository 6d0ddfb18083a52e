//! Intake (context) responses and their validation state.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use serde::Serialize;

use crate::models::{ContextQuestion, EngagementType};

use super::Persistable;

/// Error stored on a required question with an empty response.
pub const REQUIRED_MESSAGE: &str = "This is a required question. Please provide a response.";

/// Context question whose answer names the engagement type.
pub const ENGAGEMENT_QUESTION_ID: u32 = 4;

/// Context state to persist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSnapshot {
    pub project_id: String,
    pub context: BTreeMap<u32, ContextQuestion>,
    #[serde(skip)]
    pub revision: u64,
}

/// A response that should go through the remote advisory check.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCheck {
    pub question_id: u32,
    pub response_text: String,
    pub ignored_warnings: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectContextStore {
    project_id: String,
    context: BTreeMap<u32, ContextQuestion>,
    edited: bool,
    revision: u64,
}

impl ProjectContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn context(&self) -> &BTreeMap<u32, ContextQuestion> {
        &self.context
    }

    pub fn question(&self, question_id: u32) -> Option<&ContextQuestion> {
        self.context.get(&question_id)
    }

    pub fn edited(&self) -> bool {
        self.edited
    }

    /// Engagement type named by the answer to [`ENGAGEMENT_QUESTION_ID`].
    pub fn engagement_type(&self) -> EngagementType {
        self.context
            .get(&ENGAGEMENT_QUESTION_ID)
            .map(|q| EngagementType::from_label(&q.response))
            .unwrap_or_default()
    }

    pub fn error_count(&self) -> usize {
        self.context.values().map(|q| q.errors.len()).sum()
    }

    pub fn warning_count(&self) -> usize {
        self.context.values().map(|q| q.warnings.len()).sum()
    }

    /// Seed a freshly created project's questions with empty validation state.
    pub fn init_project_context(
        &mut self,
        project_id: impl Into<String>,
        questions: BTreeMap<u32, ContextQuestion>,
    ) {
        self.project_id = project_id.into();
        self.context = questions
            .into_iter()
            .map(|(id, q)| {
                let seeded = ContextQuestion {
                    errors: Vec::new(),
                    warnings: Vec::new(),
                    checked_warnings: false,
                    ignored_warnings: Vec::new(),
                    ..q
                };
                (id, seeded)
            })
            .collect();
        self.mark_edited();
    }

    /// Load saved context. Ignored if the same project is already loaded,
    /// so local edits survive a reload. Returns whether anything changed.
    pub fn set_project_context(
        &mut self,
        project_id: impl Into<String>,
        context: BTreeMap<u32, ContextQuestion>,
    ) -> bool {
        let project_id = project_id.into();
        if self.project_id == project_id {
            return false;
        }
        self.project_id = project_id;
        self.context = context;
        self.touch();
        true
    }

    /// Set a response. A changed response must be checked again.
    pub fn edit_response(
        &mut self,
        question_id: u32,
        response: impl Into<String>,
        part_2_response: Option<String>,
    ) -> Result<()> {
        let question = self.question_mut(question_id)?;
        question.response = response.into();
        if part_2_response.is_some() {
            question.part_2_response = part_2_response;
        }
        question.checked_warnings = false;
        self.mark_edited();
        Ok(())
    }

    /// Dismiss a warning so the next check does not raise it again.
    pub fn add_ignored_warning(&mut self, question_id: u32, warning: impl Into<String>) -> Result<()> {
        let warning = warning.into();
        let question = self.question_mut(question_id)?;
        if let Some(pos) = question.warnings.iter().position(|w| *w == warning) {
            question.warnings.remove(pos);
        }
        question.ignored_warnings.push(warning);
        self.mark_edited();
        Ok(())
    }

    pub fn edit_errors(&mut self, question_id: u32, errors: Vec<String>) -> Result<()> {
        self.question_mut(question_id)?.errors = errors;
        self.mark_edited();
        Ok(())
    }

    /// Store the outcome of a remote check.
    pub fn edit_warnings(&mut self, question_id: u32, warnings: Vec<String>) -> Result<()> {
        let question = self.question_mut(question_id)?;
        question.warnings = warnings;
        question.checked_warnings = true;
        self.mark_edited();
        Ok(())
    }

    pub fn reset_edited(&mut self) {
        self.edited = false;
        self.touch();
    }

    /// Flag every required question with a blank response and clear stale
    /// errors elsewhere. Returns the number of questions in error.
    pub fn check_required_responses(&mut self, optional_ids: &[u32]) -> usize {
        let mut changed = false;
        let mut failing = 0;
        for (id, question) in self.context.iter_mut() {
            let errors = if optional_ids.contains(id) || !question.response.trim().is_empty() {
                Vec::new()
            } else {
                failing += 1;
                vec![REQUIRED_MESSAGE.to_string()]
            };
            if question.errors != errors {
                question.errors = errors;
                changed = true;
            }
        }
        if changed {
            self.mark_edited();
        }
        failing
    }

    /// Answered questions that have not been checked since they changed.
    pub fn questions_needing_check(&self, skip_ids: &[u32]) -> Vec<PendingCheck> {
        self.context
            .iter()
            .filter(|(id, q)| {
                !skip_ids.contains(*id) && !q.checked_warnings && !q.response.trim().is_empty()
            })
            .map(|(id, q)| PendingCheck {
                question_id: *id,
                response_text: q.full_response(),
                ignored_warnings: q.ignored_warnings.clone(),
            })
            .collect()
    }

    fn question_mut(&mut self, question_id: u32) -> Result<&mut ContextQuestion> {
        match self.context.get_mut(&question_id) {
            Some(q) => Ok(q),
            None => bail!("unknown context question: {}", question_id),
        }
    }

    fn mark_edited(&mut self) {
        self.edited = true;
        self.touch();
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

impl Persistable for ProjectContextStore {
    type Snapshot = ContextSnapshot;

    fn pending(&self) -> Option<ContextSnapshot> {
        if !self.edited || self.project_id.is_empty() {
            return None;
        }
        Some(ContextSnapshot {
            project_id: self.project_id.clone(),
            context: self.context.clone(),
            revision: self.revision,
        })
    }

    fn acknowledge(&mut self, snapshot: &ContextSnapshot) {
        if snapshot.project_id == self.project_id && snapshot.revision == self.revision {
            self.edited = false;
        }
    }

    fn is_dirty(&self) -> bool {
        self.edited && !self.project_id.is_empty()
    }
}
