//! HTTP client for the survey service.
//!
//! All endpoints take and return JSON. A non-2xx status is a generic
//! failure ([`CallError::Status`]); the service sends no structured error
//! body. Deadlines are not applied here: callers wrap each call in
//! [`call_with_deadline`](crate::deadline::call_with_deadline).
//!
//! The four persistence endpoints the sync coordinator uses are behind the
//! [`PersistenceApi`] trait so the coordinator can run against any backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

use survey_sync_core::models::{
    Cell, CellDetails, CheckSuggestion, ContextQuestion, ProjectSummary, Rewording, Section, SuggestionBatch, Topic,
};
use survey_sync_core::store::context::ContextSnapshot;
use survey_sync_core::store::events::Event;
use survey_sync_core::store::project::ProjectDetailsSnapshot;
use survey_sync_core::store::topics::{TopicAnalysis, TopicsSnapshot};

use crate::deadline::CallError;

// ============ Persistence seam ============

/// Write endpoints used by the sync coordinator.
#[async_trait]
pub trait PersistenceApi: Send + Sync {
    /// `POST /api/update_all_questions`
    async fn update_all_questions(&self, details: &ProjectDetailsSnapshot) -> Result<(), CallError>;

    /// `POST /api/update_context`
    async fn update_context(&self, context: &ContextSnapshot) -> Result<(), CallError>;

    /// `POST /api/save_analyze_topics_info`
    async fn save_analyze_topics_info(
        &self,
        project_id: &str,
        topics: &TopicsSnapshot,
    ) -> Result<(), CallError>;

    /// `POST /api/track_user_action`
    async fn track_user_action(
        &self,
        user_code: &str,
        events: &IndexMap<String, Vec<Event>>,
    ) -> Result<(), CallError>;
}

// ============ Wire types ============

#[derive(Debug, Serialize)]
struct TopicsPayload<'a> {
    project_id: &'a str,
    #[serde(flatten)]
    topics: &'a TopicsSnapshot,
}

#[derive(Debug, Serialize)]
struct EventsPayload<'a> {
    user_code: &'a str,
    events: &'a IndexMap<String, Vec<Event>>,
}

#[derive(Debug, Deserialize)]
struct LogInResponse {
    #[serde(default)]
    projects: Vec<ProjectSummary>,
}

/// A project created remotely, with the intake questions to answer.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedProject {
    #[serde(deserialize_with = "id_string")]
    pub project_id: String,
    #[serde(default)]
    pub project_title: String,
    #[serde(default)]
    pub questions: BTreeMap<u32, ContextQuestion>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectRecord {
    pub project_title: String,
    pub sections: Vec<Section>,
    pub context_response: BTreeMap<u32, ContextQuestion>,
    pub analyze_topics_info: Option<TopicAnalysis>,
    pub human_topics: BTreeMap<String, Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response of `POST /api/load_project`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoadedProject {
    pub project: ProjectRecord,
    #[serde(default)]
    pub cells: BTreeMap<String, Cell>,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(deserialize_with = "id_string")]
    task_id: String,
}

/// Status of a background task started by `submit_context`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub successful: bool,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DraftProject {
    pub project_title: String,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DraftDetails {
    pub project: DraftProject,
    pub cells: Vec<Cell>,
}

/// AI-generated first draft: sections, cells and topic names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Draft {
    pub project_details: DraftDetails,
    pub topics: Vec<String>,
}

/// Body of `POST /api/analyze_topics`.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeRequest {
    pub project_id: String,
    pub topics: IndexMap<String, Topic>,
    pub added_topics: Vec<String>,
    /// Question cells to (re)classify.
    pub edited_cells: Vec<String>,
    pub human_topics: BTreeMap<String, Vec<String>>,
    pub last_analyzed: String,
}

/// AI endpoints wrap their result in `{"content": ...}`.
#[derive(Debug, Deserialize)]
struct Content<T> {
    content: T,
}

/// Response of `POST /api/check_question`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QuestionCheck {
    /// Rewrites that fix at least one check.
    pub check_suggestions: Vec<CheckSuggestion>,
    /// Per-check scores for the current wording.
    pub cell_checks: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct StartAddResponse {
    #[serde(deserialize_with = "id_string")]
    result: String,
}

/// Ids may come back as numbers from some deployments.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

// ============ Client ============

/// Thin JSON client over `reqwest`.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, CallError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| CallError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, CallError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        tracing::debug!(path, "POST");
        let response = self.http.post(self.url(path)).json(body).send().await?;
        decode(path, response).await
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, CallError> {
        tracing::debug!(path, "GET");
        let response = self.http.get(self.url(path)).send().await?;
        decode(path, response).await
    }

    // ============ Session endpoints ============

    pub async fn log_in(&self, user_code: &str) -> Result<Vec<ProjectSummary>, CallError> {
        let resp: LogInResponse = self
            .post("/api/log_in", &json!({ "user_code": user_code }))
            .await?;
        Ok(resp.projects)
    }

    pub async fn create_project(&self) -> Result<CreatedProject, CallError> {
        self.post("/api/create_project", &json!({})).await
    }

    pub async fn load_project(&self, project_id: &str) -> Result<LoadedProject, CallError> {
        self.post("/api/load_project", &json!({ "project_id": project_id }))
            .await
    }

    pub async fn delete_project(&self, project_id: &str) -> Result<(), CallError> {
        let _: Value = self
            .post("/api/delete_project", &json!({ "project_id": project_id }))
            .await?;
        Ok(())
    }

    // ============ Context endpoints ============

    pub async fn check_question_response(
        &self,
        project_id: &str,
        question_id: u32,
        response_text: &str,
        ignored_warnings: &[String],
    ) -> Result<Vec<String>, CallError> {
        let body = json!({
            "project_id": project_id,
            "context_question_id": question_id,
            "response_text": response_text,
            "ignored_warnings": ignored_warnings,
        });
        let resp: CheckResponse = self.post("/api/check_question_response", &body).await?;
        Ok(resp.warnings)
    }

    /// Start draft generation. Returns the task id to poll.
    pub async fn submit_context(
        &self,
        project_id: &str,
        context: &BTreeMap<u32, ContextQuestion>,
    ) -> Result<String, CallError> {
        let body = json!({ "project_id": project_id, "context": context });
        let resp: SubmitResponse = self.post("/api/submit_context", &body).await?;
        Ok(resp.task_id)
    }

    /// `GET /api/get_result/{task_id}/{ts}`; the timestamp defeats caching.
    pub async fn get_result(&self, task_id: &str) -> Result<TaskStatus, CallError> {
        let ts = chrono::Utc::now().timestamp_millis();
        self.get(&format!("/api/get_result/{}/{}", task_id, ts)).await
    }

    // ============ Topic endpoints ============

    /// Returns the new summary, topics and suggestions. `last_analyzed` is
    /// left for the caller to fill in.
    pub async fn analyze_topics(&self, request: &AnalyzeRequest) -> Result<TopicAnalysis, CallError> {
        self.post("/api/analyze_topics", request).await
    }

    /// `existing_questions` maps the other cells of the topic to their
    /// content.
    pub async fn get_add_suggestions(
        &self,
        project_id: &str,
        topic: &str,
        sections: &[Section],
        existing_questions: &BTreeMap<String, CellDetails>,
    ) -> Result<SuggestionBatch, CallError> {
        let body = json!({
            "project_id": project_id,
            "topic": topic,
            "sections": sections,
            "existing_questions": existing_questions,
        });
        let resp: Content<SuggestionBatch> = self.post("/api/get_add_suggestions", &body).await?;
        Ok(resp.content)
    }

    pub async fn get_delete_suggestions(
        &self,
        project_id: &str,
        topic: &str,
        existing_questions: &BTreeMap<String, CellDetails>,
    ) -> Result<SuggestionBatch, CallError> {
        let body = json!({
            "project_id": project_id,
            "topic": topic,
            "existing_questions": existing_questions,
        });
        let resp: Content<SuggestionBatch> = self.post("/api/get_delete_suggestions", &body).await?;
        Ok(resp.content)
    }

    // ============ Cell assistance endpoints ============

    /// Alternative wordings for a cell. `existing_questions` holds the rest
    /// of its section.
    pub async fn reword_question(
        &self,
        project_id: &str,
        cell_id: &str,
        cell_details: &CellDetails,
        existing_questions: &BTreeMap<String, CellDetails>,
    ) -> Result<Vec<Rewording>, CallError> {
        let body = json!({
            "project_id": project_id,
            "cell_id": cell_id,
            "cell_details": cell_details,
            "existing_questions": existing_questions,
        });
        let resp: Content<Vec<Rewording>> = self.post("/api/reword_question", &body).await?;
        Ok(resp.content)
    }

    pub async fn generate_specific_rewording(
        &self,
        project_id: &str,
        cell_id: &str,
        cell_details: &CellDetails,
        specific_request: &str,
        existing_questions: &BTreeMap<String, CellDetails>,
    ) -> Result<Vec<Rewording>, CallError> {
        let body = json!({
            "project_id": project_id,
            "cell_id": cell_id,
            "cell_details": cell_details,
            "specific_request": specific_request,
            "existing_questions": existing_questions,
        });
        let resp: Content<Vec<Rewording>> = self.post("/api/generate_specific_rewording", &body).await?;
        Ok(resp.content)
    }

    pub async fn check_question(
        &self,
        project_id: &str,
        cell_id: &str,
        cell_details: &CellDetails,
        checks_to_ignore: &[String],
    ) -> Result<QuestionCheck, CallError> {
        let body = json!({
            "project_id": project_id,
            "cell_id": cell_id,
            "cell_details": cell_details,
            "checks_to_ignore": checks_to_ignore,
        });
        self.post("/api/check_question", &body).await
    }

    /// The same question rewritten for the other response format.
    pub async fn switch_response_format(
        &self,
        project_id: &str,
        cell_id: &str,
        cell_details: &CellDetails,
    ) -> Result<Rewording, CallError> {
        let body = json!({
            "project_id": project_id,
            "cell_id": cell_id,
            "cell_details": cell_details,
        });
        let resp: Content<Rewording> = self.post("/api/switch_response_format", &body).await?;
        Ok(resp.content)
    }

    /// Queue a trivial task on the worker. Returns the task id to poll
    /// with [`get_result`](Self::get_result).
    pub async fn start_add(&self, a: i64, b: i64) -> Result<String, CallError> {
        let resp: StartAddResponse = self.post("/api/start_add", &json!({ "a": a, "b": b })).await?;
        Ok(resp.result)
    }
}

async fn decode<R: DeserializeOwned>(path: &str, response: reqwest::Response) -> Result<R, CallError> {
    let status = response.status();
    if !status.is_success() {
        tracing::warn!(path, status = status.as_u16(), "request failed");
        return Err(CallError::Status(status.as_u16()));
    }
    let bytes = response.bytes().await?;
    // Acknowledgement endpoints may answer with an empty body.
    let bytes: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
    serde_json::from_slice(bytes).map_err(|e| CallError::Decode(e.to_string()))
}

#[async_trait]
impl PersistenceApi for ApiClient {
    async fn update_all_questions(&self, details: &ProjectDetailsSnapshot) -> Result<(), CallError> {
        let _: Value = self.post("/api/update_all_questions", details).await?;
        Ok(())
    }

    async fn update_context(&self, context: &ContextSnapshot) -> Result<(), CallError> {
        let _: Value = self.post("/api/update_context", context).await?;
        Ok(())
    }

    async fn save_analyze_topics_info(
        &self,
        project_id: &str,
        topics: &TopicsSnapshot,
    ) -> Result<(), CallError> {
        let body = TopicsPayload { project_id, topics };
        let _: Value = self.post("/api/save_analyze_topics_info", &body).await?;
        Ok(())
    }

    async fn track_user_action(
        &self,
        user_code: &str,
        events: &IndexMap<String, Vec<Event>>,
    ) -> Result<(), CallError> {
        let body = EventsPayload { user_code, events };
        let _: Value = self.post("/api/track_user_action", &body).await?;
        Ok(())
    }
}
