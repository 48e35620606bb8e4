//! HTTP surface. Successes are `{"ok": true, ...}`, failures `{"ok": false, "error": ...}`.

use crate::error::{GenerationError, RenderError};
use crate::models::{Document, Progress, Topic, Warning};
use crate::render::{PdfRenderer, fetch_cover, render_epub};
use crate::services::{BookAssembler, CreditStore, GenerationRequest, HistorySink, ImageFetcher};
use crate::utils::slugify;
use axum::{
    Router,
    extract::{
        FromRequest, FromRequestParts, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
};
use http::header;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

const ANONYMOUS: &str = "anonymous";

pub const DEFAULT_JOB_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_MAX_JOBS: usize = 1000;

#[derive(Clone)]
pub struct AppState {
    pub assembler: Arc<BookAssembler>,
    pub renderer: Arc<PdfRenderer>,
    pub images: Arc<dyn ImageFetcher>,
    pub credits: Arc<dyn CreditStore>,
    pub history: Arc<dyn HistorySink>,
    pub jobs: Arc<JobStore>,
    pub min_topic_len: usize,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            message: message.into(),
        }
    }

    fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{} not found", what))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "ok": false, "error": self.message }))).into_response()
    }
}

impl From<GenerationError> for ApiError {
    fn from(e: GenerationError) -> Self {
        let status = match e {
            GenerationError::InvalidTopic(_) => StatusCode::BAD_REQUEST,
            GenerationError::Stage { .. } => StatusCode::BAD_GATEWAY,
        };
        ApiError::new(status, e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::new(rejection.status(), rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::new(rejection.status(), rejection.body_text())
    }
}

impl From<RenderError> for ApiError {
    fn from(e: RenderError) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

/// JSON body extractor whose rejections use the `{ok: false}` shape.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Path extractor whose rejections use the `{ok: false}` shape.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

#[derive(Debug, Clone)]
pub enum JobStatus {
    Running,
    Done {
        document: Document,
        warnings: Vec<Warning>,
        history_id: Option<Uuid>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone)]
pub struct Job {
    pub topic: Topic,
    pub account: String,
    /// Credits given explicitly when the job was started. Regenerations reuse
    /// them instead of the account balance.
    pub credits_override: Option<u32>,
    pub progress: watch::Receiver<Progress>,
    pub status: JobStatus,
    finished_at: Option<Instant>,
}

impl Job {
    pub fn running(
        topic: Topic,
        account: String,
        credits_override: Option<u32>,
        progress: watch::Receiver<Progress>,
    ) -> Self {
        Job {
            topic,
            account,
            credits_override,
            progress,
            status: JobStatus::Running,
            finished_at: None,
        }
    }
}

/// Result of [`JobStore::replace_document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replace {
    Applied,
    /// The stored Document is no longer the revision the edit started from.
    Stale { current: u32 },
    Missing,
}

/// Asynchronous runs keyed by job id. Each job owns its own run.
///
/// Finished jobs are dropped `ttl` after they finish or were last revised.
/// At `capacity`, the oldest finished job makes room for a new one; running
/// jobs are never evicted.
pub struct JobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
    ttl: Duration,
    capacity: usize,
}

impl Default for JobStore {
    fn default() -> Self {
        JobStore::new(DEFAULT_JOB_TTL, DEFAULT_MAX_JOBS)
    }
}

impl JobStore {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        JobStore {
            jobs: RwLock::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    fn expired(&self, job: &Job, now: Instant) -> bool {
        job.finished_at
            .is_some_and(|at| now.saturating_duration_since(at) >= self.ttl)
    }

    /// Returns `None` when every slot is held by a running job.
    pub async fn insert(&self, job: Job) -> Option<Uuid> {
        let mut jobs = self.jobs.write().await;
        let now = Instant::now();
        jobs.retain(|_, job| !self.expired(job, now));

        if jobs.len() >= self.capacity {
            let oldest = jobs
                .iter()
                .filter_map(|(id, job)| job.finished_at.map(|at| (at, *id)))
                .min()
                .map(|(_, id)| id)?;
            jobs.remove(&oldest);
        }

        let id = Uuid::new_v4();
        jobs.insert(id, job);
        Some(id)
    }

    pub async fn get(&self, id: &Uuid) -> Option<Job> {
        let jobs = self.jobs.read().await;
        jobs.get(id)
            .filter(|job| !self.expired(job, Instant::now()))
            .cloned()
    }

    pub async fn set_status(&self, id: &Uuid, status: JobStatus) {
        if let Some(job) = self.jobs.write().await.get_mut(id) {
            if !matches!(status, JobStatus::Running) {
                job.finished_at = Some(Instant::now());
            }
            job.status = status;
        }
    }

    /// Stores `document` only if the job still holds `base_revision`, so two
    /// edits started from the same revision cannot overwrite each other.
    pub async fn replace_document(
        &self,
        id: &Uuid,
        base_revision: u32,
        document: Document,
    ) -> Replace {
        let mut jobs = self.jobs.write().await;
        let now = Instant::now();
        let Some(job) = jobs.get_mut(id).filter(|job| !self.expired(job, now)) else {
            return Replace::Missing;
        };
        match &mut job.status {
            JobStatus::Done { document: current, .. } if current.revision == base_revision => {
                *current = document;
                job.finished_at = Some(now);
                Replace::Applied
            }
            JobStatus::Done { document: current, .. } => Replace::Stale {
                current: current.revision,
            },
            _ => Replace::Missing,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub topic: String,
    pub account: Option<String>,
    pub credits: Option<u32>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/api/generate", post(generate))
        .route("/api/jobs", post(start_job))
        .route("/api/jobs/:id", get(job_status))
        .route("/api/jobs/:id/cover", post(regenerate_cover))
        .route("/api/jobs/:id/chapters/:index", post(regenerate_chapter))
        .route("/api/jobs/:id/pdf", get(job_pdf))
        .route("/api/jobs/:id/epub", get(job_epub))
        .route("/api/render", post(render_document))
        .route("/api/history", get(list_history))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head><title>E-book Forge</title><meta charset="utf-8"></head>
<body>
  <h1>E-book Forge</h1>
  <p>Turns a topic into a multi-chapter e-book and renders it as PDF or EPUB.</p>
  <ul>
    <li>POST /api/generate - run synchronously, body {"topic": "..."}</li>
    <li>POST /api/jobs - start a run, then poll GET /api/jobs/{id}</li>
    <li>GET /api/jobs/{id}/pdf, GET /api/jobs/{id}/epub - downloads</li>
    <li>POST /api/render - render a Document to PDF</li>
    <li>GET /api/history - finished runs</li>
  </ul>
</body>
</html>"#,
    )
}

async fn health_check() -> &'static str {
    "OK"
}

async fn credits_for(
    state: &AppState,
    account: &str,
    requested: Option<u32>,
) -> Result<u32, ApiError> {
    if let Some(credits) = requested {
        return Ok(credits);
    }
    state
        .credits
        .balance(account)
        .await
        .map_err(|e| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
}

struct Prepared {
    request: GenerationRequest,
    account: String,
    credits_override: Option<u32>,
}

async fn prepare(state: &AppState, body: GenerateBody) -> Result<Prepared, ApiError> {
    let topic = Topic::parse(&body.topic, state.min_topic_len)
        .map_err(GenerationError::InvalidTopic)?;
    let account = body.account.unwrap_or_else(|| ANONYMOUS.to_string());
    let credits_available = credits_for(state, &account, body.credits).await?;
    Ok(Prepared {
        request: GenerationRequest {
            topic,
            credits_available,
        },
        account,
        credits_override: body.credits,
    })
}

async fn generate(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<GenerateBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let prepared = prepare(&state, body).await?;
    let outcome = state.assembler.run(&prepared.request, None).await?;
    Ok(Json(json!({
        "ok": true,
        "state": outcome.state,
        "document": outcome.document,
        "warnings": outcome.warnings,
        "historyId": outcome.history_id,
    })))
}

async fn start_job(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<GenerateBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let Prepared {
        request,
        account,
        credits_override,
    } = prepare(&state, body).await?;
    let (tx, rx) = watch::channel(Progress::idle());
    let job = Job::running(request.topic.clone(), account, credits_override, rx);
    let id = state.jobs.insert(job).await.ok_or_else(|| {
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "too many jobs in flight")
    })?;

    let assembler = state.assembler.clone();
    let jobs = state.jobs.clone();
    tokio::spawn(async move {
        let status = match assembler.run(&request, Some(tx)).await {
            Ok(outcome) => JobStatus::Done {
                document: outcome.document,
                warnings: outcome.warnings,
                history_id: outcome.history_id,
            },
            Err(e) => JobStatus::Failed {
                error: e.to_string(),
            },
        };
        jobs.set_status(&id, status).await;
    });

    info!(job = %id, "generation job started");
    Ok((StatusCode::ACCEPTED, Json(json!({ "ok": true, "jobId": id }))))
}

async fn job_status(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = state.jobs.get(&id).await.ok_or_else(|| ApiError::not_found("job"))?;
    let progress = *job.progress.borrow();
    let body = match job.status {
        JobStatus::Running => json!({
            "ok": true, "jobId": id, "status": "running", "progress": progress,
        }),
        JobStatus::Done {
            document,
            warnings,
            history_id,
        } => json!({
            "ok": true, "jobId": id, "status": "done", "progress": progress,
            "document": document, "warnings": warnings, "historyId": history_id,
        }),
        JobStatus::Failed { error } => json!({
            "ok": false, "jobId": id, "status": "failed", "progress": progress, "error": error,
        }),
    };
    Ok(Json(body))
}

async fn finished_document(state: &AppState, id: &Uuid) -> Result<(Job, Document), ApiError> {
    let job = state.jobs.get(id).await.ok_or_else(|| ApiError::not_found("job"))?;
    let document = match &job.status {
        JobStatus::Done { document, .. } => document.clone(),
        JobStatus::Running => {
            return Err(ApiError::new(StatusCode::CONFLICT, "job is still running"));
        }
        JobStatus::Failed { error } => {
            return Err(ApiError::new(StatusCode::CONFLICT, error.clone()));
        }
    };
    Ok((job, document))
}

async fn store_revision(
    state: &AppState,
    id: &Uuid,
    base_revision: u32,
    next: Document,
) -> Result<(), ApiError> {
    match state.jobs.replace_document(id, base_revision, next).await {
        Replace::Applied => Ok(()),
        Replace::Stale { current } => Err(ApiError::new(
            StatusCode::CONFLICT,
            format!(
                "document moved from revision {} to {} meanwhile; retry on the latest revision",
                base_revision, current
            ),
        )),
        Replace::Missing => Err(ApiError::not_found("job")),
    }
}

async fn regenerate_cover(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (job, document) = finished_document(&state, &id).await?;
    let credits = credits_for(&state, &job.account, job.credits_override).await?;
    let (next, warning) = state
        .assembler
        .regenerate_cover(&document, &job.topic, credits)
        .await;
    store_revision(&state, &id, document.revision, next.clone()).await?;
    Ok(Json(json!({
        "ok": true,
        "document": next,
        "warnings": warning.into_iter().collect::<Vec<_>>(),
    })))
}

async fn regenerate_chapter(
    State(state): State<AppState>,
    ApiPath((id, index)): ApiPath<(Uuid, usize)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (job, document) = finished_document(&state, &id).await?;
    let next = state
        .assembler
        .regenerate_chapter(&document, &job.topic, index)
        .await
        .ok_or_else(|| ApiError::not_found("chapter"))?;
    if next.chapters[index].is_placeholder() {
        warn!(job = %id, index, "chapter regeneration failed again");
    }
    store_revision(&state, &id, document.revision, next.clone()).await?;
    Ok(Json(json!({ "ok": true, "document": next })))
}

fn download(bytes: Vec<u8>, content_type: &str, title: &str, extension: &str) -> Response {
    let disposition = format!(
        "attachment; filename=\"{}.{}\"",
        slugify(title, "ebook"),
        extension
    );
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response()
}

async fn pdf_response(state: &AppState, document: &Document) -> Result<Response, ApiError> {
    let pdf = state.renderer.render_pdf(document, state.images.as_ref()).await?;
    Ok(download(pdf, "application/pdf", &document.title, "pdf"))
}

async fn job_pdf(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Response, ApiError> {
    let (_, document) = finished_document(&state, &id).await?;
    pdf_response(&state, &document).await
}

async fn job_epub(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Response, ApiError> {
    let (_, document) = finished_document(&state, &id).await?;
    let cover = fetch_cover(&document, state.images.as_ref()).await;
    let epub = render_epub(&document, cover.as_deref())?;
    Ok(download(epub, "application/epub+zip", &document.title, "epub"))
}

async fn render_document(
    State(state): State<AppState>,
    ApiJson(document): ApiJson<Document>,
) -> Result<Response, ApiError> {
    pdf_response(&state, &document).await
}

async fn list_history(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let records = state
        .history
        .list()
        .await
        .map_err(|e| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    Ok(Json(json!({ "ok": true, "records": records })))
}
