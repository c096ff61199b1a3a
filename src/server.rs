//! HTTP surface over [`App`].

use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info};

use crate::app::{App, ProcessOptions};
use crate::error::Error;
use crate::models::{DraftStatus, TranscriptFormat};

const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    request_id: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_argument",
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::UnsupportedFormat(_) | Error::Parse(_) => {
                (StatusCode::BAD_REQUEST, "invalid_argument")
            }
            Error::TokenExpired => (StatusCode::FORBIDDEN, "token_expired"),
            Error::InvalidToken => (StatusCode::NOT_FOUND, "invalid_token"),
            Error::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            Error::AlreadyResolved => (StatusCode::CONFLICT, "already_resolved"),
            Error::Superseded => (StatusCode::CONFLICT, "superseded"),
            Error::InvalidTransition(_) => (StatusCode::CONFLICT, "invalid_transition"),
            Error::ProviderCallFailed { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "provider_call_failed")
            }
            Error::ConfigurationInvalid(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration_invalid")
            }
            Error::Io { .. } | Error::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::new_v4().to_string();
        if self.status.is_server_error() {
            error!("Request {} failed: {}", request_id, self.message);
        }
        let body = ErrorBody {
            error: self.message,
            code: self.code,
            request_id,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn build_router(app: Arc<App>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/upload", get(upload_info).post(upload))
        .route("/test-scripts", get(list_scripts))
        .route("/test-script/:id", get(view_script))
        .route("/test-script/:id/approval", get(approval_status))
        .route("/approve/:token", get(approve_with_token))
        .route("/approve-script/:id", post(approve_script))
        .route("/health", get(health))
        .with_state(app)
}

pub async fn serve(app: Arc<App>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, build_router(app)).await
}

async fn index(State(app): State<Arc<App>>) -> ApiResult<Value> {
    Ok(Json(json!(app.dashboard()?)))
}

async fn health(State(app): State<Arc<App>>) -> Json<Value> {
    Json(json!({ "status": "healthy", "app": app.settings().app_name }))
}

fn allowed_extensions() -> Vec<&'static str> {
    TranscriptFormat::ALL.iter().map(|f| f.as_str()).collect()
}

async fn upload_info() -> Json<Value> {
    Json(json!({
        "message": "Upload endpoint ready",
        "allowed_extensions": allowed_extensions(),
    }))
}

/// Keep only the final path component, restricted to a safe character set
fn sanitize_filename(name: &str) -> String {
    let base = FsPath::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    base.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

async fn upload(State(app): State<Arc<App>>, mut multipart: Multipart) -> ApiResult<Value> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut options = ProcessOptions::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                file = Some((filename, bytes.to_vec()));
            }
            "context" | "auto_approve" | "create_story" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                match name.as_str() {
                    "context" => options.context = Some(value).filter(|v| !v.is_empty()),
                    "auto_approve" => options.auto_approve = value == "true",
                    _ => options.create_story = value == "true",
                }
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or_else(|| ApiError::bad_request("No file uploaded"))?;
    if filename.is_empty() {
        return Err(ApiError::bad_request("No file selected"));
    }
    let filename = sanitize_filename(&filename);
    let supported = FsPath::new(&filename)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| TranscriptFormat::from_extension(e).is_ok());
    if !supported {
        return Err(ApiError::bad_request(format!(
            "Invalid file type. Allowed: {}",
            allowed_extensions().join(", ")
        )));
    }

    let path = app.upload_path(&filename);
    tokio::fs::write(&path, &bytes).await.map_err(|source| {
        ApiError::from(Error::Io {
            path: path.clone(),
            source,
        })
    })?;

    let report = app.process_transcript(&path, &options).await?;
    Ok(Json(json!({
        "success": true,
        "transcript_id": report.transcript.id,
        "test_script_id": report.draft.id,
        "test_script": report.draft,
        "approval_request": report.approval,
        "servicenow_story": report.ticket,
    })))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    limit: Option<usize>,
}

async fn list_scripts(
    State(app): State<Arc<App>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Value> {
    let status = query
        .status
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<DraftStatus>())
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let drafts = app
        .store()
        .list_drafts(status, query.limit.unwrap_or(DEFAULT_LIST_LIMIT))?;
    Ok(Json(json!(drafts)))
}

async fn view_script(State(app): State<Arc<App>>, Path(id): Path<i64>) -> ApiResult<Value> {
    Ok(Json(json!(app.store().draft(id)?)))
}

async fn approval_status(State(app): State<Arc<App>>, Path(id): Path<i64>) -> ApiResult<Value> {
    Ok(Json(json!(app.workflow().status(id)?)))
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    action: Option<String>,
    note: Option<String>,
}

async fn approve_with_token(
    State(app): State<Arc<App>>,
    Path(token): Path<String>,
    Query(query): Query<TokenQuery>,
) -> ApiResult<Value> {
    let note = query.note.as_deref().filter(|n| !n.is_empty());

    match query.action.as_deref().unwrap_or("view") {
        "view" => {
            let review = app.workflow().review(&token)?;
            Ok(Json(json!({
                "test_script": review.draft,
                "approval_request": review.request,
                "actions": {
                    "approve": format!("/approve/{}?action=approve", token),
                    "reject": format!("/approve/{}?action=reject", token),
                },
            })))
        }
        action @ ("approve" | "reject") => {
            let resolution = app
                .workflow()
                .resolve(&token, action == "approve", note)
                .await?;
            Ok(Json(json!({
                "success": true,
                "status": resolution.draft.status,
                "test_script_id": resolution.draft.id,
                "servicenow_story": resolution.ticket,
            })))
        }
        _ => Err(ApiError::bad_request("Invalid action")),
    }
}

fn default_approved() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ApproveBody {
    #[serde(default = "default_approved")]
    approved: bool,
    note: Option<String>,
    approved_by: Option<String>,
}

async fn approve_script(
    State(app): State<Arc<App>>,
    Path(id): Path<i64>,
    Json(body): Json<ApproveBody>,
) -> ApiResult<Value> {
    let approver = body.approved_by.as_deref().unwrap_or("web");
    let note = body.note.as_deref().filter(|n| !n.is_empty());
    let resolution = app
        .workflow()
        .decide(id, body.approved, approver, note)
        .await?;
    Ok(Json(json!({
        "success": true,
        "status": resolution.draft.status,
        "servicenow_story": resolution.ticket,
    })))
}
