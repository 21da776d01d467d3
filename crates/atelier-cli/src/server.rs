//! HTTP surface over the reconciler.

use std::sync::Arc;

use anyhow::Context;
use atelier_contracts::error::StudioError;
use atelier_contracts::naming::{is_plain_name, media_type_for};
use atelier_contracts::verdict::Reconciliation;
use atelier_engine::Reconciler;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

const IMAGE_LIST_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub prompt: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditBody {
    pub edit_prompt: String,
    #[serde(default)]
    pub image_filename: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImagesReply {
    pub success: bool,
    pub message: String,
    pub filenames: Vec<String>,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct EditReply {
    pub success: bool,
    pub message: String,
    pub filename: Option<String>,
    pub session_id: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl From<StudioError> for ApiError {
    fn from(err: StudioError) -> Self {
        let status = match err {
            StudioError::NoTarget => StatusCode::BAD_REQUEST,
            StudioError::NotFound(_) | StudioError::SourceNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

pub fn router(reconciler: Arc<Reconciler>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/api/health", get(health_handler))
        .route("/api/generate", post(generate_handler))
        .route("/api/edit", post(edit_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/images", get(list_images_handler))
        .route("/api/images/{filename}", get(get_image_handler))
        .route("/api/upload", post(upload_handler))
        .with_state(AppState { reconciler })
}

pub async fn serve(reconciler: Arc<Reconciler>, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(reconciler))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "could not install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

fn session_or_new(session_id: Option<String>) -> String {
    session_id
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

async fn root_handler() -> Json<Value> {
    Json(json!({
        "service": "Fashion Image Generation API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "generate": "POST /api/generate",
            "edit": "POST /api/edit",
            "chat": "POST /api/chat",
            "images": "GET /api/images",
            "get_image": "GET /api/images/{filename}",
            "upload": "POST /api/upload",
            "health": "GET /api/health",
        },
    }))
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "fashion-image-api" }))
}

async fn generate_handler(
    State(state): State<AppState>,
    Json(body): Json<GenerateBody>,
) -> Result<Json<ImagesReply>, ApiError> {
    let session_id = session_or_new(body.session_id);
    let outcome = state.reconciler.generate_request(&body.prompt).await;
    if !outcome.verdict.is_success() {
        return Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, outcome.message));
    }
    Ok(Json(images_reply(outcome, session_id)))
}

async fn edit_handler(
    State(state): State<AppState>,
    Json(body): Json<EditBody>,
) -> Result<Json<EditReply>, ApiError> {
    let session_id = session_or_new(body.session_id);
    let outcome = state
        .reconciler
        .edit_request(&body.edit_prompt, body.image_filename.as_deref())
        .await?;
    if !outcome.verdict.is_success() {
        return Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, outcome.message));
    }
    Ok(Json(EditReply {
        success: true,
        filename: outcome.artifacts.into_iter().next(),
        message: outcome.message,
        session_id,
    }))
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Json<ImagesReply> {
    let session_id = session_or_new(body.session_id);
    let outcome = state.reconciler.chat_request(&body.message).await;
    Json(images_reply(outcome, session_id))
}

fn images_reply(outcome: Reconciliation, session_id: String) -> ImagesReply {
    ImagesReply {
        success: outcome.verdict.is_success(),
        message: outcome.message,
        filenames: outcome.artifacts,
        session_id,
    }
}

async fn list_images_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let images = state
        .reconciler
        .studio()
        .store()
        .list("", IMAGE_LIST_LIMIT)?;
    Ok(Json(json!({
        "success": true,
        "count": images.len(),
        "images": images,
    })))
}

async fn get_image_handler(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    if !is_plain_name(&filename) {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "Invalid filename"));
    }
    let bytes = state
        .reconciler
        .studio()
        .store()
        .read(&filename)
        .map_err(|err| match err {
            StudioError::NotFound(_) => ApiError::new(
                StatusCode::NOT_FOUND,
                format!("Image not found: {filename}"),
            ),
            other => ApiError::from(other),
        })?;
    Ok(([(header::CONTENT_TYPE, media_type_for(&filename))], bytes).into_response())
}

async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::new(StatusCode::BAD_REQUEST, err.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        if !is_plain_name(&filename) {
            return Err(ApiError::new(StatusCode::FORBIDDEN, "Invalid filename"));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::new(StatusCode::BAD_REQUEST, err.to_string()))?;

        let studio = state.reconciler.studio();
        studio.store().write(&filename, &bytes).map_err(|err| {
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error uploading file: {err}"),
            )
        })?;
        studio.ledger().record_generated(filename.clone());
        studio.emit(
            "artifact_created",
            json!({ "name": filename, "kind": "upload", "bytes": bytes.len() }),
        );
        return Ok(Json(json!({
            "success": true,
            "message": format!("File uploaded successfully: {filename}"),
            "filename": filename,
        })));
    }
    Err(ApiError::new(StatusCode::BAD_REQUEST, "missing multipart field `file`"))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::Result;
    use atelier_contracts::config::PollBounds;
    use atelier_contracts::ledger::RecencyLedger;
    use atelier_engine::models::DryrunModel;
    use atelier_engine::{ArtifactStore, LocalDelegate, Studio};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    fn make_app(dir: &std::path::Path) -> Result<(Router, Arc<Reconciler>)> {
        let studio = Arc::new(Studio::new(
            ArtifactStore::open(dir)?,
            Arc::new(DryrunModel),
            Arc::new(Mutex::new(RecencyLedger::new())),
        ));
        let delegate = Arc::new(LocalDelegate::new(Arc::clone(&studio)));
        let reconciler = Arc::new(Reconciler::new(
            studio,
            delegate,
            PollBounds {
                max_wait: Duration::from_millis(50),
                interval: Duration::from_millis(10),
            },
        ));
        Ok((router(Arc::clone(&reconciler)), reconciler))
    }

    async fn read_json(resp: Response) -> Result<Value> {
        let body = axum::body::to_bytes(resp.into_body(), 1_000_000).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn post_json(uri: &str, body: Value) -> Result<Request<Body>> {
        Ok(Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))?)
    }

    #[tokio::test]
    async fn health_endpoint_reports_service() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let (app, _) = make_app(temp.path())?;
        let resp = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty())?)
            .await?;
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = read_json(resp).await?;
        assert_eq!(parsed["status"], "healthy");
        assert_eq!(parsed["service"], "fashion-image-api");
        Ok(())
    }

    #[tokio::test]
    async fn images_are_listed_and_served() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let (app, reconciler) = make_app(temp.path())?;
        let store = reconciler.studio().store();
        store.write("a.png", b"png-a")?;
        store.write("b.jpg", b"jpg-b")?;
        store.write("notes.txt", b"text")?;

        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/api/images").body(Body::empty())?)
            .await?;
        let parsed = read_json(resp).await?;
        assert_eq!(parsed["success"], true);
        assert_eq!(parsed["count"], 2);

        let resp = app
            .oneshot(Request::builder().uri("/api/images/b.jpg").body(Body::empty())?)
            .await?;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");
        let body = axum::body::to_bytes(resp.into_body(), 1_000).await?;
        assert_eq!(&body[..], b"jpg-b");
        Ok(())
    }

    #[tokio::test]
    async fn traversal_is_forbidden_and_missing_is_not_found() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let (app, _) = make_app(temp.path())?;

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/images/..%2Fsecret.png")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/images/nothing.png")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let parsed = read_json(resp).await?;
        assert_eq!(parsed["detail"], "Image not found: nothing.png");
        Ok(())
    }

    #[tokio::test]
    async fn edit_without_target_is_a_bad_request() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let (app, _) = make_app(temp.path())?;
        let resp = app
            .oneshot(post_json("/api/edit", json!({ "edit_prompt": "make it red" }))?)
            .await?;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let parsed = read_json(resp).await?;
        assert!(parsed["detail"]
            .as_str()
            .is_some_and(|detail| detail.contains("image_filename")));
        Ok(())
    }

    #[tokio::test]
    async fn edit_of_unknown_image_is_not_found() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let (app, reconciler) = make_app(temp.path())?;
        reconciler
            .studio()
            .store()
            .write("edited_20200101_000000_old.png", b"old")?;
        let resp = app
            .oneshot(post_json(
                "/api/edit",
                json!({ "edit_prompt": "make it red", "image_filename": "ghost.png" }),
            )?)
            .await?;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let parsed = read_json(resp).await?;
        assert!(parsed["detail"]
            .as_str()
            .is_some_and(|detail| detail.contains("ghost.png")));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn chat_replies_without_images() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let (app, _) = make_app(temp.path())?;
        let resp = app
            .oneshot(post_json(
                "/api/chat",
                json!({ "message": "hello", "session_id": "chat-1" }),
            )?)
            .await?;
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = read_json(resp).await?;
        assert_eq!(parsed["success"], true);
        assert_eq!(parsed["session_id"], "chat-1");
        assert_eq!(parsed["filenames"], json!([]));
        assert!(parsed["message"].as_str().is_some_and(|text| !text.is_empty()));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn chat_that_generates_returns_the_new_images() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let (app, reconciler) = make_app(temp.path())?;
        let resp = app
            .oneshot(post_json(
                "/api/chat",
                json!({ "message": "generate four summer dresses" }),
            )?)
            .await?;
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = read_json(resp).await?;
        assert_eq!(parsed["success"], true);
        assert_eq!(parsed["message"], "Successfully produced 4 image(s)");
        assert_eq!(parsed["filenames"].as_array().map(Vec::len), Some(4));
        assert_eq!(reconciler.studio().store().list("", 10)?.len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn generate_then_edit_round_trip() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let (app, _) = make_app(temp.path())?;

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/generate",
                json!({ "prompt": "linen summer dresses", "session_id": "s-1" }),
            )?)
            .await?;
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = read_json(resp).await?;
        assert_eq!(parsed["success"], true);
        assert_eq!(parsed["session_id"], "s-1");
        assert_eq!(parsed["filenames"].as_array().map(Vec::len), Some(4));

        let resp = app
            .oneshot(post_json("/api/edit", json!({ "edit_prompt": "make it teal" }))?)
            .await?;
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = read_json(resp).await?;
        assert_eq!(parsed["success"], true);
        assert!(parsed["filename"]
            .as_str()
            .is_some_and(|name| name.starts_with("edited_")));
        assert!(parsed["session_id"].as_str().is_some_and(|id| !id.is_empty()));
        Ok(())
    }

    #[tokio::test]
    async fn upload_becomes_the_edit_target() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let (app, reconciler) = make_app(temp.path())?;
        let boundary = "atelier-boundary";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"look.png\"\r\nContent-Type: image/png\r\n\r\npng-bytes\r\n--{boundary}--\r\n"
        );
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/upload")
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))?,
            )
            .await?;
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = read_json(resp).await?;
        assert_eq!(parsed["filename"], "look.png");
        assert_eq!(reconciler.studio().store().read("look.png")?, b"png-bytes");
        assert_eq!(
            reconciler.studio().ledger().last_generated(),
            Some("look.png")
        );
        Ok(())
    }
}
