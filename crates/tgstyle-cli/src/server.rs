use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tgstyle_contracts::events::{AnalysisEvent, EventWriter};
use tgstyle_contracts::storage::ClientLogReport;
use tgstyle_engine::compress::estimated_decoded_len;
use tgstyle_engine::{
    AnalysisOutcome, AuthMode, InitDataError, InitDataValidator, ResolveError, StyleAnalyzer,
};
use tracing::{error, info, warn};

use crate::config::{ServerConfig, MAX_BODY_BYTES};

pub struct AppState {
    pub analyzer: StyleAnalyzer,
    pub validator: InitDataValidator,
    pub log_dir: PathBuf,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Appends to the event log on the blocking pool. Failures are logged only.
    async fn record(&self, event: AnalysisEvent) {
        let Some(events) = self.analyzer.event_writer().cloned() else {
            return;
        };
        let kind = event.kind();
        match tokio::task::spawn_blocking(move || events.record(event)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(event = kind, error = %err, "failed to record event"),
            Err(err) => warn!(event = kind, error = %err, "event writer task failed"),
        }
    }
}

/// Errors surfaced to the Mini App as `{success:false, error}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, Json(json!({ "success": false, "error": self.to_string() }))).into_response()
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<InitDataError> for ApiError {
    fn from(err: InitDataError) -> Self {
        Self::Unauthorized(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        Self::BadRequest(format!("Invalid request body: {}", err.body_text()))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub pinterest_url: Option<String>,
    #[serde(default)]
    pub init_data: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    #[serde(default)]
    pub init_data: Option<String>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/analyze", post(analyze))
        .route("/api/auth", post(auth))
        .route("/api/log-error", post(log_error))
        .route("/api/ping", get(ping))
        .route("/api/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

pub fn build_state(config: &ServerConfig, events: EventWriter) -> AppState {
    AppState {
        analyzer: StyleAnalyzer::from_config(&config.resolver).with_events(events),
        validator: InitDataValidator::new(config.bot_token.clone(), config.auth_mode),
        log_dir: config.log_dir.clone(),
    }
}

pub async fn serve(config: ServerConfig) -> Result<()> {
    let session_id = format!("srv-{}", uuid::Uuid::new_v4());
    let events = EventWriter::new(config.events_path.clone(), session_id);
    let state = Arc::new(build_state(&config, events));
    if config.bot_token.is_empty() && config.auth_mode == AuthMode::Strict {
        warn!("TELEGRAM_BOT_TOKEN is not set; every initData check will fail");
    }
    let sources = state.analyzer.resolver().source_names();
    state
        .record(AnalysisEvent::ServerStarted {
            bind: config.bind.to_string(),
            sources: sources.clone(),
            auth_mode: format!("{:?}", config.auth_mode).to_lowercase(),
        })
        .await;

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(addr = %config.bind, sources = ?sources, "tgstyle API listening");

    axum::serve(listener, router(state))
        .await
        .context("http server error")?;
    Ok(())
}

fn required(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Accepts bare base64 or a `data:<mime>;base64,` URL.
fn decode_photo(photo: &str) -> Result<Vec<u8>, ApiError> {
    let payload = match photo.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => photo,
    };
    BASE64
        .decode(payload.trim())
        .map_err(|err| ApiError::BadRequest(format!("Invalid image: {err}")))
}

fn outcome_json(outcome: &AnalysisOutcome) -> Value {
    json!({
        "success": true,
        "analysis": outcome.analysis_html,
        "comments": outcome.comments,
        "classification": outcome.classification,
    })
}

pub async fn analyze(
    State(state): State<SharedState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let photo = required(request.photo.as_deref()).map(str::to_string);
    let pinterest_url = required(request.pinterest_url.as_deref()).map(str::to_string);
    let init_data = required(request.init_data.as_deref());
    let Some(init_data) = init_data.filter(|_| photo.is_some() || pinterest_url.is_some()) else {
        return Err(ApiError::BadRequest("Missing required parameters".to_string()));
    };

    let init = state.validator.validate(init_data)?;
    info!(user_id = init.user.id, "analysis requested");

    let worker = state.clone();
    let outcome = match photo {
        Some(photo) => {
            info!(kb = estimated_decoded_len(photo.len()) / 1024, "photo received");
            let bytes = decode_photo(&photo)?;
            tokio::task::spawn_blocking(move || worker.analyzer.analyze_photo(&bytes))
                .await
                .map_err(|err| ApiError::Internal(err.to_string()))??
        }
        None => {
            let url = pinterest_url.unwrap_or_default();
            tokio::task::spawn_blocking(move || worker.analyzer.analyze_pinterest(&url))
                .await
                .map_err(|err| ApiError::Internal(err.to_string()))?
        }
    };
    Ok(Json(outcome_json(&outcome)))
}

pub async fn auth(
    State(state): State<SharedState>,
    payload: Result<Json<AuthRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let Some(init_data) = required(request.init_data.as_deref()) else {
        return Err(ApiError::BadRequest("No initData provided".to_string()));
    };
    let validated = state.validator.validate(init_data);
    state
        .record(AnalysisEvent::AuthChecked {
            ok: validated.is_ok(),
            user_id: validated.as_ref().ok().map(|data| data.user.id),
            error: validated.as_ref().err().map(ToString::to_string),
        })
        .await;
    let user = validated?.user;
    Ok(Json(json!({
        "success": true,
        "user": {
            "id": user.id,
            "firstName": user.first_name,
            "lastName": user.last_name.unwrap_or_default(),
            "username": user.username.unwrap_or_default(),
        }
    })))
}

pub async fn log_error(
    State(state): State<SharedState>,
    payload: Result<Json<ClientLogReport>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(report) = payload?;
    let entries = report.entry_count();
    let dir = state.log_dir.clone();
    let path = tokio::task::spawn_blocking(move || {
        report.append_to_dir(&dir, Utc::now().date_naive())
    })
    .await
    .map_err(|err| ApiError::Internal(err.to_string()))?
    .map_err(|err| ApiError::Internal(format!("failed to store client logs: {err:#}")))?;
    info!(entries, path = %path.display(), "client logs stored");
    state
        .record(AnalysisEvent::ClientLogsReceived {
            entries,
            path: path.to_string_lossy().into_owned(),
        })
        .await;
    Ok(Json(json!({ "success": true })))
}

pub async fn ping() -> Json<Value> {
    Json(json!({ "success": true, "message": "API is available" }))
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "Server is running",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}
