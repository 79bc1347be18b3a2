//! Route handlers for the control plane.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info_span, warn, Instrument};

use crate::controller::StrategyDiagnosis;
use crate::models::event::LimitEvent;
use crate::models::pause::{PauseState, PauseStatus};
use crate::models::session::{
    EndRequest, HeartbeatRequest, RegisterRequest, RegisterResponse, SessionRecord,
};
use crate::orchestrator::{Diagnostics, Governor};
use crate::policy::headers::RateLimitHeaders;
use crate::AppError;

/// Default page size for `/api/events`.
const DEFAULT_EVENT_LIMIT: u32 = 20;
/// Largest page `/api/events` returns.
const MAX_EVENT_LIMIT: u32 = 500;

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// JSON error body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Error message.
    pub error: String,
}

/// [`AppError`] rendered as an HTTP response.
#[derive(Debug)]
pub(super) struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Api(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(err = %self.0, "control plane request failed");
        }
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Query for `/api/events`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct EventsQuery {
    /// Page size.
    pub limit: Option<u32>,
}

/// Body of `/api/pause`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PauseRequest {
    /// Pause length in milliseconds.
    pub duration_ms: u64,
}

/// Response of `/api/resume`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResumeResponse {
    /// Whether a pause was in effect.
    pub cleared: bool,
}

/// Body of `/api/usage`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageRequest {
    /// Units to record.
    pub units: u32,
}

/// Response of `/api/usage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageResponse {
    /// Inserted usage row.
    pub row_id: i64,
    /// Pause started by the follow-up check, if any.
    pub paused: Option<PauseState>,
}

/// Body of `/api/signal/headers`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeaderSignalRequest {
    /// Response headers by name.
    pub headers: HashMap<String, String>,
}

/// Response of `/api/signal/headers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderSignalResponse {
    /// Whether the headers tripped a pause.
    pub tripped: bool,
    /// Pause in effect after the headers were applied.
    pub pause: Option<PauseState>,
}

pub(super) async fn health() -> &'static str {
    "ok"
}

pub(super) async fn status(State(gov): State<Arc<Governor>>) -> ApiResult<Diagnostics> {
    Ok(Json(gov.diagnostics().await?))
}

pub(super) async fn strategy(State(gov): State<Arc<Governor>>) -> ApiResult<StrategyDiagnosis> {
    Ok(Json(gov.detect_resume_strategy().await?))
}

pub(super) async fn register(
    State(gov): State<Arc<Governor>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<RegisterResponse> {
    let span = info_span!("register_session", session_id = %req.session_id);
    Ok(Json(gov.register_session(req).instrument(span).await?))
}

pub(super) async fn heartbeat(
    State(gov): State<Arc<Governor>>,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<PauseStatus> {
    let span = info_span!("heartbeat", session_id = %req.session_id);
    Ok(Json(gov.heartbeat(req).instrument(span).await?))
}

pub(super) async fn end(
    State(gov): State<Arc<Governor>>,
    Json(req): Json<EndRequest>,
) -> std::result::Result<StatusCode, ApiError> {
    let span = info_span!("end_session", session_id = %req.session_id);
    gov.end_session(req).instrument(span).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn pause_status(State(gov): State<Arc<Governor>>) -> ApiResult<PauseStatus> {
    Ok(Json(gov.pause_status().await?))
}

pub(super) async fn sessions(State(gov): State<Arc<Governor>>) -> ApiResult<Vec<SessionRecord>> {
    Ok(Json(gov.list_sessions().await?))
}

pub(super) async fn events(
    State(gov): State<Arc<Governor>>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Vec<LimitEvent>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .min(MAX_EVENT_LIMIT);
    Ok(Json(gov.recent_events(limit).await?))
}

pub(super) async fn pause(
    State(gov): State<Arc<Governor>>,
    Json(req): Json<PauseRequest>,
) -> ApiResult<PauseState> {
    if req.duration_ms == 0 {
        return Err(AppError::Api("duration_ms must be positive".into()).into());
    }
    let span = info_span!("force_pause", duration_ms = req.duration_ms);
    let state = gov
        .force_pause(Duration::from_millis(req.duration_ms))
        .instrument(span)
        .await?;
    Ok(Json(state))
}

pub(super) async fn resume(State(gov): State<Arc<Governor>>) -> ApiResult<ResumeResponse> {
    let cleared = gov.force_resume().instrument(info_span!("force_resume")).await?;
    Ok(Json(ResumeResponse { cleared }))
}

pub(super) async fn usage(
    State(gov): State<Arc<Governor>>,
    Json(req): Json<UsageRequest>,
) -> ApiResult<UsageResponse> {
    let row_id = gov.record_usage(req.units).await?;
    let paused = gov.check_limits().await?;
    Ok(Json(UsageResponse { row_id, paused }))
}

pub(super) async fn header_signal(
    State(gov): State<Arc<Governor>>,
    Json(req): Json<HeaderSignalRequest>,
) -> ApiResult<HeaderSignalResponse> {
    let headers = RateLimitHeaders::from_pairs(&req.headers);
    let pause = gov
        .apply_headers(&headers)
        .instrument(info_span!("header_signal"))
        .await?;
    Ok(Json(HeaderSignalResponse {
        tripped: pause.is_some(),
        pause,
    }))
}
