use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bot::inbound::GuardedScore;
use crate::errors::AppError;
use crate::funnel::executor::DispatchReport;
use crate::funnel::rules::ActionType;
use crate::funnel::scheduler::ScanReport;
use crate::models::funnel::{DueReactivation, ReactivationEntryRow, SessionScoreRow};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RecordActionRequest {
    pub action_type: String,
    pub subject: Option<String>,
}

/// POST /api/v1/sessions/:id/actions
pub async fn handle_record_action(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<RecordActionRequest>,
) -> Result<Json<GuardedScore>, AppError> {
    let action: ActionType = req.action_type.parse()?;
    require_session(&state, session_id).await?;
    let scored = state
        .inbound
        .score_guarded(session_id, action, req.subject.as_deref(), Utc::now())
        .await?;
    Ok(Json(scored))
}

/// GET /api/v1/sessions/:id/score
pub async fn handle_get_score(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionScoreRow>, AppError> {
    state
        .scoring
        .score(session_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No score for session {session_id}")))
}

#[derive(Serialize)]
pub struct LeadCreatedResponse {
    pub session_id: Uuid,
    pub changed: bool,
}

/// POST /api/v1/sessions/:id/lead
pub async fn handle_mark_lead(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<LeadCreatedResponse>, AppError> {
    require_session(&state, session_id).await?;
    let changed = state
        .scoring
        .mark_lead_created(session_id, Utc::now())
        .await?;
    Ok(Json(LeadCreatedResponse {
        session_id,
        changed,
    }))
}

#[derive(Serialize)]
pub struct RespondedResponse {
    pub session_id: Uuid,
    pub closed: u64,
}

/// POST /api/v1/sessions/:id/responded
pub async fn handle_mark_responded(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<RespondedResponse>, AppError> {
    let closed = state.executor.mark_responded(session_id).await?;
    Ok(Json(RespondedResponse { session_id, closed }))
}

#[derive(Deserialize)]
pub struct StaleQuery {
    pub idle_hours: Option<i64>,
    pub limit: Option<i64>,
}

/// GET /api/v1/reactivation/stale
pub async fn handle_stale_sessions(
    State(state): State<AppState>,
    Query(params): Query<StaleQuery>,
) -> Result<Json<Vec<SessionScoreRow>>, AppError> {
    let policy = state.scheduler.policy();
    let idle = match params.idle_hours {
        Some(hours) if hours < 0 => {
            return Err(AppError::Validation(format!(
                "idle_hours must not be negative, got {hours}"
            )))
        }
        Some(hours) => Duration::try_hours(hours).ok_or_else(|| {
            AppError::Validation(format!("idle_hours is out of range, got {hours}"))
        })?,
        None => policy.idle_threshold,
    };
    let limit = params.limit.unwrap_or(policy.scan_limit);
    let stale = state
        .scheduler
        .find_stale_sessions(idle, limit, Utc::now())
        .await?;
    Ok(Json(stale))
}

#[derive(Deserialize)]
pub struct EnqueueRequest {
    pub session_id: Uuid,
    pub attempt_number: i32,
    pub scheduled_at: DateTime<Utc>,
}

/// POST /api/v1/reactivation/enqueue
pub async fn handle_enqueue(
    State(state): State<AppState>,
    Json(req): Json<EnqueueRequest>,
) -> Result<Json<ReactivationEntryRow>, AppError> {
    require_session(&state, req.session_id).await?;
    let entry = state
        .scheduler
        .enqueue(req.session_id, req.attempt_number, req.scheduled_at, Utc::now())
        .await?;
    Ok(Json(entry))
}

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

/// GET /api/v1/reactivation/due
pub async fn handle_due_entries(
    State(state): State<AppState>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<DueReactivation>>, AppError> {
    let limit = params
        .limit
        .unwrap_or(state.config.reactivation_dispatch_limit);
    let due = state.executor.due_entries(limit, Utc::now()).await?;
    Ok(Json(due))
}

#[derive(Deserialize)]
pub struct MarkSentRequest {
    pub message: String,
}

#[derive(Serialize)]
pub struct MarkSentResponse {
    pub entry_id: Uuid,
    pub changed: bool,
}

/// POST /api/v1/reactivation/:id/sent
pub async fn handle_mark_sent(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
    Json(req): Json<MarkSentRequest>,
) -> Result<Json<MarkSentResponse>, AppError> {
    let changed = state
        .executor
        .mark_sent(entry_id, &req.message, Utc::now())
        .await?;
    Ok(Json(MarkSentResponse { entry_id, changed }))
}

/// POST /api/v1/reactivation/scan
pub async fn handle_scan(State(state): State<AppState>) -> Result<Json<ScanReport>, AppError> {
    Ok(Json(state.scheduler.scan_once(Utc::now()).await?))
}

/// POST /api/v1/reactivation/dispatch
pub async fn handle_dispatch(
    State(state): State<AppState>,
) -> Result<Json<DispatchReport>, AppError> {
    Ok(Json(state.executor.dispatch_once(Utc::now()).await?))
}

async fn require_session(state: &AppState, session_id: Uuid) -> Result<(), AppError> {
    state
        .store
        .find_session(session_id)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound(format!("Session {session_id} not found")))
}
