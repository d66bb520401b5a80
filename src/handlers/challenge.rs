use axum::{extract::State, Extension, Json};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use crate::auth::middleware::AuthUser;
use crate::challenge::{ChallengeSnapshot, RepetitionCounters};
use crate::error::AppResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RepetitionRequest {
    pub delta: i32,
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub start_date: NaiveDate,
}

/// Session load: reconcile the challenge state against the calendar and
/// return the snapshot the client renders from.
pub async fn get_state(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<ChallengeSnapshot>> {
    let now = Utc::now();
    let snapshot = state
        .engine
        .load_state(auth_user.id, now.date_naive(), now)
        .await?;
    Ok(Json(snapshot))
}

/// Record repetitions. The response carries optimistic counters from the
/// in-memory apply; persistence runs behind the per-user sync queue and
/// its failures are retried on the next action rather than surfaced here.
pub async fn add_repetitions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<RepetitionRequest>,
) -> AppResult<Json<RepetitionCounters>> {
    let now = Utc::now();
    let today = now.date_naive();
    let counters = state
        .engine
        .apply_repetitions(auth_user.id, body.delta, today, now)
        .await?;
    state.engine.clone().request_sync(auth_user.id, today).await;
    Ok(Json(counters))
}

pub async fn start_challenge(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<StartRequest>,
) -> AppResult<Json<ChallengeSnapshot>> {
    let today = Utc::now().date_naive();
    let snapshot = state
        .engine
        .start_challenge(auth_user.id, body.start_date, today)
        .await?;
    Ok(Json(snapshot))
}

pub async fn reset_challenge(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<serde_json::Value>> {
    let today = Utc::now().date_naive();
    state.engine.reset(auth_user.id, today).await?;
    Ok(Json(serde_json::json!({ "reset": true })))
}

pub async fn congratulations_seen(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<serde_json::Value>> {
    let today = Utc::now().date_naive();
    state
        .engine
        .mark_congratulations_seen(auth_user.id, today)
        .await?;
    Ok(Json(serde_json::json!({ "acknowledged": true })))
}
