use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::auth::middleware::AuthUser;
use crate::error::{AppError, AppResult};
use crate::models::group::{ChatMessage, Group, GroupMember, GroupWithCount};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, max = 60, message = "Group name must be 1-60 characters"))]
    pub name: String,

    #[validate(length(max = 500, message = "Description must be under 500 characters"))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PostMessageRequest {
    #[validate(length(min = 1, max = 500, message = "Message must be 1-500 characters"))]
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    /// Return only messages created after this instant (polling cursor).
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

pub async fn list_groups(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<Vec<GroupWithCount>>> {
    let groups = sqlx::query_as::<_, GroupWithCount>(
        r#"
        SELECT g.id, g.name, g.description, g.created_by, g.created_at,
               COUNT(m.user_id) AS member_count,
               COALESCE(BOOL_OR(m.user_id = $1), FALSE) AS is_member
        FROM groups g
        LEFT JOIN group_members m ON m.group_id = g.id
        GROUP BY g.id
        ORDER BY member_count DESC, g.created_at ASC
        "#,
    )
    .bind(auth_user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(groups))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<CreateGroupRequest>,
) -> AppResult<Json<Group>> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM groups WHERE name = $1")
        .bind(&body.name)
        .fetch_one(&state.db)
        .await?;
    if existing > 0 {
        return Err(AppError::Conflict("A group with that name already exists".into()));
    }

    let group = sqlx::query_as::<_, Group>(
        r#"
        INSERT INTO groups (id, name, description, created_by)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&body.name)
    .bind(&body.description)
    .bind(auth_user.id)
    .fetch_one(&state.db)
    .await?;

    // The creator joins their own group.
    sqlx::query(
        "INSERT INTO group_members (group_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(group.id)
    .bind(auth_user.id)
    .execute(&state.db)
    .await?;

    Ok(Json(group))
}

async fn group_exists(state: &AppState, group_id: Uuid) -> AppResult<()> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM groups WHERE id = $1")
        .bind(group_id)
        .fetch_one(&state.db)
        .await?;
    if count == 0 {
        return Err(AppError::NotFound("Group not found".into()));
    }
    Ok(())
}

async fn require_membership(state: &AppState, group_id: Uuid, user_id: Uuid) -> AppResult<()> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM group_members WHERE group_id = $1 AND user_id = $2",
    )
    .bind(group_id)
    .bind(user_id)
    .fetch_one(&state.db)
    .await?;
    if count == 0 {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

pub async fn join_group(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(group_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    group_exists(&state, group_id).await?;

    sqlx::query(
        "INSERT INTO group_members (group_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(group_id)
    .bind(auth_user.id)
    .execute(&state.db)
    .await?;

    Ok(Json(serde_json::json!({ "joined": true })))
}

pub async fn leave_group(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(group_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    sqlx::query("DELETE FROM group_members WHERE group_id = $1 AND user_id = $2")
        .bind(group_id)
        .bind(auth_user.id)
        .execute(&state.db)
        .await?;

    Ok(Json(serde_json::json!({ "left": true })))
}

pub async fn list_members(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(group_id): Path<Uuid>,
) -> AppResult<Json<Vec<GroupMember>>> {
    group_exists(&state, group_id).await?;
    require_membership(&state, group_id, auth_user.id).await?;

    let members = sqlx::query_as::<_, GroupMember>(
        r#"
        SELECT u.id, u.username, u.display_name, u.avatar,
               u.current_day, u.today_repetitions, u.total_repetitions,
               m.joined_at
        FROM group_members m
        JOIN users u ON u.id = m.user_id
        WHERE m.group_id = $1
        ORDER BY u.total_repetitions DESC
        "#,
    )
    .bind(group_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(members))
}

/// Polling chat: clients pass the newest `created_at` they have seen and
/// receive everything after it.
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(group_id): Path<Uuid>,
    Query(query): Query<MessagesQuery>,
) -> AppResult<Json<Vec<ChatMessage>>> {
    require_membership(&state, group_id, auth_user.id).await?;

    let limit = query.limit.unwrap_or(50).clamp(1, 200);

    let messages = if let Some(since) = query.since {
        sqlx::query_as::<_, ChatMessage>(
            r#"
            SELECT msg.id, msg.group_id, msg.user_id, u.username, msg.body, msg.created_at
            FROM messages msg
            JOIN users u ON u.id = msg.user_id
            WHERE msg.group_id = $1 AND msg.created_at > $2
            ORDER BY msg.created_at ASC
            LIMIT $3
            "#,
        )
        .bind(group_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&state.db)
        .await?
    } else {
        // Initial load: the latest window, oldest first.
        let mut messages = sqlx::query_as::<_, ChatMessage>(
            r#"
            SELECT msg.id, msg.group_id, msg.user_id, u.username, msg.body, msg.created_at
            FROM messages msg
            JOIN users u ON u.id = msg.user_id
            WHERE msg.group_id = $1
            ORDER BY msg.created_at DESC
            LIMIT $2
            "#,
        )
        .bind(group_id)
        .bind(limit)
        .fetch_all(&state.db)
        .await?;
        messages.reverse();
        messages
    };

    Ok(Json(messages))
}

pub async fn post_message(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(group_id): Path<Uuid>,
    Json(body): Json<PostMessageRequest>,
) -> AppResult<Json<ChatMessage>> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    require_membership(&state, group_id, auth_user.id).await?;

    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO messages (id, group_id, user_id, body) VALUES ($1, $2, $3, $4)")
        .bind(id)
        .bind(group_id)
        .bind(auth_user.id)
        .bind(&body.body)
        .execute(&state.db)
        .await?;

    let message = sqlx::query_as::<_, ChatMessage>(
        r#"
        SELECT msg.id, msg.group_id, msg.user_id, u.username, msg.body, msg.created_at
        FROM messages msg
        JOIN users u ON u.id = msg.user_id
        WHERE msg.id = $1
        "#,
    )
    .bind(id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(message))
}
