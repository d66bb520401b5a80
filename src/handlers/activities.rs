use axum::{extract::State, Json};

use crate::error::AppResult;
use crate::models::activity::Activity;
use crate::AppState;

pub async fn list_activities(State(state): State<AppState>) -> AppResult<Json<Vec<Activity>>> {
    let activities = sqlx::query_as::<_, Activity>(
        r#"
        SELECT id, username, activity_type, description, created_at
        FROM activities
        ORDER BY created_at DESC
        LIMIT 50
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(activities))
}
