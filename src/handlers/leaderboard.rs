use axum::{extract::State, Json};

use crate::error::AppResult;
use crate::models::user::LeaderboardEntry;
use crate::AppState;

/// Top users by lifetime repetitions, challenge day as the tiebreaker.
pub async fn get_leaderboard(State(state): State<AppState>) -> AppResult<Json<Vec<LeaderboardEntry>>> {
    let entries = sqlx::query_as::<_, LeaderboardEntry>(
        r#"
        SELECT id, username, display_name, avatar,
               current_day, today_repetitions, total_repetitions
        FROM users
        WHERE total_repetitions > 0
        ORDER BY total_repetitions DESC, current_day DESC, username ASC
        LIMIT $1
        "#,
    )
    .bind(state.config.leaderboard_limit)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(entries))
}
