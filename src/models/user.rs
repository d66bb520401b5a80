use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub pin: String,
    pub display_name: String,
    /// Data-URL avatar string, stored opaquely.
    pub avatar: Option<String>,
    pub affirmation: Option<String>,
    pub repetition_history: serde_json::Value,
    pub today_repetitions: i32,
    pub total_repetitions: i32,
    pub current_day: i32,
    pub completed_days: serde_json::Value,
    pub last_date: Option<NaiveDate>,
    pub challenge_start_date: Option<NaiveDate>,
    pub congratulations_seen_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public profile shape returned by the API.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub avatar: Option<String>,
    pub affirmation: Option<String>,
    pub current_day: i32,
    pub today_repetitions: i32,
    pub total_repetitions: i32,
    pub challenge_start_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            display_name: u.display_name,
            avatar: u.avatar,
            affirmation: u.affirmation,
            current_day: u.current_day,
            today_repetitions: u.today_repetitions,
            total_repetitions: u.total_repetitions,
            challenge_start_date: u.challenge_start_date,
            created_at: u.created_at,
        }
    }
}

/// Leaderboard row, ranked by lifetime repetitions.
#[derive(Debug, Serialize, FromRow)]
pub struct LeaderboardEntry {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub avatar: Option<String>,
    pub current_day: i32,
    pub today_repetitions: i32,
    pub total_repetitions: i32,
}
