use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Entry in the public activity feed (day completions, challenge starts,
/// milestones).
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Activity {
    pub id: Uuid,
    pub username: String,
    pub activity_type: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}
