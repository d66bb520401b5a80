use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

/// Subset of the user record the engine consumes.
#[derive(Debug, Clone)]
pub struct UserChallengeRecord {
    pub user_id: Uuid,
    pub username: String,
    /// Opaque stored history blob; the engine parses it leniently.
    pub repetition_history: serde_json::Value,
    pub completed_days: Vec<NaiveDate>,
    pub current_day: i32,
    pub last_date: Option<NaiveDate>,
    pub challenge_start_date: Option<NaiveDate>,
    pub congratulations_seen_date: Option<NaiveDate>,
}

/// Fields the engine writes back. `None` leaves a column untouched; the
/// nullable dates use a second `Option` level so they can be set to null.
#[derive(Debug, Clone, Default)]
pub struct UserStateUpdate {
    pub repetition_history: Option<serde_json::Value>,
    pub today_repetitions: Option<i32>,
    pub total_repetitions: Option<i32>,
    pub current_day: Option<i32>,
    pub completed_days: Option<Vec<NaiveDate>>,
    pub last_date: Option<Option<NaiveDate>>,
    pub challenge_start_date: Option<Option<NaiveDate>>,
    pub congratulations_seen_date: Option<Option<NaiveDate>>,
}

/// Persistence the engine runs against. Backed by Postgres in the service
/// and by an in-memory fake in tests.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, user_id: Uuid) -> anyhow::Result<UserChallengeRecord>;
    async fn update_user(&self, user_id: Uuid, update: UserStateUpdate) -> anyhow::Result<()>;
}

/// Fire-and-forget activity feed. Callers log and swallow failures: a
/// failed activity insert never fails the repetition update it decorates.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn create_activity(
        &self,
        username: &str,
        activity_type: &str,
        description: &str,
    ) -> anyhow::Result<()>;
}
