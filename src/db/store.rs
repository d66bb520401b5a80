use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::challenge::store::{ActivitySink, UserChallengeRecord, UserStateUpdate, UserStore};

/// Postgres-backed user store for the challenge engine. The repetition
/// history and completed-day set live as opaque JSONB blobs on the user
/// row; a save is a single UPDATE, which is the atomicity unit.
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[derive(sqlx::FromRow)]
struct ChallengeRow {
    id: Uuid,
    username: String,
    repetition_history: serde_json::Value,
    completed_days: serde_json::Value,
    current_day: i32,
    last_date: Option<NaiveDate>,
    challenge_start_date: Option<NaiveDate>,
    congratulations_seen_date: Option<NaiveDate>,
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn get_user(&self, user_id: Uuid) -> anyhow::Result<UserChallengeRecord> {
        let row = sqlx::query_as::<_, ChallengeRow>(
            r#"
            SELECT id, username, repetition_history, completed_days, current_day,
                   last_date, challenge_start_date, congratulations_seen_date
            FROM users WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| anyhow::anyhow!("user {user_id} not found"))?;

        // A corrupt completed_days blob degrades to an empty set, same as
        // the history blob does inside the engine.
        let completed_days =
            serde_json::from_value::<Vec<NaiveDate>>(row.completed_days).unwrap_or_default();

        Ok(UserChallengeRecord {
            user_id: row.id,
            username: row.username,
            repetition_history: row.repetition_history,
            completed_days,
            current_day: row.current_day,
            last_date: row.last_date,
            challenge_start_date: row.challenge_start_date,
            congratulations_seen_date: row.congratulations_seen_date,
        })
    }

    async fn update_user(&self, user_id: Uuid, update: UserStateUpdate) -> anyhow::Result<()> {
        let completed_days = match &update.completed_days {
            Some(days) => Some(serde_json::to_value(days)?),
            None => None,
        };

        sqlx::query(
            r#"
            UPDATE users SET
                repetition_history = COALESCE($2, repetition_history),
                today_repetitions = COALESCE($3, today_repetitions),
                total_repetitions = COALESCE($4, total_repetitions),
                current_day = COALESCE($5, current_day),
                completed_days = COALESCE($6, completed_days),
                last_date = CASE WHEN $7 THEN $8 ELSE last_date END,
                challenge_start_date = CASE WHEN $9 THEN $10 ELSE challenge_start_date END,
                congratulations_seen_date = CASE WHEN $11 THEN $12 ELSE congratulations_seen_date END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(&update.repetition_history)
        .bind(update.today_repetitions)
        .bind(update.total_repetitions)
        .bind(update.current_day)
        .bind(completed_days)
        .bind(update.last_date.is_some())
        .bind(update.last_date.flatten())
        .bind(update.challenge_start_date.is_some())
        .bind(update.challenge_start_date.flatten())
        .bind(update.congratulations_seen_date.is_some())
        .bind(update.congratulations_seen_date.flatten())
        .execute(&self.db)
        .await?;

        Ok(())
    }
}

/// Activity feed writer. Callers treat failures as non-fatal.
pub struct PgActivitySink {
    db: PgPool,
}

impl PgActivitySink {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ActivitySink for PgActivitySink {
    async fn create_activity(
        &self,
        username: &str,
        activity_type: &str,
        description: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO activities (id, username, activity_type, description)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(username)
        .bind(activity_type)
        .bind(description)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
