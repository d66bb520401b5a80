//! The repetition-tracking engine: an append-only event history per user,
//! optimistic delta application, serialized best-effort persistence, and
//! calendar reconciliation on session load.
//!
//! Collaborators are injected: a [`store::UserStore`] for the user record,
//! an [`store::ActivitySink`] for the fire-and-forget feed, and a
//! [`cache::Cache`] holding local recovery state (pending unsynced deltas
//! and the last-known history). All operations take `today`/`now`
//! explicitly so tests never depend on the wall clock.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub mod backfill;
pub mod cache;
pub mod delta;
pub mod guard;
pub mod history;
pub mod rollover;
pub mod store;
pub mod sync;

use cache::Cache;
use guard::MonotonicGuard;
use history::RepetitionHistory;
use rollover::ChallengeState;
use store::{ActivitySink, UserChallengeRecord, UserStateUpdate, UserStore};
use sync::SyncQueue;

/// Repetitions needed to complete a day.
pub const DAILY_TARGET: u32 = 100;
/// Length of the challenge cycle in days.
pub const CYCLE_DAYS: i64 = 30;

/// Counters returned to the client immediately after a delta, before the
/// save has been confirmed.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RepetitionCounters {
    pub today_repetitions: u32,
    pub total_repetitions: u32,
    /// Signed amount actually applied after clamping.
    pub applied: i32,
}

/// Reconciled challenge state for a session load.
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeSnapshot {
    pub challenge_start_date: Option<NaiveDate>,
    pub current_day: i32,
    pub today_repetitions: u32,
    pub total_repetitions: u32,
    pub completed_days: Vec<NaiveDate>,
    pub daily_target: u32,
    pub cycle_days: u32,
    pub show_congratulations: bool,
}

pub struct ChallengeEngine {
    store: Arc<dyn UserStore>,
    activities: Arc<dyn ActivitySink>,
    cache: Arc<dyn Cache>,
    sync: SyncQueue,
    guard: MonotonicGuard,
    /// In-memory working histories, one per active user session. Every
    /// delta reads and mutates this latest state, never a stale snapshot.
    sessions: Mutex<HashMap<Uuid, RepetitionHistory>>,
    events_tx: Option<broadcast::Sender<String>>,
}

impl ChallengeEngine {
    pub fn new(
        store: Arc<dyn UserStore>,
        activities: Arc<dyn ActivitySink>,
        cache: Arc<dyn Cache>,
        events_tx: Option<broadcast::Sender<String>>,
        counter_grace: Duration,
    ) -> Self {
        Self {
            store,
            activities,
            cache,
            sync: SyncQueue::new(),
            guard: MonotonicGuard::new(counter_grace),
            sessions: Mutex::new(HashMap::new()),
            events_tx,
        }
    }

    /// Apply a signed repetition delta for the user. Synchronous from the
    /// caller's point of view: the returned counters reflect the mutated
    /// in-memory history, and recovery state (full history plus the
    /// pending-delta marker) is written to the cache before returning.
    /// Persistence happens separately via [`Self::request_sync`].
    pub async fn apply_repetitions(
        &self,
        user_id: Uuid,
        delta: i32,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> AppResult<RepetitionCounters> {
        if delta == 0 {
            return Err(AppError::Validation("delta must be a non-zero integer".into()));
        }

        let mut sessions = self.sessions.lock().await;
        if !sessions.contains_key(&user_id) {
            let record = self.store.get_user(user_id).await.map_err(AppError::Internal)?;
            let history = self.hydrate_history(&record, today, now);
            sessions.insert(user_id, history);
        }
        let history = match sessions.get_mut(&user_id) {
            Some(history) => history,
            None => return Err(AppError::NotFound("User not found".into())),
        };

        let outcome = delta::apply_delta(history, delta, today, now);
        cache::write_cached_history(self.cache.as_ref(), user_id, history);
        cache::bump_pending_delta(self.cache.as_ref(), user_id, today, outcome.applied);
        drop(sessions);

        self.guard.note_local(user_id, outcome.today_repetitions);

        Ok(RepetitionCounters {
            today_repetitions: outcome.today_repetitions,
            total_repetitions: outcome.total_repetitions,
            applied: outcome.applied,
        })
    }

    /// Ask for the user's history to be persisted. Returns a handle to the
    /// spawned worker when this call started one; `None` means a worker is
    /// already in flight and will re-read the current history on its next
    /// pass.
    pub async fn request_sync(
        self: Arc<Self>,
        user_id: Uuid,
        today: NaiveDate,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if !self.sync.begin(user_id).await {
            return None;
        }
        let engine = Arc::clone(&self);
        Some(tokio::spawn(async move {
            loop {
                match engine.sync_once(user_id, today).await {
                    Ok(()) => {
                        if !engine.sync.finish(user_id).await {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            user_id = %user_id,
                            error = %e,
                            "History sync failed; retrying on the next action"
                        );
                        engine.sync.clear(user_id).await;
                        break;
                    }
                }
            }
        }))
    }

    /// One persistence pass: push the current working history, merged with
    /// whatever the store holds, and settle day completion.
    async fn sync_once(&self, user_id: Uuid, today: NaiveDate) -> anyhow::Result<()> {
        let working = {
            let sessions = self.sessions.lock().await;
            match sessions.get(&user_id) {
                Some(history) => history.clone(),
                // Session gone (reset raced the worker); nothing to push.
                None => return Ok(()),
            }
        };

        let record = self.store.get_user(user_id).await?;
        let stored = RepetitionHistory::parse_lenient(&record.repetition_history);
        let merged = working.merge(&stored);

        let today_count = merged.count_on(today);
        let mut completed: BTreeSet<NaiveDate> = record.completed_days.iter().copied().collect();
        let newly_completed = today_count >= DAILY_TARGET && !completed.contains(&today);
        if newly_completed {
            completed.insert(today);
        }

        let update = UserStateUpdate {
            repetition_history: Some(merged.to_json()),
            today_repetitions: Some(today_count as i32),
            total_repetitions: Some(merged.len() as i32),
            completed_days: Some(completed.into_iter().collect()),
            last_date: Some(Some(today)),
            ..Default::default()
        };
        self.store.update_user(user_id, update).await?;

        cache::clear_pending_delta(self.cache.as_ref(), user_id, today);
        cache::write_cached_history(self.cache.as_ref(), user_id, &merged);
        {
            // Deltas may have landed while the save was in flight; fold the
            // confirmed events in rather than overwriting.
            let mut sessions = self.sessions.lock().await;
            if let Some(history) = sessions.get_mut(&user_id) {
                *history = history.merge(&merged);
            }
        }

        if newly_completed {
            self.emit_activity(
                &record.username,
                "day_completed",
                &format!("{} completed {} repetitions for the day", record.username, DAILY_TARGET),
            )
            .await;
        }
        Ok(())
    }

    /// Load and reconcile the user's challenge state for a session.
    pub async fn load_state(
        &self,
        user_id: Uuid,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> AppResult<ChallengeSnapshot> {
        let record = self.store.get_user(user_id).await.map_err(AppError::Internal)?;
        let stored = RepetitionHistory::parse_lenient(&record.repetition_history);

        let mut sessions = self.sessions.lock().await;
        let working = match sessions.get(&user_id) {
            Some(history) => history.merge(&stored),
            None => self.hydrate_history(&record, today, now),
        };

        let state = ChallengeState {
            history: working,
            completed_days: record.completed_days.iter().copied().collect(),
            current_day: record.current_day,
            last_date: record.last_date,
            challenge_start_date: record.challenge_start_date,
        };
        let outcome = rollover::reconcile(state, today);
        sessions.insert(user_id, outcome.state.history.clone());
        drop(sessions);

        if outcome.changed {
            let update = UserStateUpdate {
                repetition_history: Some(outcome.state.history.to_json()),
                today_repetitions: Some(outcome.state.history.count_on(today) as i32),
                total_repetitions: Some(outcome.state.history.len() as i32),
                current_day: Some(outcome.state.current_day),
                completed_days: Some(outcome.state.completed_days.iter().copied().collect()),
                last_date: Some(outcome.state.last_date),
                ..Default::default()
            };
            self.store
                .update_user(user_id, update)
                .await
                .map_err(AppError::Internal)?;
            cache::clear_pending_delta(self.cache.as_ref(), user_id, today);
            cache::write_cached_history(self.cache.as_ref(), user_id, &outcome.state.history);
        }

        Ok(self.snapshot(user_id, &record, &outcome.state, today))
    }

    /// Start (or restart) the challenge, backfilling elapsed days.
    pub async fn start_challenge(
        &self,
        user_id: Uuid,
        start_date: NaiveDate,
        today: NaiveDate,
    ) -> AppResult<ChallengeSnapshot> {
        let plan = backfill::start_challenge(start_date, today)?;
        let record = self.store.get_user(user_id).await.map_err(AppError::Internal)?;

        let update = UserStateUpdate {
            repetition_history: Some(plan.history.to_json()),
            today_repetitions: Some(0),
            total_repetitions: Some(plan.history.len() as i32),
            current_day: Some(plan.current_day),
            completed_days: Some(plan.completed_days.iter().copied().collect()),
            last_date: Some(Some(today)),
            challenge_start_date: Some(Some(start_date)),
            congratulations_seen_date: Some(None),
        };
        self.store
            .update_user(user_id, update)
            .await
            .map_err(AppError::Internal)?;

        // Local recovery state described the old history; replace it.
        cache::clear_pending_delta(self.cache.as_ref(), user_id, today);
        cache::write_cached_history(self.cache.as_ref(), user_id, &plan.history);
        self.sessions.lock().await.insert(user_id, plan.history.clone());
        self.guard.forget(user_id);

        self.emit_activity(
            &record.username,
            "challenge_started",
            &format!("{} started the affirmation challenge", record.username),
        )
        .await;

        let state = ChallengeState {
            history: plan.history,
            completed_days: plan.completed_days,
            current_day: plan.current_day,
            last_date: Some(today),
            challenge_start_date: Some(start_date),
        };
        Ok(self.snapshot(user_id, &record, &state, today))
    }

    /// Wipe the challenge back to the no-start-date state.
    pub async fn reset(&self, user_id: Uuid, today: NaiveDate) -> AppResult<()> {
        let record = self.store.get_user(user_id).await.map_err(AppError::Internal)?;

        let update = UserStateUpdate {
            repetition_history: Some(serde_json::json!([])),
            today_repetitions: Some(0),
            total_repetitions: Some(0),
            current_day: Some(0),
            completed_days: Some(Vec::new()),
            last_date: Some(None),
            challenge_start_date: Some(None),
            congratulations_seen_date: Some(None),
        };
        self.store
            .update_user(user_id, update)
            .await
            .map_err(AppError::Internal)?;

        self.sessions.lock().await.remove(&user_id);
        cache::clear_cached_history(self.cache.as_ref(), user_id);
        cache::clear_pending_delta(self.cache.as_ref(), user_id, today);
        self.guard.forget(user_id);

        self.emit_activity(
            &record.username,
            "challenge_reset",
            &format!("{} reset their challenge", record.username),
        )
        .await;
        Ok(())
    }

    /// Record that the client showed today's 100-reached celebration.
    pub async fn mark_congratulations_seen(
        &self,
        user_id: Uuid,
        today: NaiveDate,
    ) -> AppResult<()> {
        let update = UserStateUpdate {
            congratulations_seen_date: Some(Some(today)),
            ..Default::default()
        };
        self.store
            .update_user(user_id, update)
            .await
            .map_err(AppError::Internal)
    }

    /// Reconstruct the working history for a user with no live session.
    /// A cached history blob already carries any unconfirmed work, so the
    /// union merge with the stored history is enough; without one, the
    /// pending-delta marker is replayed against the stored history.
    fn hydrate_history(
        &self,
        record: &UserChallengeRecord,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> RepetitionHistory {
        let stored = RepetitionHistory::parse_lenient(&record.repetition_history);
        match cache::read_cached_history(self.cache.as_ref(), record.user_id) {
            Some(cached) => stored.merge(&cached),
            None => {
                let mut history = stored;
                let pending = cache::read_pending_delta(self.cache.as_ref(), record.user_id, today);
                if pending != 0 {
                    delta::apply_delta(&mut history, pending, today, now);
                }
                history
            }
        }
    }

    fn snapshot(
        &self,
        user_id: Uuid,
        record: &UserChallengeRecord,
        state: &ChallengeState,
        today: NaiveDate,
    ) -> ChallengeSnapshot {
        let today_repetitions = self.guard.filter(user_id, state.history.count_on(today));
        ChallengeSnapshot {
            challenge_start_date: state.challenge_start_date,
            current_day: state.current_day,
            today_repetitions,
            total_repetitions: state.history.len() as u32,
            completed_days: state.display_completed_days().into_iter().collect(),
            daily_target: DAILY_TARGET,
            cycle_days: CYCLE_DAYS as u32,
            show_congratulations: today_repetitions >= DAILY_TARGET
                && record.congratulations_seen_date != Some(today),
        }
    }

    async fn emit_activity(&self, username: &str, activity_type: &str, description: &str) {
        if let Err(e) = self
            .activities
            .create_activity(username, activity_type, description)
            .await
        {
            tracing::warn!(error = %e, activity_type, "Failed to record activity");
        }
        if let Some(tx) = &self.events_tx {
            let msg = serde_json::json!({
                "type": "activity",
                "username": username,
                "activity_type": activity_type,
                "description": description,
            });
            let _ = tx.send(msg.to_string());
        }
    }

    #[cfg(test)]
    async fn evict_session(&self, user_id: Uuid) {
        self.sessions.lock().await.remove(&user_id);
    }
}
