use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Suppresses counter regressions from stale reads for a short window
/// after a local increment.
///
/// A session load racing an unconfirmed save can derive today's count from
/// a server history that predates the save; within the grace window the
/// higher locally observed count wins, so the visible counter never moves
/// backwards under the user's finger.
pub struct MonotonicGuard {
    window: Duration,
    entries: Mutex<HashMap<Uuid, GuardEntry>>,
}

struct GuardEntry {
    count: u32,
    at: Instant,
}

impl MonotonicGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record the count just shown to the user after a local apply.
    pub fn note_local(&self, user_id: Uuid, count: u32) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                user_id,
                GuardEntry {
                    count,
                    at: Instant::now(),
                },
            );
        }
    }

    /// Filter a server-derived count: within the window the guarded count
    /// floors the result; outside it the server value stands.
    pub fn filter(&self, user_id: Uuid, derived_count: u32) -> u32 {
        let Ok(mut entries) = self.entries.lock() else {
            return derived_count;
        };
        if let Some(entry) = entries.get(&user_id) {
            if entry.at.elapsed() < self.window {
                return derived_count.max(entry.count);
            }
        }
        entries.remove(&user_id);
        derived_count
    }

    pub fn forget(&self, user_id: Uuid) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> Uuid {
        Uuid::from_u128(9)
    }

    #[test]
    fn regression_is_suppressed_inside_the_window() {
        let guard = MonotonicGuard::new(Duration::from_secs(15));
        guard.note_local(user(), 7);
        assert_eq!(guard.filter(user(), 3), 7);
    }

    #[test]
    fn higher_server_count_passes_through() {
        let guard = MonotonicGuard::new(Duration::from_secs(15));
        guard.note_local(user(), 7);
        assert_eq!(guard.filter(user(), 12), 12);
    }

    #[test]
    fn stale_entries_expire() {
        let guard = MonotonicGuard::new(Duration::ZERO);
        guard.note_local(user(), 7);
        assert_eq!(guard.filter(user(), 3), 3);
    }

    #[test]
    fn unknown_users_pass_through() {
        let guard = MonotonicGuard::new(Duration::from_secs(15));
        assert_eq!(guard.filter(user(), 5), 5);
    }

    #[test]
    fn forget_drops_the_floor() {
        let guard = MonotonicGuard::new(Duration::from_secs(15));
        guard.note_local(user(), 7);
        guard.forget(user());
        assert_eq!(guard.filter(user(), 3), 3);
    }
}
