use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDate;
use uuid::Uuid;

use super::history::RepetitionHistory;

/// Injected key-value durable cache, the capability standing in for the
/// per-user local storage the engine records recovery state in. Two kinds
/// of entries live here: the pending unsynced delta (keyed per user + day,
/// a signed integer string) and the last-known full history (keyed per
/// user). Absent entries always mean "nothing pending", never an error.
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: String);
    fn remove(&self, key: &str);
}

fn history_key(user_id: Uuid) -> String {
    format!("history:{user_id}")
}

fn pending_key(user_id: Uuid, day: NaiveDate) -> String {
    format!("pending:{user_id}:{day}")
}

/// Net signed repetition change for `day` not yet confirmed persisted.
pub fn read_pending_delta(cache: &dyn Cache, user_id: Uuid, day: NaiveDate) -> i32 {
    cache
        .get(&pending_key(user_id, day))
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Add `by` to the pending marker, removing it when the net change hits
/// zero. Returns the new net value.
pub fn bump_pending_delta(cache: &dyn Cache, user_id: Uuid, day: NaiveDate, by: i32) -> i32 {
    let net = read_pending_delta(cache, user_id, day) + by;
    let key = pending_key(user_id, day);
    if net == 0 {
        cache.remove(&key);
    } else {
        cache.put(&key, net.to_string());
    }
    net
}

pub fn clear_pending_delta(cache: &dyn Cache, user_id: Uuid, day: NaiveDate) {
    cache.remove(&pending_key(user_id, day));
}

pub fn read_cached_history(cache: &dyn Cache, user_id: Uuid) -> Option<RepetitionHistory> {
    let raw = cache.get(&history_key(user_id))?;
    let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
    Some(RepetitionHistory::parse_lenient(&value))
}

pub fn write_cached_history(cache: &dyn Cache, user_id: Uuid, history: &RepetitionHistory) {
    cache.put(&history_key(user_id), history.to_json().to_string());
}

pub fn clear_cached_history(cache: &dyn Cache, user_id: Uuid) {
    cache.remove(&history_key(user_id));
}

/// Process-local cache. Durability matches the deployment model: a single
/// instance keeps recovery state for the life of the process.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .map(|entries| entries.get(key).cloned())
            .unwrap_or(None)
    }

    fn put(&self, key: &str, value: String) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value);
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> Uuid {
        Uuid::from_u128(7)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
    }

    #[test]
    fn absent_marker_reads_as_zero() {
        let cache = MemoryCache::new();
        assert_eq!(read_pending_delta(&cache, user(), day()), 0);
    }

    #[test]
    fn marker_accumulates_and_clears_at_zero() {
        let cache = MemoryCache::new();
        assert_eq!(bump_pending_delta(&cache, user(), day(), 5), 5);
        assert_eq!(bump_pending_delta(&cache, user(), day(), -2), 3);
        assert_eq!(read_pending_delta(&cache, user(), day()), 3);

        assert_eq!(bump_pending_delta(&cache, user(), day(), -3), 0);
        assert!(cache.get(&pending_key(user(), day())).is_none());
    }

    #[test]
    fn markers_are_scoped_per_day() {
        let cache = MemoryCache::new();
        let other_day = day().succ_opt().unwrap();
        bump_pending_delta(&cache, user(), day(), 4);
        assert_eq!(read_pending_delta(&cache, user(), other_day), 0);
    }

    #[test]
    fn corrupt_marker_reads_as_zero() {
        let cache = MemoryCache::new();
        cache.put(&pending_key(user(), day()), "not-a-number".into());
        assert_eq!(read_pending_delta(&cache, user(), day()), 0);
    }

    #[test]
    fn history_round_trips_and_clears() {
        let cache = MemoryCache::new();
        assert!(read_cached_history(&cache, user()).is_none());

        let history = RepetitionHistory::parse_lenient(&serde_json::json!([
            {"date": "2026-03-10", "timestamp": "2026-03-10T09:00:00Z"}
        ]));
        write_cached_history(&cache, user(), &history);
        assert_eq!(read_cached_history(&cache, user()), Some(history));

        clear_cached_history(&cache, user());
        assert!(read_cached_history(&cache, user()).is_none());
    }
}
