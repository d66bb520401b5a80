use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One recorded instance of speaking the affirmation, bucketed by the
/// user's local wall-clock day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepetitionEvent {
    pub date: NaiveDate,
    pub timestamp: DateTime<Utc>,
}

/// Ordered log of repetition events, the single source of truth for all
/// counters. Events are appended; decrements remove from the end of the
/// same-day run only. `today_repetitions` and `total_repetitions` are
/// always recomputed from this log after a mutation, never carried
/// independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepetitionHistory {
    events: Vec<RepetitionEvent>,
}

impl RepetitionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: Vec<RepetitionEvent>) -> Self {
        Self { events }
    }

    /// Parse a stored history blob. Malformed JSON is treated as an empty
    /// history rather than an error: losing an unparseable log is preferred
    /// to blocking the user.
    pub fn parse_lenient(raw: &serde_json::Value) -> Self {
        match serde_json::from_value::<Vec<RepetitionEvent>>(raw.clone()) {
            Ok(events) => Self { events },
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable repetition history, starting empty");
                Self::default()
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.events).unwrap_or_else(|_| serde_json::json!([]))
    }

    pub fn events(&self) -> &[RepetitionEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of repetitions recorded on the given day.
    pub fn count_on(&self, date: NaiveDate) -> u32 {
        self.events.iter().filter(|e| e.date == date).count() as u32
    }

    /// Days that reached at least `target` repetitions.
    pub fn days_at_target(&self, target: u32) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.events.iter().map(|e| e.date).collect();
        dates.sort();
        dates.dedup();
        dates
            .into_iter()
            .filter(|d| self.count_on(*d) >= target)
            .collect()
    }

    pub fn push(&mut self, event: RepetitionEvent) {
        self.events.push(event);
    }

    /// Remove the most recently appended event dated `date`. Returns false
    /// when no such event exists. Events on other days are never touched.
    pub fn pop_latest_on(&mut self, date: NaiveDate) -> bool {
        match self.events.iter().rposition(|e| e.date == date) {
            Some(idx) => {
                self.events.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Conflict resolution for histories that diverged across devices:
    /// union of events deduplicated by `(date, timestamp)`. Keeps `self`'s
    /// insertion order and appends unseen events in timestamp order.
    pub fn merge(&self, other: &Self) -> Self {
        let mut seen: HashSet<(NaiveDate, DateTime<Utc>)> =
            self.events.iter().map(|e| (e.date, e.timestamp)).collect();
        let mut extra: Vec<RepetitionEvent> = Vec::new();
        for event in &other.events {
            if seen.insert((event.date, event.timestamp)) {
                extra.push(*event);
            }
        }
        extra.sort_by_key(|e| e.timestamp);

        let mut merged = self.clone();
        merged.events.extend(extra);
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn event(d: u32, secs: u32) -> RepetitionEvent {
        RepetitionEvent {
            date: day(d),
            timestamp: Utc.with_ymd_and_hms(2026, 3, d, 9, 0, secs).unwrap(),
        }
    }

    #[test]
    fn count_is_derived_from_events() {
        let history =
            RepetitionHistory::from_events(vec![event(1, 0), event(1, 1), event(2, 0)]);
        assert_eq!(history.count_on(day(1)), 2);
        assert_eq!(history.count_on(day(2)), 1);
        assert_eq!(history.count_on(day(3)), 0);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn pop_removes_lifo_and_only_touches_the_given_day() {
        let mut history =
            RepetitionHistory::from_events(vec![event(1, 0), event(2, 0), event(1, 1)]);

        assert!(history.pop_latest_on(day(1)));
        assert_eq!(
            history.events(),
            &[event(1, 0), event(2, 0)],
            "most recent day-1 event removed, day-2 untouched"
        );

        assert!(history.pop_latest_on(day(1)));
        assert!(!history.pop_latest_on(day(1)));
        assert_eq!(history.count_on(day(2)), 1);
    }

    #[test]
    fn merge_unions_and_dedupes_by_date_and_timestamp() {
        let a = RepetitionHistory::from_events(vec![event(1, 0), event(1, 1)]);
        let b = RepetitionHistory::from_events(vec![event(1, 1), event(1, 2), event(2, 0)]);

        let merged = a.merge(&b);
        assert_eq!(merged.len(), 4);
        assert_eq!(merged.count_on(day(1)), 3);
        assert_eq!(merged.count_on(day(2)), 1);

        // Same event set regardless of merge direction.
        let reversed = b.merge(&a);
        assert_eq!(reversed.len(), 4);
        assert_eq!(reversed.count_on(day(1)), 3);
    }

    #[test]
    fn merge_never_loses_events() {
        let a = RepetitionHistory::from_events(vec![event(1, 0)]);
        let b = RepetitionHistory::new();
        assert_eq!(a.merge(&b), a);
        assert_eq!(b.merge(&a).len(), 1);
    }

    #[test]
    fn malformed_history_parses_as_empty() {
        assert!(RepetitionHistory::parse_lenient(&serde_json::json!("garbage")).is_empty());
        assert!(RepetitionHistory::parse_lenient(&serde_json::json!({"a": 1})).is_empty());
        assert!(
            RepetitionHistory::parse_lenient(&serde_json::json!([{"date": "not-a-date"}]))
                .is_empty()
        );
        assert!(RepetitionHistory::parse_lenient(&serde_json::Value::Null).is_empty());
    }

    #[test]
    fn well_formed_history_round_trips() {
        let history = RepetitionHistory::from_events(vec![event(1, 0), event(2, 5)]);
        let parsed = RepetitionHistory::parse_lenient(&history.to_json());
        assert_eq!(parsed, history);
    }
}
