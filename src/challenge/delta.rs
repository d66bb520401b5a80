use chrono::{DateTime, Duration, NaiveDate, Utc};

use super::history::{RepetitionEvent, RepetitionHistory};

/// Result of applying a signed repetition delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaOutcome {
    /// The signed amount actually applied after clamping. A `-10` against a
    /// day holding 3 events yields `applied = -3`.
    pub applied: i32,
    pub today_repetitions: u32,
    pub total_repetitions: u32,
}

/// Apply a signed repetition delta to the history, in place.
///
/// Positive deltas append events dated `today`; negative deltas remove the
/// most recently appended today-events (LIFO), clamped to what exists —
/// prior days are never touched. Counters in the outcome are recomputed
/// from the mutated history.
///
/// Each event in a multi-event append gets a distinct timestamp
/// (microsecond offsets from `now`) so the cross-device merge, which
/// dedupes on `(date, timestamp)`, keeps them apart.
pub fn apply_delta(
    history: &mut RepetitionHistory,
    delta: i32,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> DeltaOutcome {
    let applied = if delta > 0 {
        for i in 0..delta {
            history.push(RepetitionEvent {
                date: today,
                timestamp: now + Duration::microseconds(i as i64),
            });
        }
        delta
    } else {
        let mut removed: u32 = 0;
        while removed < delta.unsigned_abs() && history.pop_latest_on(today) {
            removed += 1;
        }
        -(removed as i32)
    };

    DeltaOutcome {
        applied,
        today_repetitions: history.count_on(today),
        total_repetitions: history.len() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 18, 30, 0).unwrap()
    }

    #[test]
    fn positive_delta_appends_today_events() {
        let mut history = RepetitionHistory::new();
        let outcome = apply_delta(&mut history, 3, today(), now());
        assert_eq!(outcome.applied, 3);
        assert_eq!(outcome.today_repetitions, 3);
        assert_eq!(outcome.total_repetitions, 3);
        assert!(history.events().iter().all(|e| e.date == today()));
    }

    #[test]
    fn batch_events_get_distinct_timestamps() {
        let mut history = RepetitionHistory::new();
        apply_delta(&mut history, 5, today(), now());
        let merged = history.merge(&history.clone());
        assert_eq!(merged.len(), 5, "merge must not collapse a batch");
    }

    #[test]
    fn negative_delta_clamps_to_available() {
        let mut history = RepetitionHistory::new();
        apply_delta(&mut history, 3, today(), now());

        let outcome = apply_delta(&mut history, -10, today(), now());
        assert_eq!(outcome.applied, -3);
        assert_eq!(outcome.today_repetitions, 0);
    }

    #[test]
    fn negative_delta_on_empty_day_is_a_noop() {
        let yesterday = today().pred_opt().unwrap();
        let mut history = RepetitionHistory::new();
        apply_delta(&mut history, 4, yesterday, now() - Duration::days(1));

        let outcome = apply_delta(&mut history, -2, today(), now());
        assert_eq!(outcome.applied, 0);
        assert_eq!(outcome.total_repetitions, 4, "prior days are never touched");
    }

    #[test]
    fn deltas_compose_as_a_running_clamp() {
        // +1, +1, -1 leaves the same count as a single +1, and a long mixed
        // sequence never drives the count negative.
        let mut history = RepetitionHistory::new();
        for (i, delta) in [1, 1, -1].into_iter().enumerate() {
            apply_delta(
                &mut history,
                delta,
                today(),
                now() + Duration::seconds(i as i64),
            );
        }
        assert_eq!(history.count_on(today()), 1);

        let mut history = RepetitionHistory::new();
        let deltas = [-2, 3, -5, 4, -1, -10, 2];
        let mut expected: i32 = 0;
        for (i, delta) in deltas.into_iter().enumerate() {
            apply_delta(
                &mut history,
                delta,
                today(),
                now() + Duration::seconds(10 + i as i64),
            );
            expected = (expected + delta).max(0);
        }
        assert_eq!(history.count_on(today()), expected as u32);
    }
}
