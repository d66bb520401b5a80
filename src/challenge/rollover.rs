use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};

use super::history::RepetitionHistory;
use super::{CYCLE_DAYS, DAILY_TARGET};

/// Working challenge state during a reconcile pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeState {
    pub history: RepetitionHistory,
    pub completed_days: BTreeSet<NaiveDate>,
    pub current_day: i32,
    pub last_date: Option<NaiveDate>,
    pub challenge_start_date: Option<NaiveDate>,
}

impl ChallengeState {
    /// Days shown as complete: the explicit set unioned with every day the
    /// history itself carries at least the daily target. Either side may be
    /// a superset of the other (manual overrides on one hand, not-yet
    /// flagged 100-event days on the other).
    pub fn display_completed_days(&self) -> BTreeSet<NaiveDate> {
        let mut days = self.completed_days.clone();
        days.extend(self.history.days_at_target(DAILY_TARGET));
        days
    }
}

#[derive(Debug)]
pub struct ReconcileOutcome {
    pub state: ChallengeState,
    /// Whether anything changed and must be persisted.
    pub changed: bool,
}

/// Reconcile state against the calendar on session load.
///
/// Two independent rules run:
///
/// 1. Day rollover: when the last observed active day is behind `today`
///    and nothing has been recorded for today yet (the guard against
///    double-processing when this client already acted today), the last
///    active day is judged against the daily target. Reaching it advances
///    `current_day` and marks the day complete; missing it leaves
///    `current_day` alone — a missed day never auto-resets the challenge.
///
/// 2. Optimistic catch-up: days the app was never opened for (strictly
///    between the last active day and today, within the 30-day cycle) are
///    credited as complete without inspecting event counts. Days the user
///    actually visited are only ever credited through rule 1.
///
/// Running the pass twice with no intervening delta is a no-op the second
/// time.
pub fn reconcile(mut state: ChallengeState, today: NaiveDate) -> ReconcileOutcome {
    let mut changed = false;

    if let Some(last) = state.last_date {
        if last != today && state.history.count_on(today) == 0 {
            if state.history.count_on(last) >= DAILY_TARGET {
                state.current_day += 1;
                state.completed_days.insert(last);
            }
            changed = true;
        }
    }

    if let Some(start) = state.challenge_start_date {
        let elapsed = (today - start).num_days().clamp(0, CYCLE_DAYS);
        if elapsed > i64::from(state.current_day) {
            let cycle_end = start + Duration::days(CYCLE_DAYS);
            let gap_start = match state.last_date {
                Some(last) => last.max(start - Duration::days(1)) + Duration::days(1),
                None => start,
            };
            let mut day = gap_start;
            while day < today && day < cycle_end {
                if state.completed_days.insert(day) {
                    state.current_day = (state.current_day + 1).min(CYCLE_DAYS as i32);
                    changed = true;
                }
                day += Duration::days(1);
            }
        }
    }

    if state.last_date != Some(today) {
        state.last_date = Some(today);
        changed = true;
    }

    ReconcileOutcome { state, changed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::delta::apply_delta;
    use chrono::{TimeZone, Utc};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn history_with(counts: &[(u32, u32)]) -> RepetitionHistory {
        let mut history = RepetitionHistory::new();
        for (d, count) in counts {
            let date = day(*d);
            let now = Utc.with_ymd_and_hms(2026, 3, *d, 8, 0, 0).unwrap();
            apply_delta(&mut history, *count as i32, date, now);
        }
        history
    }

    fn state(
        history: RepetitionHistory,
        current_day: i32,
        last_date: Option<NaiveDate>,
        start: Option<NaiveDate>,
    ) -> ChallengeState {
        ChallengeState {
            history,
            completed_days: BTreeSet::new(),
            current_day,
            last_date,
            challenge_start_date: start,
        }
    }

    #[test]
    fn same_day_load_changes_nothing() {
        let s = state(history_with(&[(10, 42)]), 3, Some(day(10)), Some(day(7)));
        let outcome = reconcile(s.clone(), day(10));
        assert!(!outcome.changed);
        assert_eq!(outcome.state, s);
    }

    #[test]
    fn completed_yesterday_advances_the_day() {
        let s = state(history_with(&[(9, 100)]), 2, Some(day(9)), Some(day(7)));
        let outcome = reconcile(s, day(10));
        assert!(outcome.changed);
        assert_eq!(outcome.state.current_day, 3);
        assert!(outcome.state.completed_days.contains(&day(9)));
        assert_eq!(outcome.state.last_date, Some(day(10)));
    }

    #[test]
    fn incomplete_yesterday_does_not_advance() {
        let s = state(history_with(&[(9, 42)]), 2, Some(day(9)), None);
        let outcome = reconcile(s, day(10));
        assert_eq!(outcome.state.current_day, 2);
        assert!(!outcome.state.completed_days.contains(&day(9)));
        assert_eq!(outcome.state.last_date, Some(day(10)));
    }

    #[test]
    fn todays_activity_suppresses_the_rollover() {
        // The client already recorded repetitions today before this pass
        // ran; judging yesterday again would double-process.
        let s = state(
            history_with(&[(9, 100), (10, 5)]),
            2,
            Some(day(9)),
            None,
        );
        let outcome = reconcile(s, day(10));
        assert_eq!(outcome.state.current_day, 2);
        assert!(!outcome.state.completed_days.contains(&day(9)));
    }

    #[test]
    fn unopened_days_are_credited_generously() {
        // Active on the 9th (complete), then away until the 14th. The 9th
        // is credited by the rollover rule, the 10th-13th by catch-up.
        let s = state(history_with(&[(9, 100)]), 2, Some(day(9)), Some(day(7)));
        let outcome = reconcile(s, day(14));
        assert_eq!(outcome.state.current_day, 7);
        for d in 9..=13 {
            assert!(outcome.state.completed_days.contains(&day(d)), "day {d}");
        }
        assert!(!outcome.state.completed_days.contains(&day(14)));
    }

    #[test]
    fn visited_days_still_need_the_target() {
        // Active on the 9th but short of the target, then away. Catch-up
        // credits only the unvisited gap; the 9th stays incomplete.
        let s = state(history_with(&[(9, 42)]), 2, Some(day(9)), Some(day(7)));
        let outcome = reconcile(s, day(14));
        assert!(!outcome.state.completed_days.contains(&day(9)));
        for d in 10..=13 {
            assert!(outcome.state.completed_days.contains(&day(d)), "day {d}");
        }
        assert_eq!(outcome.state.current_day, 6);
    }

    #[test]
    fn catch_up_stops_at_the_cycle_boundary() {
        let start = day(1);
        let s = state(RepetitionHistory::new(), 0, Some(day(1)), Some(start));
        // 45 days later: only the 30-day cycle window may be credited. The
        // visited-but-idle first day is judged by the rollover rule and
        // stays incomplete; the 29 unvisited cycle days are credited.
        let today = start + Duration::days(45);
        let outcome = reconcile(s, today);
        assert_eq!(outcome.state.current_day, 29);
        assert_eq!(outcome.state.completed_days.len(), 29); // days 2..=30 of the cycle
        assert!(!outcome.state.completed_days.contains(&today));
    }

    #[test]
    fn reconcile_is_idempotent() {
        let s = state(history_with(&[(9, 100)]), 2, Some(day(9)), Some(day(7)));
        let first = reconcile(s, day(10));
        let second = reconcile(first.state.clone(), day(10));
        assert!(!second.changed);
        assert_eq!(second.state, first.state);
    }

    #[test]
    fn display_completion_is_the_union_of_flag_and_threshold() {
        let mut s = state(history_with(&[(8, 100)]), 0, None, None);
        s.completed_days.insert(day(5)); // manual override, no events
        let display = s.display_completed_days();
        assert!(display.contains(&day(5)));
        assert!(display.contains(&day(8)));
        assert_eq!(display.len(), 2);
    }
}
