use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate, NaiveTime};

use crate::error::AppError;

use super::history::{RepetitionEvent, RepetitionHistory};
use super::{CYCLE_DAYS, DAILY_TARGET};

/// State synthesized for a challenge started on `start_date`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackfillPlan {
    pub history: RepetitionHistory,
    pub completed_days: BTreeSet<NaiveDate>,
    pub current_day: i32,
}

/// Start (or restart) the challenge on `start_date`.
///
/// A start date in the past retroactively credits every elapsed day: the
/// plan carries exactly the daily target of events per elapsed day, dated
/// sequentially from `start_date`, and each such day marked complete.
/// Elapsed days are clamped to the 30-day cycle. `today` itself is never
/// backfilled — the day's repetitions start at zero.
pub fn start_challenge(start_date: NaiveDate, today: NaiveDate) -> Result<BackfillPlan, AppError> {
    if start_date > today {
        return Err(AppError::InvalidDate(
            "Challenge start date cannot be in the future".into(),
        ));
    }

    let days_passed = (today - start_date).num_days().min(CYCLE_DAYS);

    let mut history = RepetitionHistory::new();
    let mut completed_days = BTreeSet::new();
    for offset in 0..days_passed {
        let date = start_date + Duration::days(offset);
        let day_start = date.and_time(NaiveTime::MIN).and_utc();
        for i in 0..DAILY_TARGET {
            history.push(RepetitionEvent {
                date,
                timestamp: day_start + Duration::seconds(i as i64),
            });
        }
        completed_days.insert(date);
    }

    Ok(BackfillPlan {
        history,
        completed_days,
        current_day: days_passed as i32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn future_start_is_rejected() {
        let err = start_challenge(day(11), day(10)).unwrap_err();
        assert!(matches!(err, AppError::InvalidDate(_)));
    }

    #[test]
    fn starting_today_backfills_nothing() {
        let plan = start_challenge(day(10), day(10)).unwrap();
        assert!(plan.history.is_empty());
        assert!(plan.completed_days.is_empty());
        assert_eq!(plan.current_day, 0);
    }

    #[test]
    fn five_elapsed_days_yield_five_hundred_events() {
        let plan = start_challenge(day(5), day(10)).unwrap();
        assert_eq!(plan.history.len(), 500);
        assert_eq!(plan.current_day, 5);
        assert_eq!(plan.completed_days.len(), 5);
        for d in 5..=9 {
            assert_eq!(plan.history.count_on(day(d)), DAILY_TARGET, "day {d}");
            assert!(plan.completed_days.contains(&day(d)));
        }
        assert_eq!(plan.history.count_on(day(10)), 0, "today is never backfilled");
    }

    #[test]
    fn backfill_clamps_to_the_cycle_length() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let today = start + Duration::days(90);
        let plan = start_challenge(start, today).unwrap();
        assert_eq!(plan.current_day, 30);
        assert_eq!(plan.history.len(), 30 * DAILY_TARGET as usize);
        assert_eq!(plan.completed_days.len(), 30);
        assert_eq!(
            plan.completed_days.iter().next_back(),
            Some(&(start + Duration::days(29)))
        );
    }

    #[test]
    fn backfilled_events_survive_the_merge_dedup() {
        let plan = start_challenge(day(5), day(10)).unwrap();
        let merged = plan.history.merge(&plan.history.clone());
        assert_eq!(merged.len(), plan.history.len());
    }
}
