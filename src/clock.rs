//! Replaces the mix of `mktime`/`gmtime` calls in the source with an explicit clock that owns
//! the start epoch and step duration. All step indices are integers; all timestamps are derived
//! deterministically in UTC.

use chrono::{DateTime, TimeZone, Utc};

/// Owns the simulation's start time and step duration. Step indices are plain integers; the
/// wall-clock timestamp of a step is derived, never stored or mutated independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepClock {
    start_epoch_s: i64,
    step_time_hours: i64,
}

impl StepClock {
    pub fn new(start_epoch_s: i64, step_time_hours: i64) -> Self {
        assert!(step_time_hours > 0, "step_time_hours must be positive");
        StepClock {
            start_epoch_s,
            step_time_hours,
        }
    }

    pub fn step_time_hours(&self) -> i64 {
        self.step_time_hours
    }

    pub fn step_time_seconds(&self) -> i64 {
        self.step_time_hours * 3600
    }

    /// The UTC timestamp at the start of step `step` (0-indexed).
    pub fn timestamp(&self, step: u64) -> DateTime<Utc> {
        let offset_s = self.start_epoch_s + step as i64 * self.step_time_seconds();
        Utc.timestamp_opt(offset_s, 0).single().expect("step offset is in range")
    }

    /// Day-of-year (1-366) and calendar date for the given step, used by the radiation model.
    pub fn date(&self, step: u64) -> chrono::NaiveDate {
        self.timestamp(step).date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn step_zero_is_the_start_epoch() {
        let clock = StepClock::new(0, 24);
        assert_eq!(clock.timestamp(0).timestamp(), 0);
    }

    #[test]
    fn step_advances_by_step_time() {
        let clock = StepClock::new(0, 1);
        assert_eq!(clock.timestamp(5).timestamp(), 5 * 3600);
    }

    #[test]
    fn date_reflects_elapsed_days() {
        let start = chrono::NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp();
        let clock = StepClock::new(start, 24);
        assert_eq!(clock.date(0).year(), 2020);
        assert_eq!(clock.date(0).ordinal(), 1);
        assert_eq!(clock.date(31).ordinal(), 32);
    }
}
