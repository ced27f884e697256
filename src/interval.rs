/*!
 # Daily intervals

 A daily rule switches the device on at one time of day and off at another.
 The off time may be numerically earlier than the on time, in which case the
 interval crosses midnight. Normalization turns a rule into a pair of absolute
 instants relative to "now".
*/

use std::fmt;

use chrono::{NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use serde::Deserialize;
use tracing::trace;

use crate::{Error, Result};

/// Length of one schedule cycle
pub(crate) const DAY: TimeDelta = TimeDelta::days(1);

/// A validated wall-clock time of day
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    /// Validates hour (0-23), minute (0-59) and second (0-59)
    pub fn new(hour: u32, minute: u32, second: u32) -> Result<Self> {
        NaiveTime::from_hms_opt(hour, minute, second)
            .map(TimeOfDay)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "time of day {hour:02}:{minute:02}:{second:02} is out of range"
                ))
            })
    }

    /// Seconds elapsed since midnight
    pub fn seconds_from_midnight(&self) -> u32 {
        self.0.num_seconds_from_midnight()
    }

    /// This time of day on the same date as `day`
    pub fn on_date_of(&self, day: NaiveDateTime) -> NaiveDateTime {
        day.date().and_time(self.0)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M:%S"))
    }
}

/// One configured daily rule, as it arrives from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct IntervalConfig {
    /// Entries marked invalid are skipped when the schedule is built
    #[serde(default = "default_valid")]
    pub valid: bool,
    pub on_h: u32,
    pub on_m: u32,
    pub on_s: u32,
    pub off_h: u32,
    pub off_m: u32,
    pub off_s: u32,
}

fn default_valid() -> bool {
    true
}

impl IntervalConfig {
    /// A valid rule switching on at `on` and off at `off`, as `(h, m, s)`
    pub fn new(on: (u32, u32, u32), off: (u32, u32, u32)) -> Self {
        Self {
            valid: true,
            on_h: on.0,
            on_m: on.1,
            on_s: on.2,
            off_h: off.0,
            off_m: off.1,
            off_s: off.2,
        }
    }

    /// Validated on time
    pub fn on_time(&self) -> Result<TimeOfDay> {
        TimeOfDay::new(self.on_h, self.on_m, self.on_s)
    }

    /// Validated off time
    pub fn off_time(&self) -> Result<TimeOfDay> {
        TimeOfDay::new(self.off_h, self.off_m, self.off_s)
    }
}

/// Stable handle for an interval within its schedule set.
///
/// The value is the position of the rule in the configuration, so it stays
/// the same when invalid entries before it are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntervalId(pub(crate) usize);

impl IntervalId {
    /// Position of the rule in the configuration
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for IntervalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A daily rule resolved to absolute instants.
///
/// `on` is the next (or current) activation and `off` the matching
/// deactivation, so `on < off` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub id: IntervalId,
    pub on: NaiveDateTime,
    pub off: NaiveDateTime,
    /// True while "now" falls inside `[on, off)`
    pub active: bool,
}

impl Interval {
    /// Shift both boundaries one cycle forward
    pub(crate) fn advance_day(&mut self) {
        self.on += DAY;
        self.off += DAY;
    }
}

/// Wraparound-aware containment.
///
/// When `start <= end` this is `start <= time < end`. Otherwise the interval
/// crosses midnight and `[end, start)` is the excluded region.
pub fn between(time: NaiveDateTime, start: NaiveDateTime, end: NaiveDateTime) -> bool {
    if start <= end {
        time >= start && time < end
    } else {
        !(time >= end && time < start)
    }
}

/// Whether `d1` is earlier than `d2`, comparing only hour, minute and second.
///
/// Only used for the "+1" display hint, never for scheduling.
pub fn earlier(d1: NaiveDateTime, d2: NaiveDateTime) -> bool {
    (d1.hour(), d1.minute(), d1.second()) < (d2.hour(), d2.minute(), d2.second())
}

/// Resolves a daily rule against `now`.
///
/// The order of the corrections matters: an active interval that started
/// yesterday keeps its past `on`, an inactive interval whose `on` has passed
/// moves to the next cycle, and finally an `off` not after `now` moves one
/// cycle forward on its own.
pub fn normalize(
    id: IntervalId,
    on_time: TimeOfDay,
    off_time: TimeOfDay,
    now: NaiveDateTime,
) -> Result<Interval> {
    if on_time == off_time {
        return Err(Error::Configuration(format!(
            "interval {id} switches on and off at the same time ({on_time})"
        )));
    }

    let mut on = on_time.on_date_of(now);
    let mut off = off_time.on_date_of(now);

    let active = between(now, on, off);

    if active && on > now {
        on -= DAY;
    } else if !active && on < now {
        on += DAY;
        off += DAY;
    }

    if off <= now {
        off += DAY;
    }

    trace!(%id, %on, %off, active, "Normalized interval");
    Ok(Interval { id, on, off, active })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn tod(h: u32, m: u32) -> TimeOfDay {
        TimeOfDay::new(h, m, 0).unwrap()
    }

    fn interval(on: (u32, u32), off: (u32, u32), now: NaiveDateTime) -> Interval {
        normalize(IntervalId(0), tod(on.0, on.1), tod(off.0, off.1), now).unwrap()
    }

    #[test]
    fn before_plain_interval_is_inactive_and_in_the_future() {
        let now = at(8, 0, 0);
        let i = interval((9, 0), (17, 0), now);
        assert!(!i.active);
        assert_eq!(i.on, at(9, 0, 0));
        assert_eq!(i.off, at(17, 0, 0));
        assert!(i.on >= now && i.off >= now);
    }

    #[test]
    fn inside_plain_interval_keeps_past_on() {
        let now = at(12, 30, 0);
        let i = interval((9, 0), (17, 0), now);
        assert!(i.active);
        assert_eq!(i.on, at(9, 0, 0));
        assert_eq!(i.off, at(17, 0, 0));
        assert!(i.on <= now);
    }

    #[test]
    fn after_plain_interval_moves_to_tomorrow() {
        let now = at(18, 0, 0);
        let i = interval((9, 0), (17, 0), now);
        assert!(!i.active);
        assert_eq!(i.on, at(9, 0, 0) + DAY);
        assert_eq!(i.off, at(17, 0, 0) + DAY);
    }

    #[test]
    fn on_boundary_is_inclusive_and_off_boundary_exclusive() {
        assert!(interval((9, 0), (17, 0), at(9, 0, 0)).active);
        let i = interval((9, 0), (17, 0), at(17, 0, 0));
        assert!(!i.active);
        assert_eq!(i.on, at(9, 0, 0) + DAY);
    }

    #[test]
    fn wrapped_interval_late_evening_is_active() {
        let now = at(23, 0, 0);
        let i = interval((22, 0), (6, 0), now);
        assert!(i.active);
        assert_eq!(i.on, at(22, 0, 0));
        assert_eq!(i.off, at(6, 0, 0) + DAY);
        assert!(i.on <= now && now < i.off);
    }

    #[test]
    fn wrapped_interval_early_morning_started_yesterday() {
        let now = at(3, 0, 0);
        let i = interval((22, 0), (6, 0), now);
        assert!(i.active);
        assert_eq!(i.on, at(22, 0, 0) - DAY);
        assert_eq!(i.off, at(6, 0, 0));
    }

    #[test]
    fn wrapped_interval_midday_is_inactive() {
        let now = at(12, 0, 0);
        let i = interval((22, 0), (6, 0), now);
        assert!(!i.active);
        assert_eq!(i.on, at(22, 0, 0));
        assert_eq!(i.off, at(6, 0, 0) + DAY);
        assert!(i.on < i.off);
    }

    #[test]
    fn wrapped_interval_at_its_off_time_moves_off_to_tomorrow() {
        let now = at(6, 0, 0);
        let i = interval((22, 0), (6, 0), now);
        assert!(!i.active);
        assert_eq!(i.on, at(22, 0, 0));
        assert_eq!(i.off, at(6, 0, 0) + DAY);
        assert!(i.on < i.off);
    }

    #[test]
    fn zero_length_interval_is_rejected() {
        let err = normalize(IntervalId(3), tod(9, 0), tod(9, 0), at(8, 0, 0)).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn out_of_range_time_is_rejected() {
        assert!(TimeOfDay::new(24, 0, 0).is_err());
        assert!(TimeOfDay::new(23, 60, 0).is_err());
        assert!(TimeOfDay::new(23, 59, 60).is_err());
        assert!(TimeOfDay::new(23, 59, 59).is_ok());
    }

    #[test]
    fn between_handles_wraparound() {
        assert!(between(at(12, 0, 0), at(9, 0, 0), at(17, 0, 0)));
        assert!(!between(at(17, 0, 0), at(9, 0, 0), at(17, 0, 0)));
        assert!(between(at(23, 0, 0), at(22, 0, 0), at(6, 0, 0)));
        assert!(between(at(1, 0, 0), at(22, 0, 0), at(6, 0, 0)));
        assert!(!between(at(6, 0, 0), at(22, 0, 0), at(6, 0, 0)));
    }

    #[test]
    fn earlier_ignores_the_date() {
        assert!(earlier(at(9, 0, 0) + DAY, at(10, 0, 0)));
        assert!(!earlier(at(10, 0, 0), at(9, 0, 0) + DAY));
        assert!(earlier(at(10, 0, 1), at(10, 0, 2)));
        assert!(!earlier(at(10, 0, 0), at(10, 0, 0)));
    }
}
