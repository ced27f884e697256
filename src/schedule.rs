/*!
 # Schedule set

 The ordered collection of normalized intervals the timer driver runs
 against. Configuration order is kept, and every interval is addressed by
 its [`IntervalId`].
*/

use chrono::{NaiveDateTime, TimeDelta};
use tracing::{debug, instrument};

use crate::interval::{normalize, Interval, IntervalConfig, IntervalId};
use crate::{Error, Result};

const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

/// Ordered set of daily intervals
#[derive(Debug, Clone, Default)]
pub struct ScheduleSet {
    intervals: Vec<Interval>,
}

impl ScheduleSet {
    /// Builds the set from configuration, resolving every rule against `now`.
    ///
    /// Entries marked invalid are skipped. Out-of-range times, zero-length
    /// rules and overlapping rules are rejected.
    #[instrument(skip(configs), fields(configured = configs.len()))]
    pub fn build(configs: &[IntervalConfig], now: NaiveDateTime) -> Result<Self> {
        let mut intervals = Vec::with_capacity(configs.len());
        let mut segments: Vec<(IntervalId, Vec<(u32, u32)>)> = Vec::new();

        for (index, config) in configs.iter().enumerate() {
            if !config.valid {
                debug!("Skipping invalid schedule {}", index);
                continue;
            }

            let id = IntervalId(index);
            let on = config.on_time()?;
            let off = config.off_time()?;
            let interval = normalize(id, on, off, now)?;

            let daily = day_segments(on.seconds_from_midnight(), off.seconds_from_midnight());
            if let Some((other, _)) = segments.iter().find(|(_, s)| overlaps(s, &daily)) {
                return Err(Error::ScheduleConflict {
                    first: other.index(),
                    second: index,
                });
            }
            segments.push((id, daily));

            debug!(
                "Schedule {} on {} off {} (active: {})",
                id, interval.on, interval.off, interval.active
            );
            intervals.push(interval);
        }

        Ok(Self { intervals })
    }

    /// Number of intervals
    pub fn count(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Intervals in configuration order
    pub fn iter(&self) -> impl Iterator<Item = &Interval> {
        self.intervals.iter()
    }

    /// Handles of all intervals in configuration order
    pub fn ids(&self) -> Vec<IntervalId> {
        self.intervals.iter().map(|i| i.id).collect()
    }

    pub fn get(&self, id: IntervalId) -> Option<&Interval> {
        self.intervals.iter().find(|i| i.id == id)
    }

    fn get_mut(&mut self, id: IntervalId) -> Result<&mut Interval> {
        self.intervals
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(Error::UnknownInterval(id))
    }

    /// The active interval, or the one that switches on soonest
    pub fn current(&self) -> Option<&Interval> {
        self.intervals
            .iter()
            .find(|i| i.active)
            .or_else(|| self.next())
    }

    /// The interval with the earliest `on`, active or not.
    ///
    /// Ties go to the interval configured first.
    pub fn next(&self) -> Option<&Interval> {
        self.intervals.iter().fold(None, |best: Option<&Interval>, i| match best {
            Some(b) if b.on <= i.on => Some(b),
            _ => Some(i),
        })
    }

    /// Whether any interval is active right now
    pub fn any_active(&self) -> bool {
        self.intervals.iter().any(|i| i.active)
    }

    /// Moves both boundaries of `id` one day forward
    pub fn advance_day(&mut self, id: IntervalId) -> Result<&Interval> {
        let interval = self.get_mut(id)?;
        interval.advance_day();
        Ok(&*interval)
    }

    /// Marks `id` active and every other interval inactive
    pub fn set_active(&mut self, id: IntervalId) -> Result<()> {
        self.get_mut(id)?;
        for interval in &mut self.intervals {
            interval.active = interval.id == id;
        }
        Ok(())
    }

    /// Marks `id` inactive
    pub fn set_inactive(&mut self, id: IntervalId) -> Result<()> {
        self.get_mut(id)?.active = false;
        Ok(())
    }

    /// Elapsed time from `a` to `b`
    pub fn duration(a: NaiveDateTime, b: NaiveDateTime) -> TimeDelta {
        b - a
    }
}

/// Seconds-of-day ranges covered by a rule, split at midnight when it wraps
fn day_segments(on: u32, off: u32) -> Vec<(u32, u32)> {
    if on < off {
        vec![(on, off)]
    } else {
        vec![(on, SECONDS_PER_DAY), (0, off)]
    }
}

fn overlaps(a: &[(u32, u32)], b: &[(u32, u32)]) -> bool {
    a.iter()
        .any(|&(s1, e1)| b.iter().any(|&(s2, e2)| s1 < e2 && s2 < e1))
}
