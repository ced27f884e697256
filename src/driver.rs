/*!
 # Timer driver

 Arms and fires the timers that move the switch between on and off.

 Every interval has at most one pending start timer and one pending end
 timer. When a start timer fires the interval is switched on, its end timer
 is armed, the interval is moved one day forward and its next start timer is
 armed. The chain perpetuates itself without ever re-registering a daily
 rule. A separate midnight tick fires at 00:00:01 every day.

 The driver itself never sleeps: it keeps a table of armed deadlines and is
 told when time has moved on through [`TimerDriver::fire_due`].
 [`SwitchService`](crate::service::SwitchService) runs it on a tokio task.

 ```text
   start()            stop() / disable()
  Idle ─────► Running ──────────────────► Stopped
                 ▲                           │
                 └──────── reconfigure() ────┘
 ```
*/

use std::collections::BTreeMap;

use chrono::{NaiveDateTime, NaiveTime};
use tracing::{debug, info, instrument, trace, warn};

use crate::alarm::{Alarm, AlarmKind, AlarmSink};
use crate::interval::{Interval, IntervalId, DAY};
use crate::schedule::ScheduleSet;
use crate::state::{StateController, SwitchState};
use crate::Result;

/// Identifies one armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerKey {
    /// Switches the interval on
    Start(IntervalId),
    /// Switches the interval off
    End(IntervalId),
    /// Daily correction tick
    Midnight,
}

/// Lifecycle of the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverPhase {
    /// Not started yet
    Idle,
    /// Timers are armed
    Running,
    /// Timers were cleared; only a reconfiguration restarts the driver
    Stopped,
}

/// Drives the switch state from a schedule set
pub struct TimerDriver {
    schedule: ScheduleSet,
    controller: StateController,
    sink: Box<dyn AlarmSink>,
    timers: BTreeMap<TimerKey, NaiveDateTime>,
    phase: DriverPhase,
}

impl std::fmt::Debug for TimerDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerDriver")
            .field("schedule", &self.schedule)
            .field("controller", &self.controller)
            .field("timers", &self.timers)
            .field("phase", &self.phase)
            .finish()
    }
}

impl TimerDriver {
    /// Creates an idle driver; the state starts out "off"
    pub fn new(schedule: ScheduleSet, sink: impl AlarmSink) -> Self {
        let mut controller = StateController::new();
        controller.set_state(SwitchState::Off);
        Self {
            schedule,
            controller,
            sink: Box::new(sink),
            timers: BTreeMap::new(),
            phase: DriverPhase::Idle,
        }
    }

    /// Arms a start timer for every interval and the midnight tick.
    ///
    /// Does nothing when disabled or when the schedule is empty. An interval
    /// that is already active switches the state on immediately; its start
    /// timer lies in the past and fires on the next [`fire_due`](Self::fire_due).
    #[instrument(skip(self))]
    pub fn start(&mut self, now: NaiveDateTime) {
        if self.controller.disabled() {
            debug!("Driver disabled, not starting");
            return;
        }
        if self.schedule.is_empty() {
            debug!("No schedules configured, not starting");
            return;
        }

        self.timers.clear();

        let armed: Vec<(IntervalId, NaiveDateTime, bool)> = self
            .schedule
            .iter()
            .map(|i| (i.id, i.on, i.active))
            .collect();
        for (id, on, active) in armed {
            if active {
                self.controller.set_state(SwitchState::On);
            }
            self.arm(TimerKey::Start(id), on);
        }
        self.arm(TimerKey::Midnight, next_midnight(now));

        self.phase = DriverPhase::Running;
        info!(
            "Timer driver running with {} schedule(s), state {:?}",
            self.schedule.count(),
            self.controller.state()
        );
    }

    /// Cancels every armed timer
    pub fn stop(&mut self) {
        if !self.timers.is_empty() {
            debug!("Cancelling {} armed timer(s)", self.timers.len());
        }
        self.timers.clear();
        if self.phase == DriverPhase::Running {
            self.phase = DriverPhase::Stopped;
        }
    }

    /// Replaces the schedule set and starts over.
    ///
    /// Clears the disabled flag and resets the state to "off" before
    /// re-evaluating the new set.
    #[instrument(skip(self, schedule), fields(schedules = schedule.count()))]
    pub fn reconfigure(&mut self, schedule: ScheduleSet, now: NaiveDateTime) {
        self.stop();
        self.schedule = schedule;
        self.controller.reset();
        self.phase = DriverPhase::Idle;
        self.start(now);
    }

    fn arm(&mut self, key: TimerKey, at: NaiveDateTime) {
        if let Some(previous) = self.timers.insert(key, at) {
            trace!("Re-armed {:?}: {} -> {}", key, previous, at);
        } else {
            trace!("Armed {:?} at {}", key, at);
        }
    }

    /// The earliest armed timer
    pub fn next_deadline(&self) -> Option<(TimerKey, NaiveDateTime)> {
        self.timers
            .iter()
            .min_by_key(|(key, at)| (**at, **key))
            .map(|(key, at)| (*key, *at))
    }

    /// Deadline of one armed timer
    pub fn armed(&self, key: TimerKey) -> Option<NaiveDateTime> {
        self.timers.get(&key).copied()
    }

    /// Number of armed timers
    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }

    /// Fires every timer whose deadline is at or before `now`, earliest
    /// first. Returns how many fired.
    pub fn fire_due(&mut self, now: NaiveDateTime) -> usize {
        let mut fired = 0;
        while let Some((key, at)) = self.next_deadline() {
            if at > now {
                break;
            }
            self.fire(key, now);
            fired += 1;
        }
        fired
    }

    /// Fires one timer, disarming it first
    pub fn fire(&mut self, key: TimerKey, now: NaiveDateTime) {
        if self.timers.remove(&key).is_none() {
            warn!("Timer {:?} fired but was not armed", key);
            return;
        }

        let result = match key {
            TimerKey::Start(id) => self.turn_on(id),
            TimerKey::End(id) => self.turn_off(id),
            TimerKey::Midnight => {
                self.midnight(now);
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("Timer {:?} failed: {}", key, e);
        }
    }

    #[instrument(skip(self))]
    fn turn_on(&mut self, id: IntervalId) -> Result<()> {
        let paused = self.controller.paused();
        if !paused {
            self.controller.set_state(SwitchState::On);
        }

        let off = self
            .schedule
            .get(id)
            .map(|i| i.off)
            .ok_or(crate::Error::UnknownInterval(id))?;
        self.arm(TimerKey::End(id), off);

        let next_on = self.schedule.advance_day(id)?.on;
        self.arm(TimerKey::Start(id), next_on);

        self.schedule.set_active(id)?;

        if !paused {
            self.controller.clear_override();
            info!("Schedule {} switched on until {}", id, off);
            self.notify(AlarmKind::On, self.schedule.get(id).cloned());
        } else {
            debug!("Schedule {} started while paused", id);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    fn turn_off(&mut self, id: IntervalId) -> Result<()> {
        self.schedule.set_inactive(id)?;

        if !self.controller.paused() {
            self.controller.set_state(SwitchState::Off);
            self.controller.clear_override();
            info!("Schedule {} switched off", id);
            self.notify(AlarmKind::Off, self.schedule.get(id).cloned());
        } else {
            debug!("Schedule {} ended while paused", id);
        }
        Ok(())
    }

    fn midnight(&mut self, now: NaiveDateTime) {
        debug!("Midnight correction tick");
        self.notify(AlarmKind::Midnight, None);
        self.arm(TimerKey::Midnight, next_midnight(now));
    }

    fn notify(&mut self, kind: AlarmKind, interval: Option<Interval>) {
        let alarm = Alarm {
            kind,
            state: self.controller.state(),
            interval,
        };
        self.sink.alarm(&alarm);
    }

    // Command surface

    /// Forces the state until the next natural transition
    pub fn manual(&mut self, state: SwitchState) {
        info!("Manual override: {}", state);
        self.controller.set_manual(state);
    }

    pub fn pause(&mut self) {
        info!("Pausing timer switch");
        self.controller.pause();
    }

    /// Unpauses and re-derives the state from live interval activity
    pub fn resume(&mut self) {
        info!("Resuming timer switch");
        self.controller.resume(self.schedule.any_active());
    }

    /// Disables the switch and cancels all armed timers
    pub fn disable(&mut self) {
        info!("Disabling timer switch");
        self.controller.disable();
        self.stop();
    }

    // Query surface

    pub fn state(&self) -> Option<SwitchState> {
        self.controller.state()
    }

    /// Sets the state without touching the override flag
    pub fn set_state(&mut self, state: SwitchState) {
        self.controller.set_state(state);
    }

    pub fn disabled(&self) -> bool {
        self.controller.disabled()
    }

    pub fn paused(&self) -> bool {
        self.controller.paused()
    }

    /// Whether a manual override is in effect
    pub fn manual_override(&self) -> bool {
        self.controller.manual()
    }

    pub fn count(&self) -> usize {
        self.schedule.count()
    }

    pub fn current(&self) -> Option<&Interval> {
        self.schedule.current()
    }

    pub fn next(&self) -> Option<&Interval> {
        self.schedule.next()
    }

    pub fn schedule(&self) -> &ScheduleSet {
        &self.schedule
    }

    pub fn phase(&self) -> DriverPhase {
        self.phase
    }
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The first 00:00:01 strictly after `now`
pub(crate) fn next_midnight(now: NaiveDateTime) -> NaiveDateTime {
    let tick = now.date().and_time(NaiveTime::MIN) + chrono::TimeDelta::seconds(1);
    if tick > now {
        tick
    } else {
        tick + DAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::IntervalConfig;
    use chrono::{NaiveDate, TimeDelta};
    use std::sync::{Arc, Mutex};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn recorder() -> (impl AlarmSink, Arc<Mutex<Vec<Alarm>>>) {
        let alarms = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let alarms = Arc::clone(&alarms);
            move |alarm: &Alarm| alarms.lock().unwrap().push(alarm.clone())
        };
        (sink, alarms)
    }

    fn driver(rules: &[((u32, u32), (u32, u32))], now: NaiveDateTime) -> (TimerDriver, Arc<Mutex<Vec<Alarm>>>) {
        let configs: Vec<IntervalConfig> = rules
            .iter()
            .map(|&(on, off)| IntervalConfig::new((on.0, on.1, 0), (off.0, off.1, 0)))
            .collect();
        let schedule = ScheduleSet::build(&configs, now).unwrap();
        let (sink, alarms) = recorder();
        (TimerDriver::new(schedule, sink), alarms)
    }

    fn kinds(alarms: &Arc<Mutex<Vec<Alarm>>>) -> Vec<AlarmKind> {
        alarms.lock().unwrap().iter().map(|a| a.kind).collect()
    }

    const FIRST: IntervalId = IntervalId(0);

    #[test]
    fn day_schedule_runs_end_to_end() {
        let now = at(8, 0);
        let (mut driver, alarms) = driver(&[((9, 0), (17, 0))], now);
        driver.start(now);

        assert_eq!(driver.state(), Some(SwitchState::Off));
        assert_eq!(driver.phase(), DriverPhase::Running);
        assert_eq!(driver.armed(TimerKey::Start(FIRST)), Some(at(9, 0)));
        assert_eq!(driver.fire_due(now), 0);

        assert_eq!(driver.fire_due(at(9, 0)), 1);
        assert_eq!(driver.state(), Some(SwitchState::On));
        assert_eq!(driver.armed(TimerKey::End(FIRST)), Some(at(17, 0)));
        assert_eq!(driver.armed(TimerKey::Start(FIRST)), Some(at(9, 0) + DAY));
        assert!(driver.current().unwrap().active);

        assert_eq!(driver.fire_due(at(17, 0)), 1);
        assert_eq!(driver.state(), Some(SwitchState::Off));
        assert!(!driver.current().unwrap().active);
        assert_eq!(driver.armed(TimerKey::End(FIRST)), None);

        assert_eq!(kinds(&alarms), vec![AlarmKind::On, AlarmKind::Off]);
    }

    #[test]
    fn wrapped_schedule_starts_on_and_arms_its_end() {
        let now = at(23, 30);
        let (mut driver, alarms) = driver(&[((22, 0), (2, 0))], now);
        driver.start(now);
        assert_eq!(driver.state(), Some(SwitchState::On));

        // The past start timer fires straight away
        assert_eq!(driver.fire_due(now), 1);
        let end = driver.armed(TimerKey::End(FIRST)).unwrap();
        assert_eq!(end - now, TimeDelta::minutes(150));
        assert_eq!(driver.armed(TimerKey::Start(FIRST)), Some(at(22, 0) + DAY));
        assert_eq!(kinds(&alarms), vec![AlarmKind::On]);

        driver.fire_due(end);
        assert_eq!(driver.state(), Some(SwitchState::Off));
    }

    #[test]
    fn wrapped_schedule_loaded_at_its_off_time_switches_on_every_night() {
        let now = at(6, 0);
        let (mut driver, alarms) = driver(&[((22, 0), (6, 0))], now);
        driver.start(now);
        assert_eq!(driver.state(), Some(SwitchState::Off));

        for day in 0..2 {
            let base = at(0, 0) + DAY * day;
            driver.fire_due(base + TimeDelta::hours(22));
            driver.fire_due(base + TimeDelta::hours(23));
            assert_eq!(driver.state(), Some(SwitchState::On), "day {day}");
            assert_eq!(
                driver.armed(TimerKey::End(FIRST)),
                Some(at(6, 0) + DAY * (day + 1))
            );
        }
        assert_eq!(
            kinds(&alarms),
            vec![AlarmKind::On, AlarmKind::Midnight, AlarmKind::Off, AlarmKind::On]
        );
    }

    #[test]
    fn one_start_and_one_end_timer_per_interval() {
        let now = at(8, 0);
        let (mut driver, _) = driver(&[((9, 0), (10, 0)), ((12, 0), (13, 0))], now);
        driver.start(now);
        driver.start(now);
        assert_eq!(driver.armed_count(), 3);

        for day in 0..3 {
            let base = at(0, 0) + DAY * day;
            driver.fire_due(base + TimeDelta::hours(14));
            // Two start timers and the midnight tick
            assert_eq!(driver.armed_count(), 3);
        }
    }

    #[test]
    fn end_always_follows_start() {
        let now = at(8, 0);
        let (mut driver, alarms) = driver(&[((9, 0), (17, 0))], now);
        driver.start(now);
        // Host was asleep for the whole interval
        driver.fire_due(at(18, 0));
        assert_eq!(kinds(&alarms), vec![AlarmKind::On, AlarmKind::Off]);
        assert_eq!(driver.state(), Some(SwitchState::Off));
    }

    #[test]
    fn start_is_noop_when_disabled_or_empty() {
        let now = at(8, 0);
        let (mut disabled, _) = driver(&[((9, 0), (17, 0))], now);
        disabled.disable();
        disabled.start(now);
        assert_eq!(disabled.armed_count(), 0);

        let (mut empty, _) = driver(&[], now);
        empty.start(now);
        assert_eq!(empty.phase(), DriverPhase::Idle);
        assert_eq!(empty.armed_count(), 0);
        assert!(empty.current().is_none());
    }

    #[test]
    fn disable_cancels_running_timers() {
        let now = at(8, 0);
        let (mut driver, alarms) = driver(&[((9, 0), (17, 0))], now);
        driver.start(now);
        driver.disable();
        assert_eq!(driver.phase(), DriverPhase::Stopped);
        assert_eq!(driver.fire_due(at(10, 0)), 0);
        assert!(alarms.lock().unwrap().is_empty());
        assert!(driver.disabled());
    }

    #[test]
    fn pause_freezes_state_until_resume() {
        let now = at(12, 0);
        let (mut driver, alarms) = driver(&[((9, 0), (17, 0))], now);
        driver.start(now);
        driver.fire_due(now);
        assert_eq!(driver.state(), Some(SwitchState::On));
        alarms.lock().unwrap().clear();

        driver.pause();
        driver.fire_due(at(17, 0));
        assert_eq!(driver.state(), Some(SwitchState::On));
        assert!(alarms.lock().unwrap().is_empty());

        driver.resume();
        assert!(!driver.paused());
        assert_eq!(driver.state(), Some(SwitchState::Off));
    }

    #[test]
    fn manual_override_lasts_until_next_transition() {
        let now = at(8, 0);
        let (mut driver, _) = driver(&[((9, 0), (17, 0))], now);
        driver.start(now);

        driver.manual(SwitchState::On);
        assert_eq!(driver.state(), Some(SwitchState::On));
        assert!(driver.manual_override());

        driver.fire_due(at(9, 0));
        assert!(!driver.manual_override());

        driver.manual(SwitchState::Off);
        assert_eq!(driver.state(), Some(SwitchState::Off));
        driver.fire_due(at(17, 0));
        assert!(!driver.manual_override());
        assert_eq!(driver.state(), Some(SwitchState::Off));
    }

    #[test]
    fn manual_override_survives_transitions_while_paused() {
        let now = at(8, 0);
        let (mut driver, _) = driver(&[((9, 0), (17, 0))], now);
        driver.start(now);
        driver.pause();
        driver.manual(SwitchState::Off);

        driver.fire_due(at(9, 0));
        assert!(driver.manual_override());
        assert_eq!(driver.state(), Some(SwitchState::Off));
        // The schedule keeps moving underneath
        assert!(driver.current().unwrap().active);
    }

    #[test]
    fn resume_without_schedules_reads_off() {
        let now = at(8, 0);
        let (mut driver, _) = driver(&[], now);
        driver.manual(SwitchState::On);
        driver.pause();
        driver.resume();
        assert_eq!(driver.state(), Some(SwitchState::Off));
        assert!(!driver.manual_override());
    }

    #[test]
    fn midnight_tick_notifies_and_rearms() {
        let now = at(8, 0);
        let (mut driver, alarms) = driver(&[((9, 0), (17, 0))], now);
        driver.start(now);

        let tick = at(0, 0) + DAY + TimeDelta::seconds(1);
        assert_eq!(driver.armed(TimerKey::Midnight), Some(tick));

        driver.fire_due(at(18, 0));
        alarms.lock().unwrap().clear();
        driver.fire_due(tick);
        assert_eq!(kinds(&alarms), vec![AlarmKind::Midnight]);
        assert_eq!(driver.armed(TimerKey::Midnight), Some(tick + DAY));
        assert_eq!(driver.state(), Some(SwitchState::Off));
    }

    #[test]
    fn next_midnight_is_strictly_after_now() {
        let tick = at(0, 0) + TimeDelta::seconds(1);
        assert_eq!(next_midnight(at(0, 0)), tick);
        assert_eq!(next_midnight(tick), tick + DAY);
        assert_eq!(next_midnight(at(23, 59)), tick + DAY);
    }

    #[test]
    fn reconfigure_rebuilds_and_reenables() {
        let now = at(8, 0);
        let (mut driver, _) = driver(&[((9, 0), (17, 0))], now);
        driver.start(now);
        driver.disable();

        let later = at(19, 0);
        let schedule = ScheduleSet::build(&[IntervalConfig::new((18, 0, 0), (20, 0, 0))], later).unwrap();
        driver.reconfigure(schedule, later);

        assert!(!driver.disabled());
        assert_eq!(driver.phase(), DriverPhase::Running);
        assert_eq!(driver.state(), Some(SwitchState::On));
        assert_eq!(driver.armed(TimerKey::Start(FIRST)), Some(at(18, 0)));
    }

    #[test]
    fn stop_cancels_everything() {
        let now = at(8, 0);
        let (mut driver, alarms) = driver(&[((9, 0), (17, 0)), ((20, 0), (22, 0))], now);
        driver.start(now);
        driver.stop();
        assert_eq!(driver.phase(), DriverPhase::Stopped);
        assert_eq!(driver.next_deadline(), None);
        assert_eq!(driver.fire_due(at(23, 0) + DAY), 0);
        assert!(alarms.lock().unwrap().is_empty());
    }
}
