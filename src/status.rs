/*!
 # Status snapshot

 A point-in-time view of the switch, as shown to a user:

 ```text
 on until 17:00:00
 off manual until 09:00:00+1
 on (paused)
 ```
*/

use std::fmt;

use chrono::NaiveDateTime;

use crate::driver::{TimerDriver, TimerKey};
use crate::interval::{earlier, Interval};
use crate::state::SwitchState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub state: Option<SwitchState>,
    pub disabled: bool,
    pub paused: bool,
    pub manual: bool,
    pub count: usize,
    pub current: Option<Interval>,
    pub next: Option<Interval>,
    /// Armed end timer of the active interval
    pub end: Option<NaiveDateTime>,
    pub now: NaiveDateTime,
}

impl Status {
    pub fn capture(driver: &TimerDriver, now: NaiveDateTime) -> Self {
        let end = driver
            .current()
            .filter(|i| i.active)
            .and_then(|i| driver.armed(TimerKey::End(i.id)));
        Self {
            state: driver.state(),
            disabled: driver.disabled(),
            paused: driver.paused(),
            manual: driver.manual_override(),
            count: driver.count(),
            current: driver.current().cloned(),
            next: driver.next().cloned(),
            end,
            now,
        }
    }

    /// When the shown state is expected to change.
    ///
    /// A manual "off" during an active interval lasts until the next
    /// interval switches on; otherwise the current interval decides. An
    /// active interval ends at its armed end timer, since its boundaries
    /// have already moved on to the next cycle.
    pub fn until(&self) -> Option<NaiveDateTime> {
        let current = self.current.as_ref()?;
        let off = if current.active {
            self.end.unwrap_or(current.off)
        } else {
            current.off
        };
        if !self.manual {
            return Some(if current.active { off } else { current.on });
        }
        match (self.state?, current.active) {
            (SwitchState::On, _) => Some(off),
            (SwitchState::Off, true) => self.next.as_ref().map(|n| n.on),
            (SwitchState::Off, false) => Some(current.on),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if let Some(state) = self.state {
            parts.push(state.to_string());
        }
        if self.manual {
            parts.push("manual".to_string());
        }

        if self.disabled {
            parts.push("(disabled)".to_string());
        } else if self.paused {
            parts.push("(paused)".to_string());
        } else if self.count > 0 {
            if let Some(until) = self.until() {
                let mut text = format!("until {}", until.format("%H:%M:%S"));
                // Tomorrow
                if earlier(until, self.now) {
                    text.push_str("+1");
                }
                parts.push(text);
            }
        }

        f.write_str(&parts.join(" "))
    }
}
