/*!
 # Switch state

 The observable on/off state together with the disabled, paused and manual
 override flags. The timer driver owns the only instance.
*/

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::Error;

/// Binary device state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchState::On => "on",
            SwitchState::Off => "off",
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwitchState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "on" | "1" | "true" => Ok(SwitchState::On),
            "off" | "0" | "false" => Ok(SwitchState::Off),
            other => Err(Error::UnknownCommand(other.to_string())),
        }
    }
}

/// Holds the switch state and its control flags.
///
/// `state` is `None` until the schedule is first evaluated.
#[derive(Debug, Clone, Default)]
pub struct StateController {
    state: Option<SwitchState>,
    disabled: bool,
    paused: bool,
    manual_override: bool,
}

impl StateController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Option<SwitchState> {
        self.state
    }

    pub fn set_state(&mut self, state: SwitchState) {
        self.state = Some(state);
    }

    pub fn disable(&mut self) {
        debug!("Switch disabled");
        self.disabled = true;
    }

    pub fn disabled(&self) -> bool {
        self.disabled
    }

    pub fn pause(&mut self) {
        debug!("Switch paused");
        self.paused = true;
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    /// Clears pause and override, then re-derives the state from whether any
    /// interval is active. With no intervals the switch reads "off".
    pub fn resume(&mut self, any_active: bool) {
        self.paused = false;
        self.manual_override = false;
        self.state = Some(if any_active {
            SwitchState::On
        } else {
            SwitchState::Off
        });
        debug!("Switch resumed in state {:?}", self.state);
    }

    /// Whether a manual override is in effect
    pub fn manual(&self) -> bool {
        self.manual_override
    }

    /// Forces the state until the next timer-driven transition
    pub fn set_manual(&mut self, state: SwitchState) {
        self.state = Some(state);
        self.manual_override = true;
    }

    /// The timer has taken over again
    pub(crate) fn clear_override(&mut self) {
        self.manual_override = false;
    }

    /// Rebuild reset: enabled, state "off"
    pub(crate) fn reset(&mut self) {
        self.disabled = false;
        self.state = Some(SwitchState::Off);
    }
}
