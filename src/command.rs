/*!
 # Upstream commands and downstream output

 Text commands accepted from an upstream producer, and the gate that turns
 state changes into output payloads without repeating an unchanged state.
*/

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::state::SwitchState;
use crate::Error;

/// A command from upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Manual override (`on`, `off`, `1`, `0`, `true`, `false`)
    Manual(SwitchState),
    Pause,
    /// `resume` or `run`
    Resume,
    Disable,
    /// Forget the last output so the current state is sent again
    Restart,
    /// Report the current status
    Status,
    /// Re-read the configuration
    Reload,
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = s.trim().to_lowercase();
        match command.as_str() {
            "pause" => Ok(Command::Pause),
            "resume" | "run" => Ok(Command::Resume),
            "disable" => Ok(Command::Disable),
            "restart" => Ok(Command::Restart),
            "status" => Ok(Command::Status),
            "reload" => Ok(Command::Reload),
            other => other
                .parse::<SwitchState>()
                .map(Command::Manual)
                .map_err(|_| Error::UnknownCommand(s.trim().to_string())),
        }
    }
}

/// One downstream message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub topic: Option<String>,
    pub payload: String,
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.topic {
            Some(topic) => write!(f, "{} {}", topic, self.payload),
            None => f.write_str(&self.payload),
        }
    }
}

/// Emits a payload only when the state differs from the last one emitted
#[derive(Debug, Clone, Default)]
pub struct OutputGate {
    on_payload: Option<String>,
    off_payload: Option<String>,
    on_topic: Option<String>,
    off_topic: Option<String>,
    last: Option<SwitchState>,
}

impl OutputGate {
    pub fn new(on_payload: Option<String>, off_payload: Option<String>) -> Self {
        Self {
            on_payload,
            off_payload,
            ..Default::default()
        }
    }

    /// Topics attached to on and off messages
    pub fn with_topics(mut self, on_topic: Option<String>, off_topic: Option<String>) -> Self {
        self.on_topic = on_topic;
        self.off_topic = off_topic;
        self
    }

    /// The message to send for `state`, if anything changed
    pub fn emit(&mut self, state: Option<SwitchState>) -> Option<Output> {
        // Unknown state is never sent
        let state = state?;
        if self.last == Some(state) {
            return None;
        }
        self.last = Some(state);

        let (payload, topic) = match state {
            SwitchState::On => (&self.on_payload, &self.on_topic),
            SwitchState::Off => (&self.off_payload, &self.off_topic),
        };
        let output = Output {
            topic: topic.clone(),
            payload: payload.clone().unwrap_or_else(|| state.to_string()),
        };
        debug!("Emitting {} as {:?}", state, output);
        Some(output)
    }

    /// Forgets the last emitted state
    pub fn restart(&mut self) {
        self.last = None;
    }

    pub fn last(&self) -> Option<SwitchState> {
        self.last
    }
}
