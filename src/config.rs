/*!
 # Configuration

 Switch configuration read from TOML:

 ```toml
 disabled = false
 on_payload = "on"
 off_payload = "off"
 on_topic = "light/on"

 [[schedules]]
 on_h = 22
 on_m = 0
 on_s = 0
 off_h = 6
 off_m = 30
 off_s = 0
 ```
*/

use std::path::Path;

use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::command::OutputGate;
use crate::interval::IntervalConfig;
use crate::schedule::ScheduleSet;
use crate::Result;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SwitchConfig {
    /// Start with the switch disabled
    #[serde(default)]
    pub disabled: bool,
    /// Payload sent on an "on" transition; defaults to `on`
    pub on_payload: Option<String>,
    /// Payload sent on an "off" transition; defaults to `off`
    pub off_payload: Option<String>,
    /// Topic attached to "on" messages
    pub on_topic: Option<String>,
    /// Topic attached to "off" messages
    pub off_topic: Option<String>,
    #[serde(default)]
    pub schedules: Vec<IntervalConfig>,
}

impl SwitchConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    #[instrument]
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        debug!(
            "Loaded {} schedule(s) from {}",
            config.schedules.len(),
            path.display()
        );
        Ok(config)
    }

    /// Builds the schedule set against `now`
    pub fn schedule(&self, now: NaiveDateTime) -> Result<ScheduleSet> {
        ScheduleSet::build(&self.schedules, now)
    }

    /// Output gate with the configured payloads and topics
    pub fn output_gate(&self) -> OutputGate {
        OutputGate::new(self.on_payload.clone(), self.off_payload.clone())
            .with_topics(self.on_topic.clone(), self.off_topic.clone())
    }
}
