/*!
 # Timer Switch

 A daily on/off timer switch. A set of time-of-day intervals, which may wrap
 past midnight, drives a binary device state that re-arms itself every day.
 Manual override, pause/resume and disablement are layered on top of the
 timer-driven state.

 ## Features

 * Wrap-aware normalization of daily intervals
 * Self re-arming start/end timers with a midnight correction tick
 * Manual override, pause, resume and disable
 * Single-task tokio service with a command channel
 * TOML configuration
 * Optional ELK-BLEDOM LED strip output

 ## Example

 ```rust,no_run
 use timer_switch::*;

 #[tokio::main]
 async fn main() -> Result<()> {
     let config = SwitchConfig::from_toml(
         "[[schedules]]\non_h = 9\non_m = 0\non_s = 0\noff_h = 17\noff_m = 0\noff_s = 0\n",
     )?;

     let now = SystemClock.now();
     let driver = TimerDriver::new(config.schedule(now)?, LogSink);
     let handle = SwitchService::spawn(driver, SystemClock);

     let status = handle.status().await?;
     println!("{status}");

     handle.shutdown().await?;
     Ok(())
 }
 ```
*/

use thiserror::Error;

/// Custom error types for the timer switch library
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed interval rejected at the normalization boundary
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Two configured intervals overlap on the 24h clock
    #[error("Schedule {first} overlaps schedule {second}")]
    ScheduleConflict { first: usize, second: usize },

    /// Interval handle not present in the schedule set
    #[error("Unknown interval {0}")]
    UnknownInterval(IntervalId),

    /// Upstream command could not be parsed
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// The switch service has shut down
    #[error("Switch service is closed")]
    ServiceClosed,

    /// Malformed configuration file
    #[error(transparent)]
    ConfigFormat(#[from] toml::de::Error),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// No Bluetooth adapters found
    #[error("No Bluetooth adapters found")]
    NoBluetoothAdapters,

    /// No compatible LED device found
    #[error("No compatible LED device found")]
    NoCompatibleDevice,

    /// Failed to find required BLE characteristic
    #[error("Could not find required BLE characteristic: {0}")]
    CharacteristicNotFound(String),

    /// BLE communication error
    #[error("BLE communication error: {0}")]
    BleError(String),

    /// Command timeout
    #[error("Command timed out after {0} retries")]
    CommandTimeout(u8),

    /// Error from btleplug
    #[error(transparent)]
    BtlePlugError(#[from] btleplug::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod alarm;
pub mod command;
pub mod config;
pub mod device;
pub mod driver;
pub mod interval;
pub mod schedule;
pub mod service;
pub mod state;
pub mod status;

// Re-export key types
pub use alarm::{Alarm, AlarmKind, AlarmSink, ChannelSink, LogSink};
pub use command::{Command, Output, OutputGate};
pub use config::SwitchConfig;
pub use device::{DeviceType, LedSwitch};
pub use driver::{DriverPhase, TimerDriver, TimerKey};
pub use interval::{between, earlier, normalize, Interval, IntervalConfig, IntervalId, TimeOfDay};
pub use schedule::ScheduleSet;
pub use service::{Clock, SwitchHandle, SwitchService, SystemClock};
pub use state::{StateController, SwitchState};
pub use status::Status;
