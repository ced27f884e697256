/*!
 # Alarm notifications

 The timer driver notifies an [`AlarmSink`] on every timer-driven transition
 and on every midnight correction tick. Consumers should re-derive the full
 status from the driver instead of trusting the payload.
*/

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::interval::Interval;
use crate::state::SwitchState;

/// What caused an alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmKind {
    /// An interval's start timer fired
    On,
    /// An interval's end timer fired
    Off,
    /// The daily midnight correction tick
    Midnight,
}

/// Payload of a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alarm {
    pub kind: AlarmKind,
    /// Switch state after the transition
    pub state: Option<SwitchState>,
    /// The interval that fired, already advanced to its next cycle
    pub interval: Option<Interval>,
}

/// Receives transition notifications from the timer driver
pub trait AlarmSink: Send + 'static {
    fn alarm(&mut self, alarm: &Alarm);
}

impl<F> AlarmSink for F
where
    F: FnMut(&Alarm) + Send + 'static,
{
    fn alarm(&mut self, alarm: &Alarm) {
        self(alarm)
    }
}

/// Logs every alarm
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl AlarmSink for LogSink {
    fn alarm(&mut self, alarm: &Alarm) {
        match &alarm.interval {
            Some(interval) => info!(
                "Alarm {:?}: state {:?}, schedule {} next on {}",
                alarm.kind, alarm.state, interval.id, interval.on
            ),
            None => info!("Alarm {:?}: state {:?}", alarm.kind, alarm.state),
        }
    }
}

/// Forwards alarms to an async consumer
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Alarm>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Alarm>) -> Self {
        Self { tx }
    }

    /// A sink together with the receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Alarm>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlarmSink for ChannelSink {
    fn alarm(&mut self, alarm: &Alarm) {
        if self.tx.send(alarm.clone()).is_err() {
            warn!("Alarm receiver dropped, {:?} alarm lost", alarm.kind);
        }
    }
}
