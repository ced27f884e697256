/*!
 # Switch service

 Runs a [`TimerDriver`] on a single tokio task. Timer firings and external
 commands are handled by the same loop, one at a time, so the driver never
 needs a lock. Callers talk to it through a cloneable [`SwitchHandle`].
*/

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, instrument, trace};

use crate::driver::TimerDriver;
use crate::schedule::ScheduleSet;
use crate::state::SwitchState;
use crate::status::Status;
use crate::{Error, Result};

/// Request queue depth
const REQUEST_QUEUE: usize = 32;

/// Source of local wall-clock time
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> NaiveDateTime;
}

/// The host's local wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Debug)]
enum Op {
    Manual(SwitchState),
    Pause,
    Resume,
    Disable,
    Status,
    Reconfigure(ScheduleSet),
}

#[derive(Debug)]
enum Request {
    Op(Op, oneshot::Sender<Status>),
    Shutdown,
}

/// Cloneable handle to a running switch service
#[derive(Debug, Clone)]
pub struct SwitchHandle {
    tx: mpsc::Sender<Request>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

/// Spawns the service loop
pub struct SwitchService;

impl SwitchService {
    /// Starts `driver` on a new task. The driver is started against the
    /// clock's current time before the first request is served.
    pub fn spawn<C: Clock>(driver: TimerDriver, clock: C) -> SwitchHandle {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
        let task = tokio::spawn(run(driver, clock, rx));
        SwitchHandle {
            tx,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }
}

impl SwitchHandle {
    async fn request(&self, op: Op) -> Result<Status> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::Op(op, reply_tx))
            .await
            .map_err(|_| Error::ServiceClosed)?;
        reply_rx.await.map_err(|_| Error::ServiceClosed)
    }

    /// Manually forces the state until the next natural transition
    pub async fn manual(&self, state: SwitchState) -> Result<Status> {
        self.request(Op::Manual(state)).await
    }

    pub async fn pause(&self) -> Result<Status> {
        self.request(Op::Pause).await
    }

    pub async fn resume(&self) -> Result<Status> {
        self.request(Op::Resume).await
    }

    pub async fn disable(&self) -> Result<Status> {
        self.request(Op::Disable).await
    }

    /// Current status snapshot
    pub async fn status(&self) -> Result<Status> {
        self.request(Op::Status).await
    }

    /// Replaces the schedule set and restarts the driver
    pub async fn reconfigure(&self, schedule: ScheduleSet) -> Result<Status> {
        self.request(Op::Reconfigure(schedule)).await
    }

    /// Stops the loop and waits for it to finish. No alarm fires afterwards.
    pub async fn shutdown(&self) -> Result<()> {
        // The loop may already be gone; that is still a clean shutdown
        let _ = self.tx.send(Request::Shutdown).await;
        if let Some(task) = self.task.lock().await.take() {
            task.await.map_err(|_| Error::ServiceClosed)?;
        }
        Ok(())
    }
}

#[instrument(skip_all)]
async fn run<C: Clock>(mut driver: TimerDriver, clock: C, mut rx: mpsc::Receiver<Request>) {
    driver.start(clock.now());

    loop {
        let wake = driver.next_deadline().map(|(key, at)| {
            let delay = (at - clock.now()).to_std().unwrap_or(Duration::ZERO);
            trace!("Next timer {:?} in {:?}", key, delay);
            Instant::now() + delay
        });

        tokio::select! {
            request = rx.recv() => match request {
                Some(Request::Op(op, reply)) => {
                    let status = apply(&mut driver, &clock, op);
                    if reply.send(status).is_err() {
                        debug!("Requester went away before the reply");
                    }
                }
                Some(Request::Shutdown) | None => break,
            },
            _ = sleep_until(wake) => {
                let fired = driver.fire_due(clock.now());
                trace!("{} timer(s) fired", fired);
            }
        }
    }

    driver.stop();
    info!("Switch service stopped");
}

fn apply<C: Clock>(driver: &mut TimerDriver, clock: &C, op: Op) -> Status {
    debug!("Applying {:?}", op);
    match op {
        Op::Manual(state) => driver.manual(state),
        Op::Pause => driver.pause(),
        Op::Resume => driver.resume(),
        Op::Disable => driver.disable(),
        Op::Status => {}
        Op::Reconfigure(schedule) => driver.reconfigure(schedule, clock.now()),
    }
    Status::capture(driver, clock.now())
}

async fn sleep_until(wake: Option<Instant>) {
    match wake {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
