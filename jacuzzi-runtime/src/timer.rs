//! Timers with periodic or rescheduling wake-ups.
//!
//! The timer task sleeps until its deadline, calls [`TimerAction::wake_up`]
//! and uses the returned [`TimerOutcome`] to pick the next deadline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jacuzzi_core::{IdFactory, TimerId};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{RuntimeError, RuntimeResult};

/// Source of timer ids.
static TIMER_IDS: IdFactory = IdFactory::new(1);

/// Command channel capacity for timers.
const TIMER_CHANNEL_CAPACITY: usize = 8;

/// What the timer does after a wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// Wake up again after the current period.
    Repeat,
    /// Switch to a new period and wake up after it.
    Reschedule(Duration),
    /// Stop the timer.
    Stop,
}

/// The work a timer performs when it fires.
#[async_trait]
pub trait TimerAction: Send + 'static {
    /// Called each time the timer fires.
    async fn wake_up(&mut self) -> TimerOutcome;
}

#[derive(Debug)]
enum TimerCommand {
    Reset,
    SetPeriod(Duration),
    Stop { reply: oneshot::Sender<()> },
}

/// Entry point for spawning timers.
pub struct Timer;

impl Timer {
    /// Spawns a timer that first fires after `period`.
    #[must_use]
    pub fn spawn<A: TimerAction>(period: Duration, action: A) -> TimerHandle {
        let id: TimerId = TIMER_IDS.next_id().unwrap_or_default();
        let (tx, rx) = mpsc::channel(TIMER_CHANNEL_CAPACITY);
        let wake_ups = Arc::new(AtomicU64::new(0));

        let task = TimerTask {
            id,
            action,
            period,
            cmd_rx: rx,
            wake_ups: Arc::clone(&wake_ups),
        };
        tokio::spawn(task.run());

        TimerHandle { id, tx, wake_ups }
    }
}

/// Handle for controlling a timer.
#[derive(Clone)]
pub struct TimerHandle {
    id: TimerId,
    tx: mpsc::Sender<TimerCommand>,
    wake_ups: Arc<AtomicU64>,
}

impl TimerHandle {
    /// Returns the timer id.
    #[must_use]
    pub const fn id(&self) -> TimerId {
        self.id
    }

    /// Restarts the countdown from now with the current period.
    ///
    /// # Errors
    /// Returns `RuntimeError::Shutdown` if the timer stopped.
    pub async fn reset(&self) -> RuntimeResult<()> {
        self.send(TimerCommand::Reset).await
    }

    /// Changes the period and restarts the countdown from now.
    ///
    /// # Errors
    /// Returns `RuntimeError::Shutdown` if the timer stopped.
    pub async fn set_period(&self, period: Duration) -> RuntimeResult<()> {
        self.send(TimerCommand::SetPeriod(period)).await
    }

    async fn send(&self, cmd: TimerCommand) -> RuntimeResult<()> {
        self.tx.send(cmd).await.map_err(|_| RuntimeError::Shutdown)
    }

    /// Stops the timer, waiting for an in-flight wake-up to finish.
    pub async fn stop(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(TimerCommand::Stop { reply: reply_tx }).await.is_ok() {
            let _ = reply_rx.await;
        }
    }

    /// Returns how many times the timer fired.
    #[must_use]
    pub fn wake_ups(&self) -> u64 {
        self.wake_ups.load(Ordering::Relaxed)
    }

    /// Returns whether the timer task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

struct TimerTask<A> {
    id: TimerId,
    action: A,
    period: Duration,
    cmd_rx: mpsc::Receiver<TimerCommand>,
    wake_ups: Arc<AtomicU64>,
}

impl<A: TimerAction> TimerTask<A> {
    async fn run(mut self) {
        debug!(timer = %self.id, period_ms = self.period.as_millis(), "timer started");
        let mut deadline = Instant::now() + self.period;

        let stop_reply = loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => {
                    self.wake_ups.fetch_add(1, Ordering::Relaxed);
                    let outcome = self.action.wake_up().await;
                    trace!(timer = %self.id, ?outcome, "timer fired");
                    match outcome {
                        TimerOutcome::Repeat => {}
                        TimerOutcome::Reschedule(period) => self.period = period,
                        TimerOutcome::Stop => break None,
                    }
                    deadline = Instant::now() + self.period;
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(TimerCommand::Reset) => deadline = Instant::now() + self.period,
                    Some(TimerCommand::SetPeriod(period)) => {
                        self.period = period;
                        deadline = Instant::now() + period;
                    }
                    Some(TimerCommand::Stop { reply }) => break Some(reply),
                    None => break None,
                },
            }
        };

        self.cmd_rx.close();
        debug!(timer = %self.id, wake_ups = self.wake_ups.load(Ordering::Relaxed), "timer stopped");
        if let Some(reply) = stop_reply {
            let _ = reply.send(());
        }
    }
}
