//! Daemon: re-run an action until the signalled state is resolved.
//!
//! # Design
//!
//! ```text
//! state_change() ──┐
//! state_change() ──┼──► [cmd channel] ──► Daemon task ──► solve_state() until true
//! stop()         ──┘                           │
//!                                              └──► solved-through watch ──► block_until_solved()
//! ```
//!
//! Each `state_change` bumps a request counter. When the task starts a
//! solving round it snapshots that counter; once `solve_state` returns `true`
//! the snapshot is published as "solved through". Signals that pile up while
//! a round is running collapse into one further round.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use jacuzzi_core::{IdFactory, TaskId};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace};

use crate::config::DaemonConfig;
use crate::error::{RuntimeError, RuntimeResult};

/// Source of daemon task ids.
static DAEMON_IDS: IdFactory = IdFactory::new(1);

/// The work a daemon performs when its state changes.
#[async_trait]
pub trait DaemonAction: Send + 'static {
    /// Attempts to bring the monitored state to rest.
    ///
    /// Returns `true` when the state is resolved. Returning `false` makes the
    /// daemon call again after the configured retry delay.
    async fn solve_state(&mut self) -> bool;
}

/// Commands that can be sent to a daemon task.
#[derive(Debug)]
enum DaemonCommand {
    /// The monitored state changed.
    StateChange,
    /// Stop after the in-flight `solve_state` call.
    Stop {
        /// Acknowledged once the task has exited its loop.
        reply: oneshot::Sender<()>,
    },
}

/// Entry point for spawning daemons.
pub struct Daemon;

impl Daemon {
    /// Spawns a daemon running `action` and returns its handle.
    ///
    /// The daemon is idle until the first [`DaemonHandle::state_change`].
    ///
    /// # Errors
    /// Returns `RuntimeError::InvalidConfig` if the configuration is invalid.
    pub fn spawn<A: DaemonAction>(action: A, config: DaemonConfig) -> RuntimeResult<DaemonHandle> {
        config.validate()?;

        let id: TaskId = DAEMON_IDS.next_id().unwrap_or_default();
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let (solved_tx, solved_rx) = watch::channel(0);
        let requested = Arc::new(AtomicU64::new(0));
        let rounds = Arc::new(AtomicU64::new(0));

        let task = DaemonTask {
            id,
            action,
            config,
            cmd_rx: rx,
            requested: Arc::clone(&requested),
            solved_tx,
            rounds: Arc::clone(&rounds),
        };
        tokio::spawn(task.run());

        Ok(DaemonHandle {
            id,
            tx,
            requested,
            solved_rx,
            rounds,
        })
    }
}

/// Handle for signalling and stopping a daemon.
#[derive(Clone)]
pub struct DaemonHandle {
    id: TaskId,
    tx: mpsc::Sender<DaemonCommand>,
    requested: Arc<AtomicU64>,
    solved_rx: watch::Receiver<u64>,
    rounds: Arc<AtomicU64>,
}

impl DaemonHandle {
    /// Returns the daemon's task id.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Signals that the monitored state changed.
    ///
    /// Never blocks: if a signal is already queued this one is folded into it.
    ///
    /// # Errors
    /// Returns `RuntimeError::Shutdown` if the daemon has stopped.
    pub fn state_change(&self) -> RuntimeResult<()> {
        self.requested.fetch_add(1, Ordering::AcqRel);
        match self.tx.try_send(DaemonCommand::StateChange) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(RuntimeError::Shutdown),
        }
    }

    /// Returns whether a signalled state change is still unresolved.
    #[must_use]
    pub fn is_solving(&self) -> bool {
        self.requested.load(Ordering::Acquire) > *self.solved_rx.borrow()
    }

    /// Returns how many times `solve_state` has been called.
    #[must_use]
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    /// Waits until every state change signalled so far has been resolved.
    ///
    /// # Errors
    /// Returns `RuntimeError::Shutdown` if the daemon stops first.
    pub async fn block_until_solved(&self) -> RuntimeResult<()> {
        let target = self.requested.load(Ordering::Acquire);
        let mut rx = self.solved_rx.clone();
        rx.wait_for(|solved| *solved >= target)
            .await
            .map(|_| ())
            .map_err(|_| RuntimeError::Shutdown)
    }

    /// Stops the daemon, waiting for an in-flight `solve_state` call to return.
    ///
    /// Stopping an already stopped daemon is a no-op.
    pub async fn stop(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(DaemonCommand::Stop { reply: reply_tx })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }
}

/// The background side of a daemon.
struct DaemonTask<A> {
    id: TaskId,
    action: A,
    config: DaemonConfig,
    cmd_rx: mpsc::Receiver<DaemonCommand>,
    requested: Arc<AtomicU64>,
    solved_tx: watch::Sender<u64>,
    rounds: Arc<AtomicU64>,
}

impl<A: DaemonAction> DaemonTask<A> {
    /// Runs the daemon loop.
    async fn run(mut self) {
        debug!(daemon = %self.id, "daemon started");

        let mut stop_reply = None;
        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                DaemonCommand::StateChange => {
                    if let Some(reply) = self.solve().await {
                        stop_reply = Some(reply);
                        break;
                    }
                }
                DaemonCommand::Stop { reply } => {
                    stop_reply = Some(reply);
                    break;
                }
            }
        }

        // Reject signals sent after this point.
        self.cmd_rx.close();
        debug!(daemon = %self.id, rounds = self.rounds.load(Ordering::Relaxed), "daemon stopped");
        if let Some(reply) = stop_reply {
            let _ = reply.send(());
        }
    }

    /// Runs one solving round. Returns the stop reply if a stop arrived meanwhile.
    async fn solve(&mut self) -> Option<oneshot::Sender<()>> {
        // Queued signals are covered by this round.
        let mut stop_reply = None;
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            if let DaemonCommand::Stop { reply } = cmd {
                stop_reply = Some(reply);
            }
        }
        let mut target = self.requested.load(Ordering::Acquire);

        loop {
            let round = self.rounds.fetch_add(1, Ordering::Relaxed) + 1;
            let solved = self.action.solve_state().await;
            trace!(daemon = %self.id, round, solved, "solve_state returned");

            if solved {
                self.solved_tx.send_if_modified(|current| {
                    if target > *current {
                        *current = target;
                        true
                    } else {
                        false
                    }
                });
                return stop_reply;
            }
            if stop_reply.is_some() {
                return stop_reply;
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.retry_delay) => {}
                cmd = self.cmd_rx.recv() => match cmd {
                    // The next attempt covers this signal.
                    Some(DaemonCommand::StateChange) => {
                        target = self.requested.load(Ordering::Acquire);
                    }
                    Some(DaemonCommand::Stop { reply }) => return Some(reply),
                    None => return None,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use super::*;

    /// Resolves only after `needed` attempts.
    struct Countdown {
        needed: Arc<AtomicU64>,
        calls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl DaemonAction for Countdown {
        async fn solve_state(&mut self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.needed.load(Ordering::SeqCst);
            if left == 0 {
                return true;
            }
            self.needed.store(left - 1, Ordering::SeqCst);
            false
        }
    }

    fn countdown(needed: u64) -> (Countdown, Arc<AtomicU64>, Arc<AtomicU64>) {
        let needed = Arc::new(AtomicU64::new(needed));
        let calls = Arc::new(AtomicU64::new(0));
        (
            Countdown {
                needed: Arc::clone(&needed),
                calls: Arc::clone(&calls),
            },
            needed,
            calls,
        )
    }

    #[tokio::test]
    async fn test_idle_until_signalled() {
        let (action, _, calls) = countdown(0);
        let daemon = Daemon::spawn(action, DaemonConfig::for_testing()).unwrap();

        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!daemon.is_solving());

        daemon.stop().await;
    }

    #[tokio::test]
    async fn test_retries_until_solved() {
        let (action, _, calls) = countdown(3);
        let daemon = Daemon::spawn(action, DaemonConfig::for_testing()).unwrap();

        daemon.state_change().unwrap();
        daemon.block_until_solved().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(daemon.rounds(), 4);
        assert!(!daemon.is_solving());
        daemon.stop().await;
    }

    #[tokio::test]
    async fn test_new_signal_after_solve_runs_again() {
        let (action, needed, calls) = countdown(0);
        let daemon = Daemon::spawn(action, DaemonConfig::for_testing()).unwrap();

        daemon.state_change().unwrap();
        daemon.block_until_solved().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        needed.store(1, Ordering::SeqCst);
        daemon.state_change().unwrap();
        daemon.block_until_solved().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        daemon.stop().await;
    }

    /// Blocks inside `solve_state` until released.
    struct Gate {
        release: Arc<tokio::sync::Notify>,
        entered: Arc<tokio::sync::Notify>,
        calls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl DaemonAction for Gate {
        async fn solve_state(&mut self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            true
        }
    }

    #[tokio::test]
    async fn test_signals_during_solve_coalesce() {
        let release = Arc::new(tokio::sync::Notify::new());
        let entered = Arc::new(tokio::sync::Notify::new());
        let calls = Arc::new(AtomicU64::new(0));
        let daemon = Daemon::spawn(
            Gate {
                release: Arc::clone(&release),
                entered: Arc::clone(&entered),
                calls: Arc::clone(&calls),
            },
            DaemonConfig::for_testing(),
        )
        .unwrap();

        daemon.state_change().unwrap();
        entered.notified().await;

        // Many signals while the first round is blocked.
        for _ in 0..10 {
            daemon.state_change().unwrap();
        }
        release.notify_one();
        entered.notified().await;
        release.notify_one();

        daemon.block_until_solved().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        daemon.stop().await;
    }

    #[tokio::test]
    async fn test_state_change_after_stop_fails() {
        let (action, _, _) = countdown(0);
        let daemon = Daemon::spawn(action, DaemonConfig::for_testing()).unwrap();
        daemon.stop().await;

        assert_eq!(daemon.state_change(), Err(RuntimeError::Shutdown));
        // Second stop is a no-op.
        daemon.stop().await;
    }

    /// Never resolves; records whether it was interrupted mid-call.
    struct Stubborn {
        in_call: Arc<AtomicBool>,
    }

    #[async_trait]
    impl DaemonAction for Stubborn {
        async fn solve_state(&mut self) -> bool {
            self.in_call.store(true, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_call.store(false, Ordering::SeqCst);
            false
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_retry_loop() {
        let in_call = Arc::new(AtomicBool::new(false));
        let daemon = Daemon::spawn(
            Stubborn {
                in_call: Arc::clone(&in_call),
            },
            DaemonConfig::new(Duration::from_secs(1)),
        )
        .unwrap();

        daemon.state_change().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(daemon.is_solving());

        daemon.stop().await;
        assert!(!in_call.load(Ordering::SeqCst));
        assert_eq!(daemon.block_until_solved().await, Err(RuntimeError::Shutdown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_during_retry_sleep_is_solved() {
        let (action, _, calls) = countdown(1);
        let daemon = Daemon::spawn(action, DaemonConfig::new(Duration::from_secs(1))).unwrap();

        daemon.state_change().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Arrives while the first attempt is backing off.
        daemon.state_change().unwrap();

        tokio::time::timeout(Duration::from_secs(5), daemon.block_until_solved())
            .await
            .expect("daemon never caught up with the second signal")
            .unwrap();
        assert!(!daemon.is_solving());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        daemon.stop().await;
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (action, _, _) = countdown(0);
        let config = DaemonConfig::for_testing().with_channel_capacity(0);
        assert!(matches!(
            Daemon::spawn(action, config),
            Err(RuntimeError::InvalidConfig(_))
        ));
    }
}
