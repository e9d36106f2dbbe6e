//! Message processor: a reader task feeding a handler task.
//!
//! # Design
//!
//! ```text
//! ┌──────────────┐  bounded mpsc  ┌───────────────┐
//! │ MessageReader│ ─────────────► │ MessageHandler│
//! │  (task 1)    │  (back-press.) │   (task 2)    │
//! └──────┬───────┘                └───────┬───────┘
//!        │        control (watch)         │
//!        └────── Running/Paused/Stopped ◄─┘
//! ```
//!
//! Termination paths:
//!
//! - Reader returns `Finished`: the handler drains the queue, then both
//!   `on_finish` hooks run.
//! - Handler returns `Stop`: the reader is stopped and anything still queued
//!   is dropped and counted.
//! - [`ProcessorHandle::stop`]: the reader stops (an in-flight `read` is
//!   cancelled, so readers must be cancel-safe). Messages the reader already
//!   accepted are taken with [`MessageReader::take_pending`] and handled along
//!   with the queued ones.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use jacuzzi_core::{IdFactory, ProcessorId};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ProcessorConfig;
use crate::error::RuntimeResult;

/// Source of processor ids.
static PROCESSOR_IDS: IdFactory = IdFactory::new(1);

/// What a reader produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome<M> {
    /// A message to hand to the handler.
    Message(M),
    /// No more messages will be produced.
    Finished,
}

/// What the handler wants after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Keep processing.
    Continue,
    /// Stop the processor; queued messages are dropped.
    Stop,
}

/// Produces messages for a processor.
#[async_trait]
pub trait MessageReader<M: Send + 'static>: Send + 'static {
    /// Waits for and returns the next message.
    ///
    /// Must be cancel-safe: the future may be dropped when the processor stops.
    async fn read(&mut self) -> ReadOutcome<M>;

    /// Takes messages the reader has accepted but not yet returned from `read`.
    ///
    /// Called once when the reader side ends; the reader must not accept
    /// more afterwards.
    fn take_pending(&mut self) -> Vec<M> {
        Vec::new()
    }

    /// Called once when the reader side ends.
    async fn on_finish(&mut self) {}
}

/// Consumes messages produced by a [`MessageReader`].
#[async_trait]
pub trait MessageHandler<M: Send + 'static>: Send + 'static {
    /// Handles one message.
    async fn handle(&mut self, message: M) -> HandleOutcome;

    /// Called once after the last message was handled.
    async fn on_finish(&mut self) {}
}

/// Counters describing a processor's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Messages produced by the reader.
    pub read: u64,
    /// Messages handed to the handler.
    pub handled: u64,
    /// Messages read but never handled.
    pub dropped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, Default)]
struct Counters {
    read: AtomicU64,
    handled: AtomicU64,
    dropped: AtomicU64,
    live_tasks: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> ProcessorStats {
        ProcessorStats {
            read: self.read.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Entry point for spawning message processors.
pub struct MessageProcessor;

impl MessageProcessor {
    /// Spawns the reader and handler tasks and returns a handle to them.
    ///
    /// # Errors
    /// Returns `RuntimeError::InvalidConfig` if the configuration is invalid.
    pub fn spawn<M, R, H>(
        name: impl Into<String>,
        reader: R,
        handler: H,
        config: ProcessorConfig,
    ) -> RuntimeResult<ProcessorHandle>
    where
        M: Send + 'static,
        R: MessageReader<M>,
        H: MessageHandler<M>,
    {
        config.validate()?;

        let id: ProcessorId = PROCESSOR_IDS.next_id().unwrap_or_default();
        let name = name.into();
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let (control_tx, control_rx) = watch::channel(Control::Running);
        let control_tx = Arc::new(control_tx);
        let counters = Arc::new(Counters::default());
        counters.live_tasks.store(2, Ordering::Release);

        let reader_task = ReaderTask {
            name: name.clone(),
            reader,
            tx,
            control_rx,
            counters: Arc::clone(&counters),
        };
        let handler_task = HandlerTask {
            name: name.clone(),
            handler,
            rx,
            control_tx: Arc::clone(&control_tx),
            counters: Arc::clone(&counters),
        };

        debug!(processor = %name, id = %id, capacity = config.queue_capacity, "processor started");
        let tasks = vec![
            tokio::spawn(reader_task.run()),
            tokio::spawn(handler_task.run()),
        ];

        Ok(ProcessorHandle {
            id,
            name,
            control_tx,
            counters,
            tasks: Mutex::new(tasks),
        })
    }
}

/// Handle for controlling a running message processor.
pub struct ProcessorHandle {
    id: ProcessorId,
    name: String,
    control_tx: Arc<watch::Sender<Control>>,
    counters: Arc<Counters>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProcessorHandle {
    /// Returns the processor id.
    #[must_use]
    pub const fn id(&self) -> ProcessorId {
        self.id
    }

    /// Returns the processor name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the reader from pulling new messages. Queued messages are still handled.
    pub fn pause(&self) {
        self.control_tx.send_if_modified(|control| {
            if *control == Control::Running {
                *control = Control::Paused;
                true
            } else {
                false
            }
        });
    }

    /// Resumes a paused reader.
    pub fn resume(&self) {
        self.control_tx.send_if_modified(|control| {
            if *control == Control::Paused {
                *control = Control::Running;
                true
            } else {
                false
            }
        });
    }

    /// Returns whether the processor is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.control_tx.borrow() == Control::Paused
    }

    /// Returns whether either task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.counters.live_tasks.load(Ordering::Acquire) > 0
    }

    /// Returns the current counters.
    #[must_use]
    pub fn stats(&self) -> ProcessorStats {
        self.counters.snapshot()
    }

    /// Stops reading, lets the handler finish queued messages and waits for both tasks.
    pub async fn stop(&self) -> ProcessorStats {
        self.control_tx.send_replace(Control::Stopped);
        self.join().await
    }

    /// Waits for the processor to end on its own.
    ///
    /// Concurrent callers all return only after both tasks have ended.
    pub async fn join(&self) -> ProcessorStats {
        let mut tasks = self.tasks.lock().await;
        let joined = !tasks.is_empty();
        // Popped only once finished, so a cancelled join leaves the handle for the next caller.
        while let Some(task) = tasks.last_mut() {
            let _ = task.await;
            tasks.pop();
        }
        drop(tasks);

        let stats = self.stats();
        if joined {
            info!(
                processor = %self.name,
                read = stats.read,
                handled = stats.handled,
                dropped = stats.dropped,
                "processor finished"
            );
        }
        stats
    }
}

impl Drop for ProcessorHandle {
    fn drop(&mut self) {
        self.control_tx.send_replace(Control::Stopped);
    }
}

struct ReaderTask<M, R> {
    name: String,
    reader: R,
    tx: mpsc::Sender<M>,
    control_rx: watch::Receiver<Control>,
    counters: Arc<Counters>,
}

impl<M: Send + 'static, R: MessageReader<M>> ReaderTask<M, R> {
    async fn run(mut self) {
        loop {
            let control = *self.control_rx.borrow_and_update();
            match control {
                Control::Stopped => break,
                Control::Paused => {
                    if self.control_rx.changed().await.is_err() {
                        break;
                    }
                    continue;
                }
                Control::Running => {}
            }

            // Pausing lets the in-flight read finish; only a stop cancels it.
            let outcome = {
                let mut read = self.reader.read();
                loop {
                    tokio::select! {
                        outcome = &mut read => break Some(outcome),
                        changed = self.control_rx.changed() => {
                            if changed.is_err() || *self.control_rx.borrow() == Control::Stopped {
                                break None;
                            }
                        }
                    }
                }
            };
            let Some(outcome) = outcome else {
                debug!(processor = %self.name, "reader stopped");
                break;
            };

            let message = match outcome {
                ReadOutcome::Message(message) => message,
                ReadOutcome::Finished => {
                    debug!(processor = %self.name, "reader finished");
                    break;
                }
            };
            self.counters.read.fetch_add(1, Ordering::Relaxed);

            if self.tx.send(message).await.is_err() {
                // Handler stopped.
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                break;
            }
        }

        let pending = self.reader.take_pending();
        if !pending.is_empty() {
            debug!(processor = %self.name, pending = pending.len(), "forwarding accepted messages");
        }
        for message in pending {
            self.counters.read.fetch_add(1, Ordering::Relaxed);
            if self.tx.send(message).await.is_err() {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.reader.on_finish().await;
        self.counters.live_tasks.fetch_sub(1, Ordering::AcqRel);
    }
}

struct HandlerTask<M, H> {
    name: String,
    handler: H,
    rx: mpsc::Receiver<M>,
    control_tx: Arc<watch::Sender<Control>>,
    counters: Arc<Counters>,
}

impl<M: Send + 'static, H: MessageHandler<M>> HandlerTask<M, H> {
    async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            self.counters.handled.fetch_add(1, Ordering::Relaxed);
            if self.handler.handle(message).await == HandleOutcome::Stop {
                debug!(processor = %self.name, "handler requested stop");
                self.control_tx.send_replace(Control::Stopped);
                self.rx.close();
                while self.rx.try_recv().is_ok() {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                }
                break;
            }
        }

        self.handler.on_finish().await;
        self.counters.live_tasks.fetch_sub(1, Ordering::AcqRel);
    }
}
