//! Queue processor: a message processor fed through a channel.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::ProcessorConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::processor::{MessageHandler, MessageProcessor, MessageReader, ProcessorHandle, ReadOutcome};

/// A [`MessageReader`] that yields whatever arrives on a channel.
///
/// Finishes once every sender has been dropped and the channel is drained.
/// When the processor is stopped, messages still in the channel are handed
/// over through [`MessageReader::take_pending`].
pub struct ChannelReader<M> {
    rx: mpsc::Receiver<M>,
}

impl<M> ChannelReader<M> {
    /// Wraps a receiver.
    #[must_use]
    pub const fn new(rx: mpsc::Receiver<M>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl<M: Send + 'static> MessageReader<M> for ChannelReader<M> {
    async fn read(&mut self) -> ReadOutcome<M> {
        // `recv` is cancel-safe.
        self.rx
            .recv()
            .await
            .map_or(ReadOutcome::Finished, ReadOutcome::Message)
    }

    fn take_pending(&mut self) -> Vec<M> {
        self.rx.close();
        let mut pending = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            pending.push(message);
        }
        pending
    }
}

/// Sending side of a [`QueueProcessor`].
pub struct QueueSender<M> {
    tx: mpsc::Sender<M>,
    capacity: usize,
}

impl<M> Clone for QueueSender<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            capacity: self.capacity,
        }
    }
}

impl<M: Send + 'static> QueueSender<M> {
    /// Enqueues a message, waiting for space.
    ///
    /// # Errors
    /// Returns `RuntimeError::Shutdown` if the processor stopped.
    pub async fn send(&self, message: M) -> RuntimeResult<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| RuntimeError::Shutdown)
    }

    /// Enqueues a message if there is space.
    ///
    /// # Errors
    /// Returns `RuntimeError::QueueFull` if the queue is full, or
    /// `RuntimeError::Shutdown` if the processor stopped.
    pub fn try_send(&self, message: M) -> RuntimeResult<()> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RuntimeError::QueueFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => RuntimeError::Shutdown,
        })
    }

    /// Closes this sender. The processor finishes once every clone is closed
    /// and the queued messages are handled.
    pub fn close(self) {
        drop(self);
    }

    /// Returns whether the processor stopped accepting messages.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Entry point for spawning queue processors.
pub struct QueueProcessor;

impl QueueProcessor {
    /// Spawns a processor handling messages sent through the returned sender.
    ///
    /// The input channel and the internal reader/handler queue both use
    /// `config.queue_capacity`.
    ///
    /// # Errors
    /// Returns `RuntimeError::InvalidConfig` if the configuration is invalid.
    pub fn spawn<M, H>(
        name: impl Into<String>,
        handler: H,
        config: ProcessorConfig,
    ) -> RuntimeResult<(QueueSender<M>, ProcessorHandle)>
    where
        M: Send + 'static,
        H: MessageHandler<M>,
    {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let handle = MessageProcessor::spawn(name, ChannelReader::new(rx), handler, config)?;
        Ok((
            QueueSender {
                tx,
                capacity: config.queue_capacity,
            },
            handle,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::processor::HandleOutcome;

    struct Record(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl MessageHandler<String> for Record {
        async fn handle(&mut self, message: String) -> HandleOutcome {
            let stop = message == "quit";
            self.0.lock().unwrap().push(message);
            if stop {
                HandleOutcome::Stop
            } else {
                HandleOutcome::Continue
            }
        }
    }

    #[tokio::test]
    async fn test_messages_handled_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (sender, handle) =
            QueueProcessor::spawn("order", Record(Arc::clone(&seen)), ProcessorConfig::default())
                .unwrap();

        for word in ["a", "b", "c"] {
            sender.send(word.to_string()).await.unwrap();
        }
        sender.close();

        let stats = handle.join().await;
        assert_eq!(stats.handled, 3);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_handler_stop_closes_queue() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (sender, handle) =
            QueueProcessor::spawn("quit", Record(Arc::clone(&seen)), ProcessorConfig::default())
                .unwrap();

        sender.send("quit".to_string()).await.unwrap();
        handle.join().await;

        assert!(sender.is_closed());
        assert_eq!(
            sender.send("late".to_string()).await,
            Err(RuntimeError::Shutdown)
        );
    }

    struct Count(Arc<Mutex<u32>>);

    #[async_trait]
    impl MessageHandler<u32> for Count {
        async fn handle(&mut self, _message: u32) -> HandleOutcome {
            *self.0.lock().unwrap() += 1;
            HandleOutcome::Continue
        }
    }

    #[tokio::test]
    async fn test_stop_handles_accepted_messages() {
        let count = Arc::new(Mutex::new(0));
        let (sender, handle) =
            QueueProcessor::spawn("accepted", Count(Arc::clone(&count)), ProcessorConfig::default())
                .unwrap();

        for n in 0..8 {
            sender.send(n).await.unwrap();
        }
        let stats = handle.stop().await;

        assert_eq!(stats.read, 8);
        assert_eq!(stats.handled, 8);
        assert_eq!(stats.dropped, 0);
        assert_eq!(*count.lock().unwrap(), 8);
        assert!(sender.is_closed());
    }

    #[tokio::test]
    async fn test_handler_stop_counts_accepted_messages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (sender, handle) =
            QueueProcessor::spawn("counted", Record(Arc::clone(&seen)), ProcessorConfig::default())
                .unwrap();

        sender.send("quit".to_string()).await.unwrap();
        let mut accepted = 1;
        for word in ["x", "y", "z"] {
            // Rejected once the handler has stopped.
            if sender.send(word.to_string()).await.is_ok() {
                accepted += 1;
            }
        }
        let stats = handle.join().await;

        assert_eq!(stats.handled, 1);
        assert_eq!(stats.read, accepted);
        assert_eq!(stats.dropped, accepted - 1);
        assert_eq!(*seen.lock().unwrap(), vec!["quit"]);
    }

    /// Holds each message until a permit is released.
    struct Blocked(Arc<tokio::sync::Semaphore>);

    #[async_trait]
    impl MessageHandler<u8> for Blocked {
        async fn handle(&mut self, _message: u8) -> HandleOutcome {
            if let Ok(permit) = self.0.acquire().await {
                permit.forget();
            }
            HandleOutcome::Continue
        }
    }

    #[tokio::test]
    async fn test_try_send_reports_full() {
        let release = Arc::new(tokio::sync::Semaphore::new(0));
        let (sender, handle) = QueueProcessor::spawn(
            "full",
            Blocked(Arc::clone(&release)),
            ProcessorConfig::new(1),
        )
        .unwrap();

        // Messages pile up in the handler, the internal queue, the reader and
        // the input channel until the input channel rejects one.
        let mut accepted: u8 = 0;
        let err = loop {
            match sender.try_send(accepted) {
                Ok(()) => accepted += 1,
                Err(e) => break e,
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(err, RuntimeError::QueueFull { capacity: 1 });
        assert!(accepted >= 1);

        drop(sender);
        release.add_permits(usize::from(accepted));
        let stats = handle.join().await;
        assert_eq!(stats.handled, u64::from(accepted));
        assert_eq!(stats.dropped, 0);
    }
}
