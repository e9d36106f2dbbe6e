//! A queue processor feeding a daemon that drains work through pooled
//! connections, with a timer nudging the daemon.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jacuzzi_runtime::{
    Daemon, DaemonAction, DaemonConfig, DaemonHandle, HandleOutcome, MessageHandler, ObjectPool,
    PoolConfig, ProcessorConfig, QueueProcessor, RuntimeError, Timer, TimerAction, TimerOutcome,
};

#[derive(Default)]
struct Connection {
    sent: u64,
}

/// Moves pending items to `done`, failing the first `failures` attempts.
struct Drainer {
    pending: Arc<Mutex<Vec<u32>>>,
    done: Arc<Mutex<Vec<u32>>>,
    pool: ObjectPool<Connection>,
    failures: u32,
}

#[async_trait]
impl DaemonAction for Drainer {
    async fn solve_state(&mut self) -> bool {
        if self.failures > 0 {
            self.failures -= 1;
            return false;
        }
        let Ok(mut connection) = self.pool.acquire().await else {
            return false;
        };
        let batch: Vec<u32> = std::mem::take(&mut *self.pending.lock().unwrap());
        connection.sent += batch.len() as u64;
        self.done.lock().unwrap().extend(batch);
        true
    }
}

/// Queues each message for the daemon and signals it.
struct Enqueue {
    pending: Arc<Mutex<Vec<u32>>>,
    daemon: DaemonHandle,
}

#[async_trait]
impl MessageHandler<u32> for Enqueue {
    async fn handle(&mut self, message: u32) -> HandleOutcome {
        self.pending.lock().unwrap().push(message);
        match self.daemon.state_change() {
            Ok(()) => HandleOutcome::Continue,
            Err(_) => HandleOutcome::Stop,
        }
    }
}

fn pool() -> ObjectPool<Connection> {
    ObjectPool::new(PoolConfig::for_testing(), || {
        Ok::<_, std::convert::Infallible>(Connection::default())
    })
    .unwrap()
}

#[tokio::test]
async fn test_processor_feeds_daemon() {
    let pending = Arc::new(Mutex::new(Vec::new()));
    let done = Arc::new(Mutex::new(Vec::new()));
    let pool = pool();
    let daemon = Daemon::spawn(
        Drainer {
            pending: Arc::clone(&pending),
            done: Arc::clone(&done),
            pool: pool.clone(),
            failures: 0,
        },
        DaemonConfig::for_testing(),
    )
    .unwrap();

    let (sender, processor) = QueueProcessor::spawn(
        "enqueue",
        Enqueue {
            pending: Arc::clone(&pending),
            daemon: daemon.clone(),
        },
        ProcessorConfig::for_testing(),
    )
    .unwrap();

    for n in 0..100 {
        sender.send(n).await.unwrap();
    }
    sender.close();
    let stats = processor.join().await;
    assert_eq!(stats.handled, 100);

    daemon.block_until_solved().await.unwrap();
    assert_eq!(*done.lock().unwrap(), (0..100).collect::<Vec<u32>>());
    assert!(pending.lock().unwrap().is_empty());

    // Rounds coalesce: never more than one per message.
    assert!(daemon.rounds() >= 1);
    assert!(daemon.rounds() <= 100);

    // The single connection was reused for every round.
    let pool_stats = pool.stats();
    assert_eq!(pool_stats.created, 1);
    assert_eq!(pool_stats.in_use, 0);

    daemon.stop().await;
    assert_eq!(daemon.state_change(), Err(RuntimeError::Shutdown));
}

#[tokio::test(start_paused = true)]
async fn test_daemon_retries_until_solved() {
    let pending = Arc::new(Mutex::new(vec![1, 2, 3]));
    let done = Arc::new(Mutex::new(Vec::new()));
    let daemon = Daemon::spawn(
        Drainer {
            pending: Arc::clone(&pending),
            done: Arc::clone(&done),
            pool: pool(),
            failures: 2,
        },
        DaemonConfig::new(Duration::from_millis(100)),
    )
    .unwrap();

    daemon.state_change().unwrap();
    daemon.block_until_solved().await.unwrap();

    assert_eq!(daemon.rounds(), 3);
    assert_eq!(*done.lock().unwrap(), vec![1, 2, 3]);
    assert!(!daemon.is_solving());
    daemon.stop().await;
}

/// Signals the daemon on every tick, stopping after `ticks`.
struct Nudge {
    daemon: DaemonHandle,
    ticks: Arc<AtomicU64>,
    limit: u64,
}

#[async_trait]
impl TimerAction for Nudge {
    async fn wake_up(&mut self) -> TimerOutcome {
        let ticks = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        if self.daemon.state_change().is_err() || ticks >= self.limit {
            TimerOutcome::Stop
        } else {
            TimerOutcome::Repeat
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_timer_nudges_daemon() {
    let pending = Arc::new(Mutex::new(Vec::new()));
    let done = Arc::new(Mutex::new(Vec::new()));
    let daemon = Daemon::spawn(
        Drainer {
            pending: Arc::clone(&pending),
            done: Arc::clone(&done),
            pool: pool(),
            failures: 0,
        },
        DaemonConfig::for_testing(),
    )
    .unwrap();

    let ticks = Arc::new(AtomicU64::new(0));
    let timer = Timer::spawn(
        Duration::from_secs(1),
        Nudge {
            daemon: daemon.clone(),
            ticks: Arc::clone(&ticks),
            limit: 3,
        },
    );

    for n in 0..3 {
        pending.lock().unwrap().push(n);
        tokio::time::sleep(Duration::from_millis(1_100)).await;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(ticks.load(Ordering::SeqCst), 3);
    assert!(!timer.is_running());
    daemon.block_until_solved().await.unwrap();
    assert_eq!(*done.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(daemon.rounds(), 3);
    daemon.stop().await;
}
