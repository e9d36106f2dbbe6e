//! Resource delivery simulator.
//!
//! Registers one target per priority, keeps every backlog full and lets the
//! targets compete for a rate-limited deliverer for a fixed duration. Prints
//! each target's share next to the share its priority entitles it to.
//!
//! ```bash
//! delivery-sim --priority 1,2,4 --limit 1048576 --duration-ms 3000
//! JACUZZI_SPEED_LIMIT=65536 delivery-sim --priority 1,1
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use jacuzzi_core::TargetId;
use jacuzzi_flow::{DelivererConfig, DeliveryOutcome, FlowError, ResourceDeliverer, TargetResource};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Simulates targets competing for a rate-limited resource deliverer.
#[derive(Parser, Debug)]
#[command(name = "delivery-sim")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target priorities, one target per value.
    #[arg(long = "priority", value_delimiter = ',', default_value = "1,2,4")]
    priorities: Vec<f32>,

    /// Speed limit in bytes per second. Falls back to `JACUZZI_SPEED_LIMIT`.
    #[arg(long)]
    limit: Option<u64>,

    /// Speed averaging window in milliseconds.
    #[arg(long, default_value = "1000")]
    window_ms: u64,

    /// Size of each resource in bytes.
    #[arg(long, default_value = "4096")]
    chunk_size: usize,

    /// Backlog kept per target.
    #[arg(long, default_value = "32")]
    backlog: usize,

    /// Simulation length in milliseconds.
    #[arg(long, default_value = "2000")]
    duration_ms: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,
}

/// Target that only counts what it receives.
struct CountingTarget {
    bytes: Arc<AtomicU64>,
}

#[async_trait]
impl TargetResource<Bytes> for CountingTarget {
    async fn deliver(&mut self, resource: Bytes) -> DeliveryOutcome {
        self.bytes.fetch_add(resource.len() as u64, Ordering::Relaxed);
        DeliveryOutcome::Accepted
    }
}

/// Tops every backlog up to `backlog` resources.
fn refill(
    deliverer: &ResourceDeliverer<Bytes>,
    targets: &[TargetId],
    chunk: &Bytes,
    backlog: usize,
) -> Result<(), FlowError> {
    for &target in targets {
        let pending = deliverer.pending(target).unwrap_or(backlog);
        for _ in pending..backlog {
            deliverer.submit(target, chunk.clone())?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = DelivererConfig::from_env().with_window_us(args.window_ms * 1000);
    if args.limit.is_some() {
        config = config.with_speed_limit(args.limit);
    }
    config.max_resources_per_target = config.max_resources_per_target.max(args.backlog);
    config.validate()?;

    info!(
        targets = args.priorities.len(),
        speed_limit = ?config.speed_limit,
        chunk_size = args.chunk_size,
        duration_ms = args.duration_ms,
        "starting simulation"
    );

    let deliverer = ResourceDeliverer::spawn(config)?;
    let mut targets = Vec::with_capacity(args.priorities.len());
    let mut counters = Vec::with_capacity(args.priorities.len());
    for (index, &priority) in args.priorities.iter().enumerate() {
        let target = TargetId::new(index as u64 + 1);
        let bytes = Arc::new(AtomicU64::new(0));
        deliverer.add_target(
            target,
            priority,
            CountingTarget {
                bytes: Arc::clone(&bytes),
            },
        )?;
        targets.push(target);
        counters.push(bytes);
    }

    let chunk = Bytes::from(vec![0_u8; args.chunk_size]);
    let deadline = tokio::time::Instant::now() + Duration::from_millis(args.duration_ms);
    let mut ticker = tokio::time::interval(Duration::from_millis(5));
    while tokio::time::Instant::now() < deadline {
        ticker.tick().await;
        refill(&deliverer, &targets, &chunk, args.backlog)?;
        debug!(speed = deliverer.speed(), "refilled");
    }

    let speed = deliverer.speed();
    let stats = deliverer.stop().await;

    let total: u64 = counters.iter().map(|c| c.load(Ordering::Relaxed)).sum();
    let priority_sum: f32 = args.priorities.iter().sum();
    println!("{:<10} {:>9} {:>14} {:>9} {:>9}", "target", "priority", "bytes", "share", "expected");
    for ((target, priority), bytes) in targets.iter().zip(&args.priorities).zip(&counters) {
        let bytes = bytes.load(Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        let share = if total == 0 { 0.0 } else { bytes as f64 / total as f64 };
        println!(
            "{:<10} {:>9.2} {:>14} {:>8.1}% {:>8.1}%",
            target.to_string(),
            priority,
            bytes,
            share * 100.0,
            f64::from(priority / priority_sum) * 100.0,
        );
    }
    println!(
        "delivered {} bytes in {} resources, speed {:.0} B/s over the last window",
        stats.delivered_bytes, stats.delivered_resources, speed
    );
    Ok(())
}
