//! # Demo: scale
//!
//! Runtime pool scaling driven by OS signals, with a steady stream of slow
//! jobs so the effect is visible.
//!
//! Demonstrates how to:
//! - Keep a producer task enqueueing while the daemon runs.
//! - Grow/shrink the pool with `TTIN`/`TTOU`, park it with `WINCH`.
//! - Inspect the pool with `USR1`.
//!
//! ## Run
//! ```bash
//! cargo run --example scale
//! kill -TTIN <pid>    # one more runner
//! kill -TTOU <pid>    # one fewer runner
//! kill -WINCH <pid>   # scale to zero
//! kill -USR1 <pid>    # pool snapshot
//! kill -QUIT <pid>    # graceful shutdown
//! ```

use std::sync::Arc;
use std::time::Duration;

use jobvisor::{
    enqueue, Config, HandlerFn, HandlerRegistry, JobError, MemoryBroker, PutOptions, Supervisor,
};
use serde_json::{json, Value};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,jobvisor=debug".into()),
        )
        .init();

    let registry = Arc::new(HandlerRegistry::new());
    registry.register(
        "stream.tick",
        HandlerFn::arc(|args: Value| async move {
            tokio::time::sleep(Duration::from_millis(750)).await;
            info!("[stream.tick] done {args}");
            Ok::<_, JobError>(())
        }),
    );

    let broker = MemoryBroker::new();

    // steady producer: one job every 250ms
    let producer_broker = broker.clone();
    tokio::spawn(async move {
        let mut producer = producer_broker.client();
        let mut n = 0u64;
        loop {
            n += 1;
            let _ = enqueue(
                &mut producer,
                "stream.tick",
                json!({ "n": n }),
                &PutOptions::default(),
            )
            .await;
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    });

    info!(
        pid = std::process::id(),
        "scale with TTIN/TTOU, park with WINCH, snapshot with USR1, stop with QUIT"
    );
    let mut config = Config::default();
    config.runner_count = 2;
    config.patience = Duration::from_secs(10);

    Supervisor::new(config, registry, Arc::new(broker)).run().await?;
    Ok(())
}
