//! # Demo: jack
//!
//! The smallest end-to-end run: register a handler, enqueue a few jobs on the
//! in-process broker, and let the daemon work them.
//!
//! Demonstrates how to:
//! - Register a handler plus global before/error hooks.
//! - Enqueue `[name, args]` payloads with [`jobvisor::enqueue`].
//! - Run the [`jobvisor::Supervisor`] until a shutdown signal.
//!
//! ## Run
//! ```bash
//! cargo run --example jack
//! # then: Ctrl-C (immediate) or `kill -QUIT <pid>` (graceful)
//! ```

use std::sync::Arc;

use jobvisor::{
    enqueue, Config, HandlerFn, HandlerRegistry, HookFn, JobError, MemoryBroker, PutOptions,
    Supervisor,
};
use serde_json::{json, Value};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // 1) Register handlers and hooks
    let registry = Arc::new(HandlerRegistry::new());
    registry.register(
        "jack.work",
        HandlerFn::arc(|args: Value| async move {
            info!("[jack.work] {args}");
            Ok::<_, JobError>(())
        }),
    );
    registry.before(
        None,
        HookFn::arc(|ctx| async move {
            info!("about to work {} (job {})", ctx.name, ctx.job);
            Ok(())
        }),
    );

    // 2) Produce a few jobs on the in-process broker
    let broker = MemoryBroker::new();
    let mut producer = broker.client();
    for i in 0..5 {
        enqueue(
            &mut producer,
            "jack.work",
            json!({ "val": i }),
            &PutOptions::default(),
        )
        .await?;
    }

    // 3) Run the daemon
    info!(pid = std::process::id(), "send QUIT to stop gracefully");
    let mut config = Config::default();
    config.runner_count = 2;

    Supervisor::new(config, registry, Arc::new(broker)).run().await?;
    Ok(())
}
