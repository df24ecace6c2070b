//! Queue transport: client/connector traits, the reconnection policy, and the
//! in-process broker.

mod client;
mod memory;
mod retry;

pub use client::{Connect, Job, JobId, PutOptions, QueueClient};
pub use memory::{MemoryBroker, MemoryClient};
pub use retry::RetryPolicy;
