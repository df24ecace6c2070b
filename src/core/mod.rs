//! Runtime core: the runner dispatch loop, the pool that owns runners, and
//! the supervising master loop.

pub(crate) mod pool;
pub(crate) mod runner;
mod supervisor;

pub use supervisor::Supervisor;
