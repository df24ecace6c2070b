//! # OS signal handling.
//!
//! Translates process signals into [`ControlEvent`]s on an unbounded mpsc
//! channel. The signal listener does nothing but tag and enqueue — all real
//! work happens back in the supervisor's single-threaded master loop, which
//! drains the channel strictly in arrival order. A send doubles as the
//! wakeup for the master's bounded wait.
//!
//! ## Signal map (Unix)
//! - `SIGQUIT` — graceful shutdown (finish in-flight jobs, bounded by patience)
//! - `SIGTERM` / `SIGINT` — immediate shutdown
//! - `SIGWINCH` — set the desired runner count to zero
//! - `SIGTTIN` — one more runner
//! - `SIGTTOU` — one fewer runner
//! - `SIGUSR1` — log a pool state snapshot (diagnostic only)
//!
//! **Windows platforms:** only `Ctrl-C` → immediate shutdown.

use tokio::sync::mpsc;
use tracing::debug;

/// Control events the master loop acts on, in arrival order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ControlEvent {
    /// Stop accepting work, let in-flight jobs finish, then exit.
    GracefulShutdown,
    /// Stop now; in-flight jobs are released back to the broker.
    ImmediateShutdown,
    /// Set the desired runner count to zero.
    ScaleToZero,
    /// Increment the desired runner count.
    IncrementRunners,
    /// Decrement the desired runner count (floor zero).
    DecrementRunners,
    /// Log a snapshot of the runner pool.
    DumpState,
}

pub(crate) type ControlSender = mpsc::UnboundedSender<ControlEvent>;
pub(crate) type ControlReceiver = mpsc::UnboundedReceiver<ControlEvent>;

/// Creates the control event channel.
pub(crate) fn channel() -> (ControlSender, ControlReceiver) {
    mpsc::unbounded_channel()
}

/// Installs the signal listeners and spawns the forwarding task.
///
/// Each installed stream is independent; the forwarding task exits once the
/// receiving side of the channel is gone.
#[cfg(unix)]
pub(crate) fn install(tx: ControlSender) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut quit = signal(SignalKind::quit())?;
    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut winch = signal(SignalKind::from_raw(libc::SIGWINCH))?;
    let mut ttin = signal(SignalKind::from_raw(libc::SIGTTIN))?;
    let mut ttou = signal(SignalKind::from_raw(libc::SIGTTOU))?;
    let mut usr1 = signal(SignalKind::from_raw(libc::SIGUSR1))?;

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = quit.recv() => ControlEvent::GracefulShutdown,
                _ = term.recv() => ControlEvent::ImmediateShutdown,
                _ = int.recv() => ControlEvent::ImmediateShutdown,
                _ = winch.recv() => ControlEvent::ScaleToZero,
                _ = ttin.recv() => ControlEvent::IncrementRunners,
                _ = ttou.recv() => ControlEvent::DecrementRunners,
                _ = usr1.recv() => ControlEvent::DumpState,
            };
            debug!(?event, "signal received");
            if tx.send(event).is_err() {
                break;
            }
        }
    });
    Ok(())
}

/// Installs the signal listeners and spawns the forwarding task.
#[cfg(not(unix))]
pub(crate) fn install(tx: ControlSender) -> std::io::Result<()> {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                break;
            }
            debug!("ctrl-c received");
            if tx.send(ControlEvent::ImmediateShutdown).is_err() {
                break;
            }
        }
    });
    Ok(())
}
