//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGHUP, SIGUSR1, SIGUSR2, SIGINT,
//!   SIGTERM, SIGQUIT)
//! - Translate signals into control events for the run loop
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers config reload, not shutdown
//! - SIGUSR1/SIGUSR2 trigger read-only diagnostic dumps

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

/// Events the run loop consumes from its environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Re-read the config file and reconcile listeners (SIGHUP).
    Reload,
    /// Log the listener inventory (SIGUSR1).
    DumpListeners,
    /// Log the connection inventory (SIGUSR2).
    DumpConnections,
    /// End the run loop (SIGINT, SIGTERM, SIGQUIT).
    Shutdown,
}

/// Register handlers and forward signals as control events.
///
/// The forwarding task ends after a terminate signal or once the
/// receiver is dropped.
pub fn spawn_signal_listener() -> std::io::Result<mpsc::UnboundedReceiver<ControlEvent>> {
    let mut hangup = signal(SignalKind::hangup())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = hangup.recv() => ControlEvent::Reload,
                _ = usr1.recv() => ControlEvent::DumpListeners,
                _ = usr2.recv() => ControlEvent::DumpConnections,
                _ = interrupt.recv() => ControlEvent::Shutdown,
                _ = terminate.recv() => ControlEvent::Shutdown,
                _ = quit.recv() => ControlEvent::Shutdown,
            };
            tracing::debug!(?event, "signal received");
            let stop = event == ControlEvent::Shutdown;
            if tx.send(event).is_err() || stop {
                break;
            }
        }
    });
    Ok(rx)
}
