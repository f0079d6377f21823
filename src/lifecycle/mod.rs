//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGINT/SIGTERM/SIGQUIT → end the run loop
//!     SIGHUP → config reload (configure + reconcile)
//!     SIGUSR1/SIGUSR2 → diagnostic dumps
//! ```
//!
//! # Design Decisions
//! - Signals are translated to events and consumed by the run loop, so
//!   no handler ever touches relay state directly
//! - Shutdown is immediate: relay tasks are aborted, not drained

pub mod signals;

pub use signals::{spawn_signal_listener, ControlEvent};
