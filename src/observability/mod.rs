//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce structured log events (tracing)
//!     → logging.rs fans them out to the configured targets
//!        (stdout, stderr, file)
//!
//! Diagnostics on demand:
//!     SIGUSR1/SIGUSR2 → registry dumps through the same log pipeline
//! ```
//!
//! # Design Decisions
//! - Logging is fire-and-forget and never influences relay control flow
//! - Target selection mirrors the config: an ordered list processed
//!   uniformly

pub mod logging;

pub use logging::{LogTarget, UnknownTargetError};
