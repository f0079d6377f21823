//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the logging subsystem
//! - Map configured log targets (stdout, stderr, file) onto subscriber
//!   layers
//!
//! # Design Decisions
//! - Uses the tracing crate for structured logging
//! - One fmt layer per configured target, each with its own level filter;
//!   `RUST_LOG` overrides the configured level
//! - File targets get ANSI colors disabled

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// A logging destination, selected by configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    Stderr,
    File(PathBuf),
}

/// Error for an unparseable log target spec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log target: '{0}'")]
pub struct UnknownTargetError(pub String);

impl FromStr for LogTarget {
    type Err = UnknownTargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(LogTarget::Stdout),
            "stderr" => Ok(LogTarget::Stderr),
            _ => match s.strip_prefix("file:") {
                Some(path) if !path.is_empty() => Ok(LogTarget::File(PathBuf::from(path))),
                _ => Err(UnknownTargetError(s.to_string())),
            },
        }
    }
}

/// Error type for logging initialization.
#[derive(Debug, thiserror::Error)]
pub enum LogInitError {
    #[error("unable to open log file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the subscriber with one layer per target.
///
/// Call once at startup, before any log output.
pub fn init(level: &str, targets: &[LogTarget]) -> Result<(), LogInitError> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    for target in targets {
        let layer = match target {
            LogTarget::Stdout => tracing_subscriber::fmt::layer()
                .with_writer(io::stdout)
                .with_filter(level_filter(level))
                .boxed(),
            LogTarget::Stderr => tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(level_filter(level))
                .boxed(),
            LogTarget::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| LogInitError::OpenFile {
                        path: path.clone(),
                        source,
                    })?;
                tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false)
                    .with_filter(level_filter(level))
                    .boxed()
            }
        };
        layers.push(layer);
    }

    tracing_subscriber::registry().with(layers).init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_targets() {
        assert_eq!("stdout".parse::<LogTarget>().unwrap(), LogTarget::Stdout);
        assert_eq!("stderr".parse::<LogTarget>().unwrap(), LogTarget::Stderr);
        assert_eq!(
            "file:/var/log/relay.log".parse::<LogTarget>().unwrap(),
            LogTarget::File(PathBuf::from("/var/log/relay.log"))
        );
    }

    #[test]
    fn rejects_unknown_targets() {
        assert!("syslog:daemon".parse::<LogTarget>().is_err());
        assert!("file:".parse::<LogTarget>().is_err());
        assert!("".parse::<LogTarget>().is_err());
    }
}
