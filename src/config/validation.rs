//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check each listener carries the fields resolution will need
//! - Detect duplicate local endpoint specs
//! - Validate value ranges (buffer size > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before a config is accepted into the system

use crate::config::schema::RelayConfig;
use crate::observability::logging::LogTarget;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("buffer-size must be greater than zero")]
    ZeroBufferSize,
    #[error("no listeners defined")]
    NoListeners,
    #[error("listener #{0}: no local port specified")]
    MissingLocalPort(usize),
    #[error("listener #{0}: no remote address specified")]
    MissingRemoteAddr(usize),
    #[error("listener #{0}: no remote port specified")]
    MissingRemotePort(usize),
    #[error("listener #{index}: duplicate local endpoint spec (same as listener #{first})")]
    DuplicateLocal { index: usize, first: usize },
    #[error("unknown log target: '{0}'")]
    UnknownLogTarget(String),
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.buffer_size == 0 {
        errors.push(ValidationError::ZeroBufferSize);
    }
    if config.listen.is_empty() {
        errors.push(ValidationError::NoListeners);
    }

    for (i, spec) in config.listen.iter().enumerate() {
        if spec.local_port.is_none() {
            errors.push(ValidationError::MissingLocalPort(i));
        }
        if spec.remote_addr.is_none() {
            errors.push(ValidationError::MissingRemoteAddr(i));
        }
        if spec.remote_port.is_none() {
            errors.push(ValidationError::MissingRemotePort(i));
        }
        for (j, earlier) in config.listen[..i].iter().enumerate() {
            if earlier.local_addr == spec.local_addr
                && earlier.local_port == spec.local_port
                && earlier.local_family == spec.local_family
            {
                errors.push(ValidationError::DuplicateLocal { index: i, first: j });
                break;
            }
        }
    }

    for target in &config.log.targets {
        if target.parse::<LogTarget>().is_err() {
            errors.push(ValidationError::UnknownLogTarget(target.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ListenSpec;

    fn listener(port: u16) -> ListenSpec {
        ListenSpec {
            local_addr: Some("127.0.0.1".into()),
            local_port: Some(port),
            remote_addr: Some("127.0.0.1".into()),
            remote_port: Some(port + 1),
            ..Default::default()
        }
    }

    #[test]
    fn valid_config_passes() {
        let config = RelayConfig {
            listen: vec![listener(9000), listener(9100)],
            ..Default::default()
        };
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn collects_all_errors() {
        let config = RelayConfig {
            buffer_size: 0,
            listen: vec![ListenSpec::default()],
            ..Default::default()
        };
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::ZeroBufferSize));
        assert!(errors.contains(&ValidationError::MissingLocalPort(0)));
        assert!(errors.contains(&ValidationError::MissingRemoteAddr(0)));
        assert!(errors.contains(&ValidationError::MissingRemotePort(0)));
    }

    #[test]
    fn duplicate_local_endpoint_rejected() {
        let config = RelayConfig {
            listen: vec![listener(9000), listener(9000)],
            ..Default::default()
        };
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::DuplicateLocal { index: 1, first: 0 }]
        );
    }

    #[test]
    fn unknown_log_target_rejected() {
        let mut config = RelayConfig {
            listen: vec![listener(9000)],
            ..Default::default()
        };
        config.log.targets = vec!["pigeon".into()];
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::UnknownLogTarget("pigeon".into())]);
    }
}
