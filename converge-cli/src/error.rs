//! CLI-specific error types and exit code mapping

use converge_core::error::ConvergeError;
use converge_harness::HarnessError;

/// CLI-specific error type.
///
/// Each variant carries enough context for a user-friendly message.
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// The scenario failed at a stage other than verification timing.
    #[error("scenario failed: {0}")]
    Scenario(String),

    /// A poll ran past its deadline without converging.
    #[error("did not converge: {0}")]
    Convergence(String),

    /// Teardown failed; resources may remain on the control plane.
    #[error("cleanup failed: {0}")]
    Cleanup(String),

    /// Interrupted by the user.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from converge-core.
    #[error("{0}")]
    Core(#[from] ConvergeError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                                 |
    /// |------|-----------------------------------------|
    /// | 0    | Success                                 |
    /// | 1    | Scenario / command failure              |
    /// | 2    | Configuration error                     |
    /// | 3    | Cleanup failure                         |
    /// | 4    | Deadline exceeded / did not converge    |
    /// | 10   | IO error                                |
    /// | 130  | Cancelled (Ctrl-C)                      |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Core(ConvergeError::Config(_)) => 2,
            Self::Cleanup(_) => 3,
            Self::Convergence(_) => 4,
            Self::Io(_) | Self::Core(ConvergeError::Io(_)) => 10,
            Self::Cancelled(_) => 130,
            Self::JsonSerialize(_) | Self::Command(_) | Self::Scenario(_) => 1,
        }
    }
}

impl From<HarnessError> for CliError {
    fn from(e: HarnessError) -> Self {
        let msg = e.to_string();
        categorize(&e, msg)
    }
}

/// Pick the variant from the first failure; `CleanupFailed` follows its primary error.
fn categorize(e: &HarnessError, msg: String) -> CliError {
    match e {
        HarnessError::CleanupFailed { primary, .. } => categorize(primary, msg),
        HarnessError::Config { .. } => CliError::Config(msg),
        HarnessError::Deprovision { .. } | HarnessError::ConfirmationTimeout { .. } => {
            CliError::Cleanup(msg)
        }
        HarnessError::DeadlineExceeded { .. } | HarnessError::NotConverged(_) => {
            CliError::Convergence(msg)
        }
        HarnessError::Cancelled(_) => CliError::Cancelled(msg),
        _ => CliError::Scenario(msg),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_exit_code_config_error() {
        let err = CliError::Config("test error".to_owned());
        assert_eq!(err.exit_code(), 2, "config error should return exit code 2");
    }

    #[test]
    fn test_exit_code_core_config_error() {
        use converge_core::error::ConfigError;
        let err = CliError::Core(ConvergeError::Config(ConfigError::FileNotFound {
            path: "converge.toml".to_owned(),
        }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = CliError::Io(io_err);
        assert_eq!(err.exit_code(), 10, "io error should return exit code 10");
    }

    #[test]
    fn test_exit_code_command_error() {
        let err = CliError::Command("test error".to_owned());
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_deadline_maps_to_convergence() {
        let err: CliError = HarnessError::DeadlineExceeded {
            label: "replicated-policy".to_owned(),
            deadline: Duration::from_secs(60),
            attempts: 61,
            last_error: None,
        }
        .into();
        assert!(matches!(err, CliError::Convergence(_)));
        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().contains("replicated-policy"));
    }

    #[test]
    fn test_cleanup_failure_follows_primary_error() {
        let err: CliError = HarnessError::CleanupFailed {
            primary: Box::new(HarnessError::ControlPlane("apply rejected".to_owned())),
            cleanup: vec![HarnessError::ConfirmationTimeout {
                scope: "test-a".to_owned(),
                deadline: Duration::from_secs(120),
            }],
        }
        .into();
        assert!(matches!(err, CliError::Scenario(_)));
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("apply rejected"));
        assert!(err.to_string().contains("cleanup also failed"));
    }

    #[test]
    fn test_stage_deadline_with_cleanup_timeout_is_convergence() {
        let err: CliError = HarnessError::CleanupFailed {
            primary: Box::new(HarnessError::DeadlineExceeded {
                label: "replicated-policy".to_owned(),
                deadline: Duration::from_secs(60),
                attempts: 61,
                last_error: None,
            }),
            cleanup: vec![HarnessError::ConfirmationTimeout {
                scope: "test-a".to_owned(),
                deadline: Duration::from_secs(120),
            }],
        }
        .into();
        assert!(matches!(err, CliError::Convergence(_)));
        assert_eq!(err.exit_code(), 4);
        let msg = err.to_string();
        assert!(msg.starts_with("did not converge:"));
        assert!(msg.contains("replicated-policy"));
        assert!(msg.contains("test-a"));
    }

    #[test]
    fn test_cancelled_run_with_cleanup_failure_keeps_cancel_code() {
        let err: CliError = HarnessError::CleanupFailed {
            primary: Box::new(HarnessError::Cancelled("interrupted".to_owned())),
            cleanup: vec![HarnessError::ControlPlane("delete refused".to_owned())],
        }
        .into();
        assert_eq!(err.exit_code(), 130);
    }

    #[test]
    fn test_confirmation_timeout_maps_to_cleanup() {
        let err: CliError = HarnessError::ConfirmationTimeout {
            scope: "test-a".to_owned(),
            deadline: Duration::from_secs(120),
        }
        .into();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_shape_failure_maps_to_scenario() {
        let err: CliError = HarnessError::ShapeAssertion {
            object: "policies/test-a/root".to_owned(),
            path: "spec.policy-templates".to_owned(),
            reason: "expected 1 element(s), found 2".to_owned(),
        }
        .into();
        assert!(matches!(err, CliError::Scenario(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_cancelled_exit_code() {
        let err: CliError = HarnessError::Cancelled("interrupted".to_owned()).into();
        assert_eq!(err.exit_code(), 130);
    }

    #[test]
    fn test_harness_config_maps_to_config() {
        let err: CliError = HarnessError::Config {
            field: "verify".to_owned(),
            reason: "at least one verify stage is required".to_owned(),
        }
        .into();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_error_display_config() {
        let err = CliError::Config("invalid TOML syntax".to_owned());
        let display_str = format!("{}", err);
        assert!(display_str.contains("configuration error"));
        assert!(display_str.contains("invalid TOML syntax"));
    }
}
