//! Error types for key reconciliation.
//!
//! Every fatal condition aborts the whole reconciliation. Errors are
//! categorized so callers can decide how to present them and whether a
//! retry at their level is worthwhile; the reconciler itself never retries.

use std::fmt;
use std::io;

use crate::types::Diagnostics;

/// Result type alias for key reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of reconciliation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The remote key service could not be reached.
    Network,
    /// The remote key service answered with a non-success status.
    RemoteStatus,
    /// An external command failed or could not be run.
    Command,
    /// Parameters or configuration are inconsistent.
    Config,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network)
    }

    /// Get a user-friendly description of this error category.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "Network connectivity issue",
            Self::RemoteStatus => "Remote key service rejected the request",
            Self::Command => "Key tool command failed",
            Self::Config => "Invalid parameters",
        }
    }

    /// Get actionable advice for resolving this error category.
    #[must_use]
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Network => "Check your internet connection and try again",
            Self::RemoteStatus => "Verify the remote user name publishes a public key",
            Self::Command => "Inspect the trace below for the failing command and its stderr",
            Self::Config => "Check the command-line options and configuration file",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur while reconciling a key.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No response could be obtained from the remote key service.
    #[error("failed to fetch {url}: {message}")]
    Transport {
        /// URL that was requested.
        url: String,
        /// Underlying transport error.
        message: String,
    },

    /// The remote key service answered with a status other than 200.
    #[error("request to {url} failed with HTTP {status}: {body}")]
    RemoteStatus {
        /// URL that was requested.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body or status message.
        body: String,
    },

    /// The converging command exited nonzero.
    #[error("command failed with exit code {}: {}", .0.last_record.exit_code, .0.last_record.stderr.trim())]
    CommandFailure(Box<Diagnostics>),

    /// The external process could not be started.
    #[error("failed to execute {command}: {source}")]
    Spawn {
        /// Rendered command line.
        command: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// A rendered command cannot be executed as-is.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The desired-state parameters violate their contract.
    #[error("invalid desired state: {0}")]
    InvalidDesiredState(String),

    /// A configured output pattern is not a valid regular expression.
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        /// Pattern as configured.
        pattern: String,
        /// Regex compiler message.
        message: String,
    },

    /// The key tool path does not resolve to an executable.
    #[error("key tool not found: {0}")]
    ToolNotFound(String),

    /// A step failed before the converging command produced a record.
    ///
    /// Wraps the underlying error together with the trace collected up to
    /// the failure.
    #[error("{cause}")]
    Aborted {
        /// The error that stopped the run.
        cause: Box<Error>,
        /// Commands, last record and trace up to the failure.
        diagnostics: Box<Diagnostics>,
    },
}

impl Error {
    /// Attach the diagnostics collected so far to an error.
    ///
    /// Errors that already carry diagnostics are returned unchanged.
    pub fn with_diagnostics(self, diagnostics: Diagnostics) -> Self {
        match self {
            Error::CommandFailure(_) | Error::Aborted { .. } => self,
            cause => Error::Aborted {
                cause: Box::new(cause),
                diagnostics: Box::new(diagnostics),
            },
        }
    }

    /// The underlying error, looking through [`Error::Aborted`].
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Error::Aborted { cause, .. } => cause.root(),
            other => other,
        }
    }

    /// Get the error category.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Transport { .. } => ErrorCategory::Network,
            Error::RemoteStatus { .. } => ErrorCategory::RemoteStatus,
            Error::CommandFailure(_) | Error::Spawn { .. } | Error::InvalidCommand(_) => {
                ErrorCategory::Command
            }
            Error::InvalidDesiredState(_)
            | Error::InvalidPattern { .. }
            | Error::ToolNotFound(_) => ErrorCategory::Config,
            Error::Aborted { cause, .. } => cause.category(),
        }
    }

    /// Whether this error is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Diagnostics attached to the failure, if any.
    #[must_use]
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            Error::CommandFailure(diag) => Some(diag),
            Error::Aborted { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CommandRecord;
    use std::collections::BTreeMap;

    #[test]
    fn test_error_category_retryable() {
        assert!(ErrorCategory::Network.is_retryable());
        assert!(!ErrorCategory::RemoteStatus.is_retryable());
        assert!(!ErrorCategory::Command.is_retryable());
        assert!(!ErrorCategory::Config.is_retryable());
    }

    #[test]
    fn test_error_category_advice() {
        assert!(!ErrorCategory::Network.advice().is_empty());
        assert!(!ErrorCategory::Command.advice().is_empty());
        assert!(format!("{}", ErrorCategory::Network).contains("Network"));
    }

    #[test]
    fn test_remote_status_display() {
        let err = Error::RemoteStatus {
            url: "https://keybase.io/nobody/pgp_keys.asc".to_string(),
            status: 404,
            body: "not found".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("404"));
        assert!(display.contains("nobody"));
        assert_eq!(err.category(), ErrorCategory::RemoteStatus);
    }

    #[test]
    fn test_transport_is_retryable() {
        let err = Error::Transport {
            url: "https://keybase.io/alice/pgp_keys.asc".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(err.is_retryable());
        assert!(err.diagnostics().is_none());
    }

    #[test]
    fn test_command_failure_carries_diagnostics() {
        let err = Error::CommandFailure(Box::new(Diagnostics {
            commands_used: BTreeMap::new(),
            last_record: CommandRecord::new(2, "", "gpg: no valid OpenPGP data found.\n"),
            trace: vec!["command: /usr/bin/gpg --batch --import".to_string()],
        }));
        assert_eq!(err.category(), ErrorCategory::Command);
        assert!(err.to_string().contains("exit code 2"));
        assert!(err.to_string().contains("no valid OpenPGP data"));
        assert_eq!(err.diagnostics().map(|d| d.trace.len()), Some(1));
    }

    #[test]
    fn test_with_diagnostics_wraps_once() {
        let diagnostics = Diagnostics {
            commands_used: BTreeMap::new(),
            last_record: CommandRecord::default(),
            trace: vec!["fetching https://keybase.io/alice/pgp_keys.asc".to_string()],
        };
        let err = Error::Transport {
            url: "https://keybase.io/alice/pgp_keys.asc".to_string(),
            message: "connection refused".to_string(),
        }
        .with_diagnostics(diagnostics.clone());

        assert!(matches!(err.root(), Error::Transport { .. }));
        assert_eq!(err.category(), ErrorCategory::Network);
        assert!(err.is_retryable());
        assert!(err.to_string().starts_with("failed to fetch"));
        assert_eq!(err.diagnostics().map(|d| d.trace.len()), Some(1));

        let rewrapped = err.with_diagnostics(Diagnostics::default());
        assert_eq!(rewrapped.diagnostics().map(|d| d.trace.len()), Some(1));
    }
}
