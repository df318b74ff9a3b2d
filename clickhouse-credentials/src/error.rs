//! Plugin error types using thiserror 2.0.
//!
//! Every error carries a kind so the host can decide whether the request
//! needs fixing, the configuration needs fixing, or the whole operation
//! can simply be retried later.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::database::DriverError;
use crate::username::TemplateError;

/// Broad classification of a [`PluginError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad or missing configuration; blocks readiness.
    Configuration,
    /// The request itself is malformed and must be fixed by the caller.
    Validation,
    /// The database could not be reached or refused the login.
    Connectivity,
    /// A statement failed; the transaction was rolled back.
    Execution,
    /// Several independent sub-operations failed.
    Aggregate,
    /// The caller cancelled the request or its deadline passed.
    Interrupted,
}

impl ErrorKind {
    /// Stable lowercase name, used as a log field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Validation => "validation",
            Self::Connectivity => "connectivity",
            Self::Execution => "execution",
            Self::Aggregate => "aggregate",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the credential lifecycle engine.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PluginError {
    /// Invalid connection configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// `username_template` was present but not a string
    #[error("failed to retrieve username_template: {0}")]
    UsernameTemplateLookup(String),

    /// Username template failed to compile
    #[error("unable to initialize username template: {0}")]
    UsernameTemplateCompile(#[source] TemplateError),

    /// Username template failed its dry-run render
    #[error("invalid username template: {0}")]
    UsernameTemplateInvalid(#[source] TemplateError),

    /// Username template failed to render for a request
    #[error("unable to generate username: {0}")]
    UsernameGeneration(#[source] TemplateError),

    /// Operation attempted before a successful initialize
    #[error("connection has not been initialized")]
    NotInitialized,

    /// Request is missing the username
    #[error("missing username")]
    MissingUsername,

    /// Request is missing the new password
    #[error("missing password")]
    MissingPassword,

    /// Update request carried neither a password nor an expiration
    #[error("no changes requested")]
    NoChangesRequested,

    /// Create request carried no creation statements
    #[error("empty creation statements")]
    EmptyCreationStatements,

    /// Request variant this engine deliberately does not perform
    #[error("{0} is not implemented")]
    Unsupported(&'static str),

    /// Connecting, pinging or authenticating failed
    #[error("unable to get connection: {0}")]
    Connection(#[source] DriverError),

    /// A read-only introspection query failed
    #[error("{context}: {source}")]
    Query {
        /// What the query was for
        context: &'static str,
        /// Driver failure
        #[source]
        source: DriverError,
    },

    /// A transaction could not be started
    #[error("unable to start transaction: {0}")]
    BeginTransaction(#[source] DriverError),

    /// A statement failed inside the request transaction
    #[error("failed to execute query: {source}")]
    Execution {
        /// Zero-based position of the statement within the expanded script
        index: usize,
        /// Driver failure
        #[source]
        source: DriverError,
    },

    /// Committing the request transaction failed
    #[error("unable to commit transaction: {0}")]
    Commit(#[source] DriverError),

    /// Several sub-operations failed
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// The caller's cancellation signal fired
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline passed
    #[error("operation deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// An error whose message had secrets scrubbed out of it
    #[error("{message}")]
    Sanitized {
        /// Kind of the original error
        kind: ErrorKind,
        /// Scrubbed message
        message: String,
    },
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

impl PluginError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_)
            | Self::UsernameTemplateLookup(_)
            | Self::UsernameTemplateCompile(_)
            | Self::UsernameTemplateInvalid(_)
            | Self::UsernameGeneration(_)
            | Self::NotInitialized => ErrorKind::Configuration,
            Self::MissingUsername
            | Self::MissingPassword
            | Self::NoChangesRequested
            | Self::EmptyCreationStatements
            | Self::Unsupported(_) => ErrorKind::Validation,
            Self::Connection(_) | Self::Query { .. } | Self::BeginTransaction(_) => {
                ErrorKind::Connectivity
            }
            Self::Execution { .. } | Self::Commit(_) => ErrorKind::Execution,
            Self::Aggregate(_) => ErrorKind::Aggregate,
            Self::Cancelled | Self::DeadlineExceeded(_) => ErrorKind::Interrupted,
            Self::Sanitized { kind, .. } => *kind,
        }
    }

    /// Check if retrying the whole operation later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Aggregate(agg) => agg.errors().iter().all(Self::is_retryable),
            other => matches!(
                other.kind(),
                ErrorKind::Connectivity | ErrorKind::Interrupted
            ),
        }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

/// A list of independent failures reported as one error.
///
/// An empty aggregate means success; use [`AggregateError::into_result`]
/// to turn it into a `Result`.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<PluginError>,
}

impl AggregateError {
    /// Create an empty aggregate.
    #[must_use]
    pub const fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Record the error of a sub-operation, if it failed.
    pub fn push_result(&mut self, result: PluginResult<()>) {
        if let Err(err) = result {
            self.errors.push(err);
        }
    }

    /// Record a failure.
    pub fn push(&mut self, err: PluginError) {
        self.errors.push(err);
    }

    /// Recorded failures, in the order they happened.
    #[must_use]
    pub fn errors(&self) -> &[PluginError] {
        &self.errors
    }

    /// Number of recorded failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// `true` when nothing failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok(())` when empty, the sole error when there is exactly one,
    /// otherwise the aggregate itself.
    pub fn into_result(mut self) -> PluginResult<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(PluginError::Aggregate(self)),
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n\t* {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(PluginError::MissingUsername.to_string(), "missing username");
        assert_eq!(
            PluginError::NoChangesRequested.to_string(),
            "no changes requested"
        );
        assert_eq!(
            PluginError::Unsupported("changing user expiration").to_string(),
            "changing user expiration is not implemented"
        );
    }

    #[test]
    fn test_kinds() {
        assert_eq!(PluginError::MissingPassword.kind(), ErrorKind::Validation);
        assert_eq!(PluginError::NotInitialized.kind(), ErrorKind::Configuration);
        assert_eq!(
            PluginError::Connection(DriverError::connection("refused")).kind(),
            ErrorKind::Connectivity
        );
        assert_eq!(
            PluginError::Execution {
                index: 0,
                source: DriverError::query("syntax error"),
            }
            .kind(),
            ErrorKind::Execution
        );
        assert_eq!(PluginError::Cancelled.kind(), ErrorKind::Interrupted);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(PluginError::Connection(DriverError::connection("timeout")).is_retryable());
        assert!(PluginError::DeadlineExceeded(Duration::from_secs(1)).is_retryable());
        assert!(!PluginError::MissingUsername.is_retryable());
        assert!(!PluginError::invalid_config("bad").is_retryable());
    }

    #[test]
    fn test_empty_aggregate_is_success() {
        let agg = AggregateError::new();
        assert!(agg.is_empty());
        assert!(agg.into_result().is_ok());
    }

    #[test]
    fn test_single_aggregate_unwraps() {
        let mut agg = AggregateError::new();
        agg.push_result(Ok(()));
        agg.push(PluginError::MissingPassword);
        let err = agg.into_result().unwrap_err();
        assert!(matches!(err, PluginError::MissingPassword));
    }

    #[test]
    fn test_multiple_aggregate_keeps_all() {
        let mut agg = AggregateError::new();
        agg.push(PluginError::MissingPassword);
        agg.push(PluginError::Unsupported("changing user expiration"));
        assert_eq!(agg.len(), 2);

        let err = agg.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Aggregate);
        let text = err.to_string();
        assert!(text.starts_with("2 errors occurred:"));
        assert!(text.contains("missing password"));
        assert!(text.contains("changing user expiration is not implemented"));
    }
}
