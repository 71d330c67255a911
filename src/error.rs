//! Unified error handling for the postqueue crate
//!
//! Each subsystem keeps its own error enum. [`Error`] wraps them so callers
//! that cross module boundaries (the binary, embedding applications) can use
//! a single type and still ask how a failure should be handled.
//!
//! # Usage
//!
//! ```rust,ignore
//! use postqueue::error::{Error, ErrorCategory, ScheduleErrorTrait};
//!
//! fn report(err: &Error) {
//!     match err.category() {
//!         ErrorCategory::Config => eprintln!("Fix configuration: {err}"),
//!         _ if err.is_recoverable() => eprintln!("Retry later: {err}"),
//!         _ => eprintln!("Fatal: {err}"),
//!     }
//! }
//! ```

use thiserror::Error;

pub use crate::publisher::{FailureKind, PublishError};
pub use crate::scheduler::error::SchedulerError;
pub use crate::storage::StorageError;

/// Common interface for postqueue error types
pub trait ScheduleErrorTrait: std::error::Error {
    /// Whether retrying the same call later may succeed
    fn is_recoverable(&self) -> bool;

    /// Error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid or missing configuration (including queue settings)
    Config,
    /// Lifecycle and schedule validation errors
    Scheduling,
    /// Platform publish or metrics failures
    Publishing,
    /// Database and I/O errors
    Storage,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Scheduling => "scheduling",
            Self::Publishing => "publishing",
            Self::Storage => "storage",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the postqueue crate
#[derive(Error, Debug)]
pub enum Error {
    /// Scheduling, lifecycle and queue-settings errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Persistence errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Platform capability failures
    #[error("Publish error ({kind}): {0}", kind = .0.kind)]
    Publish(#[from] PublishError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ScheduleErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Storage(e) => e.is_recoverable(),
            Self::Publish(e) => e.kind != FailureKind::Permanent,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Scheduler(SchedulerError::Storage(_)) => ErrorCategory::Storage,
            Self::Scheduler(e) if e.is_configuration() => ErrorCategory::Config,
            Self::Scheduler(_) => ErrorCategory::Scheduling,
            Self::Storage(_) => ErrorCategory::Storage,
            Self::Publish(_) => ErrorCategory::Publishing,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Config loading reports through anyhow
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Config(format!("{err:#}"))
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PostStatus;

    #[test]
    fn test_error_category() {
        let err: Error = SchedulerError::not_configured("acc1").into();
        assert_eq!(err.category(), ErrorCategory::Config);

        let err: Error = SchedulerError::invalid_transition("cancel", PostStatus::Published).into();
        assert_eq!(err.category(), ErrorCategory::Scheduling);

        let err: Error = SchedulerError::Storage(StorageError::LockPoisoned).into();
        assert_eq!(err.category(), ErrorCategory::Storage);

        let err: Error = PublishError::transient("502 from upstream").into();
        assert_eq!(err.category(), ErrorCategory::Publishing);
    }

    #[test]
    fn test_is_recoverable() {
        let err: Error = SchedulerError::no_slots("acc1").into();
        assert!(!err.is_recoverable());

        let err: Error = PublishError::timeout("timed out").into();
        assert!(err.is_recoverable());

        let err: Error = PublishError::permanent("content rejected").into();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_publish_error_display_includes_kind() {
        let err: Error = PublishError::permanent("token revoked").into();
        assert_eq!(err.to_string(), "Publish error (permanent): token revoked");
    }

    #[test]
    fn test_anyhow_conversion_is_config() {
        let err: Error = anyhow::anyhow!("max_attempts must be at least 1").into();
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn test_other_error() {
        let err = Error::other("Something went wrong");
        assert_eq!(err.category(), ErrorCategory::Other);
        assert!(!err.is_recoverable());

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = Error::with_source("Export failed", io);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Publishing.to_string(), "publishing");
    }
}
