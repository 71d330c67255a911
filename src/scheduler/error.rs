//! Error types for the scheduler module

use thiserror::Error;

use crate::models::PostStatus;
use crate::storage::StorageError;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Queue settings for the account are disabled
    #[error("Queue is not configured for account '{account_id}'")]
    NotConfigured { account_id: String },

    /// No posting time could be found
    #[error("No posting slots defined for account '{account_id}'")]
    NoSlotsDefined { account_id: String },

    /// Post id unknown, deleted, or owned by another tenant
    #[error("Scheduled post not found: {post_id}")]
    PostNotFound { post_id: String },

    /// Lifecycle does not allow the requested operation
    #[error("Cannot {operation} a post in status '{from}'")]
    InvalidTransition {
        operation: &'static str,
        from: PostStatus,
    },

    /// Rejected schedule or settings input
    #[error("Invalid schedule: {reason}")]
    InvalidSchedule { reason: String },

    /// A post must target at least one platform
    #[error("Post must target at least one platform")]
    NoPlatforms,

    /// Persistence failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SchedulerError {
    /// Create a not-configured error
    pub fn not_configured(account_id: impl Into<String>) -> Self {
        Self::NotConfigured {
            account_id: account_id.into(),
        }
    }

    /// Create a no-slots error
    pub fn no_slots(account_id: impl Into<String>) -> Self {
        Self::NoSlotsDefined {
            account_id: account_id.into(),
        }
    }

    pub fn post_not_found(post_id: impl Into<String>) -> Self {
        Self::PostNotFound {
            post_id: post_id.into(),
        }
    }

    pub fn invalid_transition(operation: &'static str, from: PostStatus) -> Self {
        Self::InvalidTransition { operation, from }
    }

    pub fn invalid_schedule(reason: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            reason: reason.into(),
        }
    }

    /// Only storage hiccups are worth retrying automatically. Configuration
    /// and lifecycle errors need the caller to change something first.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_recoverable(),
            _ => false,
        }
    }

    /// Whether the error comes from account queue configuration
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NotConfigured { .. } | Self::NoSlotsDefined { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::not_configured("acc1");
        assert_eq!(err.to_string(), "Queue is not configured for account 'acc1'");

        let err = SchedulerError::invalid_transition("edit", PostStatus::Published);
        assert_eq!(err.to_string(), "Cannot edit a post in status 'published'");
    }

    #[test]
    fn test_configuration_errors_not_recoverable() {
        assert!(!SchedulerError::not_configured("a").is_recoverable());
        assert!(!SchedulerError::no_slots("a").is_recoverable());
        assert!(SchedulerError::no_slots("a").is_configuration());
        assert!(!SchedulerError::NoPlatforms.is_configuration());
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: SchedulerError = StorageError::LockPoisoned.into();
        assert!(matches!(err, SchedulerError::Storage(_)));
    }
}
