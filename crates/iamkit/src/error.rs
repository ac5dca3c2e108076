//! Error types for IAM reconciliation.
//!
//! Errors are categorized so callers can tell run-aborting failures
//! (connectivity, unparsable input) from conditions that are absorbed into
//! a plan or report (partial reads, constraint violations, apply failures).

use crate::validate::ConstraintViolation;
use thiserror::Error;

/// Categories of errors for retry and propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The remote authority cannot be reached or refuses our credentials
    Connectivity,
    /// The remote authority is rate limiting us (transient, retryable)
    Throttled,
    /// The entity does not exist (a valid negative answer for probes)
    NotFound,
    /// The entity already exists
    AlreadyExists,
    /// Desired state could not be parsed at the top level
    Malformed,
    /// A remote-side constraint would be violated
    Constraint,
    /// One entity's sub-resource listing failed
    PartialRead,
    /// An individual operation failed at execution time
    Apply,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled)
    }

    /// Whether this error aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connectivity | Self::Malformed)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Connectivity => "Cannot reach the IAM service",
            Self::Throttled => "Request rate exceeded",
            Self::NotFound => "Entity not found",
            Self::AlreadyExists => "Entity already exists",
            Self::Malformed => "Desired state is malformed",
            Self::Constraint => "Remote constraint violated",
            Self::PartialRead => "Partial read",
            Self::Apply => "Operation failed",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Connectivity => "Check AWS_PROFILE / credentials and network access",
            Self::Throttled => "Wait a moment and retry, or lower --jobs",
            Self::NotFound => "Verify the entity name",
            Self::AlreadyExists => "Run `iamsync import` to adopt the existing entity",
            Self::Malformed => "Fix the desired-state file so its top level is a mapping",
            Self::Constraint => "Resolve the constraint (e.g. revoke a credential) and re-plan",
            Self::PartialRead => "Re-run once the failing lookup succeeds",
            Self::Apply => "Check the operation error and re-run apply",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur while reading, planning or applying.
#[derive(Debug, Error)]
pub enum Error {
    /// Cannot reach the remote authority (fatal to the whole run)
    #[error("connectivity error: {message}")]
    Connectivity {
        /// Detail from the failed call
        message: String,
    },

    /// The desired-state structure is unparsable at the top level (fatal)
    #[error("malformed desired state: {message}")]
    MalformedConfig {
        /// What could not be parsed
        message: String,
    },

    /// A sub-resource listing failed for one entity
    #[error("partial read for {entity}: {message}")]
    PartialRead {
        /// Entity whose snapshot is degraded
        entity: String,
        /// Underlying failure
        message: String,
    },

    /// A remote-side constraint would be violated
    #[error(transparent)]
    ConstraintViolation(#[from] ConstraintViolation),

    /// An individual operation failed at execution time
    #[error("{operation} failed: {message}")]
    ApplyFailure {
        /// Operation key
        operation: String,
        /// Failure detail
        message: String,
    },

    /// The entity does not exist
    #[error("not found: {entity}")]
    NotFound {
        /// Entity that was looked up
        entity: String,
    },

    /// The entity already exists remotely
    #[error("already exists: {entity}")]
    AlreadyExists {
        /// Entity that could not be created
        entity: String,
    },

    /// The remote authority throttled the request
    #[error("throttled: {message}")]
    Throttled {
        /// Detail from the failed call
        message: String,
    },

    /// The `aws` executable is not installed or not on PATH
    #[error("AWS CLI not found. Install it from https://aws.amazon.com/cli/")]
    AwsCliNotFound,

    /// Command execution failed
    #[error("command failed: {message}")]
    CommandFailed {
        /// Description of what command failed
        message: String,
        /// Standard error output from the failed command
        stderr: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Connectivity { .. } | Error::AwsCliNotFound => ErrorCategory::Connectivity,
            Error::Throttled { .. } => ErrorCategory::Throttled,
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::AlreadyExists { .. } => ErrorCategory::AlreadyExists,
            Error::MalformedConfig { .. } => ErrorCategory::Malformed,
            Error::ConstraintViolation(_) => ErrorCategory::Constraint,
            Error::PartialRead { .. } => ErrorCategory::PartialRead,
            Error::ApplyFailure { .. } => ErrorCategory::Apply,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether this error aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        self.category().is_fatal()
    }

    /// Whether this error is a "does not exist" answer.
    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }

    /// Shorthand for a malformed-config error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedConfig {
            message: message.into(),
        }
    }

    /// Create an error from `aws` command output.
    ///
    /// Analyzes stderr to categorize the error appropriately.
    pub fn from_aws_output(stderr: &str, entity: Option<&str>) -> Self {
        let stderr_lower = stderr.to_lowercase();
        let entity_name = || entity.unwrap_or("unknown").to_string();

        if stderr_lower.contains("nosuchentity") || stderr_lower.contains("cannot be found") {
            return Error::NotFound {
                entity: entity_name(),
            };
        }

        if stderr_lower.contains("entityalreadyexists") {
            return Error::AlreadyExists {
                entity: entity_name(),
            };
        }

        if stderr_lower.contains("throttling") || stderr_lower.contains("rate exceeded") {
            return Error::Throttled {
                message: stderr.trim().to_string(),
            };
        }

        if stderr_lower.contains("limitexceeded") {
            return Error::ConstraintViolation(ConstraintViolation::remote_limit(
                entity.unwrap_or("unknown"),
                stderr.trim(),
            ));
        }

        if stderr_lower.contains("unable to locate credentials")
            || stderr_lower.contains("could not connect")
            || stderr_lower.contains("expiredtoken")
            || stderr_lower.contains("invalidclienttokenid")
            || stderr_lower.contains("the config profile")
            || stderr_lower.contains("unable to parse config file")
        {
            return Error::Connectivity {
                message: stderr.trim().to_string(),
            };
        }

        Error::CommandFailed {
            message: format!(
                "aws command failed{}",
                entity.map(|n| format!(" for {n}")).unwrap_or_default()
            ),
            stderr: stderr.trim().to_string(),
        }
    }
}

/// Result type for IAM reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_retryable() {
        assert!(ErrorCategory::Throttled.is_retryable());
        assert!(!ErrorCategory::NotFound.is_retryable());
        assert!(!ErrorCategory::Connectivity.is_retryable());
    }

    #[test]
    fn test_error_category_fatal() {
        assert!(ErrorCategory::Connectivity.is_fatal());
        assert!(ErrorCategory::Malformed.is_fatal());
        assert!(!ErrorCategory::PartialRead.is_fatal());
        assert!(!ErrorCategory::Constraint.is_fatal());
        assert!(!ErrorCategory::Apply.is_fatal());
    }

    #[test]
    fn test_from_aws_output_not_found() {
        let err = Error::from_aws_output(
            "An error occurred (NoSuchEntity) when calling the GetLoginProfile operation: \
             Login Profile for User alice cannot be found.",
            Some("alice"),
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn test_from_aws_output_throttled() {
        let err = Error::from_aws_output(
            "An error occurred (Throttling) when calling the ListGroups operation: Rate exceeded",
            None,
        );
        assert_eq!(err.category(), ErrorCategory::Throttled);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_aws_output_limit() {
        let err = Error::from_aws_output(
            "An error occurred (LimitExceeded) when calling the CreateAccessKey operation: \
             Cannot exceed quota for AccessKeysPerUser: 2",
            Some("carol"),
        );
        assert_eq!(err.category(), ErrorCategory::Constraint);
    }

    #[test]
    fn test_from_aws_output_credentials() {
        let err = Error::from_aws_output("Unable to locate credentials.", None);
        assert_eq!(err.category(), ErrorCategory::Connectivity);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_from_aws_output_already_exists() {
        let err = Error::from_aws_output(
            "An error occurred (EntityAlreadyExists) when calling the CreateUser operation",
            Some("bob"),
        );
        assert_eq!(err.category(), ErrorCategory::AlreadyExists);
    }

    #[test]
    fn test_from_aws_output_other() {
        let err = Error::from_aws_output("something odd", Some("x"));
        assert!(matches!(err, Error::CommandFailed { .. }));
    }
}
