//! Constraint validation.
//!
//! Pure checks for remote-side invariants that the declarative model cannot
//! express: the per-identity credential ceiling and the character classes
//! the IAM service accepts for names, paths and policy references. Running
//! them before any create avoids a round trip that would fail remotely.

use crate::types::EntityKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// Maximum simultaneous credentials per identity. Mirrors the IAM service's
/// own limit and is not configurable.
pub const MAX_CREDENTIALS: usize = 2;

/// Maximum identity (user) name length.
pub const MAX_IDENTITY_NAME_LEN: usize = 64;

/// Maximum group name length.
pub const MAX_GROUP_NAME_LEN: usize = 128;

/// Maximum path length.
pub const MAX_PATH_LEN: usize = 512;

static NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_+=,.@-]+$").expect("hardcoded regex pattern is valid")
});

static PATH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/([\x21-\x7E]+/)?$").expect("hardcoded regex pattern is valid")
});

static POLICY_ARN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:aws[a-z-]*:iam::(aws|\d{12}):policy/[\x21-\x7E]+$")
        .expect("hardcoded regex pattern is valid")
});

/// The kind of constraint that was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// The identity already holds the maximum number of credentials
    CredentialLimitExceeded,
    /// Name has invalid characters or length
    InvalidName,
    /// Path has invalid characters, shape or length
    InvalidPath,
    /// Managed policy reference is not a policy ARN
    InvalidPolicyReference,
    /// The remote authority reported a quota it enforces
    RemoteLimitExceeded,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CredentialLimitExceeded => "credential limit exceeded",
            Self::InvalidName => "invalid name",
            Self::InvalidPath => "invalid path",
            Self::InvalidPolicyReference => "invalid policy reference",
            Self::RemoteLimitExceeded => "remote limit exceeded",
        };
        f.write_str(s)
    }
}

/// A violated remote-side constraint with a human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {detail}")]
pub struct ConstraintViolation {
    pub kind: ViolationKind,
    pub detail: String,
}

impl ConstraintViolation {
    pub fn new(kind: ViolationKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// A quota reported by the remote authority itself.
    pub fn remote_limit(entity: &str, message: &str) -> Self {
        Self::new(
            ViolationKind::RemoteLimitExceeded,
            format!("{entity}: {message}"),
        )
    }
}

/// Check the credential ceiling for one identity.
///
/// Returns `CredentialLimitExceeded` when a new credential is requested and
/// the identity already holds [`MAX_CREDENTIALS`].
pub fn validate_credential(
    identity: &str,
    wants_credential: bool,
    remote_count: usize,
) -> Result<(), ConstraintViolation> {
    if wants_credential && remote_count >= MAX_CREDENTIALS {
        return Err(ConstraintViolation::new(
            ViolationKind::CredentialLimitExceeded,
            format!(
                "identity '{identity}' already has {remote_count} credentials \
                 (limit {MAX_CREDENTIALS}); revoke one with `iamsync keys revoke {identity} <key-id>`"
            ),
        ));
    }
    Ok(())
}

/// Validate an identity or group name.
pub fn validate_name(kind: EntityKind, name: &str) -> Result<(), ConstraintViolation> {
    let max = match kind {
        EntityKind::Identity => MAX_IDENTITY_NAME_LEN,
        EntityKind::Group => MAX_GROUP_NAME_LEN,
    };

    if name.is_empty() {
        return Err(ConstraintViolation::new(
            ViolationKind::InvalidName,
            format!("{kind} name cannot be empty"),
        ));
    }
    if name.len() > max {
        return Err(ConstraintViolation::new(
            ViolationKind::InvalidName,
            format!("{kind} name '{name}' exceeds {max} characters"),
        ));
    }
    if !NAME_REGEX.is_match(name) {
        return Err(ConstraintViolation::new(
            ViolationKind::InvalidName,
            format!(
                "{kind} name '{name}' contains invalid characters; use only alphanumerics and _+=,.@-"
            ),
        ));
    }
    Ok(())
}

/// Validate an organizational path. `/` is the root path.
pub fn validate_path(path: &str) -> Result<(), ConstraintViolation> {
    if path.len() > MAX_PATH_LEN {
        return Err(ConstraintViolation::new(
            ViolationKind::InvalidPath,
            format!("path exceeds {MAX_PATH_LEN} characters"),
        ));
    }
    if !PATH_REGEX.is_match(path) {
        return Err(ConstraintViolation::new(
            ViolationKind::InvalidPath,
            format!("path '{path}' must start and end with '/' and contain only printable ASCII"),
        ));
    }
    Ok(())
}

/// Validate a managed policy reference (an IAM policy ARN).
pub fn validate_policy_arn(arn: &str) -> Result<(), ConstraintViolation> {
    if !POLICY_ARN_REGEX.is_match(arn) {
        return Err(ConstraintViolation::new(
            ViolationKind::InvalidPolicyReference,
            format!("'{arn}' is not an IAM policy ARN"),
        ));
    }
    Ok(())
}

/// Validate everything needed before creating an entity.
pub fn validate_entity(kind: EntityKind, name: &str, path: &str) -> Result<(), ConstraintViolation> {
    validate_name(kind, name)?;
    validate_path(path)
}
