//! Backend abstraction for the remote IAM authority.
//!
//! The [`Authority`] trait is the only way the core touches the remote
//! service, allowing for different implementations:
//! - The real `aws` CLI ([`aws_cli::AwsCliBackend`])
//! - An in-memory fake for tests and offline dry runs ([`memory::InMemoryAuthority`])
//!
//! "Not found" answers to existence probes are returned as negative values,
//! never as errors.

pub mod aws_cli;
pub mod memory;

use crate::error::Result;
use crate::secret::Secret;
use crate::types::{CallerIdentity, Credential, GroupRecord, IdentityRecord};
use serde_json::Value;

/// Read and write capabilities of the remote authority.
pub trait Authority: Send + Sync {
    // =========================================================================
    // Reads
    // =========================================================================

    /// Verify connectivity and credentials.
    fn caller_identity(&self) -> Result<CallerIdentity>;

    /// List all groups (all pages).
    fn list_groups(&self) -> Result<Vec<GroupRecord>>;

    /// List all identities (all pages).
    fn list_identities(&self) -> Result<Vec<IdentityRecord>>;

    /// Managed policy ARNs attached to a group.
    fn list_attached_group_policies(&self, group: &str) -> Result<Vec<String>>;

    /// Inline policy names of a group.
    fn list_group_policy_names(&self, group: &str) -> Result<Vec<String>>;

    /// One inline policy document of a group.
    fn get_group_policy(&self, group: &str, policy_name: &str) -> Result<Value>;

    /// Groups an identity belongs to.
    fn list_groups_for_identity(&self, identity: &str) -> Result<Vec<String>>;

    /// Whether the identity has a login profile. Absence is `Ok(false)`.
    fn has_login_profile(&self, identity: &str) -> Result<bool>;

    /// Access key metadata for an identity.
    fn list_access_keys(&self, identity: &str) -> Result<Vec<Credential>>;

    // =========================================================================
    // Writes
    // =========================================================================

    fn create_group(&self, group: &str, path: &str) -> Result<()>;

    fn create_identity(&self, identity: &str, path: &str) -> Result<()>;

    fn attach_group_policy(&self, group: &str, policy_arn: &str) -> Result<()>;

    /// Create or wholesale replace an inline policy.
    fn put_group_policy(&self, group: &str, policy_name: &str, document: &Value) -> Result<()>;

    fn add_identity_to_group(&self, identity: &str, group: &str) -> Result<()>;

    /// Create an access key. Returns the key id and the one-shot secret.
    fn create_access_key(&self, identity: &str) -> Result<(String, Secret)>;

    /// Create a login profile with the given password.
    fn create_login_profile(
        &self,
        identity: &str,
        password: &str,
        password_reset_required: bool,
    ) -> Result<()>;

    // =========================================================================
    // Explicit removals (never planned by the reconciler)
    // =========================================================================

    /// Delete an access key.
    fn delete_access_key(&self, identity: &str, access_key_id: &str) -> Result<()>;

    /// Remove an identity from one group.
    fn remove_identity_from_group(&self, identity: &str, group: &str) -> Result<()>;

    /// Delete an identity together with what the service requires gone
    /// first: login profile, access keys, memberships and user policies.
    fn delete_identity(&self, identity: &str) -> Result<()>;
}
