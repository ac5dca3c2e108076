//! Core types: entity keys, desired specs, remote snapshots.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Root organizational path.
pub const ROOT_PATH: &str = "/";

/// ARN prefix of policies owned and maintained by AWS.
pub const AWS_MANAGED_POLICY_PREFIX: &str = "arn:aws:iam::aws:policy/";

/// Whether a managed policy reference is AWS-managed (vs customer-managed).
pub fn is_aws_managed(policy_arn: &str) -> bool {
    policy_arn.starts_with(AWS_MANAGED_POLICY_PREFIX)
}

// ============================================================================
// Entity keys
// ============================================================================

/// Kind of a top-level managed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Group,
    Identity,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Group => write!(f, "group"),
            EntityKind::Identity => write!(f, "identity"),
        }
    }
}

/// Identifies one group or identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub name: String,
}

impl EntityKey {
    pub fn group(name: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Group,
            name: name.into(),
        }
    }

    pub fn identity(name: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Identity,
            name: name.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

// ============================================================================
// Desired state
// ============================================================================

/// Declarative yes/no flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    Yes,
    #[default]
    No,
}

impl Flag {
    /// Parse a lenient yes/no answer. Returns `None` for anything unrecognized.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "yes" | "y" | "true" | "1" => Some(Flag::Yes),
            "no" | "n" | "false" | "0" => Some(Flag::No),
            _ => None,
        }
    }

    pub fn is_yes(self) -> bool {
        self == Flag::Yes
    }
}

impl From<bool> for Flag {
    fn from(value: bool) -> Self {
        if value { Flag::Yes } else { Flag::No }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flag::Yes => write!(f, "yes"),
            Flag::No => write!(f, "no"),
        }
    }
}

fn root_path() -> String {
    ROOT_PATH.to_string()
}

/// Desired shape of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    #[serde(default = "root_path")]
    pub path: String,
    /// Attached managed policy ARNs, in declaration order
    #[serde(default, rename = "managed_policy_arns")]
    pub managed_policies: Vec<String>,
    /// Inline policy name -> document
    #[serde(default)]
    pub inline_policies: IndexMap<String, Value>,
}

impl Default for GroupSpec {
    fn default() -> Self {
        Self {
            path: root_path(),
            managed_policies: Vec::new(),
            inline_policies: IndexMap::new(),
        }
    }
}

/// Desired shape of one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySpec {
    #[serde(default = "root_path")]
    pub path: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub create_key: Flag,
    #[serde(default)]
    pub has_console_access: Flag,
}

impl Default for IdentitySpec {
    fn default() -> Self {
        Self {
            path: root_path(),
            groups: Vec::new(),
            create_key: Flag::No,
            has_console_access: Flag::No,
        }
    }
}

/// The declared state, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    #[serde(default)]
    pub groups: IndexMap<String, GroupSpec>,
    #[serde(default, rename = "users")]
    pub identities: IndexMap<String, IdentitySpec>,
}

impl DesiredState {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.identities.is_empty()
    }

    /// Whether the given entity is declared.
    pub fn declares(&self, key: &EntityKey) -> bool {
        match key.kind {
            EntityKind::Group => self.groups.contains_key(&key.name),
            EntityKind::Identity => self.identities.contains_key(&key.name),
        }
    }
}

// ============================================================================
// Remote snapshot
// ============================================================================

/// Whether an entity's sub-resources were read completely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ReadStatus {
    #[default]
    Complete,
    /// One or more sub-resource lookups failed; the entity's state is unknown
    Partial { failures: Vec<String> },
}

impl ReadStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Record one failed lookup, degrading the status.
    pub fn record_failure(&mut self, failure: String) {
        match self {
            Self::Complete => *self = Self::Partial { failures: vec![failure] },
            Self::Partial { failures } => failures.push(failure),
        }
    }

    pub fn failures(&self) -> &[String] {
        match self {
            Self::Complete => &[],
            Self::Partial { failures } => failures,
        }
    }
}

/// Status of an access key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialStatus {
    Active,
    Inactive,
}

/// Metadata of one credential (never the secret).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub status: CredentialStatus,
    pub created_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn is_active(&self) -> bool {
        self.status == CredentialStatus::Active
    }
}

/// A group as observed remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteGroup {
    pub path: String,
    pub arn: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub managed_policies: Vec<String>,
    pub inline_policies: IndexMap<String, Value>,
    #[serde(default)]
    pub status: ReadStatus,
}

impl RemoteGroup {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            arn: None,
            created_at: None,
            managed_policies: Vec::new(),
            inline_policies: IndexMap::new(),
            status: ReadStatus::Complete,
        }
    }

    /// The observed state expressed as a desired spec.
    pub fn to_spec(&self) -> GroupSpec {
        GroupSpec {
            path: self.path.clone(),
            managed_policies: self.managed_policies.clone(),
            inline_policies: self.inline_policies.clone(),
        }
    }
}

/// An identity as observed remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIdentity {
    pub path: String,
    pub arn: Option<String>,
    pub groups: Vec<String>,
    pub has_login_capability: bool,
    pub credentials: Vec<Credential>,
    #[serde(default)]
    pub status: ReadStatus,
}

impl RemoteIdentity {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            arn: None,
            groups: Vec::new(),
            has_login_capability: false,
            credentials: Vec::new(),
            status: ReadStatus::Complete,
        }
    }

    /// Total credentials, active or not. The remote ceiling counts both.
    pub fn credential_count(&self) -> usize {
        self.credentials.len()
    }

    pub fn active_credentials(&self) -> usize {
        self.credentials.iter().filter(|c| c.is_active()).count()
    }

    pub fn has_active_credential(&self) -> bool {
        self.active_credentials() > 0
    }

    pub fn is_member_of(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// The observed state expressed as a desired spec.
    pub fn to_spec(&self) -> IdentitySpec {
        IdentitySpec {
            path: self.path.clone(),
            groups: self.groups.clone(),
            create_key: Flag::from(self.has_active_credential()),
            has_console_access: Flag::from(self.has_login_capability),
        }
    }
}

/// Normalized view of what exists remotely, in listing order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub groups: IndexMap<String, RemoteGroup>,
    pub identities: IndexMap<String, RemoteIdentity>,
}

impl Snapshot {
    pub fn contains(&self, key: &EntityKey) -> bool {
        match key.kind {
            EntityKind::Group => self.groups.contains_key(&key.name),
            EntityKind::Identity => self.identities.contains_key(&key.name),
        }
    }

    /// Entities whose read was partial.
    pub fn degraded(&self) -> Vec<EntityKey> {
        let groups = self
            .groups
            .iter()
            .filter(|(_, g)| !g.status.is_complete())
            .map(|(name, _)| EntityKey::group(name));
        let identities = self
            .identities
            .iter()
            .filter(|(_, i)| !i.status.is_complete())
            .map(|(name, _)| EntityKey::identity(name));
        groups.chain(identities).collect()
    }
}

// ============================================================================
// Tracking and listings
// ============================================================================

/// Keys the execution engine's persisted state already manages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedKeys {
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub identities: BTreeSet<String>,
}

impl TrackedKeys {
    pub fn contains(&self, key: &EntityKey) -> bool {
        match key.kind {
            EntityKind::Group => self.groups.contains(&key.name),
            EntityKind::Identity => self.identities.contains(&key.name),
        }
    }

    /// Returns true if the key was newly tracked.
    pub fn insert(&mut self, key: &EntityKey) -> bool {
        match key.kind {
            EntityKind::Group => self.groups.insert(key.name.clone()),
            EntityKind::Identity => self.identities.insert(key.name.clone()),
        }
    }

    /// Returns true if the key was tracked.
    pub fn remove(&mut self, key: &EntityKey) -> bool {
        match key.kind {
            EntityKind::Group => self.groups.remove(&key.name),
            EntityKind::Identity => self.identities.remove(&key.name),
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len() + self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.identities.is_empty()
    }
}

/// Who the authority thinks we are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
}

/// One row of a group listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub name: String,
    pub path: String,
    pub arn: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// One row of an identity listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub name: String,
    pub path: String,
    pub arn: Option<String>,
}

/// A non-fatal problem recorded against one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub entity: EntityKey,
    pub message: String,
}

impl Diagnostic {
    pub fn new(entity: EntityKey, message: impl Into<String>) -> Self {
        Self {
            entity,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.entity, self.message)
    }
}
