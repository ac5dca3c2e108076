//! Reconciliation operations and plans.

use crate::types::{Diagnostic, EntityKey, EntityKind, GroupSpec, IdentitySpec, is_aws_managed};
use crate::validate::ConstraintViolation;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Why an operation was not emitted as a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Remote state already satisfies the desired state
    AlreadyPresent { note: Option<String> },
    /// The identity already holds the maximum number of credentials
    CredentialLimitExceeded { detail: String },
    /// A name, path or policy reference would be rejected remotely
    ConstraintViolation { violation: ConstraintViolation },
    /// The entity was read partially; its remote state is unknown
    Degraded { failures: Vec<String> },
    /// Something this operation needs will not exist
    MissingDependency { dependency: EntityKey },
}

impl SkipReason {
    pub fn already_present() -> Self {
        Self::AlreadyPresent { note: None }
    }

    pub fn is_already_present(&self) -> bool {
        matches!(self, Self::AlreadyPresent { .. })
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyPresent { note: None } => write!(f, "already present"),
            Self::AlreadyPresent { note: Some(note) } => write!(f, "already present ({note})"),
            Self::CredentialLimitExceeded { detail } => write!(f, "{detail}"),
            Self::ConstraintViolation { violation } => write!(f, "{violation}"),
            Self::Degraded { failures } => {
                write!(f, "remote state unknown after partial read: {}", failures.join("; "))
            }
            Self::MissingDependency { dependency } => {
                write!(f, "{dependency} does not exist and is not created by this plan")
            }
        }
    }
}

/// Desired state adopted from the remote side during import.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Adopted {
    Group(GroupSpec),
    Identity(IdentitySpec),
}

/// One step of a reconciliation plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateGroup {
        group: String,
        path: String,
    },
    AttachManagedPolicy {
        group: String,
        policy_arn: String,
    },
    /// Full replace of one inline document
    PutInlinePolicy {
        group: String,
        policy_name: String,
        document: Value,
        /// The remote document being replaced, if any
        replaces: Option<Value>,
    },
    CreateIdentity {
        identity: String,
        path: String,
    },
    CreateMembership {
        identity: String,
        group: String,
    },
    /// Bring a remote entity under management as-is
    ImportExisting {
        entity: EntityKey,
        adopted: Adopted,
    },
    CreateCredential {
        identity: String,
    },
    CreateLoginCapability {
        identity: String,
    },
    Skip {
        target: EntityKey,
        /// What would have been done
        action: String,
        #[serde(flatten)]
        reason: SkipReason,
    },
}

fn create_key(key: &EntityKey) -> String {
    format!("{key}:create")
}

impl Operation {
    pub fn skip(target: EntityKey, action: impl Into<String>, reason: SkipReason) -> Self {
        Self::Skip {
            target,
            action: action.into(),
            reason,
        }
    }

    /// The entity this operation is about.
    pub fn target(&self) -> EntityKey {
        match self {
            Self::CreateGroup { group, .. }
            | Self::AttachManagedPolicy { group, .. }
            | Self::PutInlinePolicy { group, .. } => EntityKey::group(group),
            Self::CreateIdentity { identity, .. }
            | Self::CreateMembership { identity, .. }
            | Self::CreateCredential { identity }
            | Self::CreateLoginCapability { identity } => EntityKey::identity(identity),
            Self::ImportExisting { entity, .. } => entity.clone(),
            Self::Skip { target, .. } => target.clone(),
        }
    }

    /// Stable key, unique within a plan.
    pub fn key(&self) -> String {
        let target = self.target();
        match self {
            Self::CreateGroup { .. } | Self::CreateIdentity { .. } => create_key(&target),
            Self::AttachManagedPolicy { policy_arn, .. } => format!("{target}:attach:{policy_arn}"),
            Self::PutInlinePolicy { policy_name, .. } => format!("{target}:inline:{policy_name}"),
            Self::CreateMembership { group, .. } => format!("{target}:member:{group}"),
            Self::ImportExisting { .. } => format!("{target}:import"),
            Self::CreateCredential { .. } => format!("{target}:credential"),
            Self::CreateLoginCapability { .. } => format!("{target}:login"),
            Self::Skip { action, .. } => format!("{target}:skip:{action}"),
        }
    }

    /// Keys of operations that must succeed first. Keys not in the plan
    /// refer to entities that already exist.
    pub fn depends_on(&self) -> Vec<String> {
        match self {
            Self::AttachManagedPolicy { group, .. } | Self::PutInlinePolicy { group, .. } => {
                vec![create_key(&EntityKey::group(group))]
            }
            Self::CreateMembership { identity, group } => vec![
                create_key(&EntityKey::identity(identity)),
                create_key(&EntityKey::group(group)),
            ],
            Self::CreateCredential { identity } | Self::CreateLoginCapability { identity } => {
                vec![create_key(&EntityKey::identity(identity))]
            }
            _ => Vec::new(),
        }
    }

    /// Short machine name of the operation kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateGroup { .. } => "create_group",
            Self::AttachManagedPolicy { .. } => "attach_managed_policy",
            Self::PutInlinePolicy { .. } => "put_inline_policy",
            Self::CreateIdentity { .. } => "create_identity",
            Self::CreateMembership { .. } => "create_membership",
            Self::ImportExisting { .. } => "import_existing",
            Self::CreateCredential { .. } => "create_credential",
            Self::CreateLoginCapability { .. } => "create_login_capability",
            Self::Skip { .. } => "skip",
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip { .. })
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            Self::Skip { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateGroup { group, path } => write!(f, "create group {group} at {path}"),
            Self::AttachManagedPolicy { group, policy_arn } => {
                let label = if is_aws_managed(policy_arn) { "AWS-managed" } else { "customer-managed" };
                write!(f, "attach {label} policy {policy_arn} to group {group}")
            }
            Self::PutInlinePolicy {
                group,
                policy_name,
                replaces,
                ..
            } => {
                let verb = if replaces.is_some() { "replace" } else { "put" };
                write!(f, "{verb} inline policy {policy_name} on group {group}")
            }
            Self::CreateIdentity { identity, path } => {
                write!(f, "create identity {identity} at {path}")
            }
            Self::CreateMembership { identity, group } => {
                write!(f, "add identity {identity} to group {group}")
            }
            Self::ImportExisting { entity, .. } => write!(f, "import existing {entity}"),
            Self::CreateCredential { identity } => write!(f, "create access key for {identity}"),
            Self::CreateLoginCapability { identity } => {
                write!(f, "create console login for {identity}")
            }
            Self::Skip {
                target,
                action,
                reason,
            } => write!(f, "skip {action} for {target}: {reason}"),
        }
    }
}

/// Selects entities by `kind`, `kind.name`, `kind/name` or bare `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFilter {
    kind: Option<EntityKind>,
    name: Option<String>,
}

impl TargetFilter {
    pub fn parse(target: &str) -> Self {
        let parse_kind = |s: &str| match s.to_lowercase().as_str() {
            "group" | "groups" => Some(EntityKind::Group),
            "identity" | "identities" | "user" | "users" => Some(EntityKind::Identity),
            _ => None,
        };

        if let Some((kind, name)) = target.split_once(['.', '/'])
            && let Some(kind) = parse_kind(kind)
        {
            return Self {
                kind: Some(kind),
                name: Some(name.to_string()),
            };
        }
        match parse_kind(target) {
            Some(kind) => Self {
                kind: Some(kind),
                name: None,
            },
            None => Self {
                kind: None,
                name: Some(target.to_string()),
            },
        }
    }

    pub fn matches(&self, key: &EntityKey) -> bool {
        self.kind.is_none_or(|k| k == key.kind) && self.name.as_ref().is_none_or(|n| *n == key.name)
    }
}

/// An ordered operation list plus per-entity diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plan {
    pub operations: Vec<Operation>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Plan {
    /// True when nothing would change.
    pub fn is_converged(&self) -> bool {
        self.changes().next().is_none()
    }

    pub fn changes(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(|op| !op.is_skip())
    }

    pub fn skips(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(|op| op.is_skip())
    }

    /// blake3 digest (hex) of the serialized plan. Identical plans have
    /// identical fingerprints.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }

    /// Keep only operations and diagnostics for matching entities.
    ///
    /// A kept operation that depends on a create the filter dropped becomes
    /// a `MissingDependency` skip naming that entity.
    pub fn filter_by_target(self, target: Option<&str>) -> Self {
        let Some(target) = target else {
            return self;
        };
        let filter = TargetFilter::parse(target);
        let (kept, dropped): (Vec<_>, Vec<_>) = self
            .operations
            .into_iter()
            .partition(|op| filter.matches(&op.target()));
        let dropped_creates: HashMap<String, EntityKey> = dropped
            .iter()
            .filter(|op| matches!(op, Operation::CreateGroup { .. } | Operation::CreateIdentity { .. }))
            .map(|op| (op.key(), op.target()))
            .collect();

        Self {
            operations: kept
                .into_iter()
                .map(|op| {
                    let missing = op
                        .depends_on()
                        .iter()
                        .find_map(|dep| dropped_creates.get(dep).cloned());
                    match missing {
                        Some(dependency) => {
                            log::debug!("{op} needs {dependency}, which is outside the target");
                            Operation::skip(
                                op.target(),
                                op.to_string(),
                                SkipReason::MissingDependency { dependency },
                            )
                        }
                        None => op,
                    }
                })
                .collect(),
            diagnostics: self
                .diagnostics
                .into_iter()
                .filter(|d| filter.matches(&d.entity))
                .collect(),
        }
    }
}
