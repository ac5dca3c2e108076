//! In-memory authority for tests and offline runs.
//!
//! Holds groups and identities behind a mutex, enforces the same
//! existence and quota rules as the real service, and records every write
//! so callers can assert that a run did not mutate anything.

use crate::backend::Authority;
use crate::error::{Error, Result};
use crate::secret::Secret;
use crate::types::{
    CallerIdentity, Credential, CredentialStatus, GroupRecord, GroupSpec, IdentityRecord,
    IdentitySpec,
};
use crate::validate::{ConstraintViolation, MAX_CREDENTIALS};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct GroupEntry {
    path: String,
    managed_policies: Vec<String>,
    inline_policies: IndexMap<String, Value>,
}

#[derive(Debug, Clone)]
struct IdentityEntry {
    path: String,
    groups: Vec<String>,
    login_profile: bool,
    credentials: Vec<Credential>,
}

#[derive(Debug, Clone)]
struct Fault {
    operation: String,
    entity: String,
    /// `None` fails forever
    remaining: Option<u32>,
    throttle: bool,
}

#[derive(Debug, Default)]
struct Inner {
    groups: IndexMap<String, GroupEntry>,
    identities: IndexMap<String, IdentityEntry>,
    faults: Vec<Fault>,
    writes: Vec<String>,
    next_key: u32,
}

/// An [`Authority`] backed by process memory.
#[derive(Debug)]
pub struct InMemoryAuthority {
    inner: Mutex<Inner>,
    reachable: bool,
}

impl Default for InMemoryAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAuthority {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            reachable: true,
        }
    }

    /// An authority whose connectivity check always fails.
    pub fn unreachable() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            reachable: false,
        }
    }

    /// Seed a group.
    pub fn with_group(self, name: &str, spec: &GroupSpec) -> Self {
        self.lock().groups.insert(
            name.to_string(),
            GroupEntry {
                path: spec.path.clone(),
                managed_policies: spec.managed_policies.clone(),
                inline_policies: spec.inline_policies.clone(),
            },
        );
        self
    }

    /// Seed an identity. `create_key: yes` seeds one active credential and
    /// `has_console_access: yes` seeds a login profile.
    pub fn with_identity(self, name: &str, spec: &IdentitySpec) -> Self {
        {
            let mut inner = self.lock();
            let mut credentials = Vec::new();
            if spec.create_key.is_yes() {
                credentials.push(inner.issue_key_metadata(CredentialStatus::Active));
            }
            inner.identities.insert(
                name.to_string(),
                IdentityEntry {
                    path: spec.path.clone(),
                    groups: spec.groups.clone(),
                    login_profile: spec.has_console_access.is_yes(),
                    credentials,
                },
            );
        }
        self
    }

    /// Seed an extra credential on an existing identity.
    pub fn with_credential(self, identity: &str, status: CredentialStatus) -> Self {
        {
            let mut inner = self.lock();
            let credential = inner.issue_key_metadata(status);
            if let Some(entry) = inner.identities.get_mut(identity) {
                entry.credentials.push(credential);
            }
        }
        self
    }

    /// Make every call of `operation` on `entity` fail.
    pub fn fail_on(self, operation: &str, entity: &str) -> Self {
        self.lock().faults.push(Fault {
            operation: operation.to_string(),
            entity: entity.to_string(),
            remaining: None,
            throttle: false,
        });
        self
    }

    /// Throttle the next `times` calls of `operation` on `entity`.
    pub fn throttle(self, operation: &str, entity: &str, times: u32) -> Self {
        self.lock().faults.push(Fault {
            operation: operation.to_string(),
            entity: entity.to_string(),
            remaining: Some(times),
            throttle: true,
        });
        self
    }

    /// Every write performed so far, as `"<operation> <args>"`.
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    /// Current credential ids of an identity.
    pub fn credential_ids(&self, identity: &str) -> Vec<String> {
        self.lock()
            .identities
            .get(identity)
            .map(|i| i.credentials.iter().map(|c| c.id.clone()).collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check injected faults, then hand out the guard.
    fn enter(&self, operation: &str, entity: &str) -> Result<MutexGuard<'_, Inner>> {
        let mut inner = self.lock();
        let fault = inner
            .faults
            .iter_mut()
            .find(|f| f.operation == operation && f.entity == entity && f.remaining != Some(0));

        if let Some(fault) = fault {
            if let Some(remaining) = fault.remaining.as_mut() {
                *remaining -= 1;
            }
            return Err(if fault.throttle {
                Error::Throttled {
                    message: format!("{operation} {entity}: Rate exceeded"),
                }
            } else {
                Error::CommandFailed {
                    message: format!("{operation} failed for {entity}"),
                    stderr: "injected fault".to_string(),
                }
            });
        }
        Ok(inner)
    }

    fn write(&self, operation: &str, entity: &str, args: &[&str]) -> Result<MutexGuard<'_, Inner>> {
        let mut inner = self.enter(operation, entity)?;
        let mut record = format!("{operation} {entity}");
        for arg in args {
            record.push(' ');
            record.push_str(arg);
        }
        inner.writes.push(record);
        Ok(inner)
    }
}

impl Inner {
    fn issue_key_metadata(&mut self, status: CredentialStatus) -> Credential {
        self.next_key += 1;
        Credential {
            id: format!("AKIAMEMORY{:010}", self.next_key),
            status,
            created_at: Some(chrono::Utc::now()),
        }
    }

    fn group(&self, name: &str) -> Result<&GroupEntry> {
        self.groups.get(name).ok_or_else(|| Error::NotFound {
            entity: format!("group/{name}"),
        })
    }

    fn identity(&self, name: &str) -> Result<&IdentityEntry> {
        self.identities.get(name).ok_or_else(|| Error::NotFound {
            entity: format!("identity/{name}"),
        })
    }

    fn identity_mut(&mut self, name: &str) -> Result<&mut IdentityEntry> {
        self.identities.get_mut(name).ok_or_else(|| Error::NotFound {
            entity: format!("identity/{name}"),
        })
    }

    fn group_mut(&mut self, name: &str) -> Result<&mut GroupEntry> {
        self.groups.get_mut(name).ok_or_else(|| Error::NotFound {
            entity: format!("group/{name}"),
        })
    }
}

impl Authority for InMemoryAuthority {
    fn caller_identity(&self) -> Result<CallerIdentity> {
        if !self.reachable {
            return Err(Error::Connectivity {
                message: "Unable to locate credentials".to_string(),
            });
        }
        Ok(CallerIdentity {
            account: "123456789012".to_string(),
            arn: "arn:aws:iam::123456789012:user/iamsync".to_string(),
        })
    }

    fn list_groups(&self) -> Result<Vec<GroupRecord>> {
        let inner = self.enter("list_groups", "*")?;
        Ok(inner
            .groups
            .iter()
            .map(|(name, g)| GroupRecord {
                name: name.clone(),
                path: g.path.clone(),
                arn: Some(format!("arn:aws:iam::123456789012:group{}{name}", g.path)),
                created_at: None,
            })
            .collect())
    }

    fn list_identities(&self) -> Result<Vec<IdentityRecord>> {
        let inner = self.enter("list_identities", "*")?;
        Ok(inner
            .identities
            .iter()
            .map(|(name, i)| IdentityRecord {
                name: name.clone(),
                path: i.path.clone(),
                arn: Some(format!("arn:aws:iam::123456789012:user{}{name}", i.path)),
            })
            .collect())
    }

    fn list_attached_group_policies(&self, group: &str) -> Result<Vec<String>> {
        let inner = self.enter("list_attached_group_policies", group)?;
        Ok(inner.group(group)?.managed_policies.clone())
    }

    fn list_group_policy_names(&self, group: &str) -> Result<Vec<String>> {
        let inner = self.enter("list_group_policy_names", group)?;
        Ok(inner.group(group)?.inline_policies.keys().cloned().collect())
    }

    fn get_group_policy(&self, group: &str, policy_name: &str) -> Result<Value> {
        let inner = self.enter("get_group_policy", group)?;
        inner
            .group(group)?
            .inline_policies
            .get(policy_name)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                entity: format!("group/{group}/{policy_name}"),
            })
    }

    fn list_groups_for_identity(&self, identity: &str) -> Result<Vec<String>> {
        let inner = self.enter("list_groups_for_identity", identity)?;
        Ok(inner.identity(identity)?.groups.clone())
    }

    fn has_login_profile(&self, identity: &str) -> Result<bool> {
        let inner = self.enter("has_login_profile", identity)?;
        Ok(inner
            .identities
            .get(identity)
            .is_some_and(|i| i.login_profile))
    }

    fn list_access_keys(&self, identity: &str) -> Result<Vec<Credential>> {
        let inner = self.enter("list_access_keys", identity)?;
        Ok(inner.identity(identity)?.credentials.clone())
    }

    fn create_group(&self, group: &str, path: &str) -> Result<()> {
        let mut inner = self.write("create_group", group, &[path])?;
        if inner.groups.contains_key(group) {
            return Err(Error::AlreadyExists {
                entity: format!("group/{group}"),
            });
        }
        inner.groups.insert(
            group.to_string(),
            GroupEntry {
                path: path.to_string(),
                managed_policies: Vec::new(),
                inline_policies: IndexMap::new(),
            },
        );
        Ok(())
    }

    fn create_identity(&self, identity: &str, path: &str) -> Result<()> {
        let mut inner = self.write("create_identity", identity, &[path])?;
        if inner.identities.contains_key(identity) {
            return Err(Error::AlreadyExists {
                entity: format!("identity/{identity}"),
            });
        }
        inner.identities.insert(
            identity.to_string(),
            IdentityEntry {
                path: path.to_string(),
                groups: Vec::new(),
                login_profile: false,
                credentials: Vec::new(),
            },
        );
        Ok(())
    }

    fn attach_group_policy(&self, group: &str, policy_arn: &str) -> Result<()> {
        let mut inner = self.write("attach_group_policy", group, &[policy_arn])?;
        let entry = inner.group_mut(group)?;
        if !entry.managed_policies.iter().any(|p| p == policy_arn) {
            entry.managed_policies.push(policy_arn.to_string());
        }
        Ok(())
    }

    fn put_group_policy(&self, group: &str, policy_name: &str, document: &Value) -> Result<()> {
        let mut inner = self.write("put_group_policy", group, &[policy_name])?;
        inner
            .group_mut(group)?
            .inline_policies
            .insert(policy_name.to_string(), document.clone());
        Ok(())
    }

    fn add_identity_to_group(&self, identity: &str, group: &str) -> Result<()> {
        let mut inner = self.write("add_identity_to_group", identity, &[group])?;
        inner.group(group)?;
        let entry = inner.identity_mut(identity)?;
        if !entry.groups.iter().any(|g| g == group) {
            entry.groups.push(group.to_string());
        }
        Ok(())
    }

    fn create_access_key(&self, identity: &str) -> Result<(String, Secret)> {
        let mut inner = self.write("create_access_key", identity, &[])?;
        if inner.identity(identity)?.credentials.len() >= MAX_CREDENTIALS {
            return Err(ConstraintViolation::remote_limit(
                identity,
                "Cannot exceed quota for AccessKeysPerUser: 2",
            )
            .into());
        }
        let credential = inner.issue_key_metadata(CredentialStatus::Active);
        let id = credential.id.clone();
        inner.identity_mut(identity)?.credentials.push(credential);
        Ok((id.clone(), Secret::new(format!("memory-secret-for-{id}"))))
    }

    fn create_login_profile(
        &self,
        identity: &str,
        _password: &str,
        _password_reset_required: bool,
    ) -> Result<()> {
        let mut inner = self.write("create_login_profile", identity, &[])?;
        let entry = inner.identity_mut(identity)?;
        if entry.login_profile {
            return Err(Error::AlreadyExists {
                entity: format!("identity/{identity} login profile"),
            });
        }
        entry.login_profile = true;
        Ok(())
    }

    fn delete_access_key(&self, identity: &str, access_key_id: &str) -> Result<()> {
        let mut inner = self.write("delete_access_key", identity, &[access_key_id])?;
        let entry = inner.identity_mut(identity)?;
        let before = entry.credentials.len();
        entry.credentials.retain(|c| c.id != access_key_id);
        if entry.credentials.len() == before {
            return Err(Error::NotFound {
                entity: format!("identity/{identity} key {access_key_id}"),
            });
        }
        Ok(())
    }

    fn remove_identity_from_group(&self, identity: &str, group: &str) -> Result<()> {
        let mut inner = self.write("remove_identity_from_group", identity, &[group])?;
        inner.group(group)?;
        let entry = inner.identity_mut(identity)?;
        if !entry.groups.iter().any(|g| g == group) {
            return Err(Error::NotFound {
                entity: format!("identity/{identity} in group/{group}"),
            });
        }
        entry.groups.retain(|g| g != group);
        Ok(())
    }

    fn delete_identity(&self, identity: &str) -> Result<()> {
        let mut inner = self.write("delete_identity", identity, &[])?;
        inner
            .identities
            .shift_remove(identity)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound {
                entity: format!("identity/{identity}"),
            })
    }
}
