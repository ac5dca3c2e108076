//! The reconciler.
//!
//! Computes an ordered [`Plan`] that converges the remote snapshot toward
//! the desired state. Convergence is additive: nothing is ever detached,
//! removed or recreated. Every desired fact that already holds remotely is
//! reported as an explained skip, so re-running against converged state
//! yields a plan of skips only.
//!
//! Phases run in a fixed order (groups, identities, memberships,
//! credentials, console logins) and each phase follows the desired state's
//! insertion order, which makes plans deterministic.

use crate::operation::{Operation, Plan, SkipReason};
use crate::types::{
    DesiredState, Diagnostic, EntityKey, EntityKind, GroupSpec, IdentitySpec, RemoteGroup,
    RemoteIdentity, Snapshot,
};
use crate::validate::{validate_credential, validate_entity, validate_policy_arn};
use std::collections::HashSet;

/// Compute the plan for one snapshot and desired state.
pub fn reconcile(snapshot: &Snapshot, desired: &DesiredState) -> Plan {
    let mut reconciler = Reconciler {
        snapshot,
        desired,
        plan: Plan::default(),
        unavailable_groups: HashSet::new(),
        excluded_identities: HashSet::new(),
    };

    reconciler.groups();
    reconciler.identities();
    reconciler.memberships();
    reconciler.credentials();
    reconciler.logins();

    for diagnostic in &reconciler.plan.diagnostics {
        log::warn!("{diagnostic}");
    }
    log::debug!(
        "plan has {} changes and {} skips",
        reconciler.plan.changes().count(),
        reconciler.plan.skips().count()
    );
    reconciler.plan
}

struct Reconciler<'a> {
    snapshot: &'a Snapshot,
    desired: &'a DesiredState,
    plan: Plan,
    /// Desired groups that will not exist after apply
    unavailable_groups: HashSet<String>,
    /// Identities left out of later phases (invalid or degraded)
    excluded_identities: HashSet<String>,
}

impl<'a> Reconciler<'a> {
    fn push(&mut self, op: Operation) {
        log::debug!("{op}");
        self.plan.operations.push(op);
    }

    fn skip(&mut self, target: EntityKey, action: impl Into<String>, reason: SkipReason) {
        self.push(Operation::skip(target, action, reason));
    }

    fn diagnose(&mut self, entity: EntityKey, message: impl Into<String>) {
        self.plan.diagnostics.push(Diagnostic::new(entity, message));
    }

    // =========================================================================
    // Groups
    // =========================================================================

    fn groups(&mut self) {
        let (desired, snapshot) = (self.desired, self.snapshot);
        for (name, spec) in &desired.groups {
            let key = EntityKey::group(name);
            match snapshot.groups.get(name) {
                None => self.new_group(&key, spec),
                Some(remote) if !remote.status.is_complete() => {
                    self.degraded(&key, "reconcile group", remote.status.failures());
                }
                Some(remote) => self.existing_group(&key, spec, remote),
            }
        }
    }

    fn new_group(&mut self, key: &EntityKey, spec: &GroupSpec) {
        if let Err(violation) = validate_entity(EntityKind::Group, &key.name, &spec.path) {
            self.unavailable_groups.insert(key.name.clone());
            self.skip(key.clone(), "create group", SkipReason::ConstraintViolation { violation });
            return;
        }

        self.push(Operation::CreateGroup {
            group: key.name.clone(),
            path: spec.path.clone(),
        });
        for arn in &spec.managed_policies {
            self.attach(key, arn, None);
        }
        for (policy_name, document) in &spec.inline_policies {
            self.put_inline(key, policy_name, document, None);
        }
    }

    fn existing_group(&mut self, key: &EntityKey, spec: &GroupSpec, remote: &RemoteGroup) {
        self.skip(
            key.clone(),
            "create group",
            SkipReason::AlreadyPresent {
                note: path_note(&remote.path, &spec.path),
            },
        );
        for arn in &spec.managed_policies {
            self.attach(key, arn, Some(remote));
        }
        for (policy_name, document) in &spec.inline_policies {
            self.put_inline(key, policy_name, document, Some(remote));
        }

        let extra = remote
            .managed_policies
            .iter()
            .filter(|arn| !spec.managed_policies.contains(*arn))
            .count()
            + remote
                .inline_policies
                .keys()
                .filter(|name| !spec.inline_policies.contains_key(*name))
                .count();
        if extra > 0 {
            log::debug!("{key} has {extra} undeclared remote policies; left in place");
        }
    }

    fn attach(&mut self, key: &EntityKey, arn: &str, remote: Option<&RemoteGroup>) {
        let action = format!("attach {arn}");
        if remote.is_some_and(|r| r.managed_policies.iter().any(|p| p == arn)) {
            self.skip(key.clone(), action, SkipReason::already_present());
            return;
        }
        match validate_policy_arn(arn) {
            Ok(()) => self.push(Operation::AttachManagedPolicy {
                group: key.name.clone(),
                policy_arn: arn.to_string(),
            }),
            Err(violation) => {
                self.skip(key.clone(), action, SkipReason::ConstraintViolation { violation });
            }
        }
    }

    fn put_inline(
        &mut self,
        key: &EntityKey,
        policy_name: &str,
        document: &serde_json::Value,
        remote: Option<&RemoteGroup>,
    ) {
        if !document.is_object() {
            self.diagnose(
                key.clone(),
                format!("inline policy '{policy_name}' is not a JSON object; not applied"),
            );
            return;
        }

        let current = remote.and_then(|r| r.inline_policies.get(policy_name));
        if current == Some(document) {
            self.skip(
                key.clone(),
                format!("put inline policy {policy_name}"),
                SkipReason::already_present(),
            );
            return;
        }

        self.push(Operation::PutInlinePolicy {
            group: key.name.clone(),
            policy_name: policy_name.to_string(),
            document: document.clone(),
            replaces: current.cloned(),
        });
    }

    // =========================================================================
    // Identities
    // =========================================================================

    fn identities(&mut self) {
        let (desired, snapshot) = (self.desired, self.snapshot);
        for (name, spec) in &desired.identities {
            let key = EntityKey::identity(name);
            match snapshot.identities.get(name) {
                None => self.new_identity(&key, spec),
                Some(remote) if !remote.status.is_complete() => {
                    self.excluded_identities.insert(name.clone());
                    self.degraded(&key, "reconcile identity", remote.status.failures());
                }
                Some(remote) => self.skip(
                    key,
                    "create identity",
                    SkipReason::AlreadyPresent {
                        note: path_note(&remote.path, &spec.path),
                    },
                ),
            }
        }
    }

    fn new_identity(&mut self, key: &EntityKey, spec: &IdentitySpec) {
        match validate_entity(EntityKind::Identity, &key.name, &spec.path) {
            Ok(()) => self.push(Operation::CreateIdentity {
                identity: key.name.clone(),
                path: spec.path.clone(),
            }),
            Err(violation) => {
                self.excluded_identities.insert(key.name.clone());
                self.skip(key.clone(), "create identity", SkipReason::ConstraintViolation { violation });
            }
        }
    }

    /// Desired identities still in play, with their remote counterpart.
    fn active_identities(&self) -> Vec<(&'a String, &'a IdentitySpec, Option<&'a RemoteIdentity>)> {
        let (desired, snapshot) = (self.desired, self.snapshot);
        desired
            .identities
            .iter()
            .filter(|(name, _)| !self.excluded_identities.contains(*name))
            .map(|(name, spec)| (name, spec, snapshot.identities.get(name)))
            .collect()
    }

    // =========================================================================
    // Memberships
    // =========================================================================

    fn memberships(&mut self) {
        for (name, spec, remote) in self.active_identities() {
            let key = EntityKey::identity(name);
            for group in &spec.groups {
                let action = format!("add to group {group}");
                if remote.is_some_and(|r| r.is_member_of(group)) {
                    self.skip(key.clone(), action, SkipReason::already_present());
                } else if !self.group_available(group) {
                    self.skip(
                        key.clone(),
                        action,
                        SkipReason::MissingDependency {
                            dependency: EntityKey::group(group),
                        },
                    );
                } else {
                    self.push(Operation::CreateMembership {
                        identity: name.clone(),
                        group: group.clone(),
                    });
                }
            }
        }
    }

    /// A group exists remotely or will be created by this plan.
    fn group_available(&self, group: &str) -> bool {
        self.snapshot.groups.contains_key(group)
            || (self.desired.groups.contains_key(group) && !self.unavailable_groups.contains(group))
    }

    // =========================================================================
    // Credentials and console logins
    // =========================================================================

    fn credentials(&mut self) {
        for (name, spec, remote) in self.active_identities() {
            if !spec.create_key.is_yes() {
                continue;
            }
            let key = EntityKey::identity(name);
            let count = remote.map_or(0, RemoteIdentity::credential_count);

            if let Err(violation) = validate_credential(name, true, count) {
                self.skip(
                    key,
                    "create credential",
                    SkipReason::CredentialLimitExceeded {
                        detail: violation.detail,
                    },
                );
            } else if let Some(active) = remote.map(RemoteIdentity::active_credentials).filter(|n| *n > 0) {
                self.skip(
                    key,
                    "create credential",
                    SkipReason::AlreadyPresent {
                        note: Some(format!("{active} active")),
                    },
                );
            } else {
                self.push(Operation::CreateCredential {
                    identity: name.clone(),
                });
            }
        }
    }

    fn logins(&mut self) {
        for (name, spec, remote) in self.active_identities() {
            if !spec.has_console_access.is_yes() {
                continue;
            }
            let key = EntityKey::identity(name);
            if remote.is_some_and(|r| r.has_login_capability) {
                self.skip(
                    key,
                    "create console login",
                    SkipReason::AlreadyPresent {
                        note: Some("password not available; it is only shown at creation".into()),
                    },
                );
            } else {
                self.push(Operation::CreateLoginCapability {
                    identity: name.clone(),
                });
            }
        }
    }

    fn degraded(&mut self, key: &EntityKey, action: &str, failures: &[String]) {
        self.diagnose(
            key.clone(),
            "partially read; excluded from this plan until the read succeeds",
        );
        self.skip(
            key.clone(),
            action,
            SkipReason::Degraded {
                failures: failures.to_vec(),
            },
        );
    }
}

fn path_note(remote: &str, desired: &str) -> Option<String> {
    (remote != desired).then(|| {
        format!("remote path {remote} differs from declared {desired}; paths are not changed in place")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desired::load_value;
    use crate::types::{Credential, CredentialStatus, Flag};
    use serde_json::json;

    fn credential(id: &str, status: CredentialStatus) -> Credential {
        Credential {
            id: id.to_string(),
            status,
            created_at: None,
        }
    }

    fn desired(doc: serde_json::Value) -> DesiredState {
        load_value(&doc).unwrap().desired
    }

    fn index_of(plan: &Plan, pred: impl Fn(&Operation) -> bool) -> Option<usize> {
        plan.operations.iter().position(pred)
    }

    /// Simulate a successful apply of every change onto the snapshot.
    fn converge(snapshot: &Snapshot, plan: &Plan) -> Snapshot {
        let mut next = snapshot.clone();
        for op in plan.changes() {
            match op {
                Operation::CreateGroup { group, path } => {
                    next.groups.insert(group.clone(), RemoteGroup::new(path.clone()));
                }
                Operation::AttachManagedPolicy { group, policy_arn } => {
                    next.groups[group].managed_policies.push(policy_arn.clone());
                }
                Operation::PutInlinePolicy {
                    group,
                    policy_name,
                    document,
                    ..
                } => {
                    next.groups[group]
                        .inline_policies
                        .insert(policy_name.clone(), document.clone());
                }
                Operation::CreateIdentity { identity, path } => {
                    next.identities
                        .insert(identity.clone(), RemoteIdentity::new(path.clone()));
                }
                Operation::CreateMembership { identity, group } => {
                    next.identities[identity].groups.push(group.clone());
                }
                Operation::CreateCredential { identity } => next.identities[identity]
                    .credentials
                    .push(credential("AKIANEW", CredentialStatus::Active)),
                Operation::CreateLoginCapability { identity } => {
                    next.identities[identity].has_login_capability = true;
                }
                Operation::ImportExisting { .. } | Operation::Skip { .. } => {}
            }
        }
        next
    }

    fn full_desired() -> DesiredState {
        desired(json!({
            "groups": {
                "Ops": {
                    "managed_policy_arns": ["arn:aws:iam::aws:policy/ReadOnlyAccess"],
                    "inline_policies": { "s3": { "Version": "2012-10-17", "Statement": [] } }
                },
                "Dev": {}
            },
            "users": {
                "alice": { "groups": ["Ops", "Dev"], "create_key": "yes", "has_console_access": "yes" },
                "bob": { "groups": ["Dev"] }
            }
        }))
    }

    #[test]
    fn test_empty_remote_creates_everything_in_phase_order() {
        let plan = reconcile(&Snapshot::default(), &full_desired());
        let kinds: Vec<_> = plan.operations.iter().map(Operation::kind).collect();
        assert_eq!(
            kinds,
            vec![
                "create_group",
                "attach_managed_policy",
                "put_inline_policy",
                "create_group",
                "create_identity",
                "create_identity",
                "create_membership",
                "create_membership",
                "create_membership",
                "create_credential",
                "create_login_capability",
            ]
        );
        assert!(plan.diagnostics.is_empty());
    }

    #[test]
    fn test_idempotence() {
        let desired = full_desired();
        let first = reconcile(&Snapshot::default(), &desired);
        let converged = converge(&Snapshot::default(), &first);

        let second = reconcile(&converged, &desired);
        assert!(second.is_converged());
        assert!(!second.operations.is_empty());
        assert!(second
            .operations
            .iter()
            .all(|op| op.skip_reason().is_some_and(SkipReason::is_already_present)));
    }

    #[test]
    fn test_additive_membership() {
        let mut snapshot = Snapshot::default();
        snapshot.groups.insert("A".into(), RemoteGroup::new("/"));
        snapshot.groups.insert("B".into(), RemoteGroup::new("/"));
        let mut bob = RemoteIdentity::new("/");
        bob.groups = vec!["A".into(), "B".into()];
        snapshot.identities.insert("bob".into(), bob);

        let plan = reconcile(&snapshot, &desired(json!({ "users": { "bob": { "groups": ["A"] } } })));

        assert!(plan.is_converged());
        assert!(plan.operations.iter().all(|op| !op.key().contains("member:B")));
    }

    #[test]
    fn test_credential_ceiling() {
        let mut carol = RemoteIdentity::new("/");
        carol.credentials = vec![
            credential("AKIA1", CredentialStatus::Active),
            credential("AKIA2", CredentialStatus::Active),
        ];
        let mut snapshot = Snapshot::default();
        snapshot.identities.insert("carol".into(), carol);

        let plan = reconcile(&snapshot, &desired(json!({ "users": { "carol": { "create_key": "yes" } } })));

        assert!(plan.operations.iter().any(|op| matches!(
            op,
            Operation::Skip { reason: SkipReason::CredentialLimitExceeded { .. }, .. }
        )));
        assert!(!plan
            .operations
            .iter()
            .any(|op| matches!(op, Operation::CreateCredential { .. })));
    }

    #[test]
    fn test_inactive_keys_count_toward_ceiling() {
        let mut dana = RemoteIdentity::new("/");
        dana.credentials = vec![
            credential("AKIA1", CredentialStatus::Inactive),
            credential("AKIA2", CredentialStatus::Inactive),
        ];
        let mut snapshot = Snapshot::default();
        snapshot.identities.insert("dana".into(), dana);

        let plan = reconcile(&snapshot, &desired(json!({ "users": { "dana": { "create_key": "yes" } } })));
        assert!(matches!(
            plan.operations.last().and_then(Operation::skip_reason),
            Some(SkipReason::CredentialLimitExceeded { .. })
        ));
    }

    #[test]
    fn test_only_inactive_key_gets_new_credential() {
        let mut erin = RemoteIdentity::new("/");
        erin.credentials = vec![credential("AKIA1", CredentialStatus::Inactive)];
        let mut snapshot = Snapshot::default();
        snapshot.identities.insert("erin".into(), erin);

        let plan = reconcile(&snapshot, &desired(json!({ "users": { "erin": { "create_key": "yes" } } })));
        assert!(matches!(
            plan.operations.last(),
            Some(Operation::CreateCredential { identity }) if identity == "erin"
        ));
    }

    #[test]
    fn test_create_group_precedes_attach() {
        let plan = reconcile(&Snapshot::default(), &full_desired());
        let create = index_of(&plan, |op| matches!(op, Operation::CreateGroup { group, .. } if group == "Ops"));
        let attach =
            index_of(&plan, |op| matches!(op, Operation::AttachManagedPolicy { group, .. } if group == "Ops"));
        assert!(create.unwrap() < attach.unwrap());
    }

    #[test]
    fn test_determinism() {
        let desired = full_desired();
        let a = reconcile(&Snapshot::default(), &desired);
        let b = reconcile(&Snapshot::default(), &desired);
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_bare_string_entry_is_treated_as_defaults() {
        let plan = reconcile(&Snapshot::default(), &desired(json!({ "users": { "dave": "oops" } })));
        assert_eq!(
            plan.operations,
            vec![Operation::CreateIdentity {
                identity: "dave".into(),
                path: "/".into(),
            }]
        );
        assert_eq!(
            desired(json!({ "users": { "dave": "oops" } })).identities["dave"].create_key,
            Flag::No
        );
    }

    #[test]
    fn test_existing_login_reports_password_unavailable() {
        let mut frank = RemoteIdentity::new("/");
        frank.has_login_capability = true;
        let mut snapshot = Snapshot::default();
        snapshot.identities.insert("frank".into(), frank);

        let plan = reconcile(
            &snapshot,
            &desired(json!({ "users": { "frank": { "has_console_access": "yes" } } })),
        );
        let reason = plan.operations.last().and_then(Operation::skip_reason).unwrap();
        assert!(reason.to_string().contains("password not available"));
    }

    #[test]
    fn test_changed_inline_document_is_replaced() {
        let mut ops = RemoteGroup::new("/");
        ops.inline_policies.insert("s3".into(), json!({ "Version": "2008-10-17" }));
        ops.inline_policies.insert("legacy".into(), json!({ "Version": "2012-10-17" }));
        let mut snapshot = Snapshot::default();
        snapshot.groups.insert("Ops".into(), ops);

        let plan = reconcile(
            &snapshot,
            &desired(json!({ "groups": { "Ops": { "inline_policies": { "s3": { "Version": "2012-10-17" } } } } })),
        );

        let put = plan.changes().next().unwrap();
        assert!(matches!(
            put,
            Operation::PutInlinePolicy { policy_name, replaces: Some(_), .. } if policy_name == "s3"
        ));
        // The undeclared remote policy is left alone
        assert_eq!(plan.changes().count(), 1);
    }

    #[test]
    fn test_malformed_inline_document_is_diagnosed() {
        let plan = reconcile(
            &Snapshot::default(),
            &desired(json!({
                "groups": {
                    "Bad": { "inline_policies": { "p": "{not json" } },
                    "Good": {}
                }
            })),
        );
        assert_eq!(plan.diagnostics.len(), 1);
        assert_eq!(plan.diagnostics[0].entity, EntityKey::group("Bad"));
        assert_eq!(plan.changes().filter(|op| op.kind() == "create_group").count(), 2);
        assert!(!plan.changes().any(|op| op.kind() == "put_inline_policy"));
    }

    #[test]
    fn test_degraded_entity_is_excluded() {
        let mut ops = RemoteGroup::new("/");
        ops.status.record_failure("list attached policies: boom".into());
        let mut snapshot = Snapshot::default();
        snapshot.groups.insert("Ops".into(), ops);

        let plan = reconcile(
            &snapshot,
            &desired(json!({
                "groups": { "Ops": { "managed_policy_arns": ["arn:aws:iam::aws:policy/ReadOnlyAccess"] } },
                "users": { "alice": { "groups": ["Ops"] } }
            })),
        );

        assert!(matches!(
            plan.operations[0].skip_reason(),
            Some(SkipReason::Degraded { .. })
        ));
        assert!(!plan.changes().any(|op| op.kind() == "attach_managed_policy"));
        // The group exists, so membership still proceeds
        assert!(plan.changes().any(|op| op.kind() == "create_membership"));
        assert_eq!(plan.diagnostics.len(), 1);
    }

    #[test]
    fn test_membership_to_unknown_group_is_missing_dependency() {
        let plan = reconcile(
            &Snapshot::default(),
            &desired(json!({ "users": { "gina": { "groups": ["Ghost"] } } })),
        );
        assert!(matches!(
            plan.operations.last().and_then(Operation::skip_reason),
            Some(SkipReason::MissingDependency { dependency }) if *dependency == EntityKey::group("Ghost")
        ));
    }

    #[test]
    fn test_invalid_names_are_skipped_before_create() {
        let plan = reconcile(
            &Snapshot::default(),
            &desired(json!({
                "groups": { "bad group": {} },
                "users": { "hal": { "groups": ["bad group"], "path": "no-slashes", "create_key": "yes" } }
            })),
        );

        assert!(plan.is_converged());
        let reasons: Vec<_> = plan.skips().filter_map(Operation::skip_reason).collect();
        assert!(matches!(reasons[0], SkipReason::ConstraintViolation { .. }));
        assert!(matches!(reasons[1], SkipReason::ConstraintViolation { .. }));
        // hal is excluded from later phases
        assert_eq!(reasons.len(), 2);
    }

    #[test]
    fn test_path_mismatch_is_noted_not_recreated() {
        let mut snapshot = Snapshot::default();
        snapshot.identities.insert("ivy".into(), RemoteIdentity::new("/old/"));

        let plan = reconcile(&snapshot, &desired(json!({ "users": { "ivy": { "path": "/new/" } } })));
        assert!(plan.is_converged());
        assert!(plan.operations[0].to_string().contains("differs from declared /new/"));
    }

    #[test]
    fn test_invalid_policy_reference_is_skipped() {
        let plan = reconcile(
            &Snapshot::default(),
            &desired(json!({ "groups": { "Ops": { "managed_policy_arns": ["ReadOnlyAccess"] } } })),
        );
        assert_eq!(plan.changes().count(), 1);
        assert!(matches!(
            plan.skips().next().and_then(Operation::skip_reason),
            Some(SkipReason::ConstraintViolation { .. })
        ));
    }
}
