//! Direct apply executor.
//!
//! Turns plan operations into [`declarative`] tasks that call the
//! [`Authority`], and collects per-operation outcomes, newly tracked keys
//! and the one-shot secrets generated along the way.

use crate::backend::Authority;
use crate::error::Error;
use crate::operation::Operation;
use crate::secret::{DEFAULT_PASSWORD_LENGTH, IssuedSecret, Secret, SecretKind, generate_password};
use crate::types::EntityKey;
use declarative::{
    ApplyContext, ApplyResult, ConfirmCallback, ExecuteOptions, ExecuteSummary, ExecutionPlan,
    ProgressCallback, Task,
};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::{Mutex, PoisonError};

/// Options for one apply run.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Only record adoptions; every other operation is skipped
    pub import_only: bool,
    /// Report what would happen without calling any mutating method
    pub dry_run: bool,
    /// Parallel operations per dependency stage
    pub jobs: usize,
    /// Length of generated console passwords
    pub password_length: usize,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            import_only: false,
            dry_run: false,
            jobs: 4,
            password_length: DEFAULT_PASSWORD_LENGTH,
        }
    }
}

/// Outcome of one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    pub operation: Operation,
    pub result: ApplyResult,
}

/// Everything an apply run produced.
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// One outcome per operation, in plan order
    pub outcomes: Vec<OperationOutcome>,
    pub summary: ExecuteSummary,
    /// Entities that are now managed and were not before
    pub tracked: Vec<EntityKey>,
    pub cancelled: bool,
    secrets: Vec<IssuedSecret>,
}

impl ApplyReport {
    /// Take the generated secrets. They are handed out once.
    pub fn take_secrets(&mut self) -> Vec<IssuedSecret> {
        std::mem::take(&mut self.secrets)
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, ApplyResult::Failed { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.summary.is_success()
    }
}

/// Applies plans directly against an [`Authority`].
pub struct DirectExecutor<'a> {
    authority: &'a dyn Authority,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> DirectExecutor<'a> {
    pub fn new(authority: &'a dyn Authority) -> Self {
        Self {
            authority,
            cancel: None,
        }
    }

    /// Stop starting new operations once `flag` is set.
    pub fn with_cancel(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Apply operations in dependency order.
    pub fn apply<P, C>(
        &self,
        operations: &[Operation],
        options: &ApplyOptions,
        progress: &mut P,
        confirm: &mut C,
    ) -> anyhow::Result<ApplyReport>
    where
        P: ProgressCallback,
        C: ConfirmCallback,
    {
        let secrets = Mutex::new(Vec::new());
        let mut plan = ExecutionPlan::new();
        for op in operations {
            plan.push(Box::new(OperationTask {
                op: op.clone(),
                authority: self.authority,
                import_only: options.import_only,
                password_length: options.password_length,
                secrets: &secrets,
            }));
        }

        let opts = ExecuteOptions {
            dry_run: options.dry_run,
            jobs: options.jobs,
            verbose: false,
        };
        let executed = declarative::execute(&plan, &opts, self.cancel, progress, confirm)?;
        drop(plan);

        let mut report = ApplyReport {
            summary: executed.summary,
            cancelled: executed.cancelled,
            secrets: secrets.into_inner().unwrap_or_else(PoisonError::into_inner),
            ..Default::default()
        };

        for (op, outcome) in operations.iter().zip(executed.outcomes) {
            if let Some(key) = newly_tracked(op, &outcome.result)
                && !report.tracked.contains(&key)
            {
                report.tracked.push(key);
            }
            report.outcomes.push(OperationOutcome {
                operation: op.clone(),
                result: outcome.result,
            });
        }

        log::info!(
            "apply finished: {} changed, {} skipped, {} failed",
            report.summary.total_changes(),
            report.summary.skipped,
            report.summary.failed
        );
        Ok(report)
    }
}

/// Entities that become managed when an operation succeeds.
fn newly_tracked(op: &Operation, result: &ApplyResult) -> Option<EntityKey> {
    match (op, result) {
        (Operation::ImportExisting { entity, .. }, ApplyResult::Adopted) => Some(entity.clone()),
        (
            Operation::CreateGroup { .. } | Operation::CreateIdentity { .. },
            ApplyResult::Created | ApplyResult::NoChange,
        ) => Some(op.target()),
        _ => None,
    }
}

struct OperationTask<'a> {
    op: Operation,
    authority: &'a dyn Authority,
    import_only: bool,
    password_length: usize,
    secrets: &'a Mutex<Vec<IssuedSecret>>,
}

impl fmt::Debug for OperationTask<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationTask").field("op", &self.op).finish_non_exhaustive()
    }
}

impl OperationTask<'_> {
    fn issue(&self, identity: &str, kind: SecretKind, secret: Secret) {
        self.secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(IssuedSecret {
                identity: identity.to_string(),
                kind,
                secret,
            });
    }

    fn run(&self) -> crate::error::Result<ApplyResult> {
        let authority = self.authority;
        match &self.op {
            Operation::CreateGroup { group, path } => {
                created_or_present(authority.create_group(group, path))
            }
            Operation::CreateIdentity { identity, path } => {
                created_or_present(authority.create_identity(identity, path))
            }
            Operation::AttachManagedPolicy { group, policy_arn } => {
                authority.attach_group_policy(group, policy_arn)?;
                Ok(ApplyResult::Modified)
            }
            Operation::PutInlinePolicy {
                group,
                policy_name,
                document,
                ..
            } => {
                authority.put_group_policy(group, policy_name, document)?;
                Ok(ApplyResult::Modified)
            }
            Operation::CreateMembership { identity, group } => {
                authority.add_identity_to_group(identity, group)?;
                Ok(ApplyResult::Modified)
            }
            Operation::CreateCredential { identity } => {
                let (access_key_id, secret) = authority.create_access_key(identity)?;
                self.issue(identity, SecretKind::AccessKey { access_key_id }, secret);
                Ok(ApplyResult::Created)
            }
            Operation::CreateLoginCapability { identity } => {
                let password = generate_password(self.password_length).expose();
                match authority.create_login_profile(identity, &password, true) {
                    Ok(()) => {
                        self.issue(identity, SecretKind::ConsolePassword, Secret::new(password));
                        Ok(ApplyResult::Created)
                    }
                    Err(Error::AlreadyExists { .. }) => Ok(ApplyResult::skipped(
                        "identity already has a login profile - password not available",
                    )),
                    Err(e) => Err(e),
                }
            }
            Operation::ImportExisting { .. } => Ok(ApplyResult::Adopted),
            Operation::Skip { reason, .. } => Ok(ApplyResult::skipped(reason.to_string())),
        }
    }
}

/// A create racing an out-of-band create is not a failure.
fn created_or_present(result: crate::error::Result<()>) -> crate::error::Result<ApplyResult> {
    match result {
        Ok(()) => Ok(ApplyResult::Created),
        Err(Error::AlreadyExists { entity }) => {
            log::info!("{entity} already exists; nothing to create");
            Ok(ApplyResult::NoChange)
        }
        Err(e) => Err(e),
    }
}

impl Task for OperationTask<'_> {
    fn id(&self) -> String {
        self.op.key()
    }

    fn description(&self) -> String {
        self.op.to_string()
    }

    fn kind(&self) -> &'static str {
        self.op.kind()
    }

    fn depends_on(&self) -> Vec<String> {
        self.op.depends_on()
    }

    fn is_change(&self) -> bool {
        match self.op {
            Operation::Skip { .. } => false,
            Operation::ImportExisting { .. } => true,
            _ => !self.import_only,
        }
    }

    fn apply(&self, ctx: &ApplyContext) -> anyhow::Result<ApplyResult> {
        if let Operation::Skip { reason, .. } = &self.op {
            return Ok(ApplyResult::skipped(reason.to_string()));
        }
        if self.import_only && !matches!(self.op, Operation::ImportExisting { .. }) {
            return Ok(ApplyResult::skipped("import-only run"));
        }
        if ctx.dry_run {
            return Ok(ApplyResult::skipped(format!("dry run: would {}", self.op)));
        }

        self.run().map_err(|e| {
            anyhow::Error::new(Error::ApplyFailure {
                operation: self.op.key(),
                message: e.to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::InMemoryAuthority;
    use crate::operation::SkipReason;
    use crate::types::{GroupSpec, IdentitySpec};
    use declarative::{AutoConfirm, AutoDecline, NoProgress};

    fn run(
        authority: &InMemoryAuthority,
        operations: &[Operation],
        options: &ApplyOptions,
    ) -> ApplyReport {
        DirectExecutor::new(authority)
            .apply(operations, options, &mut NoProgress, &mut AutoConfirm)
            .unwrap()
    }

    fn create_ops() -> Vec<Operation> {
        vec![
            Operation::CreateGroup {
                group: "Ops".into(),
                path: "/".into(),
            },
            Operation::AttachManagedPolicy {
                group: "Ops".into(),
                policy_arn: "arn:aws:iam::aws:policy/ReadOnlyAccess".into(),
            },
            Operation::CreateIdentity {
                identity: "alice".into(),
                path: "/".into(),
            },
            Operation::CreateMembership {
                identity: "alice".into(),
                group: "Ops".into(),
            },
            Operation::CreateCredential {
                identity: "alice".into(),
            },
            Operation::CreateLoginCapability {
                identity: "alice".into(),
            },
        ]
    }

    #[test]
    fn test_apply_creates_and_issues_secrets() {
        let authority = InMemoryAuthority::new();
        let mut report = run(&authority, &create_ops(), &ApplyOptions::default());

        assert!(report.is_success());
        assert_eq!(report.summary.created, 4);
        assert_eq!(report.summary.modified, 2);
        assert_eq!(
            report.tracked,
            vec![EntityKey::group("Ops"), EntityKey::identity("alice")]
        );

        let secrets = report.take_secrets();
        assert_eq!(secrets.len(), 2);
        assert!(report.take_secrets().is_empty());
        assert!(secrets.iter().any(|s| s.kind == SecretKind::ConsolePassword));
    }

    #[test]
    fn test_dry_run_never_mutates() {
        let authority = InMemoryAuthority::new();
        let options = ApplyOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = run(&authority, &create_ops(), &options);

        assert!(authority.writes().is_empty());
        assert_eq!(report.summary.skipped, create_ops().len());
        assert!(report.tracked.is_empty());
    }

    #[test]
    fn test_import_only_records_adoption_without_mutation() {
        let authority = InMemoryAuthority::new().with_group("Legacy", &GroupSpec::default());
        let mut ops = create_ops();
        ops.push(Operation::ImportExisting {
            entity: EntityKey::group("Legacy"),
            adopted: crate::operation::Adopted::Group(GroupSpec::default()),
        });
        let options = ApplyOptions {
            import_only: true,
            ..Default::default()
        };
        let report = run(&authority, &ops, &options);

        assert!(authority.writes().is_empty());
        assert_eq!(report.tracked, vec![EntityKey::group("Legacy")]);
        assert_eq!(report.summary.adopted, 1);
        assert_eq!(
            report.outcomes[0].result,
            ApplyResult::skipped("import-only run")
        );
    }

    #[test]
    fn test_failure_skips_dependents() {
        let authority = InMemoryAuthority::new().fail_on("create_group", "Ops");
        let report = run(&authority, &create_ops(), &ApplyOptions::default());

        assert!(matches!(report.outcomes[0].result, ApplyResult::Failed { .. }));
        assert_eq!(
            report.outcomes[1].result,
            ApplyResult::skipped("dependency group/Ops:create failed")
        );
        assert!(matches!(
            &report.outcomes[3].result,
            ApplyResult::Skipped { reason } if reason.contains("group/Ops:create")
        ));
        // alice does not depend on the group
        assert_eq!(report.outcomes[2].result, ApplyResult::Created);
        assert_eq!(report.outcomes[4].result, ApplyResult::Created);
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn test_skip_operations_carry_their_reason() {
        let authority = InMemoryAuthority::new();
        let ops = vec![Operation::skip(
            EntityKey::identity("carol"),
            "create credential",
            SkipReason::CredentialLimitExceeded {
                detail: "identity 'carol' already has 2 credentials".into(),
            },
        )];
        let report = DirectExecutor::new(&authority)
            .apply(&ops, &ApplyOptions::default(), &mut NoProgress, &mut AutoDecline)
            .unwrap();

        assert_eq!(
            report.outcomes[0].result,
            ApplyResult::skipped("identity 'carol' already has 2 credentials")
        );
    }

    #[test]
    fn test_existing_login_profile_is_not_a_failure() {
        let authority = InMemoryAuthority::new().with_identity(
            "frank",
            &IdentitySpec {
                has_console_access: crate::types::Flag::Yes,
                ..Default::default()
            },
        );
        let ops = vec![Operation::CreateLoginCapability {
            identity: "frank".into(),
        }];
        let mut report = run(&authority, &ops, &ApplyOptions::default());

        assert!(matches!(
            &report.outcomes[0].result,
            ApplyResult::Skipped { reason } if reason.contains("password not available")
        ));
        assert!(report.take_secrets().is_empty());
    }

    #[test]
    fn test_cancelled_run_writes_nothing() {
        let authority = InMemoryAuthority::new();
        let cancel = AtomicBool::new(true);
        let report = DirectExecutor::new(&authority)
            .with_cancel(&cancel)
            .apply(&create_ops(), &ApplyOptions::default(), &mut NoProgress, &mut AutoConfirm)
            .unwrap();

        assert!(report.cancelled);
        assert!(authority.writes().is_empty());
        assert!(report.tracked.is_empty());
        assert_eq!(report.summary.skipped, create_ops().len());
    }

    #[test]
    fn test_create_racing_existing_entity_is_no_change() {
        let authority = InMemoryAuthority::new().with_group("Ops", &GroupSpec::default());
        let report = run(&authority, &create_ops()[..1], &ApplyOptions::default());
        assert_eq!(report.outcomes[0].result, ApplyResult::NoChange);
        assert_eq!(report.tracked, vec![EntityKey::group("Ops")]);
    }
}
