//! Import planner.
//!
//! Adopts remote entities that the persisted state does not track yet. The
//! adopted desired state is the observed state itself, so an import can
//! never propose a detach, delete or replace.

use crate::operation::{Adopted, Operation, Plan, SkipReason};
use crate::types::{DesiredState, Diagnostic, EntityKey, ReadStatus, Snapshot, TrackedKeys};

/// Import operations for untracked remote entities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportPlan {
    pub operations: Vec<Operation>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ImportPlan {
    /// Keys that would be adopted.
    pub fn adopted_keys(&self) -> Vec<EntityKey> {
        self.operations
            .iter()
            .filter_map(|op| match op {
                Operation::ImportExisting { entity, .. } => Some(entity.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Add adopted entities that `desired` does not declare yet. Declared
    /// entries are never overwritten. Returns the keys that were added.
    pub fn merge_into(&self, desired: &mut DesiredState) -> Vec<EntityKey> {
        let mut added = Vec::new();
        for op in &self.operations {
            let Operation::ImportExisting { entity, adopted } = op else {
                continue;
            };
            if desired.declares(entity) {
                log::debug!("{entity} is already declared; keeping the declared entry");
                continue;
            }
            match adopted {
                Adopted::Group(spec) => {
                    desired.groups.insert(entity.name.clone(), spec.clone());
                }
                Adopted::Identity(spec) => {
                    desired.identities.insert(entity.name.clone(), spec.clone());
                }
            }
            added.push(entity.clone());
        }
        added
    }

    /// The import as an executable plan.
    pub fn to_plan(&self) -> Plan {
        Plan {
            operations: self.operations.clone(),
            diagnostics: self.diagnostics.clone(),
        }
    }
}

/// Plan the adoption of every untracked remote entity, groups first, in
/// snapshot order. Partially read entities are not adopted.
pub fn plan_imports(snapshot: &Snapshot, tracked: &TrackedKeys) -> ImportPlan {
    let mut plan = ImportPlan::default();

    let groups = snapshot.groups.iter().map(|(name, group)| {
        (EntityKey::group(name), &group.status, Adopted::Group(group.to_spec()))
    });
    let identities = snapshot.identities.iter().map(|(name, identity)| {
        (
            EntityKey::identity(name),
            &identity.status,
            Adopted::Identity(identity.to_spec()),
        )
    });

    for (key, status, adopted) in groups.chain(identities) {
        if tracked.contains(&key) {
            continue;
        }
        adopt(&mut plan, key, status, adopted);
    }

    log::info!(
        "{} untracked entities to import",
        plan.adopted_keys().len()
    );
    plan
}

fn adopt(plan: &mut ImportPlan, key: EntityKey, status: &ReadStatus, adopted: Adopted) {
    if status.is_complete() {
        plan.operations.push(Operation::ImportExisting {
            entity: key,
            adopted,
        });
        return;
    }

    plan.diagnostics.push(Diagnostic::new(
        key.clone(),
        "partially read; not imported until the read succeeds",
    ));
    plan.operations.push(Operation::skip(
        key,
        "import",
        SkipReason::Degraded {
            failures: status.failures().to_vec(),
        },
    ));
}
