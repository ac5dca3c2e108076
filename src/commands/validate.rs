use anyhow::{Result, bail};
use iamkit::{Operation, Plan, SkipReason, Snapshot};

use crate::Context;
use crate::ui;

/// Findings of an offline validation
#[derive(Debug, Default)]
pub struct Findings {
    /// Would be rejected remotely or could not be interpreted
    pub errors: Vec<String>,
    /// Fine only if something already exists remotely
    pub warnings: Vec<String>,
}

/// Validate the desired-state file without contacting the remote side
pub fn run(ctx: &Context) -> Result<()> {
    let loaded = super::load_desired(ctx)?;
    let plan = super::compute_plan(&loaded, &Snapshot::default(), None);
    let findings = findings(&plan);

    ui::header(&format!("Validating {}", ctx.desired_path.display()));
    ui::kv("Groups", &loaded.desired.groups.len().to_string());
    ui::kv("Identities", &loaded.desired.identities.len().to_string());
    println!();

    for warning in &findings.warnings {
        ui::warn(warning);
    }
    for error in &findings.errors {
        ui::error(error);
    }

    if !findings.errors.is_empty() {
        bail!("{} found", ui::count(findings.errors.len(), "problem"));
    }
    ui::success("Desired state is valid");
    Ok(())
}

/// Classify a plan computed against an empty remote side
pub fn findings(plan: &Plan) -> Findings {
    let mut findings = Findings::default();
    for diagnostic in &plan.diagnostics {
        findings.errors.push(diagnostic.to_string());
    }
    for op in &plan.operations {
        let Operation::Skip { target, reason, .. } = op else {
            continue;
        };
        match reason {
            SkipReason::ConstraintViolation { violation } => {
                findings.errors.push(format!("{target}: {violation}"));
            }
            SkipReason::MissingDependency { dependency } => findings.warnings.push(format!(
                "{target}: {dependency} is not declared and must already exist remotely"
            )),
            _ => {}
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{context, write_desired};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_valid_document_passes() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());
        write_desired(
            &ctx,
            &json!({
                "groups": {"Ops": {"managed_policy_arns": ["arn:aws:iam::aws:policy/ReadOnlyAccess"]}},
                "users": {"alice": {"groups": ["Ops"], "create_key": "yes"}}
            }),
        );
        run(&ctx).unwrap();
    }

    #[test]
    fn test_violations_fail_and_missing_groups_warn() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());
        write_desired(
            &ctx,
            &json!({
                "groups": {"Ops": {"path": "no-slashes", "managed_policy_arns": ["ReadOnlyAccess"]}},
                "users": {"bad name!": {}, "dave": {"groups": ["Legacy"]}}
            }),
        );

        let loaded = crate::commands::load_desired(&ctx).unwrap();
        let plan = crate::commands::compute_plan(&loaded, &Snapshot::default(), None);
        let findings = findings(&plan);

        assert!(findings.errors.iter().any(|e| e.contains("group/Ops") && e.contains("path")));
        assert!(findings.errors.iter().any(|e| e.contains("identity/bad name!")));
        assert!(findings.warnings.iter().any(|w| w.contains("group/Legacy")));
        assert!(run(&ctx).is_err());
    }
}
