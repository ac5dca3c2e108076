use anyhow::{Context as AnyhowContext, Result, bail};
use iamkit::Authority;

use crate::Context;
use crate::cli::MembersCommand;
use crate::ui;

pub fn run(ctx: &Context, authority: &dyn Authority, cmd: &MembersCommand) -> Result<()> {
    match cmd {
        MembersCommand::Remove {
            identity,
            group,
            yes,
        } => remove(ctx, authority, identity, group, *yes),
    }
}

/// Remove a membership remotely, then drop it from the desired-state file so
/// the next apply does not add it back
fn remove(ctx: &Context, authority: &dyn Authority, identity: &str, group: &str, yes: bool) -> Result<()> {
    let groups = authority
        .list_groups_for_identity(identity)
        .with_context(|| format!("Failed to list groups of {identity}"))?;
    if !groups.iter().any(|g| g == group) {
        bail!("{identity} is not a member of {group}");
    }

    if !super::confirm(&format!("Remove {identity} from group {group}?"), yes)? {
        ui::info("Aborted");
        return Ok(());
    }

    authority
        .remove_identity_from_group(identity, group)
        .with_context(|| format!("Failed to remove {identity} from {group}"))?;
    ui::success(&format!("Removed {identity} from group {group}"));

    let edited = super::edit_desired(ctx, |desired| {
        desired.identities.get_mut(identity).is_some_and(|spec| {
            let before = spec.groups.len();
            spec.groups.retain(|g| g != group);
            spec.groups.len() != before
        })
    })?;
    if edited {
        ui::dim(&format!(
            "Dropped {group} from {identity} in {}",
            ctx.desired_path.display()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{context, write_desired};
    use iamkit::backend::memory::InMemoryAuthority;
    use iamkit::desired;
    use iamkit::reconcile;
    use iamkit::types::{GroupSpec, IdentitySpec};
    use serde_json::json;
    use tempfile::TempDir;

    fn authority() -> InMemoryAuthority {
        InMemoryAuthority::new()
            .with_group("Ops", &GroupSpec::default())
            .with_group("Dev", &GroupSpec::default())
            .with_identity(
                "erin",
                &IdentitySpec {
                    groups: vec!["Ops".into(), "Dev".into()],
                    ..Default::default()
                },
            )
    }

    fn remove_cmd(group: &str) -> MembersCommand {
        MembersCommand::Remove {
            identity: "erin".into(),
            group: group.into(),
            yes: true,
        }
    }

    #[test]
    fn test_remove_updates_remote_and_desired_file() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());
        write_desired(
            &ctx,
            &json!({
                "groups": {"Ops": {}, "Dev": {}},
                "users": {"erin": {"groups": ["Ops", "Dev"]}}
            }),
        );
        let authority = authority();

        run(&ctx, &authority, &remove_cmd("Ops")).unwrap();
        assert_eq!(authority.list_groups_for_identity("erin").unwrap(), vec!["Dev".to_string()]);

        let loaded = desired::load_file(&ctx.desired_path).unwrap();
        assert_eq!(loaded.desired.identities["erin"].groups, vec!["Dev".to_string()]);

        // the next plan does not add the membership back
        let snapshot = crate::commands::read_remote(&ctx, &authority).unwrap();
        assert!(reconcile(&snapshot, &loaded.desired).is_converged());
    }

    #[test]
    fn test_remove_without_desired_file() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());

        run(&ctx, &authority(), &remove_cmd("Dev")).unwrap();
        assert!(!ctx.desired_path.exists());
    }

    #[test]
    fn test_non_member_fails_without_writing() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());
        let authority = authority();

        let err = run(&ctx, &authority, &remove_cmd("Admins")).unwrap_err();
        assert!(err.to_string().contains("not a member"));
        assert!(authority.writes().is_empty());

        let nobody = MembersCommand::Remove {
            identity: "nobody".into(),
            group: "Ops".into(),
            yes: true,
        };
        assert!(run(&ctx, &authority, &nobody).is_err());
        assert!(authority.writes().is_empty());
    }
}
