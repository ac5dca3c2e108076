use anyhow::{Context as AnyhowContext, Result};
use iamkit::{Authority, EntityKey};

use crate::Context;
use crate::cli::IdentitiesCommand;
use crate::state::IamsyncState;
use crate::ui;

pub fn run(ctx: &Context, authority: &dyn Authority, cmd: &IdentitiesCommand) -> Result<()> {
    match cmd {
        IdentitiesCommand::Delete { identity, yes } => delete(ctx, authority, identity, *yes),
    }
}

/// Delete an identity remotely, then stop declaring and tracking it
fn delete(ctx: &Context, authority: &dyn Authority, identity: &str, yes: bool) -> Result<()> {
    let groups = authority
        .list_groups_for_identity(identity)
        .with_context(|| format!("Failed to look up identity {identity}"))?;
    let keys = authority
        .list_access_keys(identity)
        .with_context(|| format!("Failed to list access keys for {identity}"))?;
    let login = authority
        .has_login_profile(identity)
        .with_context(|| format!("Failed to check console login for {identity}"))?;

    ui::header(&format!("Delete identity {identity}"));
    ui::kv(
        "Groups",
        &if groups.is_empty() {
            "none".to_string()
        } else {
            groups.join(", ")
        },
    );
    ui::kv("Access keys", &keys.len().to_string());
    ui::kv("Console login", if login { "yes" } else { "no" });
    println!();

    let prompt = format!(
        "Delete identity {identity} and everything listed above? This cannot be undone"
    );
    if !super::confirm(&prompt, yes)? {
        ui::info("Aborted");
        return Ok(());
    }

    authority
        .delete_identity(identity)
        .with_context(|| format!("Failed to delete identity {identity}"))?;
    ui::success(&format!("Deleted identity {identity}"));

    let edited = super::edit_desired(ctx, |desired| {
        desired.identities.shift_remove(identity).is_some()
    })?;
    if edited {
        ui::dim(&format!(
            "Removed {identity} from {}",
            ctx.desired_path.display()
        ));
    }

    let mut state = IamsyncState::load_from(&ctx.state_path)?;
    if state.tracked.remove(&EntityKey::identity(identity)) {
        state.touch(None);
        state.save_to(&ctx.state_path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{context, write_desired};
    use iamkit::backend::memory::InMemoryAuthority;
    use iamkit::desired;
    use iamkit::types::{Flag, GroupSpec, IdentitySpec};
    use serde_json::json;
    use tempfile::TempDir;

    fn authority() -> InMemoryAuthority {
        InMemoryAuthority::new()
            .with_group("Ops", &GroupSpec::default())
            .with_identity(
                "erin",
                &IdentitySpec {
                    groups: vec!["Ops".into()],
                    create_key: Flag::Yes,
                    has_console_access: Flag::Yes,
                    ..Default::default()
                },
            )
            .with_identity("bob", &IdentitySpec::default())
    }

    fn delete_cmd(identity: &str) -> IdentitiesCommand {
        IdentitiesCommand::Delete {
            identity: identity.into(),
            yes: true,
        }
    }

    #[test]
    fn test_delete_removes_declaration_and_tracking() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());
        write_desired(
            &ctx,
            &json!({"users": {"erin": {"groups": ["Ops"]}, "bob": {}}}),
        );
        let mut state = IamsyncState::default();
        state.track(&[EntityKey::identity("erin"), EntityKey::identity("bob")]);
        state.save_to(&ctx.state_path).unwrap();
        let authority = authority();

        run(&ctx, &authority, &delete_cmd("erin")).unwrap();

        let names: Vec<_> = authority
            .list_identities()
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["bob".to_string()]);

        let loaded = desired::load_file(&ctx.desired_path).unwrap();
        assert!(!loaded.desired.identities.contains_key("erin"));
        assert!(loaded.desired.identities.contains_key("bob"));

        let state = IamsyncState::load_from(&ctx.state_path).unwrap();
        assert!(!state.tracked.contains(&EntityKey::identity("erin")));
        assert!(state.tracked.contains(&EntityKey::identity("bob")));
    }

    #[test]
    fn test_delete_undeclared_leaves_files_alone() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());

        run(&ctx, &authority(), &delete_cmd("bob")).unwrap();
        assert!(!ctx.desired_path.exists());
        assert!(!ctx.state_path.exists());
    }

    #[test]
    fn test_unknown_identity_fails_without_writing() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());
        let authority = authority();

        assert!(run(&ctx, &authority, &delete_cmd("nobody")).is_err());
        assert!(authority.writes().is_empty());
    }
}
