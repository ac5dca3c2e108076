use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use iamkit::Authority;
use iamkit::types::CredentialStatus;
use iamkit::validate::MAX_CREDENTIALS;

use crate::cli::KeysCommand;
use crate::ui;

pub fn run(authority: &dyn Authority, cmd: &KeysCommand) -> Result<()> {
    match cmd {
        KeysCommand::List { identity } => list(authority, identity),
        KeysCommand::Revoke {
            identity,
            key_id,
            yes,
        } => revoke(authority, identity, key_id, *yes),
    }
}

/// List an identity's access keys
fn list(authority: &dyn Authority, identity: &str) -> Result<()> {
    let keys = authority
        .list_access_keys(identity)
        .with_context(|| format!("Failed to list access keys for {identity}"))?;

    ui::header(&format!("Access keys for {identity}"));
    if keys.is_empty() {
        ui::dim("No access keys");
        return Ok(());
    }

    for key in &keys {
        let status = match key.status {
            CredentialStatus::Active => format!("{:<8}", "active").green(),
            CredentialStatus::Inactive => format!("{:<8}", "inactive").dimmed(),
        };
        let created = key
            .created_at
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!("  {}  {}  created {}", key.id, status, created);
    }

    if keys.len() >= MAX_CREDENTIALS {
        println!();
        ui::warn(&format!(
            "{identity} is at the limit of {MAX_CREDENTIALS} keys; revoke one before requesting another"
        ));
    }
    Ok(())
}

/// Delete one access key after confirmation
fn revoke(authority: &dyn Authority, identity: &str, key_id: &str, yes: bool) -> Result<()> {
    let keys = authority
        .list_access_keys(identity)
        .with_context(|| format!("Failed to list access keys for {identity}"))?;
    if !keys.iter().any(|k| k.id == key_id) {
        bail!("{identity} has no access key {key_id}");
    }

    let prompt = format!("Delete access key {key_id} of {identity}? This cannot be undone");
    if !super::confirm(&prompt, yes)? {
        ui::info("Aborted");
        return Ok(());
    }

    authority
        .delete_access_key(identity, key_id)
        .with_context(|| format!("Failed to delete access key {key_id}"))?;
    ui::success(&format!("Deleted access key {key_id} of {identity}"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iamkit::backend::memory::InMemoryAuthority;
    use iamkit::types::{Flag, IdentitySpec};

    fn carol() -> InMemoryAuthority {
        InMemoryAuthority::new()
            .with_identity(
                "carol",
                &IdentitySpec {
                    create_key: Flag::Yes,
                    ..Default::default()
                },
            )
            .with_credential("carol", CredentialStatus::Inactive)
    }

    #[test]
    fn test_list_keys() {
        run(&carol(), &KeysCommand::List { identity: "carol".into() }).unwrap();
        assert!(run(&carol(), &KeysCommand::List { identity: "nobody".into() }).is_err());
    }

    #[test]
    fn test_revoke_frees_a_slot() {
        let authority = carol();
        let ids = authority.credential_ids("carol");
        assert_eq!(ids.len(), 2);

        let cmd = KeysCommand::Revoke {
            identity: "carol".into(),
            key_id: ids[1].clone(),
            yes: true,
        };
        run(&authority, &cmd).unwrap();
        assert_eq!(authority.credential_ids("carol"), vec![ids[0].clone()]);
    }

    #[test]
    fn test_revoke_unknown_key_fails_without_writing() {
        let authority = carol();
        let cmd = KeysCommand::Revoke {
            identity: "carol".into(),
            key_id: "AKIANOPE".into(),
            yes: true,
        };
        assert!(run(&authority, &cmd).is_err());
        assert!(authority.writes().is_empty());
    }
}
