use anyhow::Result;
use colored::Colorize;
use iamkit::types::{RemoteGroup, RemoteIdentity, is_aws_managed};
use iamkit::{Authority, EntityKey, Snapshot, TargetFilter};

use crate::Context;
use crate::cli::StatusArgs;
use crate::state::IamsyncState;
use crate::ui;

/// Show the remote snapshot
pub fn run(ctx: &Context, authority: &dyn Authority, args: &StatusArgs) -> Result<()> {
    let snapshot = super::read_remote(ctx, authority)?;
    let state = IamsyncState::load_from(&ctx.state_path)?;

    for line in render(&snapshot, &state, args.target.as_deref()) {
        println!("{line}");
    }

    if let Some(fingerprint) = &state.last_fingerprint {
        println!();
        ui::kv("Last applied plan", ui::short_fingerprint(fingerprint));
    }
    if let Some(updated) = state.last_updated {
        ui::kv("State updated", &updated.format("%Y-%m-%d %H:%M:%S UTC").to_string());
    }
    Ok(())
}

/// Status lines for the snapshot, limited to `target`
pub fn render(snapshot: &Snapshot, state: &IamsyncState, target: Option<&str>) -> Vec<String> {
    let filter = target.map(TargetFilter::parse);
    let selected = |key: &EntityKey| filter.as_ref().is_none_or(|f| f.matches(key));
    let mut lines = Vec::new();

    let groups: Vec<_> = snapshot
        .groups
        .iter()
        .filter(|(name, _)| selected(&EntityKey::group(*name)))
        .collect();
    if !groups.is_empty() {
        lines.push(String::new());
        lines.push(format!("{}", "Groups".cyan().bold()));
        for (name, group) in groups {
            let key = EntityKey::group(name);
            lines.push(format!(
                "  {} {}{} {}",
                marker(state, &key),
                name.bold(),
                partial(&group.status),
                group_summary(group).dimmed()
            ));
        }
    }

    let identities: Vec<_> = snapshot
        .identities
        .iter()
        .filter(|(name, _)| selected(&EntityKey::identity(*name)))
        .collect();
    if !identities.is_empty() {
        lines.push(String::new());
        lines.push(format!("{}", "Identities".cyan().bold()));
        for (name, identity) in identities {
            let key = EntityKey::identity(name);
            lines.push(format!(
                "  {} {}{} {}",
                marker(state, &key),
                name.bold(),
                partial(&identity.status),
                identity_summary(identity).dimmed()
            ));
        }
    }

    if lines.is_empty() {
        lines.push(format!("  {}", "Nothing found".dimmed()));
    }
    lines
}

fn marker(state: &IamsyncState, key: &EntityKey) -> colored::ColoredString {
    if state.tracked.contains(key) {
        "●".green()
    } else {
        "○".dimmed()
    }
}

fn partial(status: &iamkit::types::ReadStatus) -> String {
    if status.is_complete() {
        String::new()
    } else {
        format!(" {}", "[partial read]".yellow())
    }
}

fn group_summary(group: &RemoteGroup) -> String {
    let aws = group
        .managed_policies
        .iter()
        .filter(|arn| is_aws_managed(arn))
        .count();
    let customer = group.managed_policies.len() - aws;
    format!(
        "{}  {} AWS-managed, {} customer-managed, {} inline",
        group.path,
        aws,
        customer,
        group.inline_policies.len()
    )
}

fn identity_summary(identity: &RemoteIdentity) -> String {
    let groups = if identity.groups.is_empty() {
        "no groups".to_string()
    } else {
        identity.groups.join(", ")
    };
    let console = if identity.has_login_capability {
        "console"
    } else {
        "no console"
    };
    format!(
        "{}  {groups}; {console}; keys {}/{} active",
        identity.path,
        identity.active_credentials(),
        identity.credential_count()
    )
}
