//! Command implementations
//!
//! Commands that touch the remote side take a `&dyn Authority` so they run
//! the same against the AWS CLI backend and the in-memory one.

pub mod apply;
pub mod config;
pub mod identities;
pub mod import;
pub mod keys;
pub mod members;
pub mod plan;
pub mod status;
pub mod validate;

use anyhow::{Context as AnyhowContext, Result};
use iamkit::backend::aws_cli::AwsCliBackend;
use iamkit::desired::{self, LoadedState};
use iamkit::{Authority, DesiredState, Plan, ReadOptions, Snapshot, read_snapshot, reconcile};

use crate::Context;
use crate::config::Settings;

/// Build the AWS CLI backend from settings
pub fn connect(settings: &Settings) -> Result<AwsCliBackend> {
    let backend = AwsCliBackend::new()
        .context("The aws CLI is required; install it and configure credentials")?
        .with_profile(settings.profile.clone())
        .with_region(settings.region.clone());
    Ok(backend)
}

/// Load the desired-state file named by the context
pub fn load_desired(ctx: &Context) -> Result<LoadedState> {
    let path = &ctx.desired_path;
    desired::load_file(path)
        .with_context(|| format!("Failed to load desired state: {}", path.display()))
}

/// Read the remote snapshot with the configured bounds
pub fn read_remote(ctx: &Context, authority: &dyn Authority) -> Result<Snapshot> {
    let options = ReadOptions {
        jobs: ctx.settings.jobs,
        retry: ctx.settings.retry.to_config(),
    };
    read_snapshot(authority, &options).context("Failed to read remote IAM state")
}

/// Reconcile, folding loader diagnostics into the plan
pub fn compute_plan(loaded: &LoadedState, snapshot: &Snapshot, target: Option<&str>) -> Plan {
    let mut plan = reconcile(snapshot, &loaded.desired);
    let mut diagnostics = loaded.diagnostics.clone();
    diagnostics.append(&mut plan.diagnostics);
    plan.diagnostics = diagnostics;
    plan.filter_by_target(target)
}

/// Change the desired-state file in place, if there is one. `edit` returns
/// whether it changed anything; the file is only rewritten then.
pub fn edit_desired(ctx: &Context, edit: impl FnOnce(&mut DesiredState) -> bool) -> Result<bool> {
    let path = &ctx.desired_path;
    if !path.exists() {
        return Ok(false);
    }
    let mut loaded = load_desired(ctx)?;
    if !edit(&mut loaded.desired) {
        return Ok(false);
    }
    desired::write_file(&loaded.desired, path)
        .with_context(|| format!("Failed to write desired state: {}", path.display()))?;
    Ok(true)
}

/// Ask before a destructive action, unless `yes`
pub fn confirm(prompt: &str, yes: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;
    Ok(confirmed)
}
