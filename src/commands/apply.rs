use anyhow::{Result, bail};
use iamkit::{ApplyOptions, Authority, DesiredState, EntityKey, Snapshot, plan_imports};

use crate::Context;
use crate::cli::ApplyArgs;
use crate::engine::{self, ExecuteOptions, differ, executor};
use crate::state::IamsyncState;
use crate::ui;

/// Make the remote state match the desired state
pub fn run(ctx: &Context, authority: &dyn Authority, args: &ApplyArgs) -> Result<()> {
    let target = args.target.as_deref();
    let desired = if args.import_only {
        None
    } else {
        Some(super::load_desired(ctx)?)
    };
    let snapshot = super::read_remote(ctx, authority)?;
    let mut state = IamsyncState::load_from(&ctx.state_path)?;

    let plan = match &desired {
        Some(loaded) => super::compute_plan(loaded, &snapshot, target),
        None => plan_imports(&snapshot, &state.tracked)
            .to_plan()
            .filter_by_target(target),
    };

    if !ctx.quiet {
        differ::display_plan(&plan, ctx.verbose > 0);
    }

    let mut newly_tracked = 0;
    if let Some(loaded) = &desired
        && !args.dry_run
    {
        newly_tracked += state.track(&declared_present(&loaded.desired, &snapshot));
    }

    if plan.is_converged() {
        if newly_tracked > 0 {
            state.touch(None);
            state.save_to(&ctx.state_path)?;
        }
        return Ok(());
    }

    let opts = ExecuteOptions {
        apply: ApplyOptions {
            import_only: args.import_only,
            dry_run: args.dry_run,
            jobs: ctx.settings.jobs,
            password_length: ctx.settings.password_length,
        },
        yes: args.yes,
        verbose: ctx.verbose > 0,
        quiet: ctx.quiet,
    };
    let mut report = engine::execute(authority, &plan.operations, &opts)?;

    executor::print_report(&report, args.dry_run);
    executor::print_secrets(report.take_secrets());

    if !args.dry_run {
        newly_tracked += state.track(&report.tracked);
        if newly_tracked > 0 || report.summary.total_changes() > 0 {
            state.touch(Some(plan.fingerprint()));
            state.save_to(&ctx.state_path)?;
            log::info!("{} now tracked", ui::count(state.tracked.len(), "entity key"));
        }
    }

    if !report.is_success() {
        bail!(
            "{} failed; rerun apply after fixing the cause",
            ui::count(report.summary.failed, "operation")
        );
    }
    Ok(())
}

/// Declared entities that already exist remotely
fn declared_present(desired: &DesiredState, snapshot: &Snapshot) -> Vec<EntityKey> {
    let groups = desired.groups.keys().map(EntityKey::group);
    let identities = desired.identities.keys().map(EntityKey::identity);
    groups
        .chain(identities)
        .filter(|key| snapshot.contains(key))
        .collect()
}
