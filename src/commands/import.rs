use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use iamkit::desired::{self, LoadedState};
use iamkit::{ApplyOptions, Authority, ImportPlan, Operation, plan_imports};

use crate::Context;
use crate::cli::ImportArgs;
use crate::engine::{self, ExecuteOptions, executor};
use crate::state::IamsyncState;
use crate::ui;

/// Adopt untracked remote entities, then merge them into the desired-state
/// file unless `--no-write` is given
pub fn run(ctx: &Context, authority: &dyn Authority, args: &ImportArgs) -> Result<()> {
    let snapshot = super::read_remote(ctx, authority)?;
    let mut state = IamsyncState::load_from(&ctx.state_path)?;
    let imports = plan_imports(&snapshot, &state.tracked);

    for diagnostic in &imports.diagnostics {
        ui::warn(&diagnostic.to_string());
    }
    if imports.adopted_keys().is_empty() {
        ui::success("Every remote entity is already tracked");
        return Ok(());
    }

    if !ctx.quiet {
        ui::header("Import");
        for key in imports.adopted_keys() {
            println!("  {} {}", "↳".cyan(), key);
        }
    }

    let opts = ExecuteOptions {
        apply: ApplyOptions {
            import_only: true,
            jobs: ctx.settings.jobs,
            ..Default::default()
        },
        yes: args.yes,
        verbose: ctx.verbose > 0,
        quiet: ctx.quiet,
    };
    let report = engine::execute(authority, &imports.operations, &opts)?;
    executor::print_report(&report, false);

    if report.tracked.is_empty() {
        return Ok(());
    }

    if !args.no_write {
        let adopted = ImportPlan {
            operations: imports
                .operations
                .iter()
                .filter(|op| {
                    matches!(op, Operation::ImportExisting { entity, .. } if report.tracked.contains(entity))
                })
                .cloned()
                .collect(),
            diagnostics: Vec::new(),
        };
        write_back(ctx, &adopted)?;
    }

    state.track(&report.tracked);
    state.touch(None);
    state.save_to(&ctx.state_path)?;
    ui::success(&format!("Now tracking {}", ui::count(report.tracked.len(), "new entity key")));
    Ok(())
}

/// Merge adopted entities into the desired-state file, keeping every
/// declared entry as written
fn write_back(ctx: &Context, adopted: &ImportPlan) -> Result<()> {
    let path = &ctx.desired_path;
    let mut loaded = if path.exists() {
        desired::load_file(path)
            .with_context(|| format!("Failed to load desired state: {}", path.display()))?
    } else {
        LoadedState::default()
    };

    let added = adopted.merge_into(&mut loaded.desired);
    if added.is_empty() {
        ui::dim("Desired-state file already declares every adopted entity");
        return Ok(());
    }

    desired::write_file(&loaded.desired, path)
        .with_context(|| format!("Failed to write desired state: {}", path.display()))?;
    ui::success(&format!(
        "Added {} to {}",
        ui::count(added.len(), "entry"),
        path.display()
    ));
    Ok(())
}
