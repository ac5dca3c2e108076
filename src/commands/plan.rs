use anyhow::Result;
use iamkit::Authority;

use crate::Context;
use crate::cli::PlanArgs;
use crate::engine::differ;

/// Preview the operations needed to reach the desired state
pub fn run(ctx: &Context, authority: &dyn Authority, args: &PlanArgs) -> Result<()> {
    let loaded = super::load_desired(ctx)?;
    let snapshot = super::read_remote(ctx, authority)?;
    let plan = super::compute_plan(&loaded, &snapshot, args.target.as_deref());

    if args.json {
        println!("{}", differ::plan_json(&plan)?);
    } else {
        differ::display_plan(&plan, ctx.verbose > 0);
    }
    Ok(())
}
