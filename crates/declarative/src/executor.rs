//! Execution engine - applies staged tasks with bounded parallelism

use crate::context::{ApplyContext, ConfirmCallback, ProgressCallback};
use crate::planner::ExecutionPlan;
use crate::task::Task;
use crate::types::{ApplyResult, ExecuteOptions, ExecuteReport, TaskOutcome};
use anyhow::Result;
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Execute a plan with the given options and callbacks
///
/// Stages run in order; tasks within a stage run in parallel on a pool of
/// `opts.jobs` threads. A task whose dependency failed (or was skipped
/// because of a failure) is skipped with the dependency named. When
/// `cancel` is set, every task that has not started yet is skipped.
///
/// Changes are confirmed once up front unless this is a dry run. Declining
/// skips every task.
///
/// # Returns
/// One outcome per task, in plan order
pub fn execute<P, C>(
    plan: &ExecutionPlan<'_>,
    opts: &ExecuteOptions,
    cancel: Option<&AtomicBool>,
    progress: &mut P,
    confirm: &mut C,
) -> Result<ExecuteReport>
where
    P: ProgressCallback,
    C: ConfirmCallback,
{
    let stages = plan.stages()?;
    let tasks = plan.tasks();
    let mut results: Vec<Option<ApplyResult>> = vec![None; tasks.len()];

    let changes = plan.change_count();
    let declined = changes > 0
        && !opts.dry_run
        && !confirm.confirm(&format!("Apply {changes} change(s)?"))?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.jobs.max(1))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create thread pool: {}", e))?;

    let ctx = ApplyContext::new(opts.dry_run, opts.verbose);
    let mut blocked: HashSet<String> = HashSet::new();
    let mut cancelled = false;

    for (stage_idx, stage) in stages.iter().enumerate() {
        progress.on_stage_start(stage_idx, stage.len());

        let mut runnable = Vec::with_capacity(stage.len());
        for &idx in stage {
            let task = tasks[idx].as_ref();
            if declined {
                results[idx] = Some(ApplyResult::skipped("declined by user"));
            } else if let Some(dep) = failed_dependency(task, &blocked) {
                blocked.insert(task.id());
                results[idx] = Some(ApplyResult::skipped(format!("dependency {dep} failed")));
            } else {
                progress.on_task_start(&task.id(), &task.description());
                runnable.push(idx);
            }
        }

        let stage_results: Vec<(usize, ApplyResult)> = pool.install(|| {
            runnable
                .par_iter()
                .map(|&idx| {
                    let result = if cancel.is_some_and(|c| c.load(Ordering::SeqCst)) {
                        ApplyResult::skipped("cancelled")
                    } else {
                        apply_task(tasks[idx].as_ref(), &ctx)
                    };
                    (idx, result)
                })
                .collect()
        });

        for (idx, result) in stage_results {
            if matches!(result, ApplyResult::Failed { .. }) {
                blocked.insert(tasks[idx].id());
            }
            results[idx] = Some(result);
        }

        for &idx in stage {
            if let Some(result) = &results[idx] {
                progress.on_task_complete(&tasks[idx].id(), result);
            }
        }
        progress.on_stage_complete();

        if cancel.is_some_and(|c| c.load(Ordering::SeqCst)) {
            cancelled = true;
        }
    }

    let mut report = ExecuteReport {
        cancelled,
        ..Default::default()
    };
    for (task, result) in tasks.iter().zip(results) {
        let result = result.unwrap_or_else(|| ApplyResult::skipped("not run"));
        report.summary.add_result(&result);
        report.outcomes.push(TaskOutcome {
            id: task.id(),
            result,
        });
    }
    Ok(report)
}

fn failed_dependency(task: &dyn Task, blocked: &HashSet<String>) -> Option<String> {
    task.depends_on().into_iter().find(|dep| blocked.contains(dep))
}

/// Apply a single task, turning errors into a failed result
fn apply_task(task: &dyn Task, ctx: &ApplyContext) -> ApplyResult {
    log::debug!("applying {}", task.id());
    match task.apply(ctx) {
        Ok(result) => result,
        Err(e) => {
            log::warn!("{} failed: {e:#}", task.id());
            ApplyResult::Failed {
                error: format!("{e:#}"),
            }
        }
    }
}

/// Simple execution without callbacks
pub fn execute_simple(plan: &ExecutionPlan<'_>, opts: &ExecuteOptions) -> Result<ExecuteReport> {
    use crate::context::{AutoConfirm, NoProgress};

    execute(plan, opts, None, &mut NoProgress, &mut AutoConfirm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AutoConfirm, AutoDecline, NoProgress};
    use crate::planner::tests::Step;

    fn plan(steps: Vec<Step>) -> ExecutionPlan<'static> {
        let mut plan = ExecutionPlan::new();
        for step in steps {
            plan.push(Box::new(step));
        }
        plan
    }

    #[test]
    fn test_execute_empty_plan() {
        let report = execute_simple(&ExecutionPlan::new(), &ExecuteOptions::default()).unwrap();
        assert_eq!(report.summary.total(), 0);
        assert!(!report.cancelled);
    }

    #[test]
    fn test_outcomes_in_plan_order() {
        let plan = plan(vec![
            Step::new("attach", &["group"]),
            Step::new("group", &[]),
            Step::new("user", &[]),
        ]);
        let report = execute_simple(&plan, &ExecuteOptions::default()).unwrap();

        let ids: Vec<_> = report.outcomes.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["attach", "group", "user"]);
        assert_eq!(report.summary.created, 3);
    }

    #[test]
    fn test_failure_skips_dependents_only() {
        let plan = plan(vec![
            Step::failing("group", &[]),
            Step::new("attach", &["group"]),
            Step::new("member", &["attach"]),
            Step::new("other", &[]),
        ]);
        let report = execute_simple(&plan, &ExecuteOptions::default()).unwrap();

        assert!(matches!(report.outcome("group"), Some(ApplyResult::Failed { .. })));
        assert_eq!(
            report.outcome("attach"),
            Some(&ApplyResult::skipped("dependency group failed"))
        );
        assert_eq!(
            report.outcome("member"),
            Some(&ApplyResult::skipped("dependency attach failed"))
        );
        assert_eq!(report.outcome("other"), Some(&ApplyResult::Created));
        assert_eq!(report.summary.failed, 1);
    }

    #[test]
    fn test_declined_skips_everything() {
        let plan = plan(vec![Step::new("a", &[])]);
        let report = execute(
            &plan,
            &ExecuteOptions::default(),
            None,
            &mut NoProgress,
            &mut AutoDecline,
        )
        .unwrap();
        assert_eq!(report.outcome("a"), Some(&ApplyResult::skipped("declined by user")));
    }

    #[test]
    fn test_dry_run_does_not_confirm() {
        let plan = plan(vec![Step::new("a", &[])]);
        let opts = ExecuteOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = execute(&plan, &opts, None, &mut NoProgress, &mut AutoDecline).unwrap();
        assert_eq!(report.outcome("a"), Some(&ApplyResult::skipped("dry run")));
    }

    #[test]
    fn test_cancel_flag_skips_pending_tasks() {
        let plan = plan(vec![Step::new("a", &[]), Step::new("b", &["a"])]);
        let cancel = AtomicBool::new(true);
        let report = execute(
            &plan,
            &ExecuteOptions::default(),
            Some(&cancel),
            &mut NoProgress,
            &mut AutoConfirm,
        )
        .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.summary.skipped, 2);
    }

    #[test]
    fn test_cycle_is_an_error() {
        let plan = plan(vec![Step::new("a", &["b"]), Step::new("b", &["a"])]);
        assert!(execute_simple(&plan, &ExecuteOptions::default()).is_err());
    }
}
