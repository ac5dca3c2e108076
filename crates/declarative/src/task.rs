//! Task trait for declarative plans
//!
//! A Task is one unit of convergence work. Tasks name the tasks they depend
//! on by id; the planner turns those edges into execution stages.

use crate::context::ApplyContext;
use crate::types::ApplyResult;
use anyhow::Result;
use std::fmt;

/// Core trait for plan tasks
///
/// # Example
///
/// ```ignore
/// use declarative::{Task, ApplyResult, ApplyContext};
///
/// #[derive(Debug)]
/// struct MakeDir { path: String }
///
/// impl Task for MakeDir {
///     fn id(&self) -> String { format!("dir:{}", self.path) }
///     fn description(&self) -> String { format!("Create {}", self.path) }
///     fn kind(&self) -> &'static str { "dir" }
///
///     fn apply(&self, ctx: &ApplyContext) -> anyhow::Result<ApplyResult> {
///         if ctx.dry_run {
///             return Ok(ApplyResult::skipped("dry run"));
///         }
///         std::fs::create_dir_all(&self.path)?;
///         Ok(ApplyResult::Created)
///     }
/// }
/// ```
pub trait Task: Send + Sync + fmt::Debug {
    /// Unique, stable identifier for this task within a plan
    fn id(&self) -> String;

    /// Human-readable description of what this task does
    fn description(&self) -> String;

    /// Task category, used for filtering and display
    fn kind(&self) -> &'static str;

    /// Ids of tasks that must complete successfully before this one runs.
    ///
    /// Ids not present in the plan are ignored.
    fn depends_on(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether running this task can change anything. Tasks that only
    /// report (e.g. an explained skip) return false and never trigger the
    /// confirmation prompt.
    fn is_change(&self) -> bool {
        true
    }

    /// Perform the task
    ///
    /// Implementations must respect `ctx.dry_run`.
    fn apply(&self, ctx: &ApplyContext) -> Result<ApplyResult>;
}

/// A boxed task for type-erased storage
pub type BoxedTask<'a> = Box<dyn Task + 'a>;
