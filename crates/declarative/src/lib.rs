//! # Declarative
//!
//! A framework for declarative convergence.
//!
//! A caller computes *what* must change as a list of tasks with dependency
//! edges; this crate decides *when* each task runs and collects what
//! happened.
//!
//! ## Core Concepts
//!
//! - **Task**: One unit of convergence work with an id and dependencies
//! - **ExecutionPlan**: Tasks in plan order, layered into dependency stages
//! - **Executor**: Runs stages in order and tasks within a stage in parallel,
//!   skipping dependents of failed tasks
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{ExecutionPlan, ExecuteOptions, execute_simple};
//!
//! let mut plan = ExecutionPlan::new();
//! plan.push(Box::new(CreateGroup { name: "Ops".into() }));
//! plan.push(Box::new(AttachPolicy { group: "Ops".into(), arn: arn.into() }));
//!
//! let report = execute_simple(&plan, &ExecuteOptions::default())?;
//! assert!(report.summary.is_success());
//! ```
//!
//! ## Callback Traits
//!
//! - [`ProgressCallback`]: Receives progress updates
//! - [`ConfirmCallback`]: Handles user confirmations
//!
//! This allows the crate to be used without hard dependencies on
//! specific UI frameworks.

pub mod context;
pub mod executor;
pub mod planner;
pub mod task;
pub mod types;

// Re-export main types at crate root
pub use context::{ApplyContext, AutoConfirm, AutoDecline, ConfirmCallback, NoProgress, ProgressCallback};
pub use executor::{execute, execute_simple};
pub use planner::{ExecutionPlan, PlanError};
pub use task::{BoxedTask, Task};
pub use types::{ApplyResult, ExecuteOptions, ExecuteReport, ExecuteSummary, TaskOutcome};
