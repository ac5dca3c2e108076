//! # iamkit
//!
//! Reconciliation core for declaratively managed IAM groups, identities and
//! policies.
//!
//! This crate provides functionality for:
//! - Loading a desired state document (JSON or TOML)
//! - Reading the remote state through an [`Authority`] into a [`Snapshot`]
//! - Reconciling the two into an additive, ordered [`Plan`]
//! - Importing untracked remote entities without changing them
//! - Applying plans with dependency-aware parallelism
//!
//! ## Example
//!
//! ```no_run
//! use iamkit::backend::aws_cli::AwsCliBackend;
//! use iamkit::{ApplyOptions, DirectExecutor, ReadOptions, desired, read_snapshot, reconcile};
//! use declarative::{AutoConfirm, NoProgress};
//! use std::path::Path;
//!
//! let authority = AwsCliBackend::new().expect("aws CLI not available");
//! let loaded = desired::load_file(Path::new("desired.json")).expect("Failed to load");
//!
//! let snapshot = read_snapshot(&authority, &ReadOptions::default()).expect("Read failed");
//! let plan = reconcile(&snapshot, &loaded.desired);
//! for op in plan.changes() {
//!     println!("{op}");
//! }
//!
//! let mut report = DirectExecutor::new(&authority)
//!     .apply(&plan.operations, &ApplyOptions::default(), &mut NoProgress, &mut AutoConfirm)
//!     .expect("Apply failed");
//! for issued in report.take_secrets() {
//!     println!("{}: {}", issued.identity, issued.secret.expose());
//! }
//! ```
//!
//! Nothing is ever deleted or detached by a plan. Removing access is left to
//! an operator.

pub mod apply;
pub mod backend;
pub mod desired;
pub mod error;
pub mod import;
pub mod operation;
pub mod reader;
pub mod reconcile;
pub mod retry;
pub mod secret;
pub mod types;
pub mod validate;

pub use apply::{ApplyOptions, ApplyReport, DirectExecutor, OperationOutcome};
pub use backend::Authority;
pub use error::{Error, ErrorCategory, Result};
pub use import::{ImportPlan, plan_imports};
pub use operation::{Adopted, Operation, Plan, SkipReason, TargetFilter};
pub use reader::{ReadOptions, read_snapshot};
pub use reconcile::reconcile;
pub use retry::RetryConfig;
pub use secret::{IssuedSecret, Secret, SecretKind};
pub use types::{DesiredState, Diagnostic, EntityKey, EntityKind, Flag, Snapshot, TrackedKeys};
