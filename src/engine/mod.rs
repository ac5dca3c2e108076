//! Execution engine for iamsync
//!
//! The engine turns a computed plan into terminal output and drives apply:
//! 1. Display - Render operations, inline policy diffs and diagnostics
//! 2. Executing - Apply with progress, one confirmation and a summary

pub mod differ;
pub mod executor;

pub use executor::{ExecuteOptions, execute};
