//! Execution engine - iamsync executor with UI integration

use anyhow::Result;
use colored::Colorize;
use declarative::ApplyResult;
use iamkit::{ApplyOptions, ApplyReport, Authority, DirectExecutor, IssuedSecret, Operation, SecretKind};

use crate::progress::{BarProgress, PromptConfirm, result_symbol};

/// Options for one apply run (adds UI concerns to [`ApplyOptions`])
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub apply: ApplyOptions,
    /// Skip the confirmation prompt
    pub yes: bool,
    /// List every outcome, not only failures
    pub verbose: bool,
    /// No progress bar
    pub quiet: bool,
}

/// Apply operations with a progress bar and one up-front confirmation
pub fn execute(
    authority: &dyn Authority,
    operations: &[Operation],
    opts: &ExecuteOptions,
) -> Result<ApplyReport> {
    let mut progress = if opts.quiet {
        BarProgress::hidden()
    } else {
        BarProgress::new(operations.len(), opts.verbose)
    };
    let mut confirm = PromptConfirm {
        assume_yes: opts.yes,
    };

    let report = DirectExecutor::new(authority).apply(
        operations,
        &opts.apply,
        &mut progress,
        &mut confirm,
    );
    progress.finish();
    report
}

/// Print failures, skips that were not planned, and the summary
pub fn print_report(report: &ApplyReport, dry_run: bool) {
    let notable: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| match &o.result {
            ApplyResult::Failed { .. } => true,
            ApplyResult::Skipped { .. } => !o.operation.is_skip(),
            _ => false,
        })
        .collect();

    if !notable.is_empty() {
        println!();
        for outcome in notable {
            let detail = match &outcome.result {
                ApplyResult::Failed { error } => error.clone(),
                ApplyResult::Skipped { reason } => reason.clone(),
                _ => String::new(),
            };
            println!(
                "  {} {} {}",
                result_symbol(&outcome.result),
                outcome.operation,
                format!("({detail})").dimmed()
            );
        }
    }

    let summary = &report.summary;
    println!();
    if dry_run {
        println!("  {} Dry run - no changes made", "ℹ".blue());
    } else if report.cancelled {
        println!("  {} Apply cancelled", "⚠".yellow().bold());
    } else if summary.is_success() {
        println!("  {} Desired state applied", "✓".green().bold());
    } else {
        println!("  {} Desired state applied with errors", "⚠".yellow().bold());
    }

    if summary.created > 0 {
        println!("    • {} created", summary.created);
    }
    if summary.modified > 0 {
        println!("    • {} modified", summary.modified);
    }
    if summary.adopted > 0 {
        println!("    • {} adopted", summary.adopted);
    }
    if summary.no_change > 0 {
        println!("    • {} already present", summary.no_change);
    }
    if summary.skipped > 0 {
        println!("    • {} skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {}", summary.failed, "failed".red());
    }
}

/// Print generated secrets. They are not shown again.
pub fn print_secrets(secrets: Vec<IssuedSecret>) {
    if secrets.is_empty() {
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "New Credentials".yellow().bold()
    );
    println!("│");
    for issued in secrets {
        match &issued.kind {
            SecretKind::AccessKey { access_key_id } => {
                println!("│  {} access key {}", issued.identity.bold(), access_key_id);
                println!("│    secret: {}", issued.secret.expose());
            }
            SecretKind::ConsolePassword => {
                println!("│  {} console password", issued.identity.bold());
                println!(
                    "│    password: {} {}",
                    issued.secret.expose(),
                    "(change required at first sign-in)".dimmed()
                );
            }
        }
    }
    println!("│");
    println!("│  These values are shown once and are not stored anywhere.");
    println!("└─────────────────────────────────────────────────────────────┘");
}
