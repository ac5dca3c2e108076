//! Plan display - iamsync-specific UI

use colored::Colorize;
use iamkit::{Operation, Plan, SkipReason};
use serde_json::Value;
use similar::{ChangeTag, TextDiff};

use crate::ui;

/// Render a plan as display lines. Already-present skips are only listed
/// when `verbose` is set.
pub fn render_plan(plan: &Plan, verbose: bool) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current_target = None;

    for op in &plan.operations {
        let present = op.skip_reason().is_some_and(SkipReason::is_already_present);
        if present && !verbose {
            continue;
        }

        let target = op.target();
        if current_target.as_ref() != Some(&target) {
            lines.push(format!("│ {}", target.to_string().bold()));
            current_target = Some(target);
        }

        let symbol = match op {
            Operation::Skip { .. } if present => "=".dimmed(),
            Operation::Skip { .. } => "!".yellow(),
            Operation::PutInlinePolicy {
                replaces: Some(_), ..
            } => "~".yellow(),
            Operation::ImportExisting { .. } => "↳".cyan(),
            _ => "+".green(),
        };
        let text = op.to_string();
        let text = if present { text.dimmed().to_string() } else { text };
        lines.push(format!("│   {symbol} {text}"));

        if let Operation::PutInlinePolicy {
            document,
            replaces: Some(old),
            ..
        } = op
        {
            for diff_line in inline_diff(old, document) {
                lines.push(format!("│       {diff_line}"));
            }
        }
    }
    lines
}

/// Line diff of two policy documents, pretty-printed
pub fn inline_diff(old: &Value, new: &Value) -> Vec<String> {
    let old = serde_json::to_string_pretty(old).unwrap_or_default();
    let new = serde_json::to_string_pretty(new).unwrap_or_default();

    TextDiff::from_lines(&old, &new)
        .iter_all_changes()
        .filter(|change| change.tag() != ChangeTag::Equal)
        .map(|change| {
            let line = change.value().trim_end();
            match change.tag() {
                ChangeTag::Delete => format!("- {line}").red().to_string(),
                ChangeTag::Insert => format!("+ {line}").green().to_string(),
                ChangeTag::Equal => line.to_string(),
            }
        })
        .collect()
}

/// Display a plan with diagnostics and a summary
pub fn display_plan(plan: &Plan, verbose: bool) {
    for diagnostic in &plan.diagnostics {
        ui::warn(&diagnostic.to_string());
    }

    let changes = plan.changes().count();
    let blocked = plan
        .skips()
        .filter(|op| !op.skip_reason().is_some_and(SkipReason::is_already_present))
        .count();

    let lines = render_plan(plan, verbose);
    if lines.is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
    } else {
        println!();
        println!(
            "┌─ {} ─────────────────────────────────────────┐",
            "Reconciliation Plan".bold()
        );
        println!("│");
        for line in &lines {
            println!("{line}");
        }
        println!("│");
        println!("├─────────────────────────────────────────────────────┤");
        println!(
            "│ Summary: {} ({} skipped)",
            ui::count(changes, "change").bold(),
            blocked.to_string().yellow()
        );
        println!("└─────────────────────────────────────────────────────┘");
    }

    let fingerprint = plan.fingerprint();
    ui::dim(&format!("plan fingerprint {}", ui::short_fingerprint(&fingerprint)));
}

/// Plan as pretty JSON, with its fingerprint
pub fn plan_json(plan: &Plan) -> serde_json::Result<String> {
    let value = serde_json::json!({
        "fingerprint": plan.fingerprint(),
        "converged": plan.is_converged(),
        "operations": plan.operations,
        "diagnostics": plan.diagnostics,
    });
    serde_json::to_string_pretty(&value)
}
