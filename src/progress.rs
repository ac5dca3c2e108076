//! Progress and confirmation for apply runs.
//!
//! Implements the declarative callbacks with indicatif and dialoguer.

use anyhow::Result;
use colored::Colorize;
use declarative::{ApplyResult, ConfirmCallback, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar over all operations in a run.
pub struct BarProgress {
    bar: ProgressBar,
    verbose: bool,
}

impl BarProgress {
    pub fn new(total: usize, verbose: bool) -> Self {
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        Self { bar, verbose }
    }

    /// A bar that draws nothing, for `--quiet` and JSON output.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            verbose: false,
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Symbol for a finished operation
pub fn result_symbol(result: &ApplyResult) -> colored::ColoredString {
    match result {
        ApplyResult::NoChange => "○".dimmed(),
        ApplyResult::Created | ApplyResult::Modified => "✓".green(),
        ApplyResult::Adopted => "↳".cyan(),
        ApplyResult::Failed { .. } => "✗".red(),
        ApplyResult::Skipped { .. } => "⊘".yellow(),
    }
}

impl ProgressCallback for BarProgress {
    fn on_stage_start(&mut self, stage: usize, count: usize) {
        log::debug!("stage {stage}: {count} operations");
    }

    fn on_task_start(&mut self, _id: &str, description: &str) {
        self.bar.set_message(description.to_string());
    }

    fn on_task_complete(&mut self, id: &str, result: &ApplyResult) {
        if self.verbose || matches!(result, ApplyResult::Failed { .. }) {
            self.bar.println(format!("  {} {id}", result_symbol(result)));
        }
        self.bar.inc(1);
    }

    fn on_stage_complete(&mut self) {}
}

/// Asks once on the terminal, unless `--yes` was given.
pub struct PromptConfirm {
    pub assume_yes: bool,
}

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()?;
        Ok(confirmed)
    }
}
