//! Execution front end - confirmation, progress and the final report

use colored::Colorize;
use declarative::{
    Action, ApplyReport, ConfirmCallback, DiffSummary, NodeOutcome, Plan, ProgressCallback,
    SkipReason, Urn,
};
use indicatif::ProgressBar;

use crate::progress;
use crate::ui;

/// Asks before a plan is carried out.
///
/// `--yes` skips the question. Without it, a non-interactive terminal
/// refuses rather than applying unattended.
#[derive(Debug, Clone, Copy)]
pub struct Prompt {
    yes: bool,
    interactive: bool,
    refused: bool,
}

impl Prompt {
    pub fn new(yes: bool) -> Self {
        Self {
            yes,
            interactive: console::Term::stdout().is_term(),
            refused: false,
        }
    }

    /// Whether the plan was refused for lack of a terminal to ask on
    pub fn refused(&self) -> bool {
        self.refused
    }
}

impl ConfirmCallback for Prompt {
    fn confirm(&mut self, plan: &Plan) -> bool {
        if self.yes {
            return true;
        }
        if !self.interactive {
            self.refused = true;
            return false;
        }

        let summary = DiffSummary::from_plan(plan);
        println!();
        match confirm_proceed(summary.total()) {
            Ok(confirmed) => confirmed,
            Err(e) => {
                log::warn!("Confirmation prompt failed: {e}");
                false
            }
        }
    }
}

/// Confirm with user
fn confirm_proceed(changes: usize) -> dialoguer::Result<bool> {
    use dialoguer::Confirm;

    Confirm::new()
        .with_prompt(format!("Apply {}?", ui::plural(changes, "change")))
        .default(true)
        .interact()
}

/// Progress bar over settled resources
pub struct BarProgress {
    bar: ProgressBar,
    prefix: &'static str,
    quiet: bool,
}

impl BarProgress {
    pub fn new(prefix: &'static str, quiet: bool) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            prefix,
            quiet,
        }
    }
}

impl ProgressCallback for BarProgress {
    fn on_batch_start(&mut self, count: usize) {
        if !self.quiet && count > 0 {
            self.bar = progress::bar(count as u64, self.prefix);
        }
    }

    fn on_resource_start(&mut self, urn: &Urn, action: Action) {
        self.bar.set_message(format!("{action} {}", urn.name()));
    }

    fn on_resource_complete(&mut self, urn: &Urn, outcome: NodeOutcome<'_>) {
        self.bar.inc(1);
        let line = match outcome {
            NodeOutcome::Succeeded(result) if result.action == Action::NoOp => return,
            NodeOutcome::Succeeded(result) => {
                format!("  {} {} {}", "✓".green(), urn.name(), past_tense(result.action).dimmed())
            }
            NodeOutcome::Failed(error) => {
                format!("  {} {} {}", "✗".red(), urn.name(), error.to_string().red())
            }
            NodeOutcome::Skipped(reason @ SkipReason::UpstreamFailure { .. }) => {
                format!("  {} {} {}", "⊘".yellow(), urn.name(), reason.to_string().dimmed())
            }
            NodeOutcome::Skipped(_) => return,
        };
        if self.quiet {
            log::info!("{line}");
        } else {
            self.bar.println(line);
        }
    }

    fn on_batch_complete(&mut self) {
        self.bar.finish_and_clear();
    }
}

fn past_tense(action: Action) -> &'static str {
    match action {
        Action::Create => "created",
        Action::Update => "updated",
        Action::Delete => "deleted",
        Action::NoOp => "unchanged",
    }
}

/// Print the final report: counts, failures and stack outputs
pub fn print_report(report: &ApplyReport) {
    let summary = report.summary();

    println!();
    if report.is_success() {
        if summary.total_changes() == 0 {
            println!("  {} Stack is up to date", "✓".green().bold());
        } else {
            println!("  {} Stack applied successfully!", "✓".green().bold());
        }
    } else {
        println!("  {} Stack applied with errors", "⚠".yellow().bold());
    }

    if summary.created > 0 {
        println!("    • {} created", ui::plural(summary.created, "resource"));
    }
    if summary.updated > 0 {
        println!("    • {} updated", ui::plural(summary.updated, "resource"));
    }
    if summary.deleted > 0 {
        println!("    • {} deleted", ui::plural(summary.deleted, "resource"));
    }
    if summary.unchanged > 0 {
        println!("    • {} unchanged", ui::plural(summary.unchanged, "resource"));
    }
    if summary.skipped > 0 {
        println!("    • {} skipped", ui::plural(summary.skipped, "resource"));
    }
    if summary.failed > 0 {
        let failed = format!("{} failed", ui::plural(summary.failed, "resource"));
        println!("    • {}", failed.red());
    }

    if !report.failed.is_empty() {
        ui::section("Failures");
        for (urn, error) in &report.failed {
            println!("  {} {}", "✗".red(), urn.name().bold());
            ui::dim(&error.to_string());
        }
    }

    let cancelled: Vec<_> = report
        .skipped
        .iter()
        .filter_map(|(urn, reason)| match reason {
            SkipReason::UpstreamFailure { root } => Some((urn, root)),
            _ => None,
        })
        .collect();
    if !cancelled.is_empty() {
        ui::section("Cancelled");
        for (urn, root) in cancelled {
            println!(
                "  {} {} {}",
                "⊘".yellow(),
                urn.name(),
                format!("(because {} failed)", root.name()).dimmed()
            );
        }
    }

    print_exports(report);
}

fn print_exports(report: &ApplyReport) {
    if report.exports.is_empty() && report.unresolved_exports.is_empty() {
        return;
    }

    ui::section("Outputs");
    for (name, value) in &report.exports {
        ui::kv(name, &ui::truncate(&ui::format_value(value), 80));
    }
    for (name, reason) in &report.unresolved_exports {
        ui::kv(name, &format!("{} ({reason})", "unresolved".yellow()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{NodeError, NodeResult, ProviderError};

    #[test]
    fn test_prompt_yes_skips_question() {
        let mut prompt = Prompt {
            yes: true,
            interactive: false,
            refused: false,
        };
        assert!(prompt.confirm(&Plan::default()));
        assert!(!prompt.refused());
    }

    #[test]
    fn test_prompt_refuses_non_interactive() {
        let mut prompt = Prompt {
            yes: false,
            interactive: false,
            refused: false,
        };
        assert!(!prompt.confirm(&Plan::default()));
        assert!(prompt.refused());
    }

    #[test]
    fn test_quiet_progress_stays_hidden() {
        let urn = Urn::new("dev", "kubernetes:core/v1:Namespace", "nginx-ns");
        let mut progress = BarProgress::new("Applying", true);
        progress.on_batch_start(2);
        progress.on_resource_start(&urn, Action::Create);
        let result = NodeResult {
            action: Action::Create,
            record: None,
            attempts: 1,
        };
        progress.on_resource_complete(&urn, NodeOutcome::Succeeded(&result));
        let error = NodeError::Provider(ProviderError::failed("boom"));
        progress.on_resource_complete(&urn, NodeOutcome::Failed(&error));
        progress.on_batch_complete();

        assert!(progress.bar.is_hidden());
        assert_eq!(progress.bar.position(), 2);
    }
}
