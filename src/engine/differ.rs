//! Plan display - strata-specific UI

use colored::{ColoredString, Colorize};
use declarative::{Action, Change, DiffSummary, Plan, PlanEntry, Planned, group_by_type};
use similar::{ChangeTag, TextDiff};

use crate::ui;

const RULE: &str = "─────────────────────────────────────────────────────";

/// Display a plan in a user-friendly format
pub fn display_plan(plan: &Plan) {
    let summary = DiffSummary::from_plan(plan);
    if !summary.has_changes() && summary.invalid == 0 {
        println!();
        println!(
            "  {} No changes, {} up to date",
            "✓".green(),
            ui::plural(summary.unchanged, "resource")
        );
        return;
    }

    println!();
    println!("┌─ {} {}┐", "Plan".bold(), "─".repeat(46));
    println!("│");

    for (type_name, entries) in group_by_type(plan) {
        println!("│ {}", type_name.bold());
        for entry in entries {
            let tentative = if entry.is_tentative() {
                " (may turn out unchanged)".dimmed().to_string()
            } else {
                String::new()
            };
            println!(
                "│   {} {:<30} {}{}",
                symbol(entry.action),
                entry.urn.name(),
                action_label(entry.action).dimmed(),
                tentative
            );
            for line in change_lines(entry) {
                println!("│       {line}");
            }
        }
        println!("│");
    }

    if !plan.invalid().is_empty() {
        println!("│ {}", "Will fail".red().bold());
        for (urn, error) in plan.invalid() {
            println!(
                "│   {} {:<30} {}",
                "!".red(),
                urn.name(),
                error.to_string().dimmed()
            );
        }
        println!("│");
    }

    println!("├{RULE}┤");
    println!(
        "│ Summary: {} to create, {} to update, {} to delete, {} unchanged",
        summary.additions.to_string().green(),
        summary.modifications.to_string().yellow(),
        summary.removals.to_string().red(),
        summary.unchanged
    );
    if summary.invalid > 0 {
        println!("│          {} will fail", summary.invalid.to_string().red());
    }
    println!("└{RULE}┘");
}

fn symbol(action: Action) -> ColoredString {
    match action {
        Action::Create => "+".green(),
        Action::Update => "~".yellow(),
        Action::Delete => "-".red(),
        Action::NoOp => " ".normal(),
    }
}

fn action_label(action: Action) -> &'static str {
    match action {
        Action::Create => "(create)",
        Action::Update => "(update)",
        Action::Delete => "(delete)",
        Action::NoOp => "",
    }
}

/// Per-property lines of an entry
fn change_lines(entry: &PlanEntry) -> Vec<String> {
    let mut lines = Vec::new();
    for (key, change) in &entry.diff {
        match entry.action {
            Action::Create => lines.push(format!(
                "{} {key} = {}",
                "+".green(),
                planned(&change.new)
            )),
            Action::Update => lines.extend(update_lines(key, change)),
            Action::Delete | Action::NoOp => {}
        }
    }
    lines
}

fn update_lines(key: &str, change: &Change) -> Vec<String> {
    let old = change.old.as_ref().map(ui::format_value);
    let new = match &change.new {
        Planned::Known(value) => Some(ui::format_value(value)),
        Planned::Absent | Planned::Computed => None,
    };

    match (old, new) {
        (Some(old), Some(new)) if old.contains('\n') || new.contains('\n') => {
            let mut lines = vec![format!("{} {key}:", "~".yellow())];
            lines.extend(text_diff(&old, &new));
            lines
        }
        (Some(old), _) => vec![format!(
            "{} {key}: {} → {}",
            "~".yellow(),
            ui::truncate(&old, 40).red(),
            planned(&change.new)
        )],
        (None, _) => vec![format!(
            "{} {key} = {}",
            "+".green(),
            planned(&change.new)
        )],
    }
}

/// Line diff of two multi-line values
fn text_diff(old: &str, new: &str) -> Vec<String> {
    TextDiff::from_lines(old, new)
        .iter_all_changes()
        .filter_map(|change| {
            let line = change.value().trim_end_matches('\n');
            match change.tag() {
                ChangeTag::Delete => Some(format!("  {} {}", "-".red(), line.red())),
                ChangeTag::Insert => Some(format!("  {} {}", "+".green(), line.green())),
                ChangeTag::Equal => None,
            }
        })
        .collect()
}

fn planned(value: &Planned) -> ColoredString {
    match value {
        Planned::Known(value) => ui::truncate(&ui::format_value(value), 60).normal(),
        Planned::Computed => "(known after apply)".dimmed(),
        Planned::Absent => "(removed)".red(),
    }
}
