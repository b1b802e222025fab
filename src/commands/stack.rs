//! Stack lifecycle commands
//!
//! - `preview` - Show what `up` would change
//! - `up` - Make the remote system match the program
//! - `destroy` - Delete everything recorded in state
//! - `refresh` - Fold the remote system's current outputs into state
//! - `outputs` - Print the stack outputs recorded by the last apply

use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use declarative::{ApplyReport, ConfirmCallback, Graph, RefreshReport, SkipReason, StateStore};

use super::Stack;
use crate::Context;
use crate::cli::{DestroyArgs, FileArgs, OutputsArgs, UpArgs};
use crate::engine::{BarProgress, Prompt, display_plan, print_report};
use crate::progress;
use crate::ui;

// ============================================================================
// Preview
// ============================================================================

pub fn preview(ctx: &Context, args: FileArgs) -> Result<()> {
    let stack = Stack::open(args.file.as_deref())?;
    let graph = stack.graph()?;
    let plan = declarative::preview(&graph, &stack.store).context("Failed to load state")?;

    if !ctx.quiet {
        ui::header(&format!("Previewing stack {}", stack.stack_name()));
    }
    display_plan(&plan);
    Ok(())
}

// ============================================================================
// Up
// ============================================================================

pub fn up(ctx: &Context, args: UpArgs) -> Result<()> {
    let stack = Stack::open(args.program.file.as_deref())?;
    if !ctx.quiet {
        ui::header(&format!("Updating stack {}", stack.stack_name()));
    }

    let mut prompt = Prompt::new(args.yes);
    let report = up_stack(ctx, &stack, args.jobs, args.dry_run, &mut prompt)?;
    if prompt.refused() {
        bail!("Refusing to apply without confirmation on a non-interactive terminal (pass --yes)");
    }
    finish(&report, args.dry_run)
}

/// Show the plan, then apply it through `confirm`
fn up_stack<C: ConfirmCallback>(
    ctx: &Context,
    stack: &Stack,
    jobs: Option<usize>,
    dry_run: bool,
    confirm: &mut C,
) -> Result<ApplyReport> {
    let graph = stack.graph()?;
    let plan = declarative::preview(&graph, &stack.store).context("Failed to load state")?;
    display_plan(&plan);

    let opts = stack.program.execute_options(jobs, dry_run);
    let mut progress = BarProgress::new("Applying", ctx.quiet || dry_run);
    declarative::apply(
        &graph,
        &stack.store,
        &stack.providers,
        &opts,
        &mut progress,
        confirm,
    )
    .context("Apply failed")
}

// ============================================================================
// Destroy
// ============================================================================

pub fn destroy(ctx: &Context, args: DestroyArgs) -> Result<()> {
    let stack = Stack::open(args.program.file.as_deref())?;
    if !ctx.quiet {
        ui::header(&format!("Destroying stack {}", stack.stack_name()));
    }

    let mut prompt = Prompt::new(args.yes);
    let report = destroy_stack(ctx, &stack, &mut prompt)?;
    if prompt.refused() {
        bail!("Refusing to destroy without confirmation on a non-interactive terminal (pass --yes)");
    }
    finish(&report, false)
}

fn destroy_stack<C: ConfirmCallback>(
    ctx: &Context,
    stack: &Stack,
    confirm: &mut C,
) -> Result<ApplyReport> {
    let snapshot = stack.store.load().context("Failed to load state")?;
    if snapshot.is_empty() {
        ui::info("Nothing to destroy");
        return Ok(ApplyReport::default());
    }
    display_plan(&declarative::plan(&Graph::empty(), &snapshot));

    let opts = stack.program.execute_options(None, false);
    let mut progress = BarProgress::new("Destroying", ctx.quiet);
    declarative::destroy(&stack.store, &stack.providers, &opts, &mut progress, confirm)
        .context("Destroy failed")
}

/// Print the report; any failure becomes a non-zero exit
fn finish(report: &ApplyReport, dry_run: bool) -> Result<()> {
    if dry_run {
        println!();
        println!("  {} Dry run - no changes made", "ℹ".blue());
        return Ok(());
    }
    if !report.skipped.is_empty()
        && report.skipped.values().all(|r| *r == SkipReason::Declined)
    {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(());
    }

    print_report(report);
    if !report.is_success() {
        bail!(
            "{} failed, {} cancelled",
            ui::plural(report.failed.len(), "resource"),
            ui::plural(report.summary().skipped, "resource")
        );
    }
    Ok(())
}

// ============================================================================
// Refresh
// ============================================================================

pub fn refresh(ctx: &Context, args: FileArgs) -> Result<()> {
    let stack = Stack::open(args.file.as_deref())?;
    let opts = stack.program.execute_options(None, false);

    let spinner = (!ctx.quiet).then(|| progress::spinner("Reading resources..."));
    let report = declarative::refresh(&stack.store, &stack.providers, &opts);
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let report = report.context("Refresh failed")?;

    print_refresh(&report);
    if !report.failed.is_empty() {
        bail!(
            "{} could not be read",
            ui::plural(report.failed.len(), "resource")
        );
    }
    Ok(())
}

fn print_refresh(report: &RefreshReport) {
    if report.is_clean() {
        println!();
        println!(
            "  {} No drift, {} unchanged",
            "✓".green(),
            ui::plural(report.unchanged.len(), "resource")
        );
        return;
    }

    for (urn, diff) in &report.drifted {
        println!("  {} {} {}", "~".yellow(), urn.name(), "(drifted)".dimmed());
        for (key, change) in diff {
            let show = |v: Option<&declarative::Value>| {
                v.map_or_else(|| "(absent)".to_string(), ui::format_value)
            };
            println!(
                "      {key}: {} → {}",
                ui::truncate(&show(change.old.as_ref()), 40).red(),
                ui::truncate(&show(change.new.as_ref()), 40).green()
            );
        }
    }
    for urn in &report.vanished {
        println!(
            "  {} {} {}",
            "-".red(),
            urn.name(),
            "(no longer exists, removed from state)".dimmed()
        );
    }
    for (urn, error) in &report.failed {
        println!("  {} {} {}", "✗".red(), urn.name(), error.to_string().dimmed());
    }

    if !report.drifted.is_empty() || !report.vanished.is_empty() {
        println!();
        ui::warn("State updated from the remote objects, run 'strata preview' to compare");
    }

    println!();
    println!(
        "  {} drifted, {} vanished, {} unchanged",
        report.drifted.len(),
        report.vanished.len(),
        report.unchanged.len()
    );
}

// ============================================================================
// Outputs
// ============================================================================

pub fn outputs(_ctx: &Context, args: OutputsArgs) -> Result<()> {
    let stack = Stack::open(args.program.file.as_deref())?;
    let snapshot = stack.store.load().context("Failed to load state")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot.exports)?);
        return Ok(());
    }

    if snapshot.exports.is_empty() {
        ui::info("No outputs recorded (run 'strata up' first)");
        return Ok(());
    }

    ui::header(&format!("Outputs of stack {}", stack.stack_name()));
    for (name, value) in &snapshot.exports {
        ui::kv(name, &ui::format_value(value));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::init::write_template;
    use declarative::{Action, AutoConfirm, AutoDecline, NodeError, ProviderError};
    use tempfile::TempDir;

    const QUIET: Context = Context {
        verbose: 0,
        quiet: true,
    };

    /// Program directory and state directory
    struct Fixture {
        dir: TempDir,
        state: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let fixture = Self {
                dir: TempDir::new().unwrap(),
                state: TempDir::new().unwrap(),
            };
            write_template(fixture.dir.path(), false).unwrap();
            fixture
        }

        /// Rewrite the program with `from` replaced by `to`
        fn edit(&self, from: &str, to: &str) {
            let path = self.dir.path().join("strata.toml");
            let content = std::fs::read_to_string(&path).unwrap();
            assert!(content.contains(from), "program does not contain {from}");
            std::fs::write(path, content.replace(from, to)).unwrap();
        }

        fn stack(&self) -> Stack {
            Stack::open_in(None, self.dir.path(), self.state.path()).unwrap()
        }

        fn state_file(&self) -> std::path::PathBuf {
            self.state.path().join("dev.json")
        }
    }

    fn up(stack: &Stack) -> ApplyReport {
        up_stack(&QUIET, stack, None, false, &mut AutoConfirm).unwrap()
    }

    fn count(report: &ApplyReport, action: Action) -> usize {
        report
            .succeeded
            .values()
            .filter(|r| r.action == action)
            .count()
    }

    #[test]
    fn test_up_creates_stack_and_exports() {
        let fixture = Fixture::new();
        let report = up(&fixture.stack());

        assert!(report.is_success());
        assert_eq!(count(&report, Action::Create), 5);
        let ip = report.exports["nginxServiceIp"].as_str().unwrap();
        assert!(ip.starts_with("203.0."));
        assert!(report.exports["kubeConfig"].as_str().unwrap().contains("server"));
        assert!(fixture.state_file().exists());
        assert!(fixture.state.path().join("sandbox").join("dev.json").exists());
        assert!(finish(&report, false).is_ok());
    }

    #[test]
    fn test_second_up_is_noop() {
        let fixture = Fixture::new();
        up(&fixture.stack());

        let report = up(&fixture.stack());
        assert_eq!(count(&report, Action::NoOp), 5);
        assert_eq!(report.summary().total_changes(), 0);
    }

    #[test]
    fn test_changed_image_updates_deployment_only() {
        let fixture = Fixture::new();
        up(&fixture.stack());

        fixture.edit("nginx:latest", "nginx:1.27");
        let report = up(&fixture.stack());
        assert_eq!(count(&report, Action::Update), 1);
        assert_eq!(count(&report, Action::NoOp), 4);
    }

    #[test]
    fn test_missing_load_balancer_fails_service_only() {
        let fixture = Fixture::new();
        fixture.edit("load_balancers = true", "load_balancers = false");
        let report = up(&fixture.stack());

        assert_eq!(report.failed.len(), 1);
        let (urn, error) = report.failed.iter().next().unwrap();
        assert_eq!(urn.name(), "nginx-service");
        assert!(matches!(
            error,
            NodeError::Provider(ProviderError::NoIngress { .. })
        ));
        assert_eq!(count(&report, Action::Create), 4);
        assert!(report.unresolved_exports.contains_key("nginxServiceIp"));
        assert!(report.exports.contains_key("kubeConfig"));
        assert!(finish(&report, false).is_err());

        // The rest was persisted, so the retry only creates the service
        fixture.edit("load_balancers = false", "load_balancers = true");
        let report = up(&fixture.stack());
        assert!(report.is_success());
        assert_eq!(count(&report, Action::Create), 1);
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let fixture = Fixture::new();
        fixture.edit("base_delay_ms = 500", "base_delay_ms = 1");
        fixture.edit(
            "load_balancers = true",
            "load_balancers = true\ntransient_failures = 2",
        );
        let report = up(&fixture.stack());

        assert!(report.is_success());
        assert!(report.succeeded.values().all(|r| r.attempts == 3));
    }

    #[test]
    fn test_dry_run_and_decline_change_nothing() {
        let fixture = Fixture::new();
        let stack = fixture.stack();

        let report = up_stack(&QUIET, &stack, None, true, &mut AutoConfirm).unwrap();
        assert_eq!(report.skipped.len(), 5);
        assert!(finish(&report, true).is_ok());

        let report = up_stack(&QUIET, &stack, None, false, &mut AutoDecline).unwrap();
        assert!(report.succeeded.is_empty());
        assert!(finish(&report, false).is_ok());
        assert!(!fixture.state_file().exists());
    }

    #[test]
    fn test_destroy_removes_everything() {
        let fixture = Fixture::new();
        up(&fixture.stack());

        let stack = fixture.stack();
        let report = destroy_stack(&QUIET, &stack, &mut AutoConfirm).unwrap();
        assert_eq!(count(&report, Action::Delete), 5);

        let snapshot = stack.store.load().unwrap();
        assert!(snapshot.is_empty());
        assert!(snapshot.exports.is_empty());

        let report = destroy_stack(&QUIET, &stack, &mut AutoConfirm).unwrap();
        assert!(report.urns().is_empty());
    }

    #[test]
    fn test_removed_resource_is_deleted() {
        let fixture = Fixture::new();
        up(&fixture.stack());

        let path = fixture.dir.path().join("strata.toml");
        let content = std::fs::read_to_string(&path).unwrap();
        let trimmed = content
            .split("# Expose nginx through a load balancer")
            .next()
            .unwrap()
            .to_string()
            + "[exports]\nkubeConfig = \"${my-cluster.kubeconfig}\"\n";
        std::fs::write(&path, trimmed).unwrap();

        let report = up(&fixture.stack());
        assert_eq!(count(&report, Action::Delete), 1);
        assert_eq!(count(&report, Action::NoOp), 4);
        assert!(!report.exports.contains_key("nginxServiceIp"));
    }
}
