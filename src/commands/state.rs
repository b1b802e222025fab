//! `strata state` - inspect recorded resources

use anyhow::{Context as AnyhowContext, Result, bail};
use chrono::Local;
use colored::Colorize;
use declarative::{StateRecord, StateSnapshot, StateStore, Urn};

use super::Stack;
use crate::Context;
use crate::cli::{FileArgs, StateCommand};
use crate::ui;

pub fn run(ctx: &Context, command: StateCommand) -> Result<()> {
    match command {
        StateCommand::List(args) => list(ctx, args),
        StateCommand::Show { resource, program } => show(&resource, program),
    }
}

fn list(ctx: &Context, args: FileArgs) -> Result<()> {
    let stack = Stack::open(args.file.as_deref())?;
    let snapshot = stack.store.load().context("Failed to load state")?;

    if !ctx.quiet {
        ui::header(&format!(
            "Stack {} ({})",
            stack.stack_name(),
            ui::plural(snapshot.len(), "resource")
        ));
        ui::kv("State file", &stack.store.path().display().to_string());
        if let Some(updated) = stack.store.last_updated()? {
            let local = updated.with_timezone(&Local);
            ui::kv("Last updated", &local.format("%Y-%m-%d %H:%M:%S").to_string());
        }
        println!();
    }

    if snapshot.is_empty() {
        ui::info("No resources recorded");
        return Ok(());
    }

    let width = snapshot
        .records()
        .map(|r| r.type_name.len())
        .max()
        .unwrap_or(0);
    for record in snapshot.records() {
        println!(
            "  {}  {}  {}",
            format!("{:<width$}", record.type_name).dimmed(),
            record.urn.name().bold(),
            record.id.cyan()
        );
    }
    Ok(())
}

fn show(resource: &str, args: FileArgs) -> Result<()> {
    let stack = Stack::open(args.file.as_deref())?;
    let snapshot = stack.store.load().context("Failed to load state")?;
    let record = find_record(&snapshot, resource)?;

    ui::header(record.urn.name());
    ui::kv("URN", record.urn.as_str());
    ui::kv("Type", &record.type_name);
    ui::kv("ID", &record.id);

    ui::section("Inputs");
    println!("{}", indent(&serde_json::to_string_pretty(&record.inputs)?));
    ui::section("Outputs");
    println!("{}", indent(&serde_json::to_string_pretty(&record.outputs)?));

    if !record.dependencies.is_empty() {
        ui::section("Depends on");
        for dep in &record.dependencies {
            println!("  {dep}");
        }
    }
    Ok(())
}

/// Look a record up by URN, then by logical name
fn find_record<'a>(snapshot: &'a StateSnapshot, key: &str) -> Result<&'a StateRecord> {
    if let Some(urn) = Urn::parse(key) {
        return snapshot
            .get(&urn)
            .with_context(|| format!("No resource with URN {key} in state"));
    }

    let matches: Vec<_> = snapshot.records().filter(|r| r.urn.name() == key).collect();
    match matches.as_slice() {
        [record] => Ok(*record),
        [] => bail!("No resource named '{key}' in state"),
        many => {
            let urns: Vec<_> = many.iter().map(|r| r.urn.as_str()).collect();
            bail!(
                "'{key}' is ambiguous, use one of:\n  {}",
                urns.join("\n  ")
            )
        }
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
