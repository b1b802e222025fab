//! Whole-stack operations: preview, apply, destroy and refresh
//!
//! These tie the planner and executor to a [`StateStore`]. Apply loads the
//! prior snapshot once and saves the committed snapshot once, after
//! execution, whether it fully succeeded or not.

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::context::{AutoConfirm, ConfirmCallback, NoProgress, ProgressCallback};
use crate::diff::property_diff;
use crate::error::{ProviderError, Result};
use crate::executor::execute;
use crate::graph::Graph;
use crate::planner::{Plan, plan};
use crate::provider::ProviderRegistry;
use crate::retry::{LogCallback, with_retry};
use crate::state::StateStore;
use crate::types::{ApplyReport, ExecuteOptions, NodeOutcome, PropertyDiff, SkipReason, Urn};

/// Plan `graph` against the stored state without running anything
pub fn preview(graph: &Graph, store: &dyn StateStore) -> Result<Plan> {
    let prior = store.load()?;
    Ok(plan(graph, &prior))
}

/// Plan, confirm, execute and persist
///
/// # Arguments
/// * `graph` - Desired state
/// * `store` - Where the last-applied state lives
/// * `providers` - Provider bridge
/// * `opts` - Execution options; a dry run never saves
/// * `progress` - Progress callback
/// * `confirm` - Asked once when the plan changes anything
pub fn apply<P, C>(
    graph: &Graph,
    store: &dyn StateStore,
    providers: &ProviderRegistry,
    opts: &ExecuteOptions,
    progress: &mut P,
    confirm: &mut C,
) -> Result<ApplyReport>
where
    P: ProgressCallback,
    C: ConfirmCallback,
{
    let prior = store.load()?;
    let plan = plan(graph, &prior);

    let needs_confirmation = plan.has_changes() || !plan.invalid().is_empty();
    if !opts.dry_run && needs_confirmation && !confirm.confirm(&plan) {
        log::info!("Apply declined, nothing changed");
        return Ok(declined(&plan, graph, progress));
    }

    let report = execute(graph, &plan, &prior, providers, opts, progress)?;

    if !opts.dry_run {
        let mut next = prior;
        next.commit(&report);
        store.save(&next)?;
    }
    Ok(report)
}

/// Apply without progress reporting or confirmation
pub fn apply_simple(
    graph: &Graph,
    store: &dyn StateStore,
    providers: &ProviderRegistry,
    opts: &ExecuteOptions,
) -> Result<ApplyReport> {
    apply(graph, store, providers, opts, &mut NoProgress, &mut AutoConfirm)
}

/// Delete every recorded resource, dependents first
pub fn destroy<P, C>(
    store: &dyn StateStore,
    providers: &ProviderRegistry,
    opts: &ExecuteOptions,
    progress: &mut P,
    confirm: &mut C,
) -> Result<ApplyReport>
where
    P: ProgressCallback,
    C: ConfirmCallback,
{
    apply(&Graph::empty(), store, providers, opts, progress, confirm)
}

fn declined<P: ProgressCallback>(plan: &Plan, graph: &Graph, progress: &mut P) -> ApplyReport {
    let mut report = ApplyReport::default();
    progress.on_batch_start(plan.len());
    for entry in plan.entries() {
        let reason = report
            .skipped
            .entry(entry.urn.clone())
            .or_insert(SkipReason::Declined);
        progress.on_resource_complete(&entry.urn, NodeOutcome::Skipped(reason));
    }
    for name in graph.exports().keys() {
        report
            .unresolved_exports
            .insert(name.clone(), "apply declined".to_string());
    }
    progress.on_batch_complete();
    report
}

/// Outcome of reading every recorded resource back from its provider
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub unchanged: Vec<Urn>,
    /// Resources whose outputs changed remotely, with the changes
    pub drifted: BTreeMap<Urn, PropertyDiff>,
    /// Resources that no longer exist; their records were dropped
    pub vanished: Vec<Urn>,
    pub failed: BTreeMap<Urn, ProviderError>,
}

impl RefreshReport {
    pub fn is_clean(&self) -> bool {
        self.drifted.is_empty() && self.vanished.is_empty() && self.failed.is_empty()
    }
}

/// Read every recorded resource and fold the current outputs into state
pub fn refresh(
    store: &dyn StateStore,
    providers: &ProviderRegistry,
    opts: &ExecuteOptions,
) -> Result<RefreshReport> {
    let mut snapshot = store.load()?;
    let records: Vec<_> = snapshot.records().cloned().collect();

    let reads: Vec<_> = records
        .par_iter()
        .map(|record| {
            let callback = LogCallback { urn: &record.urn };
            let outputs = providers.resolve(&record.type_name).and_then(|provider| {
                with_retry(&opts.retry, &callback, || {
                    provider.read(&record.type_name, &record.id)
                })
                .0
            });
            (record, outputs)
        })
        .collect();

    let mut report = RefreshReport::default();
    for (record, outputs) in reads {
        let urn = record.urn.clone();
        match outputs {
            Ok(outputs) if outputs == record.outputs => report.unchanged.push(urn),
            Ok(outputs) => {
                log::info!("{urn} drifted");
                report
                    .drifted
                    .insert(urn, property_diff(&record.outputs, &outputs));
                let mut updated = record.clone();
                updated.outputs = outputs;
                snapshot.insert(updated);
            }
            Err(ProviderError::NotFound { .. }) => {
                log::info!("{urn} no longer exists");
                snapshot.remove(&urn);
                report.vanished.push(urn);
            }
            Err(e) => {
                log::warn!("Could not read {urn}: {e}");
                report.failed.insert(urn, e);
            }
        }
    }

    store.save(&snapshot)?;
    Ok(report)
}
