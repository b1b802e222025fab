//! Execution engine - applies a plan with dependency-ordered parallelism
//!
//! The orchestrating loop runs on the caller's thread. It dispatches ready
//! entries in ascending URN order onto a rayon pool and settles completions
//! as they arrive over a channel. Only the orchestrating thread touches the
//! report, the progress callback and the ready set.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;

use crate::context::ProgressCallback;
use crate::diff::property_diff;
use crate::error::{Error, NodeError, ProviderError, Result};
use crate::graph::{Graph, ResourceNode};
use crate::output::{CellState, OutputTable};
use crate::planner::{Plan, PlanEntry};
use crate::provider::ProviderRegistry;
use crate::retry::{LogCallback, with_retry};
use crate::state::{StateRecord, StateSnapshot};
use crate::types::{
    Action, ApplyReport, ExecuteOptions, Input, NodeOutcome, NodeResult, PropertyMap,
    RetryConfig, SkipReason, Urn,
};

/// Execute a plan
///
/// # Arguments
/// * `graph` - The graph the plan was computed from
/// * `plan` - Entries to run
/// * `prior` - Snapshot the plan was computed against
/// * `providers` - Provider bridge for every type in the plan
/// * `opts` - Execution options (dry_run, jobs, retry)
/// * `progress` - Progress callback, called on the current thread
///
/// # Returns
/// Final status of every entry. Node failures are reported, not returned as
/// errors.
pub fn execute<P: ProgressCallback>(
    graph: &Graph,
    plan: &Plan,
    prior: &StateSnapshot,
    providers: &ProviderRegistry,
    opts: &ExecuteOptions,
    progress: &mut P,
) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();
    progress.on_batch_start(plan.len());

    if opts.dry_run {
        for entry in plan.entries() {
            let reason = report
                .skipped
                .entry(entry.urn.clone())
                .or_insert(SkipReason::DryRun);
            progress.on_resource_complete(&entry.urn, NodeOutcome::Skipped(reason));
        }
        for name in graph.exports().keys() {
            report
                .unresolved_exports
                .insert(name.clone(), "dry run".to_string());
        }
        progress.on_batch_complete();
        return Ok(report);
    }

    let workers = if opts.jobs == 0 {
        plan.len().max(1)
    } else {
        opts.jobs
    };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("apply-{i}"))
        .build()
        .map_err(|e| Error::WorkerPool(e.to_string()))?;

    let mut scheduler = Scheduler::new(plan, graph.outputs(), &mut report);
    for (urn, error) in plan.invalid() {
        if !scheduler.is_settled(urn) {
            scheduler.fail(urn, error.clone(), progress)?;
        }
    }

    let (tx, rx) = mpsc::channel::<(&Urn, std::result::Result<NodeResult, NodeError>)>();
    let limit = workers;

    pool.in_place_scope(|scope| -> Result<()> {
        let mut running = 0usize;
        loop {
            while running < limit
                && let Some(urn) = scheduler.ready.pop_first()
            {
                let Some(entry) = scheduler.entries.get(urn).copied() else {
                    continue;
                };
                log::debug!("Dispatching {} {}", entry.action, urn);
                progress.on_resource_start(urn, entry.action);

                let task = Task {
                    entry,
                    node: graph.node(urn),
                    prior: prior.get(urn),
                    outputs: graph.outputs(),
                    providers,
                    retry: &opts.retry,
                };
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run()))
                        .unwrap_or_else(|_| {
                            Err(ProviderError::failed("provider panicked").into())
                        });
                    // The receiver only goes away when settling already failed
                    let _ = tx.send((urn, outcome));
                });
                running += 1;
            }

            if running == 0 {
                break;
            }
            let Ok((urn, outcome)) = rx.recv() else {
                break;
            };
            running -= 1;

            match outcome {
                Ok(result) => scheduler.succeed(urn, result, progress)?,
                Err(error) => scheduler.fail(urn, error, progress)?,
            }
        }
        Ok(())
    })?;

    resolve_exports(graph, &mut report);
    progress.on_batch_complete();

    let summary = report.summary();
    log::info!(
        "Apply finished: {} created, {} updated, {} deleted, {} unchanged, {} failed, {} skipped",
        summary.created,
        summary.updated,
        summary.deleted,
        summary.unchanged,
        summary.failed,
        summary.skipped
    );
    Ok(report)
}

/// Ready set and bookkeeping for one apply
struct Scheduler<'a, 'r> {
    entries: BTreeMap<&'a Urn, &'a PlanEntry>,
    /// Unfinished waits per entry
    blocked: BTreeMap<&'a Urn, usize>,
    /// Entries waiting on each entry
    waiters: BTreeMap<&'a Urn, Vec<&'a Urn>>,
    ready: BTreeSet<&'a Urn>,
    settled: BTreeSet<&'a Urn>,
    outputs: &'a OutputTable,
    report: &'r mut ApplyReport,
}

impl<'a, 'r> Scheduler<'a, 'r> {
    fn new(plan: &'a Plan, outputs: &'a OutputTable, report: &'r mut ApplyReport) -> Self {
        let entries: BTreeMap<&Urn, &PlanEntry> =
            plan.entries().iter().map(|e| (&e.urn, e)).collect();

        let mut blocked = BTreeMap::new();
        let mut waiters: BTreeMap<&Urn, Vec<&Urn>> = BTreeMap::new();
        for entry in plan.entries() {
            let waits: Vec<&Urn> = entry
                .waits_on
                .iter()
                .filter(|w| entries.contains_key(*w))
                .collect();
            for waited in &waits {
                waiters.entry(*waited).or_default().push(&entry.urn);
            }
            blocked.insert(&entry.urn, waits.len());
        }
        let ready = blocked
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(urn, _)| *urn)
            .collect();

        Self {
            entries,
            blocked,
            waiters,
            ready,
            settled: BTreeSet::new(),
            outputs,
            report,
        }
    }

    fn is_settled(&self, urn: &Urn) -> bool {
        self.settled.contains(urn)
    }

    fn key(&self, urn: &Urn) -> Option<&'a Urn> {
        self.entries.get_key_value(urn).map(|(k, _)| *k)
    }

    fn succeed<P: ProgressCallback>(
        &mut self,
        urn: &Urn,
        result: NodeResult,
        progress: &mut P,
    ) -> Result<()> {
        let Some(key) = self.key(urn) else {
            return Ok(());
        };
        self.settled.insert(key);

        if let Some(outputs) = result.outputs() {
            let missing = self.outputs.resolve_owner(urn, outputs)?;
            if !missing.is_empty() {
                log::warn!("{urn} did not produce outputs: {}", missing.join(", "));
            }
        }
        log::info!("{} {urn}", result.action);

        let result = self.report.succeeded.entry(urn.clone()).or_insert(result);
        progress.on_resource_complete(urn, NodeOutcome::Succeeded(result));

        for waiter in self.waiters.get(key).into_iter().flatten() {
            if let Some(count) = self.blocked.get_mut(waiter) {
                *count = count.saturating_sub(1);
                if *count == 0 && !self.settled.contains(*waiter) {
                    self.ready.insert(*waiter);
                }
            }
        }
        Ok(())
    }

    /// Record a root-cause failure and cancel everything waiting on it
    fn fail<P: ProgressCallback>(
        &mut self,
        urn: &Urn,
        error: NodeError,
        progress: &mut P,
    ) -> Result<()> {
        let Some(key) = self.key(urn) else {
            return Ok(());
        };
        self.settled.insert(key);
        self.ready.remove(key);
        self.outputs.fail_owner(urn, urn)?;

        log::warn!("{urn} failed: {error}");
        let error = self.report.failed.entry(urn.clone()).or_insert(error);
        progress.on_resource_complete(urn, NodeOutcome::Failed(error));

        let mut queue: Vec<&'a Urn> = self.waiters.get(key).cloned().unwrap_or_default();
        while let Some(waiter) = queue.pop() {
            if !self.settled.insert(waiter) {
                continue;
            }
            self.ready.remove(waiter);
            self.outputs.fail_owner(waiter, urn)?;

            log::debug!("Cancelled {waiter}: upstream {urn} failed");
            let reason = self
                .report
                .skipped
                .entry(waiter.clone())
                .or_insert(SkipReason::UpstreamFailure { root: urn.clone() });
            progress.on_resource_complete(waiter, NodeOutcome::Skipped(reason));

            queue.extend(self.waiters.get(waiter).into_iter().flatten());
        }
        Ok(())
    }
}

/// Everything a worker needs to run one entry
struct Task<'a> {
    entry: &'a PlanEntry,
    node: Option<&'a ResourceNode>,
    prior: Option<&'a StateRecord>,
    outputs: &'a OutputTable,
    providers: &'a ProviderRegistry,
    retry: &'a RetryConfig,
}

impl Task<'_> {
    fn run(&self) -> std::result::Result<NodeResult, NodeError> {
        let urn = &self.entry.urn;
        let callback = LogCallback { urn };

        if self.entry.action == Action::Delete {
            let Some(record) = self.prior else {
                return Ok(NodeResult {
                    action: Action::Delete,
                    record: None,
                    attempts: 0,
                });
            };
            let provider = self.providers.resolve(&record.type_name)?;
            let (result, attempts) = with_retry(self.retry, &callback, || {
                match provider.delete(&record.type_name, &record.id) {
                    Err(ProviderError::NotFound { .. }) => {
                        log::debug!("{urn} was already gone");
                        Ok(())
                    }
                    other => other,
                }
            });
            result?;
            return Ok(NodeResult {
                action: Action::Delete,
                record: None,
                attempts,
            });
        }

        let node = self.node.ok_or_else(|| NodeError::DanglingReference {
            target: urn.clone(),
            reason: crate::error::DanglingReason::Unknown,
        })?;
        let inputs = resolve_inputs(node, self.outputs)?;
        let provider = self.providers.resolve(&node.type_name)?;

        let Some(record) = self.prior else {
            let (result, attempts) = with_retry(self.retry, &callback, || {
                provider.create(&node.type_name, urn, &inputs)
            });
            let created = result?;
            return Ok(NodeResult {
                action: Action::Create,
                record: Some(StateRecord {
                    urn: urn.clone(),
                    type_name: node.type_name.clone(),
                    id: created.id,
                    inputs,
                    outputs: created.outputs,
                    dependencies: node.dependencies.clone(),
                }),
                attempts,
            });
        };

        let diff = property_diff(&record.inputs, &inputs);
        if diff.is_empty() {
            return Ok(NodeResult {
                action: Action::NoOp,
                record: Some(StateRecord {
                    dependencies: node.dependencies.clone(),
                    ..record.clone()
                }),
                attempts: 0,
            });
        }

        let (result, attempts) = with_retry(self.retry, &callback, || {
            provider.update(&node.type_name, &record.id, &diff, &inputs)
        });
        let outputs = result?;
        Ok(NodeResult {
            action: Action::Update,
            record: Some(StateRecord {
                urn: urn.clone(),
                type_name: node.type_name.clone(),
                id: record.id.clone(),
                inputs,
                outputs,
                dependencies: node.dependencies.clone(),
            }),
            attempts,
        })
    }
}

/// Concrete inputs of a node, reading every referenced output cell
fn resolve_inputs(
    node: &ResourceNode,
    outputs: &OutputTable,
) -> std::result::Result<PropertyMap, NodeError> {
    node.inputs
        .iter()
        .map(|(key, input)| {
            let value = match input {
                Input::Literal(value) => value.clone(),
                Input::Ref(output) => {
                    let missing = || NodeError::MissingOutput {
                        owner: output.owner.clone(),
                        property: output.property.clone(),
                    };
                    let cell = outputs.get(output).ok_or_else(missing)?;
                    match cell.wait() {
                        Ok(value) => value,
                        Err(root) if root == output.owner => return Err(missing()),
                        Err(root) => return Err(NodeError::UpstreamFailure { root }),
                    }
                }
            };
            Ok((key.clone(), value))
        })
        .collect()
}

fn resolve_exports(graph: &Graph, report: &mut ApplyReport) {
    for (name, output) in graph.exports() {
        let state = graph
            .outputs()
            .get(output)
            .map_or(CellState::Pending, |cell| cell.state());
        match state {
            CellState::Resolved(value) => {
                report.exports.insert(name.clone(), value);
            }
            CellState::Failed { root } => {
                let reason = if report.succeeded.contains_key(&output.owner) {
                    format!("output '{}' of {} was not produced", output.property, output.owner)
                } else {
                    format!("upstream resource {root} failed")
                };
                report.unresolved_exports.insert(name.clone(), reason);
            }
            CellState::Pending => {
                let reason = if graph.contains(&output.owner) {
                    format!("{} did not run", output.owner)
                } else {
                    format!("{} is not declared", output.owner)
                };
                report.unresolved_exports.insert(name.clone(), reason);
            }
        }
    }
}
