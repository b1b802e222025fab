//! Core types for declarative resource orchestration

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use crate::error::NodeError;
use crate::state::StateRecord;

/// A property value. Resource inputs and outputs are plain JSON.
pub type Value = serde_json::Value;

/// Ordered property bag used for inputs and outputs.
pub type PropertyMap = BTreeMap<String, Value>;

/// Concrete per-property changes handed to a provider on update.
pub type PropertyDiff = BTreeMap<String, ValueChange>;

const URN_PREFIX: &str = "urn:strata:";
const URN_SEPARATOR: &str = "::";

/// Unique resource name identifying a node across runs.
///
/// Derived from the stack, the resource type and the logical name only, so
/// the same declaration always maps to the same URN regardless of the order
/// it was declared in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Urn(String);

impl Urn {
    /// Build the URN for a resource in a stack
    pub fn new(stack: &str, type_name: &str, name: &str) -> Self {
        Self(format!(
            "{URN_PREFIX}{stack}{URN_SEPARATOR}{type_name}{URN_SEPARATOR}{name}"
        ))
    }

    /// Parse a URN string, returning None if it is not well formed
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix(URN_PREFIX)?;
        let parts: Vec<&str> = rest.splitn(3, URN_SEPARATOR).collect();
        match parts.as_slice() {
            [stack, type_name, name]
                if !stack.is_empty() && !type_name.is_empty() && !name.is_empty() =>
            {
                Some(Self(s.to_string()))
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn part(&self, index: usize) -> &str {
        self.0
            .strip_prefix(URN_PREFIX)
            .and_then(|rest| rest.splitn(3, URN_SEPARATOR).nth(index))
            .unwrap_or_default()
    }

    /// Stack component
    pub fn stack(&self) -> &str {
        self.part(0)
    }

    /// Resource type component
    pub fn type_name(&self) -> &str {
        self.part(1)
    }

    /// Logical name component
    pub fn name(&self) -> &str {
        self.part(2)
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A reference to one output property of another resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    /// Resource producing the value
    pub owner: Urn,
    /// Output property name
    pub property: String,
}

impl OutputRef {
    pub fn new(owner: Urn, property: impl Into<String>) -> Self {
        Self {
            owner,
            property: property.into(),
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.property)
    }
}

/// A declared input: either a literal or a reference to another output
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Literal(Value),
    Ref(OutputRef),
}

impl Input {
    /// The referenced output, if this input is a reference
    pub fn output_ref(&self) -> Option<&OutputRef> {
        match self {
            Self::Ref(r) => Some(r),
            Self::Literal(_) => None,
        }
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl From<OutputRef> for Input {
    fn from(output: OutputRef) -> Self {
        Self::Ref(output)
    }
}

/// Action computed for a resource by the planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
    NoOp,
}

impl Action {
    /// Whether the action calls a provider to change remote state
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        f.write_str(s)
    }
}

/// A concrete old/new pair for one property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueChange {
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Retry configuration for transient provider errors
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        // Negative delays clamp to zero, NaN to the cap
        let capped = delay.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped)
    }

    /// A config that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Options for execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Don't call providers, report every entry as skipped
    pub dry_run: bool,
    /// Maximum concurrent provider operations (0 = unbounded)
    pub jobs: usize,
    /// Retry policy for transient provider errors
    pub retry: RetryConfig,
}

/// A successfully completed node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeResult {
    /// Action that was actually carried out
    pub action: Action,
    /// Record to persist; None after a delete
    pub record: Option<StateRecord>,
    /// Provider attempts used (0 when no provider was called)
    pub attempts: u32,
}

impl NodeResult {
    /// Resolved outputs of the node
    pub fn outputs(&self) -> Option<&PropertyMap> {
        self.record.as_ref().map(|r| &r.outputs)
    }
}

/// Why a node was not run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A dependency failed; `root` is the originating node
    UpstreamFailure { root: Urn },
    /// Execution was a dry run
    DryRun,
    /// The plan was not confirmed
    Declined,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpstreamFailure { root } => write!(f, "upstream resource {root} failed"),
            Self::DryRun => f.write_str("dry run"),
            Self::Declined => f.write_str("declined"),
        }
    }
}

/// Final status of one node, handed to progress callbacks
#[derive(Debug, Clone, Copy)]
pub enum NodeOutcome<'a> {
    Succeeded(&'a NodeResult),
    Failed(&'a NodeError),
    Skipped(&'a SkipReason),
}

/// Result of one apply: every planned node ends up in exactly one set
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub succeeded: BTreeMap<Urn, NodeResult>,
    pub failed: BTreeMap<Urn, NodeError>,
    pub skipped: BTreeMap<Urn, SkipReason>,
    /// Stack outputs that resolved
    pub exports: PropertyMap,
    /// Stack outputs that could not be resolved, with the reason
    pub unresolved_exports: BTreeMap<String, String>,
}

impl ApplyReport {
    /// True when nothing failed and nothing was cancelled
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
            && !self
                .skipped
                .values()
                .any(|r| matches!(r, SkipReason::UpstreamFailure { .. }))
    }

    /// URNs of every node with a final status
    pub fn urns(&self) -> BTreeSet<&Urn> {
        self.succeeded
            .keys()
            .chain(self.failed.keys())
            .chain(self.skipped.keys())
            .collect()
    }

    /// Outputs of a succeeded node
    pub fn outputs(&self, urn: &Urn) -> Option<&PropertyMap> {
        self.succeeded.get(urn).and_then(NodeResult::outputs)
    }

    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for result in self.succeeded.values() {
            match result.action {
                Action::Create => summary.created += 1,
                Action::Update => summary.updated += 1,
                Action::Delete => summary.deleted += 1,
                Action::NoOp => summary.unchanged += 1,
            }
        }
        summary.failed = self.failed.len();
        summary.skipped = self.skipped.len();
        summary
    }
}

/// Summary counts of an apply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of resources processed
    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted + self.unchanged + self.failed + self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urn_components() {
        let urn = Urn::new("dev", "kubernetes:core/v1:Namespace", "nginx-ns");
        assert_eq!(
            urn.as_str(),
            "urn:strata:dev::kubernetes:core/v1:Namespace::nginx-ns"
        );
        assert_eq!(urn.stack(), "dev");
        assert_eq!(urn.type_name(), "kubernetes:core/v1:Namespace");
        assert_eq!(urn.name(), "nginx-ns");
    }

    #[test]
    fn test_urn_parse() {
        let urn = Urn::new("dev", "eks:index:Cluster", "my-cluster");
        assert_eq!(Urn::parse(urn.as_str()), Some(urn));
        assert_eq!(Urn::parse("urn:strata:dev::only-type"), None);
        assert_eq!(Urn::parse("not-a-urn"), None);
    }

    #[test]
    fn test_delay_for_attempt() {
        let config = RetryConfig::new(5, Duration::from_secs(1), 2.0);
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(8));

        let capped = RetryConfig {
            max_delay: Duration::from_secs(3),
            ..config
        };
        assert_eq!(capped.delay_for_attempt(4), Duration::from_secs(3));
    }

    #[test]
    fn test_delay_never_negative() {
        let negative = RetryConfig::new(3, Duration::from_secs(1), -2.0);
        assert_eq!(negative.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(negative.delay_for_attempt(2), Duration::from_secs(4));

        let nan = RetryConfig::new(3, Duration::from_secs(1), f64::NAN);
        assert!(nan.delay_for_attempt(1) <= nan.max_delay);
    }

    #[test]
    fn test_summary_counts_actions() {
        let mut report = ApplyReport::default();
        let urn = |n: &str| Urn::new("s", "t", n);
        for (name, action) in [("a", Action::Create), ("b", Action::NoOp), ("c", Action::Delete)]
        {
            report.succeeded.insert(
                urn(name),
                NodeResult {
                    action,
                    record: None,
                    attempts: 1,
                },
            );
        }
        report.skipped.insert(urn("d"), SkipReason::DryRun);

        let summary = report.summary();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total_changes(), 2);
        assert!(report.is_success());
    }
}
