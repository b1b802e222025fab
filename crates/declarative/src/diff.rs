//! Plan summaries and grouping for display

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::planner::{Plan, PlanEntry, Planned};
use crate::types::{Action, PropertyDiff, PropertyMap, ValueChange};

/// Properties whose value differs between `old` and `new`
pub fn property_diff(old: &PropertyMap, new: &PropertyMap) -> PropertyDiff {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    keys.into_iter()
        .filter(|key| old.get(*key) != new.get(*key))
        .map(|key| {
            (
                key.clone(),
                ValueChange {
                    old: old.get(key).cloned(),
                    new: new.get(key).cloned(),
                },
            )
        })
        .collect()
}

impl fmt::Display for Planned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("(absent)"),
            Self::Known(value) => write!(f, "{value}"),
            Self::Computed => f.write_str("(known after apply)"),
        }
    }
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Number of resources to create
    pub additions: usize,
    /// Number of resources to delete
    pub removals: usize,
    /// Number of resources to update
    pub modifications: usize,
    pub unchanged: usize,
    /// Entries that will fail without running
    pub invalid: usize,
}

impl DiffSummary {
    pub fn from_plan(plan: &Plan) -> Self {
        let mut summary = Self {
            invalid: plan.invalid().len(),
            ..Self::default()
        };
        for entry in plan.entries() {
            match entry.action {
                Action::Create => summary.additions += 1,
                Action::Delete => summary.removals += 1,
                Action::Update => summary.modifications += 1,
                Action::NoOp => summary.unchanged += 1,
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.removals + self.modifications
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group changing entries by resource type, keeping plan order within a group
pub fn group_by_type(plan: &Plan) -> BTreeMap<&str, Vec<&PlanEntry>> {
    let mut groups: BTreeMap<&str, Vec<&PlanEntry>> = BTreeMap::new();
    for entry in plan.entries().iter().filter(|e| e.action.is_change()) {
        groups.entry(entry.type_name.as_str()).or_default().push(entry);
    }
    groups
}
