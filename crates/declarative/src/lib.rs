//! # Declarative
//!
//! A declarative resource orchestration engine.
//!
//! Programs declare typed resources whose inputs may reference outputs of
//! other resources. The engine builds a dependency graph, diffs it against
//! the last-applied state, and converges the remote system through provider
//! bridges, running independent operations concurrently.
//!
//! ## Core Concepts
//!
//! - **DeclarationContext**: Collects declarations for one stack, validating
//!   them against a [`SchemaRegistry`]
//! - **Graph**: The frozen DAG of resource nodes and their output cells
//! - **Plan**: Create / update / delete / no-op entries against prior state
//! - **Executor**: Runs a plan on a bounded worker pool in dependency order
//! - **Provider**: The remote API behind each resource type
//! - **StateStore**: Persists last-applied state between runs
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     DeclarationContext, ExecuteOptions, FileStateStore, Graph, ProviderRegistry,
//!     apply_simple,
//! };
//!
//! let mut ctx = DeclarationContext::new("dev");
//! let ns = ctx
//!     .resource("kubernetes:core/v1:Namespace", "nginx-ns")
//!     .declare()?;
//! ctx.resource("kubernetes:apps/v1:Deployment", "nginx")
//!     .input_ref("namespace", ns.output("name"))
//!     .input("image", "nginx:latest")
//!     .input("replicas", 2)
//!     .declare()?;
//!
//! let graph = Graph::from_context(ctx)?;
//! let mut providers = ProviderRegistry::new();
//! providers.register_package("kubernetes:", my_provider);
//!
//! let store = FileStateStore::new("dev.json");
//! let report = apply_simple(&graph, &store, &providers, &ExecuteOptions::default())?;
//! assert!(report.is_success());
//! ```
//!
//! ## Injection Traits
//!
//! - [`Provider`]: Remote CRUD for one or more resource types
//! - [`StateStore`]: Snapshot persistence
//! - [`ProgressCallback`]: Receives progress updates
//! - [`ConfirmCallback`]: Decides whether a plan is carried out
//!
//! This allows the crate to be used without hard dependencies on specific
//! cloud SDKs, UI frameworks or storage backends.

pub mod context;
pub mod deploy;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod output;
pub mod planner;
pub mod provider;
pub mod retry;
pub mod schema;
pub mod state;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types at crate root
pub use context::{
    AutoConfirm, AutoDecline, ConfirmCallback, Declaration, DeclarationContext, NoProgress,
    ProgressCallback, ResourceBuilder, ResourceHandle, validate_stack_name,
};
pub use deploy::{RefreshReport, apply, apply_simple, destroy, preview, refresh};
pub use diff::{DiffSummary, group_by_type, property_diff};
pub use error::{DanglingReason, Error, ErrorKind, NodeError, ProviderError, Result};
pub use executor::execute;
pub use graph::{Graph, GraphBuilder, ResourceNode};
pub use output::{CellState, OutputCell, OutputTable};
pub use planner::{Change, Diff, Plan, PlanEntry, Planned, plan};
pub use provider::{Created, Provider, ProviderRegistry};
pub use retry::{LogCallback, NoCallback, RetryCallback, with_retry};
pub use schema::{FieldKind, FieldSpec, ResourceSchema, SchemaRegistry};
pub use state::{FileStateStore, MemoryStateStore, STATE_VERSION, StateRecord, StateSnapshot, StateStore};
pub use types::{
    Action, ApplyReport, ExecuteOptions, ExecuteSummary, Input, NodeOutcome, NodeResult,
    OutputRef, PropertyDiff, PropertyMap, RetryConfig, SkipReason, Urn, Value, ValueChange,
};
