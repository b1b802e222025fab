//! Terminal front end for the orchestration engine
//!
//! The engine itself lives in the `declarative` crate. This module renders
//! plans and reports and supplies the interactive callbacks:
//! 1. Differ - Plan display with per-field diffs
//! 2. Executor - Confirmation prompt, progress bar and the final report

pub mod differ;
pub mod executor;

pub use differ::display_plan;
pub use executor::{BarProgress, Prompt, print_report};
