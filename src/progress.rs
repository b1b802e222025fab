//! Progress indicators for strata CLI.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str = "{spinner:.green} {prefix:.bold} [{bar:30.cyan/blue}] {pos}/{len} {msg}";

/// Bar counting settled resources
pub fn bar(len: u64, prefix: &str) -> ProgressBar {
    let style = ProgressStyle::with_template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    let pb = ProgressBar::new(len)
        .with_style(style)
        .with_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Spinner for a single long step
pub fn spinner(msg: &str) -> ProgressBar {
    let style = ProgressStyle::with_template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let pb = ProgressBar::new_spinner()
        .with_style(style)
        .with_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
