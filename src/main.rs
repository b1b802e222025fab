mod cli;
mod commands;
mod config;
mod engine;
mod paths;
mod progress;
mod resource;
mod sandbox;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };
    log::debug!("Verbosity {}", ctx.verbose);

    match cli.command {
        Command::Init { force } => commands::init::run(&ctx, force),
        Command::Preview(args) => commands::stack::preview(&ctx, args),
        Command::Up(args) => commands::stack::up(&ctx, args),
        Command::Destroy(args) => commands::stack::destroy(&ctx, args),
        Command::Refresh(args) => commands::stack::refresh(&ctx, args),
        Command::Outputs(args) => commands::stack::outputs(&ctx, args),
        Command::State(cmd) => commands::state::run(&ctx, cmd),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "strata", &mut io::stdout());
            Ok(())
        }
    }
}
