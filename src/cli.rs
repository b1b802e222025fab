use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "strata")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative resource orchestration - preview, apply and destroy stacks", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write an example program (EKS cluster running nginx) to strata.toml
    Init {
        /// Overwrite an existing strata.toml
        #[arg(long)]
        force: bool,
    },

    /// Show what an apply would change
    Preview(FileArgs),

    /// Apply the program: create, update and delete resources
    Up(UpArgs),

    /// Delete every resource recorded in state
    Destroy(DestroyArgs),

    /// Read every recorded resource back and update state
    Refresh(FileArgs),

    /// Print the stack outputs from state
    Outputs(OutputsArgs),

    /// Inspect the state file
    #[command(subcommand)]
    State(StateCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Stack Commands
// ============================================================================

#[derive(Args)]
pub struct FileArgs {
    /// Declaration file (default: ./strata.toml, then ./strata.json)
    #[arg(short, long)]
    pub file: Option<String>,
}

#[derive(Args)]
pub struct UpArgs {
    #[command(flatten)]
    pub program: FileArgs,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Maximum concurrent provider operations (0 = unbounded)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Dry run - show what would be done
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct DestroyArgs {
    #[command(flatten)]
    pub program: FileArgs,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct OutputsArgs {
    #[command(flatten)]
    pub program: FileArgs,

    /// Print outputs as JSON
    #[arg(long)]
    pub json: bool,
}

// ============================================================================
// State Commands
// ============================================================================

#[derive(Subcommand)]
pub enum StateCommand {
    /// List recorded resources
    List(FileArgs),

    /// Show one recorded resource
    Show {
        /// URN or logical name
        resource: String,

        #[command(flatten)]
        program: FileArgs,
    },
}
