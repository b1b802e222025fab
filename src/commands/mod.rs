// Program scaffolding
pub mod init;

// Stack lifecycle: preview, up, destroy, refresh, outputs
pub mod stack;

// State inspection
pub mod state;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};
use declarative::{FileStateStore, Graph, ProviderRegistry};

use crate::config::Program;
use crate::paths;
use crate::resource;
use crate::sandbox::SandboxProvider;

/// Package prefixes served by the sandbox provider
const SANDBOX_PACKAGES: [&str; 3] = ["eks:", "pulumi:providers:", "kubernetes:"];

/// A loaded program with its state store and providers
pub struct Stack {
    pub program: Program,
    pub store: FileStateStore,
    pub providers: ProviderRegistry,
}

impl Stack {
    /// Load the program found from the current directory
    pub fn open(file: Option<&str>) -> Result<Self> {
        let cwd = std::env::current_dir().context("Could not determine current directory")?;
        let state_dir = paths::state_dir()?;
        Self::open_in(file, &cwd, &state_dir)
    }

    /// Load the program found in `dir`, keeping state under `state_dir`
    pub fn open_in(file: Option<&str>, dir: &Path, state_dir: &Path) -> Result<Self> {
        let path = paths::find_program(file, dir)?;
        let program = Program::load(&path)?;
        log::info!("Loaded stack '{}' from {}", program.stack, path.display());

        let store = FileStateStore::new(paths::state_file(state_dir, &program.stack));
        let sandbox = SandboxProvider::open(
            &paths::sandbox_file(state_dir, &program.stack),
            program.settings.sandbox.clone(),
        )?;

        let sandbox = Arc::new(sandbox);
        let mut providers = ProviderRegistry::new();
        for package in SANDBOX_PACKAGES {
            providers.register_package(package, sandbox.clone());
        }

        Ok(Self {
            program,
            store,
            providers,
        })
    }

    pub fn stack_name(&self) -> &str {
        &self.program.stack
    }

    /// Declare the program into a graph
    pub fn graph(&self) -> Result<Graph> {
        self.program.graph(&resource::schemas())
    }
}
