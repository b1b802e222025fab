//! Centralized path resolution for strata
//!
//! # Environment Variables
//!
//! - `STRATA_STATE_DIR` - Override state directory
//!
//! # Path Resolution Priority
//!
//! For state_dir():
//! 1. `STRATA_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/strata` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\strata`
//!    - macOS/Linux: `~/.local/state/strata`
//!
//! Every stack keeps its last-applied state in `<state_dir>/<stack>.json`
//! and the sandbox provider mirrors its remote objects to
//! `<state_dir>/sandbox/<stack>.json`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "STRATA_STATE_DIR";

/// Declaration file names, in lookup order
pub const PROGRAM_FILES: [&str; 2] = ["strata.toml", "strata.json"];

/// Get the strata state directory path
///
/// Priority:
/// 1. `STRATA_STATE_DIR` env var
/// 2. `XDG_STATE_HOME/strata`
/// 3. Platform default
pub fn state_dir() -> Result<PathBuf> {
    // 1. Check environment variable override
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    // 2. Check XDG_STATE_HOME
    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("strata");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    // 3. Platform default
    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join("strata");
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("strata");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// State file of a stack
pub fn state_file(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(format!("{stack}.json"))
}

/// Sandbox mirror of a stack's remote objects
pub fn sandbox_file(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join("sandbox").join(format!("{stack}.json"))
}

/// Locate the declaration file.
///
/// An explicit path wins and must exist. Otherwise `strata.toml` and then
/// `strata.json` are looked up in `dir`.
pub fn find_program(explicit: Option<&str>, dir: &Path) -> Result<PathBuf> {
    if let Some(file) = explicit {
        let path = expand(file);
        anyhow::ensure!(
            path.is_file(),
            "Declaration file not found: {}",
            path.display()
        );
        return Ok(path);
    }

    PROGRAM_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .with_context(|| {
            format!(
                "No strata.toml or strata.json in {} (run 'strata init' to create one)",
                dir.display()
            )
        })
}

/// Expand ~ and environment variables in a path string.
///
/// This is the canonical path expansion function for strata. All modules
/// should use this instead of calling shellexpand directly.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::TempDir;

    /// Helper to run a test with temporary env var
    ///
    /// # Safety
    /// This function uses unsafe env::set_var/remove_var which can cause issues
    /// if other threads read environment variables concurrently.
    /// Only use in single-threaded test contexts.
    fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: Tests run in isolation and don't read env vars concurrently
        unsafe { env::set_var(key, value) };
        let result = f();
        match original {
            // SAFETY: Tests run in isolation
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    #[test]
    fn test_state_dir_env_override() {
        with_env_var(ENV_STATE_DIR, "/custom/state/path", || {
            let result = state_dir().unwrap();
            assert_eq!(result, PathBuf::from("/custom/state/path"));
        });
    }

    #[test]
    fn test_stack_files() {
        let dir = Path::new("/var/strata");
        assert_eq!(state_file(dir, "dev"), PathBuf::from("/var/strata/dev.json"));
        assert_eq!(
            sandbox_file(dir, "dev"),
            PathBuf::from("/var/strata/sandbox/dev.json")
        );
    }

    #[test]
    fn test_find_program_prefers_toml() {
        let dir = TempDir::new().unwrap();
        assert!(find_program(None, dir.path()).is_err());

        std::fs::write(dir.path().join("strata.json"), "{}").unwrap();
        assert_eq!(
            find_program(None, dir.path()).unwrap(),
            dir.path().join("strata.json")
        );

        std::fs::write(dir.path().join("strata.toml"), "").unwrap();
        assert_eq!(
            find_program(None, dir.path()).unwrap(),
            dir.path().join("strata.toml")
        );
    }

    #[test]
    fn test_find_program_explicit() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("stack.toml");
        let explicit = file.to_string_lossy().to_string();
        assert!(find_program(Some(&explicit), dir.path()).is_err());

        std::fs::write(&file, "").unwrap();
        assert_eq!(find_program(Some(&explicit), dir.path()).unwrap(), file);
    }

    #[test]
    fn test_expand_absolute() {
        let result = expand("/absolute/path");
        assert_eq!(result, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_with_env_var() {
        with_env_var("STRATA_TEST_VAR", "test_value", || {
            let result = expand("/path/$STRATA_TEST_VAR/file");
            assert_eq!(result, PathBuf::from("/path/test_value/file"));
        });
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        // Unknown env vars are left as-is by shellexpand::full
        let result = expand("/path/$NONEXISTENT_VAR_12345/file");
        assert_eq!(result, PathBuf::from("/path/$NONEXISTENT_VAR_12345/file"));
    }
}
