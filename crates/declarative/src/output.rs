//! Output cells - single-assignment values produced by resource operations
//!
//! A cell starts `Pending`, and is written exactly once by the executor after
//! the owning resource's operation completes: `Resolved` with the value, or
//! `Failed` with the URN of the node that caused the failure. Readers either
//! peek at the current state or block in [`OutputCell::wait`].

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{OutputRef, PropertyMap, Urn, Value};

/// Lifecycle of an output cell
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellState {
    #[default]
    Pending,
    Resolved(Value),
    Failed { root: Urn },
}

#[derive(Debug, Default)]
struct Slot {
    state: Mutex<CellState>,
    written: Condvar,
}

/// A deferred output value shared between its writer and its readers
#[derive(Debug, Clone)]
pub struct OutputCell {
    owner: Urn,
    property: String,
    slot: Arc<Slot>,
}

impl OutputCell {
    pub fn new(owner: Urn, property: impl Into<String>) -> Self {
        Self {
            owner,
            property: property.into(),
            slot: Arc::default(),
        }
    }

    pub fn owner(&self) -> &Urn {
        &self.owner
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    /// Snapshot of the current state
    pub fn state(&self) -> CellState {
        self.slot
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state(), CellState::Pending)
    }

    /// Write the resolved value
    pub fn resolve(&self, value: Value) -> Result<()> {
        self.write(CellState::Resolved(value))
    }

    /// Mark the cell failed, naming the node that caused the failure
    pub fn fail(&self, root: Urn) -> Result<()> {
        self.write(CellState::Failed { root })
    }

    fn write(&self, next: CellState) -> Result<()> {
        let mut state = self
            .slot
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !matches!(*state, CellState::Pending) {
            return Err(Error::CellAlreadyWritten {
                owner: self.owner.clone(),
                property: self.property.clone(),
            });
        }
        *state = next;
        self.slot.written.notify_all();
        Ok(())
    }

    /// Block until the cell is written.
    ///
    /// Returns the value, or the URN of the node whose failure left the cell
    /// unresolved.
    pub fn wait(&self) -> std::result::Result<Value, Urn> {
        let guard = self
            .slot
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let state = self
            .slot
            .written
            .wait_while(guard, |s| matches!(s, CellState::Pending))
            .unwrap_or_else(PoisonError::into_inner);
        self.settled(&state)
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning None.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<std::result::Result<Value, Urn>> {
        let guard = self
            .slot
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (state, result) = self
            .slot
            .written
            .wait_timeout_while(guard, timeout, |s| matches!(s, CellState::Pending))
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() {
            return None;
        }
        Some(self.settled(&state))
    }

    fn settled(&self, state: &CellState) -> std::result::Result<Value, Urn> {
        match state {
            CellState::Resolved(value) => Ok(value.clone()),
            CellState::Failed { root } => Err(root.clone()),
            // wait_while only returns once the state left Pending
            CellState::Pending => Err(self.owner.clone()),
        }
    }
}

/// All output cells of a graph, keyed by owner and property
#[derive(Debug, Clone, Default)]
pub struct OutputTable {
    cells: BTreeMap<Urn, BTreeMap<String, OutputCell>>,
}

impl OutputTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the cell for a reference
    pub fn register(&mut self, output: &OutputRef) -> OutputCell {
        self.cells
            .entry(output.owner.clone())
            .or_default()
            .entry(output.property.clone())
            .or_insert_with(|| OutputCell::new(output.owner.clone(), output.property.clone()))
            .clone()
    }

    pub fn get(&self, output: &OutputRef) -> Option<&OutputCell> {
        self.cells
            .get(&output.owner)
            .and_then(|props| props.get(&output.property))
    }

    /// Cells owned by a node
    pub fn cells_of<'a>(&'a self, owner: &Urn) -> impl Iterator<Item = &'a OutputCell> + 'a {
        self.cells.get(owner).into_iter().flat_map(BTreeMap::values)
    }

    /// Resolve every registered cell of `owner` from its outputs.
    ///
    /// A registered property missing from `outputs` fails its cell with the
    /// owner as root. Returns the names of the missing properties.
    pub fn resolve_owner(&self, owner: &Urn, outputs: &PropertyMap) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for cell in self.cells_of(owner) {
            match outputs.get(cell.property()) {
                Some(value) => cell.resolve(value.clone())?,
                None => {
                    cell.fail(owner.clone())?;
                    missing.push(cell.property().to_string());
                }
            }
        }
        Ok(missing)
    }

    /// Fail every registered cell of `owner`
    pub fn fail_owner(&self, owner: &Urn, root: &Urn) -> Result<()> {
        for cell in self.cells_of(owner) {
            cell.fail(root.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;

    fn urn(name: &str) -> Urn {
        Urn::new("test", "test:index:Thing", name)
    }

    #[test]
    fn test_cell_single_assignment() {
        let cell = OutputCell::new(urn("a"), "name");
        assert!(cell.is_pending());

        cell.resolve(json!("nginx-ns")).unwrap();
        assert_eq!(cell.state(), CellState::Resolved(json!("nginx-ns")));

        let second = cell.resolve(json!("other"));
        assert!(matches!(second, Err(Error::CellAlreadyWritten { .. })));
        assert!(cell.fail(urn("a")).is_err());
        assert_eq!(cell.state(), CellState::Resolved(json!("nginx-ns")));
    }

    #[test]
    fn test_wait_blocks_until_resolved() {
        let cell = OutputCell::new(urn("a"), "ip");
        let reader = cell.clone();

        let handle = thread::spawn(move || reader.wait());
        thread::sleep(Duration::from_millis(20));
        cell.resolve(json!("10.0.0.1")).unwrap();

        assert_eq!(handle.join().unwrap(), Ok(json!("10.0.0.1")));
    }

    #[test]
    fn test_wait_reports_failure_root() {
        let cell = OutputCell::new(urn("b"), "ip");
        cell.fail(urn("a")).unwrap();
        assert_eq!(cell.wait(), Err(urn("a")));
    }

    #[test]
    fn test_wait_timeout_on_pending() {
        let cell = OutputCell::new(urn("a"), "ip");
        assert_eq!(cell.wait_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_table_resolve_owner_reports_missing() {
        let mut table = OutputTable::new();
        let name = OutputRef::new(urn("ns"), "name");
        let uid = OutputRef::new(urn("ns"), "uid");
        table.register(&name);
        table.register(&uid);
        // registering twice hands back the same cell
        let again = table.register(&name);

        let outputs = PropertyMap::from([("name".to_string(), json!("nginx-ns"))]);
        let missing = table.resolve_owner(&urn("ns"), &outputs).unwrap();

        assert_eq!(missing, vec!["uid".to_string()]);
        assert_eq!(again.state(), CellState::Resolved(json!("nginx-ns")));
        assert_eq!(
            table.get(&uid).unwrap().state(),
            CellState::Failed { root: urn("ns") }
        );
    }
}
