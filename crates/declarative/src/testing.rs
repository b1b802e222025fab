//! In-memory provider used by the engine tests

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use serde_json::json;

use crate::error::ProviderError;
use crate::provider::{Created, Provider};
use crate::types::{PropertyDiff, PropertyMap, Urn};

/// Start and end ticks of one provider call on a shared logical clock
#[derive(Debug, Clone, Copy)]
pub(crate) struct Span {
    pub start: u64,
    pub end: u64,
}

/// Provider keeping objects in a map, keyed by URN string as id.
///
/// Outputs echo the inputs, plus `id` and a `name` defaulting to the logical
/// name.
#[derive(Default)]
pub(crate) struct MockProvider {
    objects: Mutex<BTreeMap<String, PropertyMap>>,
    fail: BTreeSet<String>,
    transient: Mutex<BTreeMap<String, u32>>,
    calls: Mutex<Vec<(String, String)>>,
    clock: AtomicU64,
    spans: Mutex<BTreeMap<String, Span>>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and updates of `name` fail fatally
    pub fn failing(mut self, name: &str) -> Self {
        self.fail.insert(name.to_string());
        self
    }

    /// The first `count` operations on `name` fail with a transient error
    pub fn flaky(self, name: &str, count: u32) -> Self {
        self.transient
            .lock()
            .unwrap()
            .insert(name.to_string(), count);
        self
    }

    /// Every call sleeps this long, to make concurrency observable
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// (operation, logical name) in call order
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than reads
    pub fn mutations(&self) -> usize {
        self.calls().iter().filter(|(op, _)| op != "read").count()
    }

    /// Most calls that were ever inside the provider at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn spans(&self) -> BTreeMap<String, Span> {
        self.spans.lock().unwrap().clone()
    }

    pub fn object(&self, id: &str) -> Option<PropertyMap> {
        self.objects.lock().unwrap().get(id).cloned()
    }

    /// Change a stored output behind the engine's back
    pub fn tamper(&self, id: &str, key: &str, value: serde_json::Value) {
        if let Some(outputs) = self.objects.lock().unwrap().get_mut(id) {
            outputs.insert(key.to_string(), value);
        }
    }

    pub fn forget(&self, id: &str) {
        self.objects.lock().unwrap().remove(id);
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    /// Record the call and apply injected failures
    fn enter(&self, op: &str, id: &str) -> Result<(String, u64), ProviderError> {
        let start = self.tick();
        let name = Urn::parse(id)
            .map(|u| u.name().to_string())
            .unwrap_or_else(|| id.to_string());
        self.calls
            .lock()
            .unwrap()
            .push((op.to_string(), name.clone()));
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(remaining) = self.transient.lock().unwrap().get_mut(&name)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(ProviderError::transient("connection reset"));
        }
        if op != "delete" && op != "read" && self.fail.contains(&name) {
            return Err(ProviderError::failed(format!("{op} of {name} rejected")));
        }
        Ok((name, start))
    }

    fn leave(&self, name: String, start: u64) {
        let end = self.tick();
        self.spans.lock().unwrap().insert(name, Span { start, end });
    }

    fn outputs(name: &str, id: &str, inputs: &PropertyMap) -> PropertyMap {
        let mut outputs = inputs.clone();
        outputs.insert("id".into(), json!(id));
        outputs.entry("name".into()).or_insert_with(|| json!(name));
        outputs
    }
}

impl Provider for MockProvider {
    fn create(
        &self,
        _type_name: &str,
        urn: &Urn,
        inputs: &PropertyMap,
    ) -> Result<Created, ProviderError> {
        let id = urn.to_string();
        let (name, start) = self.enter("create", &id)?;
        let outputs = Self::outputs(&name, &id, inputs);
        self.objects
            .lock()
            .unwrap()
            .insert(id.clone(), outputs.clone());
        self.leave(name, start);
        Ok(Created { id, outputs })
    }

    fn read(&self, _type_name: &str, id: &str) -> Result<PropertyMap, ProviderError> {
        let (name, start) = self.enter("read", id)?;
        let outputs = self.object(id).ok_or_else(|| ProviderError::NotFound { id: id.into() });
        self.leave(name, start);
        outputs
    }

    fn update(
        &self,
        _type_name: &str,
        id: &str,
        _diff: &PropertyDiff,
        inputs: &PropertyMap,
    ) -> Result<PropertyMap, ProviderError> {
        let (name, start) = self.enter("update", id)?;
        let outputs = Self::outputs(&name, id, inputs);
        self.objects
            .lock()
            .unwrap()
            .insert(id.to_string(), outputs.clone());
        self.leave(name, start);
        Ok(outputs)
    }

    fn delete(&self, _type_name: &str, id: &str) -> Result<(), ProviderError> {
        let (name, start) = self.enter("delete", id)?;
        let removed = self.objects.lock().unwrap().remove(id);
        self.leave(name, start);
        removed
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound { id: id.into() })
    }
}
