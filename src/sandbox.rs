//! Sandbox provider - a local stand-in for the cloud and cluster APIs
//!
//! Objects live in memory behind a mutex and are mirrored to a JSON file
//! after every mutation, so separate `strata` runs see the same "remote"
//! system. Ids are derived from the URN, which keeps generated names and
//! addresses stable across runs.
//!
//! Failures can be injected through the `[settings.sandbox]` table.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use declarative::{Created, PropertyDiff, PropertyMap, Provider, ProviderError, Urn};
use serde::{Deserialize, Serialize};

use crate::resource::{ResourceKind, Site, namespace};

/// Namespaces every cluster starts with
const BUILTIN_NAMESPACES: [&str; 2] = ["default", "kube-system"];

/// Failure injection and capabilities of the sandbox
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxSettings {
    /// Whether LoadBalancer services get an ingress address
    pub load_balancers: bool,
    /// Logical names whose create and update fail
    pub fail: BTreeSet<String>,
    /// Transient failures injected before each operation succeeds
    pub transient_failures: u32,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            load_balancers: true,
            fail: BTreeSet::new(),
            transient_failures: 0,
        }
    }
}

/// One remote object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SandboxObject {
    #[serde(rename = "type")]
    type_name: String,
    /// Logical name of the resource that created it
    name: String,
    outputs: PropertyMap,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SandboxFile {
    objects: BTreeMap<String, SandboxObject>,
}

pub struct SandboxProvider {
    path: Option<PathBuf>,
    settings: SandboxSettings,
    objects: Mutex<BTreeMap<String, SandboxObject>>,
    /// Calls seen per operation and target, for transient injection
    attempts: Mutex<BTreeMap<String, u32>>,
}

impl SandboxProvider {
    /// Sandbox without a mirror file
    #[cfg(test)]
    pub fn in_memory(settings: SandboxSettings) -> Self {
        Self {
            path: None,
            settings,
            objects: Mutex::new(BTreeMap::new()),
            attempts: Mutex::new(BTreeMap::new()),
        }
    }

    /// Sandbox mirrored to `path`, loading any objects already there
    pub fn open(path: &Path, settings: SandboxSettings) -> Result<Self> {
        let objects = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read sandbox file: {}", path.display()))?;
            let file: SandboxFile = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse sandbox file: {}", path.display()))?;
            file.objects
        } else {
            BTreeMap::new()
        };
        log::debug!(
            "Opened sandbox {} with {} objects",
            path.display(),
            objects.len()
        );

        Ok(Self {
            path: Some(path.to_path_buf()),
            settings,
            objects: Mutex::new(objects),
            attempts: Mutex::new(BTreeMap::new()),
        })
    }

    /// Number of remote objects
    #[cfg(test)]
    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    /// Outputs of a remote object
    pub fn object(&self, id: &str) -> Option<PropertyMap> {
        lock(&self.objects).get(id).map(|o| o.outputs.clone())
    }

    fn id_for(kind: &ResourceKind, urn: &Urn) -> String {
        let hash = blake3::hash(urn.as_str().as_bytes());
        format!("{}-{}", kind.id_prefix(), &hash.to_hex()[..12])
    }

    fn site<'a>(&self, id: &'a str, name: &'a str) -> Site<'a> {
        Site {
            id,
            name,
            load_balancers: self.settings.load_balancers,
        }
    }

    /// Fail the first `transient_failures` calls of `op` on `target`
    fn inject_transient(&self, op: &str, target: &str) -> Result<(), ProviderError> {
        if self.settings.transient_failures == 0 {
            return Ok(());
        }
        let mut attempts = lock(&self.attempts);
        let seen = attempts.entry(format!("{op}:{target}")).or_insert(0);
        *seen += 1;
        if *seen <= self.settings.transient_failures {
            return Err(ProviderError::transient(format!(
                "sandbox: {op} of {target} timed out"
            )));
        }
        Ok(())
    }

    fn inject_failure(&self, op: &str, name: &str) -> Result<(), ProviderError> {
        if self.settings.fail.contains(name) {
            return Err(ProviderError::failed(format!(
                "sandbox: {op} of {name} rejected"
            )));
        }
        Ok(())
    }

    /// Namespaced objects need their namespace to exist
    fn check_namespace(
        objects: &BTreeMap<String, SandboxObject>,
        kind: &ResourceKind,
    ) -> Result<(), ProviderError> {
        let Some(wanted) = kind.namespace() else {
            return Ok(());
        };
        let exists = BUILTIN_NAMESPACES.contains(&wanted)
            || objects.values().any(|o| {
                o.type_name == namespace::TYPE
                    && o.outputs.get("name").and_then(serde_json::Value::as_str) == Some(wanted)
            });
        if exists {
            Ok(())
        } else {
            Err(ProviderError::invalid_inputs(format!(
                "namespace \"{wanted}\" not found"
            )))
        }
    }

    fn persist(&self, objects: &BTreeMap<String, SandboxObject>) -> Result<(), ProviderError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_mirror(path, objects)
            .map_err(|e| ProviderError::failed(format!("sandbox mirror: {e:#}")))
    }
}

fn write_mirror(path: &Path, objects: &BTreeMap<String, SandboxObject>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = SandboxFile {
        objects: objects.clone(),
    };
    let content = serde_json::to_string_pretty(&file).context("Failed to serialize sandbox")?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Provider for SandboxProvider {
    fn create(
        &self,
        type_name: &str,
        urn: &Urn,
        inputs: &PropertyMap,
    ) -> Result<Created, ProviderError> {
        let kind = ResourceKind::parse(type_name, inputs)?;
        let id = Self::id_for(&kind, urn);
        self.inject_transient("create", &id)?;
        self.inject_failure("create", urn.name())?;

        let mut objects = lock(&self.objects);
        Self::check_namespace(&objects, &kind)?;
        let outputs = kind.outputs(&self.site(&id, urn.name()))?;

        log::info!("sandbox: created {type_name} {id}");
        objects.insert(
            id.clone(),
            SandboxObject {
                type_name: kind.type_name().to_string(),
                name: urn.name().to_string(),
                outputs: outputs.clone(),
            },
        );
        self.persist(&objects)?;
        Ok(Created { id, outputs })
    }

    fn read(&self, _type_name: &str, id: &str) -> Result<PropertyMap, ProviderError> {
        self.inject_transient("read", id)?;
        self.object(id)
            .ok_or_else(|| ProviderError::NotFound { id: id.to_string() })
    }

    fn update(
        &self,
        type_name: &str,
        id: &str,
        diff: &PropertyDiff,
        inputs: &PropertyMap,
    ) -> Result<PropertyMap, ProviderError> {
        let kind = ResourceKind::parse(type_name, inputs)?;
        self.inject_transient("update", id)?;

        let mut objects = lock(&self.objects);
        let name = objects
            .get(id)
            .map(|o| o.name.clone())
            .ok_or_else(|| ProviderError::NotFound { id: id.to_string() })?;
        self.inject_failure("update", &name)?;
        Self::check_namespace(&objects, &kind)?;
        let outputs = kind.outputs(&self.site(id, &name))?;

        log::info!(
            "sandbox: updated {type_name} {id} ({})",
            diff.keys().cloned().collect::<Vec<_>>().join(", ")
        );
        if let Some(object) = objects.get_mut(id) {
            object.outputs = outputs.clone();
        }
        self.persist(&objects)?;
        Ok(outputs)
    }

    fn delete(&self, type_name: &str, id: &str) -> Result<(), ProviderError> {
        self.inject_transient("delete", id)?;

        let mut objects = lock(&self.objects);
        if objects.remove(id).is_none() {
            return Err(ProviderError::NotFound { id: id.to_string() });
        }
        log::info!("sandbox: deleted {type_name} {id}");
        self.persist(&objects)
    }
}
