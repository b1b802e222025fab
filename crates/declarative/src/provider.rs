//! Provider bridge - abstract CRUD translated into remote API calls

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::types::{PropertyDiff, PropertyMap, Urn};

/// Result of a successful create
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    /// Provider-assigned id, used for every later operation
    pub id: String,
    pub outputs: PropertyMap,
}

/// Remote API for one or more resource types.
///
/// Operations for independent resources may run concurrently. The executor
/// never issues two operations for the same resource at once.
pub trait Provider: Send + Sync {
    /// Create the remote object
    fn create(
        &self,
        type_name: &str,
        urn: &Urn,
        inputs: &PropertyMap,
    ) -> Result<Created, ProviderError>;

    /// Read current outputs of an existing object
    fn read(&self, type_name: &str, id: &str) -> Result<PropertyMap, ProviderError>;

    /// Apply changed inputs; `inputs` is the full new input set
    fn update(
        &self,
        type_name: &str,
        id: &str,
        diff: &PropertyDiff,
        inputs: &PropertyMap,
    ) -> Result<PropertyMap, ProviderError>;

    /// Delete the remote object
    fn delete(&self, type_name: &str, id: &str) -> Result<(), ProviderError>;
}

/// Providers keyed by resource type.
///
/// Lookup tries the exact type first, then the longest registered package
/// prefix such as `kubernetes:`.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    by_type: BTreeMap<String, Arc<dyn Provider>>,
    by_package: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for one exact resource type
    pub fn register_type(&mut self, type_name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.by_type.insert(type_name.into(), provider);
    }

    /// Register a provider for every type whose name starts with `prefix`
    pub fn register_package(&mut self, prefix: impl Into<String>, provider: Arc<dyn Provider>) {
        self.by_package.insert(prefix.into(), provider);
    }

    pub fn get(&self, type_name: &str) -> Option<&dyn Provider> {
        if let Some(provider) = self.by_type.get(type_name) {
            return Some(&**provider);
        }
        self.by_package
            .iter()
            .filter(|(prefix, _)| type_name.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, provider)| &**provider)
    }

    /// Provider for a type, or `Unsupported`
    pub fn resolve(&self, type_name: &str) -> Result<&dyn Provider, ProviderError> {
        self.get(type_name).ok_or_else(|| ProviderError::Unsupported {
            type_name: type_name.to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty() && self.by_package.is_empty()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("types", &self.by_type.keys().collect::<Vec<_>>())
            .field("packages", &self.by_package.keys().collect::<Vec<_>>())
            .finish()
    }
}
