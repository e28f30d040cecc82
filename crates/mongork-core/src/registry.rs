//! Step registry: the set of known migration steps, keyed by version.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::error::{Error, Result};
use crate::traits::Step;
use crate::version::validate_version;

/// Shared step handle.
pub type StepRef<D> = Arc<dyn Step<D>>;

/// Registry for managing available migration steps.
///
/// Safe to share across threads; all reads return snapshots.
pub struct StepRegistry<D: Send + Sync> {
    steps: RwLock<BTreeMap<String, StepRef<D>>>,
}

impl<D: Send + Sync> Default for StepRegistry<D> {
    fn default() -> Self {
        Self {
            steps: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<D: Send + Sync> StepRegistry<D> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from many steps, stopping at the first rejected one.
    pub fn from_steps<I>(steps: I) -> Result<Self>
    where
        I: IntoIterator<Item = StepRef<D>>,
    {
        let registry = Self::new();
        for step in steps {
            registry.register(step)?;
        }
        Ok(registry)
    }

    /// Register a step.
    pub fn register(&self, step: StepRef<D>) -> Result<()> {
        let version = step.version().to_string();
        validate_version(&version)?;

        let mut steps = self.write();
        if steps.contains_key(&version) {
            return Err(Error::DuplicateVersion(version));
        }
        debug!(version = %version, description = step.description(), "Registered migration");
        steps.insert(version, step);
        Ok(())
    }

    /// Snapshot of every registered step, ordered by version.
    pub fn all_registered(&self) -> BTreeMap<String, StepRef<D>> {
        self.read().clone()
    }

    /// Snapshot restricted to steps matching `predicate`.
    pub fn select<F>(&self, predicate: F) -> BTreeMap<String, StepRef<D>>
    where
        F: Fn(&str, &dyn Step<D>) -> bool,
    {
        self.read()
            .iter()
            .filter(|(version, step)| predicate(version.as_str(), step.as_ref()))
            .map(|(version, step)| (version.clone(), Arc::clone(step)))
            .collect()
    }

    /// Registered versions, ascending.
    pub fn versions(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn get(&self, version: &str) -> Option<StepRef<D>> {
        self.read().get(version).cloned()
    }

    pub fn contains(&self, version: &str) -> bool {
        self.read().contains_key(version)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // No write leaves the map half-updated, so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, StepRef<D>>> {
        self.steps.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, StepRef<D>>> {
        self.steps.write().unwrap_or_else(|e| e.into_inner())
    }
}
