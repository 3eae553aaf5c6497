//! Named registry of loaded fusion runtimes.
//!
//! Replaces process-wide lazily initialized model handles with an explicit
//! object: callers ask for a runtime by key, and the registry owns loading
//! and invalidation. Entries are immutable `Arc<FusionRuntime>` handles, so a
//! handle obtained before [`ModelRegistry::invalidate`] keeps working until
//! it is dropped.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;

use emofuse_core::Result;

use crate::runtime::FusionRuntime;

/// Concurrent map from key to loaded runtime.
pub struct ModelRegistry {
    map: DashMap<String, Arc<FusionRuntime>>,
}

impl ModelRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// Return the runtime for `key`, loading it from `dir` on first use.
    ///
    /// Loading happens outside the map lock. If two callers race on the same
    /// key, the first insert wins and both receive that handle.
    pub fn get_or_load(&self, key: &str, dir: impl AsRef<Path>) -> Result<Arc<FusionRuntime>> {
        if let Some(entry) = self.map.get(key) {
            return Ok(Arc::clone(entry.value()));
        }
        let runtime = Arc::new(FusionRuntime::load(dir)?);
        let entry = self.map.entry(key.to_string()).or_insert(runtime);
        tracing::debug!(key, "Registered fusion runtime");
        Ok(Arc::clone(entry.value()))
    }

    pub fn get(&self, key: &str) -> Option<Arc<FusionRuntime>> {
        self.map.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Register an already-loaded runtime, returning the one it replaced.
    pub fn insert(&self, key: impl Into<String>, runtime: Arc<FusionRuntime>) -> Option<Arc<FusionRuntime>> {
        self.map.insert(key.into(), runtime)
    }

    /// Drop the entry for `key`. The next `get_or_load` reloads from disk.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.map.remove(key).is_some();
        if removed {
            tracing::info!(key, "Invalidated fusion runtime");
        }
        removed
    }

    pub fn clear(&self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.map.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
