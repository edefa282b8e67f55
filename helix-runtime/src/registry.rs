//! # Liveness Registry
//!
//! Process-wide record of which regions are currently live. A region
//! registers itself on entry and unregisters on exit, before its frames are
//! released. Fat pointers consult the registry before every checked
//! dereference, which turns a use-after-exit into a reported
//! [`RuntimeError::UseAfterExit`] instead of a read of freed storage.
//!
//! Region ids are never reused, so a removed id stays dead forever and the
//! id alone acts as the generation tag.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::error::{RuntimeError, RuntimeResult};
use crate::ordering::{Depth, RegionHandle, RegionId};

/// Entry for one live region.
#[derive(Debug, Clone, Copy)]
pub struct LiveEntry {
    /// Nesting depth of the region.
    pub depth: Depth,
}

/// Registry of live regions.
pub struct LivenessRegistry {
    live: RwLock<HashMap<RegionId, LiveEntry>>,
}

impl LivenessRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            live: RwLock::new(HashMap::new()),
        }
    }

    /// Record a region as live.
    pub fn register(&self, handle: RegionHandle) {
        let entry = LiveEntry {
            depth: handle.depth(),
        };
        self.live.write().insert(handle.id(), entry);
    }

    /// Record a region as exited.
    ///
    /// Returns `false` if the region was not live.
    pub fn unregister(&self, id: RegionId) -> bool {
        self.live.write().remove(&id).is_some()
    }

    /// Check whether a region is live.
    pub fn is_live(&self, id: RegionId) -> bool {
        self.live.read().contains_key(&id)
    }

    /// Look up a live region's entry.
    pub fn get(&self, id: RegionId) -> Option<LiveEntry> {
        self.live.read().get(&id).copied()
    }

    /// Fail with [`RuntimeError::UseAfterExit`] unless the region is live.
    pub fn validate(&self, id: RegionId) -> RuntimeResult<()> {
        if self.is_live(id) {
            Ok(())
        } else {
            Err(RuntimeError::UseAfterExit { region: id })
        }
    }

    /// Number of live regions.
    pub fn len(&self) -> usize {
        self.live.read().len()
    }

    /// Check if no region is live.
    pub fn is_empty(&self) -> bool {
        self.live.read().is_empty()
    }
}

impl Default for LivenessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LivenessRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LivenessRegistry")
            .field("live_regions", &self.len())
            .finish()
    }
}

/// Global liveness registry instance.
static LIVENESS_REGISTRY: OnceLock<LivenessRegistry> = OnceLock::new();

/// Get the global liveness registry.
pub fn liveness_registry() -> &'static LivenessRegistry {
    LIVENESS_REGISTRY.get_or_init(LivenessRegistry::new)
}

/// Check whether a region is live in the global registry.
pub fn is_live(id: RegionId) -> bool {
    liveness_registry().is_live(id)
}

/// Validate a region id against the global registry.
pub fn validate_live(id: RegionId) -> RuntimeResult<()> {
    liveness_registry().validate(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordering::next_region_id;

    #[test]
    fn test_register_unregister() {
        let registry = LivenessRegistry::new();
        let handle = RegionHandle::new(next_region_id(), 2);

        assert!(!registry.is_live(handle.id()));
        registry.register(handle);
        assert!(registry.is_live(handle.id()));
        assert_eq!(registry.get(handle.id()).map(|e| e.depth), Some(2));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(handle.id()));
        assert!(!registry.is_live(handle.id()));
        assert!(!registry.unregister(handle.id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_validate() {
        let registry = LivenessRegistry::new();
        let handle = RegionHandle::new(next_region_id(), 0);
        registry.register(handle);
        assert!(registry.validate(handle.id()).is_ok());

        registry.unregister(handle.id());
        assert_eq!(
            registry.validate(handle.id()),
            Err(RuntimeError::UseAfterExit { region: handle.id() })
        );
    }
}
