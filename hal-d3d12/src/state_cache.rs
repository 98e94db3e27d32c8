//! The per-command-list incomplete state cache (no stage dependencies on
//! this API; the resource-state bitmask carries everything).

use smallvec::SmallVec;

use arclight_hal::handle;
use arclight_hal::types::ResourceState;

#[derive(Copy, Clone, Debug)]
pub struct CacheEntry {
    pub resource: handle::Resource,
    /// State this command list expects the resource to already be in.
    pub required_initial: ResourceState,
    /// State the resource is in after the most recent transition.
    pub current: ResourceState,
}

#[derive(Default)]
pub struct IncompleteStateCache {
    entries: SmallVec<[CacheEntry; 16]>,
}

impl IncompleteStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Registers a transition to `target`; returns the known before-state
    /// or `None` on first touch (no barrier yet, the implicit initial
    /// transition is synthesized at submit).
    pub fn transition_resource(
        &mut self,
        resource: handle::Resource,
        target: ResourceState,
    ) -> Option<ResourceState> {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.resource == resource) {
            let before = entry.current;
            entry.current = target;
            Some(before)
        } else {
            self.entries.push(CacheEntry {
                resource,
                required_initial: target,
                current: target,
            });
            None
        }
    }

    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_pre_and_postconditions() {
        let mut cache = IncompleteStateCache::new();
        let res = handle::Resource(9);

        assert!(cache
            .transition_resource(res, ResourceState::CopyDest)
            .is_none());
        assert_eq!(
            cache.transition_resource(res, ResourceState::ShaderResource),
            Some(ResourceState::CopyDest)
        );

        let entry = &cache.entries()[0];
        assert_eq!(entry.required_initial, ResourceState::CopyDest);
        assert_eq!(entry.current, ResourceState::ShaderResource);
    }
}
