//! The per-command-list incomplete state cache.
//!
//! A command list never mutates master resource state while it records.
//! Instead this cache captures, per touched resource, the state the list
//! *expects on entry* (its precondition) and the state it *leaves the
//! resource in* (its postcondition). At submit the backend compares the
//! precondition against the master state, synthesizes the bridging
//! barrier list, and writes the postcondition back as the new master.

use ash::vk;
use smallvec::SmallVec;

use arclight_hal::handle;
use arclight_hal::types::ResourceState;

#[derive(Copy, Clone, Debug)]
pub struct CacheEntry {
    pub resource: handle::Resource,
    /// State this command list expects the resource to already be in.
    pub required_initial: ResourceState,
    pub initial_dependency: vk::PipelineStageFlags,
    /// State the resource is in after the most recent transition.
    pub current: ResourceState,
    pub current_dependency: vk::PipelineStageFlags,
}

/// Flat map from resource to its pre/postcondition inside one list.
/// Transition commands are rare enough that linear search wins over
/// hashing at these sizes.
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

    /// Registers a transition of `resource` to `target`.
    ///
    /// Returns the known before-state and its stage dependency, or `None`
    /// on the first touch, in which case only the required-initial state
    /// is recorded and no barrier must be emitted (the implicit initial
    /// transition happens at submit).
    pub fn transition_resource(
        &mut self,
        resource: handle::Resource,
        target: ResourceState,
        target_dependency: vk::PipelineStageFlags,
    ) -> Option<(ResourceState, vk::PipelineStageFlags)> {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.resource == resource) {
            let before = (entry.current, entry.current_dependency);
            entry.current = target;
            entry.current_dependency = target_dependency;
            Some(before)
        } else {
            self.entries.push(CacheEntry {
                resource,
                required_initial: target,
                initial_dependency: target_dependency,
                current: target,
                current_dependency: target_dependency,
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
    fn first_touch_records_precondition_without_a_barrier() {
        let mut cache = IncompleteStateCache::new();
        let res = handle::Resource(1);

        // the list expects ShaderResource on entry
        let before = cache.transition_resource(
            res,
            ResourceState::ShaderResource,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        );
        assert!(before.is_none());

        let entry = &cache.entries()[0];
        assert_eq!(entry.required_initial, ResourceState::ShaderResource);
        assert_eq!(entry.current, ResourceState::ShaderResource);
    }

    #[test]
    fn later_transitions_update_only_the_postcondition() {
        let mut cache = IncompleteStateCache::new();
        let res = handle::Resource(1);

        cache.transition_resource(
            res,
            ResourceState::ShaderResource,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        );
        let before = cache
            .transition_resource(res, ResourceState::RenderTarget, vk::PipelineStageFlags::empty())
            .expect("second transition must know the before state");
        assert_eq!(before.0, ResourceState::ShaderResource);

        let entry = &cache.entries()[0];
        assert_eq!(entry.required_initial, ResourceState::ShaderResource);
        assert_eq!(entry.current, ResourceState::RenderTarget);
        assert_eq!(cache.entries().len(), 1);
    }

    #[test]
    fn distinct_resources_get_distinct_entries() {
        let mut cache = IncompleteStateCache::new();
        cache.transition_resource(
            handle::Resource(1),
            ResourceState::CopySrc,
            vk::PipelineStageFlags::empty(),
        );
        cache.transition_resource(
            handle::Resource(2),
            ResourceState::CopyDest,
            vk::PipelineStageFlags::empty(),
        );
        assert_eq!(cache.entries().len(), 2);
    }
}
