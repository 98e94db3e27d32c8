//! In-place descriptor-set patching.
//!
//! Vulkan has no root-descriptor CBVs, so every shader-argument slot maps
//! to two descriptor sets: one for SRV/UAV/samplers and one holding the
//! single dynamic CBV, shifted up by the shader-argument count. The
//! binding-range offsets are produced at shader compile time, but the set
//! shift cannot be, so it is applied here post-compile by rewriting the
//! DescriptorSet decoration literal of every uniform-buffer descriptor.
//! A set shift never changes instruction sizes, so the module is patched
//! word-in-place.

use crate::module::Module;
use crate::reflect::{DescriptorBinding, DescriptorKind};

/// Adds `set_shift` to the descriptor set of every uniform-buffer binding
/// in `module`, updating both the module words and the reflected bindings.
/// Returns how many descriptors were patched.
pub fn patch_uniform_buffer_sets(
    module: &mut Module,
    bindings: &mut [DescriptorBinding],
    set_shift: u32,
) -> usize {
    let mut patched = 0;
    for binding in bindings.iter_mut() {
        if binding.kind != DescriptorKind::UniformBuffer {
            continue;
        }
        let new_set = binding.set + set_shift;
        debug!(
            "shifting uniform buffer (set {}, binding {}) to set {}",
            binding.set, binding.binding, new_set
        );
        module.words[binding.set_word_offset] = new_set;
        binding.set = new_set;
        patched += 1;
    }
    patched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{reflect, test_modules, DescriptorKind};

    #[test]
    fn shifts_only_uniform_buffer_sets() {
        let mut module = test_modules::ubo_and_texture(4, 0, 0);
        let mut bindings = reflect(&module).unwrap().bindings;

        let patched = patch_uniform_buffer_sets(&mut module, &mut bindings, 4);
        assert_eq!(patched, 1);

        // the patched module reflects with the shifted set
        let reparsed = reflect(&module).unwrap();
        let ubo = reparsed
            .bindings
            .iter()
            .find(|b| b.kind == DescriptorKind::UniformBuffer)
            .unwrap();
        assert_eq!(ubo.set, 4);
        assert_eq!(ubo.binding, 0);

        let tex = reparsed
            .bindings
            .iter()
            .find(|b| b.kind == DescriptorKind::SampledImage)
            .unwrap();
        assert_eq!(tex.set, 0, "non-CBV descriptors must not move");
        assert_eq!(tex.binding, 1000);

        // in-place edit: same word count
        assert_eq!(module.words.len(), test_modules::ubo_and_texture(4, 0, 0).words.len());
    }

    #[test]
    fn patch_is_idempotent_per_reflection() {
        let mut module = test_modules::ubo_and_texture(0, 1, 1);
        let mut bindings = reflect(&module).unwrap().bindings;
        patch_uniform_buffer_sets(&mut module, &mut bindings, 4);

        let ubo = bindings
            .iter()
            .find(|b| b.kind == DescriptorKind::UniformBuffer)
            .unwrap();
        assert_eq!(ubo.set, 5);
    }
}
