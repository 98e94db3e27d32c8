//! Render-pass construction.
//!
//! Vulkan needs a VkRenderPass both at pipeline creation (a compatibility
//! prototype derived from the pipeline's attachment formats) and at draw
//! time (the actual pass, derived from the begin-render-pass command and
//! the bound pipeline's formats). The draw-time variant is cached by a
//! hash of its clear ops, formats and sample count.

use std::hash::{Hash, Hasher};

use arrayvec::ArrayVec;
use ash::vk;
use fxhash::FxHasher;

use arclight_hal::arg::FramebufferConfig;
use arclight_hal::commands::BeginRenderPass;
use arclight_hal::format::Format;
use arclight_hal::limits::MAX_RENDER_TARGETS;
use arclight_hal::types::{PipelineConfig, ResourceState};

use crate::conv;

fn sample_flags(num_samples: u32) -> vk::SampleCountFlags {
    vk::SampleCountFlags::from_raw(num_samples.max(1))
}

struct AttachmentSetup {
    attachments: ArrayVec<vk::AttachmentDescription, { MAX_RENDER_TARGETS + 1 }>,
    color_refs: ArrayVec<vk::AttachmentReference, MAX_RENDER_TARGETS>,
    depth_ref: Option<vk::AttachmentReference>,
}

fn color_attachment(
    format: Format,
    samples: vk::SampleCountFlags,
    load_op: vk::AttachmentLoadOp,
) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(conv::format(format))
        .samples(samples)
        .load_op(load_op)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(conv::image_layout(ResourceState::RenderTarget))
        .final_layout(conv::image_layout(ResourceState::RenderTarget))
}

fn depth_attachment(
    format: Format,
    samples: vk::SampleCountFlags,
    load_op: vk::AttachmentLoadOp,
    stencil_load_op: vk::AttachmentLoadOp,
) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(conv::format(format))
        .samples(samples)
        .load_op(load_op)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(stencil_load_op)
        .stencil_store_op(vk::AttachmentStoreOp::STORE)
        .initial_layout(conv::image_layout(ResourceState::DepthWrite))
        .final_layout(conv::image_layout(ResourceState::DepthWrite))
}

fn create_from_setup(device: &ash::Device, setup: &AttachmentSetup) -> vk::RenderPass {
    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&setup.color_refs);
    if let Some(depth_ref) = setup.depth_ref.as_ref() {
        subpass = subpass.depth_stencil_attachment(depth_ref);
    }

    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(conv::access_flags(ResourceState::RenderTarget))
        .dst_access_mask(conv::access_flags(ResourceState::RenderTarget));

    let info = vk::RenderPassCreateInfo::default()
        .attachments(&setup.attachments)
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(std::slice::from_ref(&dependency));

    unsafe {
        device
            .create_render_pass(&info, None)
            .expect("render pass creation failed")
    }
}

/// The compatibility prototype used at pipeline creation: load/store of
/// the real pass differ, which render-pass compatibility permits.
pub fn create_render_pass_from_framebuffer(
    device: &ash::Device,
    framebuffer: &FramebufferConfig,
    config: &PipelineConfig,
) -> vk::RenderPass {
    let samples = sample_flags(config.samples);
    let mut setup = AttachmentSetup {
        attachments: ArrayVec::new(),
        color_refs: ArrayVec::new(),
        depth_ref: None,
    };

    for rt in &framebuffer.render_targets {
        setup.attachments.push(color_attachment(
            rt.format,
            samples,
            vk::AttachmentLoadOp::LOAD,
        ));
        setup.color_refs.push(
            vk::AttachmentReference::default()
                .attachment(setup.color_refs.len() as u32)
                .layout(conv::image_layout(ResourceState::RenderTarget)),
        );
    }

    if framebuffer.depth_target != Format::None {
        setup.attachments.push(depth_attachment(
            framebuffer.depth_target,
            samples,
            vk::AttachmentLoadOp::CLEAR,
            vk::AttachmentLoadOp::DONT_CARE,
        ));
        setup.depth_ref = Some(
            vk::AttachmentReference::default()
                .attachment(setup.color_refs.len() as u32)
                .layout(conv::image_layout(ResourceState::DepthWrite)),
        );
    }

    create_from_setup(device, &setup)
}

/// The draw-time pass: clear ops from the command, formats from the bound
/// pipeline (backbuffer targets get the swapchain format substituted).
pub fn create_render_pass_from_begin(
    device: &ash::Device,
    begin: &BeginRenderPass,
    num_samples: u32,
    override_rt_formats: &[Format],
) -> vk::RenderPass {
    let samples = sample_flags(num_samples);
    let mut setup = AttachmentSetup {
        attachments: ArrayVec::new(),
        color_refs: ArrayVec::new(),
        depth_ref: None,
    };

    for (i, rt) in begin.render_targets.iter().enumerate() {
        setup.attachments.push(color_attachment(
            override_rt_formats[i],
            samples,
            conv::load_op(rt.clear_type),
        ));
        setup.color_refs.push(
            vk::AttachmentReference::default()
                .attachment(i as u32)
                .layout(conv::image_layout(ResourceState::RenderTarget)),
        );
    }

    if begin.depth_target.rv.resource.is_valid() {
        let format = match begin.depth_target.rv.info {
            arclight_hal::types::ResourceViewInfo::Texture(info) => info.pixel_format,
            _ => Format::None,
        };
        setup.attachments.push(depth_attachment(
            format,
            samples,
            conv::load_op(begin.depth_target.clear_type),
            conv::load_op(begin.depth_target.clear_type),
        ));
        setup.depth_ref = Some(
            vk::AttachmentReference::default()
                .attachment(setup.color_refs.len() as u32)
                .layout(conv::image_layout(ResourceState::DepthWrite)),
        );
    }

    create_from_setup(device, &setup)
}

/// Cache key of a draw-time render pass: clear ops + attachment formats +
/// sample count. Equal keys produce compatible passes.
pub fn render_pass_cache_key(
    begin: &BeginRenderPass,
    override_rt_formats: &[Format],
    num_samples: u32,
) -> u64 {
    let mut hasher = FxHasher::default();
    num_samples.hash(&mut hasher);
    begin.render_targets.len().hash(&mut hasher);
    for (i, rt) in begin.render_targets.iter().enumerate() {
        (rt.clear_type as u8).hash(&mut hasher);
        (override_rt_formats[i] as u8).hash(&mut hasher);
    }
    if begin.depth_target.rv.resource.is_valid() {
        (begin.depth_target.clear_type as u8).hash(&mut hasher);
        if let arclight_hal::types::ResourceViewInfo::Texture(info) = begin.depth_target.rv.info {
            (info.pixel_format as u8).hash(&mut hasher);
        }
    }
    hasher.finish()
}

/// True when two begin-render-pass commands would require different
/// native passes for the same pipeline.
pub fn clear_ops_differ(a: &BeginRenderPass, b: &BeginRenderPass) -> bool {
    if a.render_targets.len() != b.render_targets.len() {
        return true;
    }
    a.render_targets
        .iter()
        .zip(b.render_targets.iter())
        .any(|(x, y)| x.clear_type != y.clear_type)
        || a.depth_target.clear_type != b.depth_target.clear_type
}

#[cfg(test)]
mod tests {
    use super::*;
    use arclight_hal::handle;
    use arclight_hal::types::RtClearType;

    #[test]
    fn cache_key_distinguishes_clear_ops_and_formats() {
        let mut begin = BeginRenderPass::default();
        begin.add_2d_rt(handle::Resource(1), Format::Rgba8Un, RtClearType::Clear);

        let clear_key = render_pass_cache_key(&begin, &[Format::Rgba8Un], 1);
        let clear_key_again = render_pass_cache_key(&begin, &[Format::Rgba8Un], 1);
        assert_eq!(clear_key, clear_key_again);

        begin.render_targets[0].clear_type = RtClearType::Load;
        let load_key = render_pass_cache_key(&begin, &[Format::Rgba8Un], 1);
        assert_ne!(clear_key, load_key);

        let other_format_key = render_pass_cache_key(&begin, &[Format::Rgba16F], 1);
        assert_ne!(load_key, other_format_key);

        let msaa_key = render_pass_cache_key(&begin, &[Format::Rgba8Un], 4);
        assert_ne!(load_key, msaa_key);
    }
}
