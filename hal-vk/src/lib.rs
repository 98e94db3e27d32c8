//! Vulkan backend for the arclight hardware abstraction layer.
//!
//! Implements [`arclight_hal::Backend`] on top of ash. The backend owns one
//! fixed-capacity pool per object class, a fence ring for submit tracking,
//! and one command-list translator per configured thread; every create/free
//! and record/submit call goes through those pools.

#[macro_use]
extern crate log;

mod backend;
mod barrier;
mod conv;
mod descriptors;
mod device;
mod diagnostic;
mod memory;
mod pipeline_layout;
mod pools;
mod render_pass;
mod shader_table;
mod spirv_patch;
mod state_cache;
mod translator;

pub use self::backend::VulkanBackend;
