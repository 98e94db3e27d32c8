//! D3D12 backend for the arclight hardware abstraction layer.
//!
//! Structural mirror of the Vulkan backend: one pool per object class, a
//! refcounted fence ring for submit tracking, and a per-thread command
//! translator. Where Vulkan needs render passes and descriptor sets,
//! this backend works with OM bindings, descriptor heaps and root
//! signatures derived from the declared shader-argument shapes.
//!
//! The crate compiles to nothing on non-Windows targets.

#![cfg(windows)]

#[macro_use]
extern crate log;

mod backend;
mod conv;
mod descriptors;
mod device;
mod diagnostic;
mod pools;
mod root_signature;
mod shader_table;
mod state_cache;
mod translator;

pub use self::backend::D3d12Backend;

use std::borrow::Cow;

/// HRESULT plumbing shared by every module.
pub(crate) trait HResult<T> {
    fn into_result(self) -> Result<T, Cow<'static, str>>;
    fn expect_hr(self, context: &str) -> T;
}

impl<T> HResult<T> for windows::runtime::Result<T> {
    fn into_result(self) -> Result<T, Cow<'static, str>> {
        self.map_err(|err| Cow::Owned(err.message()))
    }

    fn expect_hr(self, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => panic!("{} failed: {}", context, err.message()),
        }
    }
}
