//! SPIR-V parsing and manipulation utilities.
//!
//! Provides the little that a graphics backend needs from a shader binary:
//! word-level decoding, reflection of descriptor bindings and push
//! constants, and in-place patching of descriptor-set decorations.

#[macro_use]
extern crate log;

mod module;
mod patch;
mod reflect;

pub use self::module::{Module, RawInstruction};
pub use self::patch::patch_uniform_buffer_sets;
pub use self::reflect::{reflect, DescriptorBinding, DescriptorKind, ReflectedStage, ShaderStage};

/// Error that can happen when parsing or reflecting a module.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    MissingHeader,
    WrongHeader,
    IncompleteInstruction,
    /// An instruction referenced an id the module never defines.
    UnknownId(u32),
    /// The module declares no entry point.
    MissingEntryPoint,
    /// The entry point's execution model is not one we translate.
    UnsupportedExecutionModel(u32),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::MissingHeader => write!(f, "missing SPIR-V header"),
            ParseError::WrongHeader => write!(f, "wrong SPIR-V magic number"),
            ParseError::IncompleteInstruction => write!(f, "truncated instruction stream"),
            ParseError::UnknownId(id) => write!(f, "reference to undefined id %{}", id),
            ParseError::MissingEntryPoint => write!(f, "module has no entry point"),
            ParseError::UnsupportedExecutionModel(m) => {
                write!(f, "unsupported execution model {}", m)
            }
        }
    }
}

impl std::error::Error for ParseError {}
