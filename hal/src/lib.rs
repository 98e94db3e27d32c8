//! Hardware abstraction layer over explicit graphics APIs.
//!
//! Every GPU object is referenced through a typed, opaque 32-bit [`handle`],
//! acquired from fixed-capacity pools owned by a backend. Rendering work is
//! encoded into a caller-provided byte buffer through [`CommandWriter`],
//! turned into a native command list with [`Backend::record_command_list`],
//! and executed with [`Backend::submit`]. The two backend crates translate
//! the same command stream to D3D12 and Vulkan respectively.
//!
//! Resource state is tracked at submission granularity: each resource carries
//! a single *master state*, and each recorded command list only knows the
//! states it requires and produces. The barriers bridging the two are
//! synthesized at submit time by the backend.

pub mod arg;
pub mod backend;
pub mod commands;
pub mod config;
pub mod format;
pub mod handle;
pub mod limits;
pub mod pool;
pub mod stream;
pub mod types;
mod util;
pub mod window;

pub use self::backend::{Backend, BackendType, InitError};
pub use self::commands::*;
pub use self::config::{AdapterPreference, Config, PresentMode, ValidationLevel};
pub use self::format::Format;
pub use self::stream::{CommandParser, CommandWriter};
pub use self::types::*;
pub use self::util::{align_down, align_up};
pub use self::window::WindowHandle;
