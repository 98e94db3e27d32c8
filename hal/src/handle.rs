//! Typed opaque handles for every GPU object class.
//!
//! A handle is a key into a backend-owned pool, not a pointer; it carries no
//! ownership. The all-bits-set value is the null sentinel for every class.
//! When the owning pool has generation checking enabled, the low 16 bits are
//! the slot index and the next 13 bits a generation counter; otherwise the
//! index may occupy everything below the 3 padding bits.

/// Number of high bits never used by a live handle.
pub const PADDING_BITS: u32 = 3;
/// Bits holding the slot index when generation checking is enabled.
pub const INDEX_BITS: u32 = 16;
/// Bits holding the generation counter when generation checking is enabled.
pub const GENERATION_BITS: u32 = 32 - INDEX_BITS - PADDING_BITS;

/// Mask extracting the index from an unchecked handle.
pub const UNCHECKED_INDEX_MASK: u32 = (1 << (32 - PADDING_BITS)) - 1;

pub(crate) const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
pub(crate) const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;

macro_rules! define_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[repr(transparent)]
        #[derive(Copy, Clone, Eq, PartialEq, Hash)]
        pub struct $name(pub u32);

        impl $name {
            /// The null sentinel; never refers to a live object.
            pub const NULL: $name = $name(u32::MAX);

            #[inline]
            pub fn is_valid(self) -> bool {
                self.0 != u32::MAX
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::NULL
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                if self.is_valid() {
                    write!(f, concat!(stringify!($name), "({})"), self.0)
                } else {
                    f.write_str(concat!(stringify!($name), "(null)"))
                }
            }
        }
    };
}

define_handle!(
    /// A buffer or image, created through the resource interface of a backend.
    Resource
);
define_handle!(
    /// An immutable bundle of SRV/UAV/sampler descriptors.
    ShaderView
);
define_handle!(
    /// A compiled graphics, compute or raytracing pipeline.
    PipelineState
);
define_handle!(
    /// A timeline fence with a client-chosen monotonic value.
    Fence
);
define_handle!(
    /// A recorded, not yet submitted command list. Consumed exactly once,
    /// by either submit or discard.
    CommandList
);
define_handle!(
    /// A contiguous block of queries of a single type.
    QueryRange
);
define_handle!(
    /// A bottom- or top-level raytracing acceleration structure.
    AccelStruct
);
define_handle!(
    /// A window surface with its chain of backbuffers.
    Swapchain
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handles() {
        assert!(!Resource::NULL.is_valid());
        assert!(!CommandList::default().is_valid());
        assert!(Resource(0).is_valid());
        assert_ne!(Resource(0), Resource::NULL);
    }

    #[test]
    fn bit_partition_covers_word() {
        assert_eq!(PADDING_BITS + INDEX_BITS + GENERATION_BITS, 32);
    }
}
