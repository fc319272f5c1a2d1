//! Index types for arena elements.
//!
//! Vertices, edges and triangles of a [`TriMesh`](super::TriMesh) live in
//! tombstoned arenas and are addressed by these type-safe wrappers. The same
//! macro defines the node and branch ids of the vascular tree.

/// Sentinel raw value used for invalid indices.
pub const INVALID_INDEX: u32 = u32::MAX;

macro_rules! impl_index_type {
    ($(#[$meta:meta])* $name:ident, $display:literal) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Create a new index from a raw value.
            #[inline]
            pub fn new(index: usize) -> Self {
                debug_assert!(
                    index < $crate::mesh::INVALID_INDEX as usize,
                    "index {} too large",
                    index
                );
                Self(index as u32)
            }

            /// Create an invalid/null index.
            #[inline]
            pub fn invalid() -> Self {
                Self($crate::mesh::INVALID_INDEX)
            }

            /// Get the raw index value.
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }

            /// Check if this is a valid (non-null) index.
            #[inline]
            pub fn is_valid(self) -> bool {
                self.0 != $crate::mesh::INVALID_INDEX
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                if self.is_valid() {
                    write!(f, "{}({})", $display, self.index())
                } else {
                    write!(f, "{}(INVALID)", $display)
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::invalid()
            }
        }

        impl From<usize> for $name {
            fn from(v: usize) -> Self {
                Self::new(v)
            }
        }
    };
}

pub(crate) use impl_index_type;

impl_index_type!(
    /// A type-safe vertex index.
    VertexId,
    "V"
);
impl_index_type!(
    /// A type-safe edge index (unordered vertex pair).
    EdgeId,
    "E"
);
impl_index_type!(
    /// A type-safe triangle index.
    TriangleId,
    "T"
);
