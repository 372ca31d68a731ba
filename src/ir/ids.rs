//! Typed indices into the [`crate::ir::Graph`] arenas.
//!
//! Every arena entry is addressed by a `Copy` newtype over its position, so nodes,
//! blocks, state snapshots and scopes can reference each other without ownership
//! cycles. An id is only meaningful for the graph that issued it.

use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Creates an id from a raw arena index.
            #[must_use]
            #[inline]
            pub const fn new(index: usize) -> Self {
                $name(index as u32)
            }

            /// Returns the raw arena index.
            #[must_use]
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl From<$name> for usize {
            #[inline]
            fn from(id: $name) -> usize {
                id.index()
            }
        }
    };
}

define_id!(
    /// Identifies a value node.
    ValueId,
    "v"
);
define_id!(
    /// Identifies a basic block.
    BlockId,
    "B"
);
define_id!(
    /// Identifies a recorded [`crate::ir::ValueStack`] snapshot.
    StateId,
    "s"
);
define_id!(
    /// Identifies an inlining scope; scope 0 is the method being compiled.
    ScopeId,
    "S"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_formatting() {
        assert_eq!(ValueId::new(12).to_string(), "v12");
        assert_eq!(format!("{:?}", BlockId::new(3)), "B3");
        assert_eq!(usize::from(StateId::new(7)), 7);
        assert!(ScopeId::new(0) < ScopeId::new(1));
    }
}
