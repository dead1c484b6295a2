//! Identifier and index newtypes shared across the workspace.
//!
//! Peer ids, election terms, and log positions are all bare `u64`s on the
//! wire, which makes them easy to transpose in code that juggles several
//! of each. The wrappers below keep the three axes apart at compile time
//! and cost nothing at runtime.

use std::fmt;

/// Generates a `#[repr(transparent)]` u64 wrapper with raw conversions.
///
/// `Display` prints the bare value so the wrappers read naturally inside
/// log fields and panic messages; `Debug` keeps the type name visible.
macro_rules! u64_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw value.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Unwraps to the raw value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u64 {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

u64_newtype!(
    /// Identity of a peer in the voting membership.
    ///
    /// 0 is reserved to mean "no peer" on the wire and is rejected by
    /// configuration validation.
    NodeId
);

u64_newtype!(
    /// Election epoch.
    ///
    /// Starts at 0 and only ever grows; every campaign increments it by
    /// one. Comparisons between terms decide who defers to whom.
    TermId
);

u64_newtype!(
    /// Position on the replicated history line.
    ///
    /// Real entries start at 1; 0 is the empty-log origin.
    LogIndex
);

// Peer ids are identities, not sequences, so only terms and indices get a
// successor operation.

impl TermId {
    /// The term a fresh campaign at this term would run under.
    ///
    /// # Panics
    /// Panics on overflow.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        assert!(self.0 < u64::MAX, "term overflow");
        Self(self.0 + 1)
    }
}

impl LogIndex {
    /// The index immediately after this one on the history line.
    ///
    /// # Panics
    /// Panics on overflow.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        assert!(self.0 < u64::MAX, "log index overflow");
        Self(self.0 + 1)
    }
}
