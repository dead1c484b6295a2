//! Keel Core - shared primitive types for the Keel consensus workspace.
//!
//! Everything here is a zero-cost wrapper over `u64`: peer identities,
//! election terms, and log positions stay distinct types even though they
//! share a wire representation. The crate deliberately contains no I/O
//! abstractions; clocks, network, and storage are owned by the host.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod types;

pub use types::{LogIndex, NodeId, TermId};
