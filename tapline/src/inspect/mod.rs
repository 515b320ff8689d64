//! # Inspect
//!
//! Inspect subcommand, printing what would be probed in a binary.

#[allow(clippy::module_inception)]
pub(crate) mod inspect;
pub(crate) use inspect::*;
