//! # Tapline events
//!
//! This crate contains the definitions of the types shared between the tapline
//! agent and the consumers of its output: traffic direction, container
//! identity, classification tags and the report records emitted for every
//! reconstructed application message.

pub mod common;
pub use common::*;
pub mod container;
pub use container::*;
pub mod metadata;
pub use metadata::*;
pub mod report;
pub use report::*;
