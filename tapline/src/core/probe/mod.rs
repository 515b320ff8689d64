//! # Probes
//!
//! Turns inspection results into uprobes attached to container binaries and
//! keeps track of them until the containers go away.

pub(crate) mod backend;
pub(crate) use backend::*;
pub(crate) mod bpf;
pub(crate) mod identity;
pub(crate) use identity::*;
#[allow(clippy::module_inception)]
pub(crate) mod manager;
pub(crate) use manager::*;
pub(crate) mod plan;
pub(crate) use plan::*;
