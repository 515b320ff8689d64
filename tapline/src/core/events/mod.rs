//! # Events
//!
//! Retrieval of the raw records emitted by the probes, their attribution to
//! containers and their reassembly into complete application messages.

use anyhow::Result;

use crate::core::user::proc::ProcFs;

pub(crate) mod raw;
pub(crate) use raw::*;
pub(crate) mod reader;
pub(crate) use reader::*;
pub(crate) mod reassembly;
pub(crate) use reassembly::*;
pub(crate) mod source;
pub(crate) use source::*;

/// Resolves the PID namespace of a process, used to attribute records to
/// containers.
pub(crate) trait NamespaceResolver: Send {
    /// Inode of the PID namespace of `pid`.
    fn pid_namespace(&self, pid: u32) -> Result<u32>;
}

impl NamespaceResolver for ProcFs {
    fn pid_namespace(&self, pid: u32) -> Result<u32> {
        ProcFs::pid_namespace(self, pid)
    }
}
