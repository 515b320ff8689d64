use std::path::{Path, PathBuf};

use anyhow::Result;

use super::ProbeIdentity;
use crate::core::user::proc::file_inode;

/// Executable (binary or shared library) opened for probing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Executable {
    /// Host path, usually through `<proc>/<pid>/root`.
    pub(crate) path: PathBuf,
    pub(crate) inode: u64,
}

impl Executable {
    pub(crate) fn open(path: &Path) -> Result<Executable> {
        Ok(Executable {
            path: path.to_path_buf(),
            inode: file_inode(path)?,
        })
    }
}

/// Handle on an attached kernel probe.
pub(crate) trait ProbeLink: Send {
    /// Detach the probe and release the handle.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Kernel side primitives used by the probe manager: attaching probes and
/// maintaining the target enablement map.
pub(crate) trait ProbeBackend: Send {
    /// Attach a uprobe (or uretprobe) at a file offset of an executable.
    fn attach(&mut self, exe: &Executable, probe: &ProbeIdentity) -> Result<Box<dyn ProbeLink>>;
    /// Start emitting events for processes in a PID namespace.
    fn enable_target(&mut self, pid_ns: u32) -> Result<()>;
    /// Stop emitting events for processes in a PID namespace.
    fn disable_target(&mut self, pid_ns: u32) -> Result<()>;
}
