use std::{fs, os::unix::fs::MetadataExt, path::Path};

use anyhow::{bail, Result};
use caps::{self, CapSet, Capability};
use log::warn;

/// Check the prerequisites for loading BPF objects and attaching uprobes,
/// allowing to bail out early and to explain what is missing.
pub(crate) fn agent_prerequisites(proc_root: &Path) -> Result<()> {
    // bpf(2) calls need system-wide capabilities, an unprivileged userns will
    // fail later even with all the capabilities below.
    if fs::metadata(proc_root)?.uid() != 0 {
        warn!(
            "{} is not owned by root, tapline likely runs in an unprivileged userns and might fail with -EPERM later.",
            proc_root.display()
        );
    }

    if !caps::has_cap(None, CapSet::Effective, Capability::CAP_BPF)? {
        bail!("tapline does not have CAP_BPF: can't load BPF programs.");
    }

    // Attaching uprobes and opening perf buffers.
    if !caps::has_cap(None, CapSet::Effective, Capability::CAP_PERFMON)?
        && !caps::has_cap(None, CapSet::Effective, Capability::CAP_SYS_ADMIN)?
    {
        bail!("tapline needs CAP_PERFMON or CAP_SYS_ADMIN to attach uprobes.");
    }

    Ok(())
}
