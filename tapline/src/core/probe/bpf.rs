//! libbpf based probe backend. The BPF object is loaded at runtime from a
//! file; its programs are attached on demand.

use std::{ffi::OsStr, path::Path};

use anyhow::{anyhow, Context, Result};
use libbpf_rs::{MapCore, MapFlags, MapHandle};
use log::debug;

use super::{Executable, ProbeBackend, ProbeIdentity, ProbeLink};

/// Map gating which PID namespaces emit events, keyed by namespace inode.
const TARGETS_MAP: &str = "targets";
/// Perf event array carrying the records.
const EVENTS_MAP: &str = "events";

pub(crate) struct BpfBackend {
    object: libbpf_rs::Object,
    targets: MapHandle,
}

// SAFETY: libbpf objects have no thread affinity, they only must not be used
// concurrently. The backend is owned by the probe manager and only used with
// its lock held.
unsafe impl Send for BpfBackend {}

impl BpfBackend {
    pub(crate) fn load(path: &Path) -> Result<BpfBackend> {
        let object = libbpf_rs::ObjectBuilder::default()
            .open_file(path)
            .with_context(|| format!("Could not open BPF object {}", path.display()))?
            .load()
            .with_context(|| format!("Could not load BPF object {}", path.display()))?;

        let targets = Self::map(&object, TARGETS_MAP)?;

        Ok(BpfBackend { object, targets })
    }

    fn map(object: &libbpf_rs::Object, name: &str) -> Result<MapHandle> {
        let map = object
            .maps()
            .find(|m| m.name() == OsStr::new(name))
            .ok_or_else(|| anyhow!("Couldn't find map {name} in the BPF object"))?;
        Ok(MapHandle::try_from(&map)?)
    }

    /// Handle on the events perf array, for the event reader.
    pub(crate) fn events_map(&self) -> Result<MapHandle> {
        Self::map(&self.object, EVENTS_MAP)
    }
}

impl ProbeBackend for BpfBackend {
    fn attach(&mut self, exe: &Executable, probe: &ProbeIdentity) -> Result<Box<dyn ProbeLink>> {
        let prog = self
            .object
            .progs_mut()
            .find(|p| p.name() == OsStr::new(&probe.program))
            .ok_or_else(|| anyhow!("Couldn't get program {}", probe.program))?;

        let offset = usize::try_from(probe.file_offset)?;
        let link = prog
            .attach_uprobe(probe.retprobe, -1, &exe.path, offset)
            .with_context(|| format!("Could not attach {probe} to {}", exe.path.display()))?;

        debug!("Attached {probe} to {}", exe.path.display());
        Ok(Box::new(BpfLink(link)))
    }

    fn enable_target(&mut self, pid_ns: u32) -> Result<()> {
        self.targets
            .update(&pid_ns.to_ne_bytes(), &[1], MapFlags::ANY)
            .with_context(|| format!("Could not enable PID namespace {pid_ns}"))
    }

    fn disable_target(&mut self, pid_ns: u32) -> Result<()> {
        self.targets
            .delete(&pid_ns.to_ne_bytes())
            .with_context(|| format!("Could not disable PID namespace {pid_ns}"))
    }
}

struct BpfLink(libbpf_rs::Link);

// SAFETY: a link owns a bpf_link, which only wraps a file descriptor and has
// no thread affinity. Links are stored in the probe manager and closed with
// its lock held, from whichever thread detaches the target.
unsafe impl Send for BpfLink {}

impl ProbeLink for BpfLink {
    fn close(self: Box<Self>) -> Result<()> {
        let BpfLink(link) = *self;
        link.detach()?;
        Ok(())
    }
}
