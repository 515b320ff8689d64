use std::fmt;

/// Probe to be attached to an executable, as computed from the inspection of
/// the binary.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ProbeSpec {
    pub(crate) symbol: String,
    /// File offset of the probed instruction.
    pub(crate) offset: u64,
    /// uretprobe instead of uprobe.
    pub(crate) retprobe: bool,
    /// Name of the BPF program handling the probe.
    pub(crate) program: String,
}

impl ProbeSpec {
    pub(crate) fn uprobe(symbol: &str, offset: u64, program: &str) -> ProbeSpec {
        ProbeSpec {
            symbol: symbol.to_string(),
            offset,
            retprobe: false,
            program: program.to_string(),
        }
    }

    pub(crate) fn uretprobe(symbol: &str, offset: u64, program: &str) -> ProbeSpec {
        ProbeSpec {
            retprobe: true,
            ..Self::uprobe(symbol, offset, program)
        }
    }
}

impl fmt::Display for ProbeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}+{:#x} -> {}",
            if self.retprobe { "uretprobe" } else { "uprobe" },
            self.symbol,
            self.offset,
            self.program
        )
    }
}

/// Unique key of an attached probe. Containers sharing a binary (same inode,
/// eg. same image layer) share its probes.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub(crate) struct ProbeIdentity {
    pub(crate) binary_inode: u64,
    pub(crate) symbol: String,
    pub(crate) file_offset: u64,
    pub(crate) retprobe: bool,
    pub(crate) program: String,
}

impl ProbeIdentity {
    pub(crate) fn new(binary_inode: u64, spec: &ProbeSpec) -> ProbeIdentity {
        ProbeIdentity {
            binary_inode,
            symbol: spec.symbol.clone(),
            file_offset: spec.offset,
            retprobe: spec.retprobe,
            program: spec.program.clone(),
        }
    }
}

impl fmt::Display for ProbeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}+{:#x} (ino {}) -> {}",
            if self.retprobe { "uretprobe" } else { "uprobe" },
            self.symbol,
            self.file_offset,
            self.binary_inode,
            self.program
        )
    }
}
