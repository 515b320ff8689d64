use std::{io, path::PathBuf};

use super::GoVersion;

/// Errors aborting the inspection of a binary. They are fatal to a single
/// attach attempt; callers decide whether to retry, skip or alert.
#[derive(thiserror::Error, Debug)]
pub(crate) enum InspectError {
    /// The binary could not be read from disk.
    #[error("could not read binary {path}: {source}")]
    UnreadableBinary {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// ELF machine type other than x86_64 and arm64.
    #[error("unsupported architecture (ELF machine {0:#x})")]
    UnsupportedArchitecture(u16),
    /// No usable toolchain build information found.
    #[error("could not detect the toolchain version")]
    ToolchainNotDetected,
    /// The binary was built with a toolchain using the stack-based calling
    /// convention.
    #[error("toolchain version {found} is older than the minimum supported {min}")]
    UnsupportedToolchainVersion { found: GoVersion, min: GoVersion },
    #[error("symbol {0} not found")]
    SymbolNotFound(String),
    /// The symbol address is not part of any executable section.
    #[error("symbol {0} is outside of every executable section")]
    SymbolOutOfRange(String),
    #[error("no return instruction found in {0}")]
    NoReturnSitesFound(String),
    #[error("invalid ELF file: {0}")]
    Elf(#[from] elf::ParseError),
}
