//! # Return-site scanning
//!
//! A single uretprobe is not reliable on functions with several exits (Go
//! synthesizes extra ones for deferred calls and multi-value returns), so
//! every return instruction of a function is located and probed instead.

pub(crate) mod arm64;
pub(crate) mod x86_64;

use crate::core::inspect::{Architecture, InspectError};

/// Entry point and return instructions of a function, as file offsets.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct FunctionSite {
    pub(crate) symbol: String,
    pub(crate) entry_offset: u32,
    /// Ordered by offset.
    pub(crate) return_offsets: Vec<u32>,
}

/// Scan the code of a single function for return instructions. `code` must be
/// bounded to the function (up to the next symbol or the section end) and
/// `start` is the file offset of its first byte. Returns the file offsets of
/// every return instruction found, in order.
pub(crate) fn scan_return_sites(
    arch: Architecture,
    symbol: &str,
    code: &[u8],
    start: u64,
) -> Result<Vec<u64>, InspectError> {
    let sites = match arch {
        Architecture::X86_64 => x86_64::return_sites(code, start),
        Architecture::Arm64 => arm64::return_sites(code, start),
    };

    if sites.is_empty() {
        return Err(InspectError::NoReturnSitesFound(symbol.to_string()));
    }
    Ok(sites)
}
