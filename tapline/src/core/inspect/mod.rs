//! # Binary inspection
//!
//! Provides support for inspecting on-disk executables: architecture,
//! toolchain version, symbols and their file offsets. Also hosts the runtime
//! prerequisites checks.

pub(crate) mod binary;
pub(crate) use binary::*;
pub(crate) mod check;
pub(crate) mod error;
pub(crate) use error::*;
pub(crate) mod toolchain;
pub(crate) use toolchain::*;

#[cfg(test)]
pub(crate) mod test_elf;
