//! # Cli
//!
//! Command line parsing and subcommand dispatch.

#[allow(clippy::module_inception)]
pub(crate) mod cli;
pub(crate) use cli::*;
