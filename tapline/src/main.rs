use anyhow::Result;

mod agent;
mod classify;
mod cli;
mod config;
mod core;
mod helpers;
mod inspect;
mod report;

use crate::cli::TaplineCli;

// Re-export events crate. It's not really an import but a re-export so events appear as module
// inside the crate rather than an external crate. However, clippy doesn't like it.
#[allow(clippy::single_component_path_imports)]
use events;

fn main() -> Result<()> {
    TaplineCli::new().run()
}
