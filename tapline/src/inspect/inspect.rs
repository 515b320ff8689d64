use std::{io::Write, path::PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use crate::{
    cli::{MainConfig, SubCommandParserRunner},
    core::{
        inspect::{BinaryDescriptor, Inspector},
        probe::{Planner, SymbolTarget},
    },
};

/// Options of the `inspect` subcommand.
#[derive(Args, Debug, Default)]
pub(crate) struct Inspect {
    #[arg(help = "Binary to inspect")]
    pub(crate) binary: PathBuf,
    #[arg(
        long,
        help = "Inspect the binary as an OpenSSL library instead of a Go binary"
    )]
    pub(crate) openssl: bool,
}

impl SubCommandParserRunner for Inspect {
    fn run(&mut self, main: &MainConfig) -> Result<()> {
        let config = main.load_config()?;
        let inspector = Inspector::new(config.min_toolchain.clone());

        let (desc, targets) = match self.openssl {
            true => (
                inspector.inspect_library(&self.binary),
                config.openssl.symbols.clone(),
            ),
            false => (inspector.inspect(&self.binary), config.symbols.clone()),
        };
        let desc = desc.with_context(|| format!("Could not inspect {}", self.binary.display()))?;

        report(&mut std::io::stdout(), &desc, &targets)
    }
}

/// Print the description of a binary and the probes of each target.
fn report<W: Write>(w: &mut W, desc: &BinaryDescriptor, targets: &[SymbolTarget]) -> Result<()> {
    writeln!(w, "{}", desc.path.display())?;
    writeln!(w, "  architecture: {}", desc.architecture)?;
    if let Some(version) = &desc.toolchain {
        writeln!(w, "  toolchain: {version}")?;
    }

    for target in targets.iter() {
        match Planner::symbol_probes(desc, std::slice::from_ref(target)) {
            Ok(probes) => {
                writeln!(w, "  {}", target.symbol)?;
                for probe in probes.iter() {
                    writeln!(w, "    {probe}")?;
                }
            }
            Err(e) => writeln!(w, "  {}: {e}", target.symbol)?,
        }
    }

    Ok(())
}
