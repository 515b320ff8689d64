use std::{ffi::OsString, path::PathBuf};

use anyhow::Result;
use clap::{builder::PossibleValuesParser, Args, Parser, Subcommand};

use crate::{agent::cli::Run, config::Config, helpers::logger::Logger, inspect::Inspect};

/// Trait implemented by subcommands: parsed by clap, then run with the main
/// configuration.
pub(crate) trait SubCommandParserRunner: clap::Args {
    fn run(&mut self, main: &MainConfig) -> Result<()>;
}

/// Options shared by all subcommands.
#[derive(Args, Debug, Default)]
pub(crate) struct MainConfig {
    #[arg(
        long,
        global = true,
        value_parser=PossibleValuesParser::new(["error", "warn", "info", "debug", "trace"]),
        default_value = "info",
        help = "Log level",
    )]
    pub(crate) log_level: String,
    #[arg(long, global = true, help = "Path to a YAML configuration file")]
    pub(crate) config: Option<PathBuf>,
}

impl MainConfig {
    pub(crate) fn load_config(&self) -> Result<Config> {
        Config::load(self.config.as_deref())
    }
}

#[derive(Subcommand, Debug)]
pub(crate) enum SubCommands {
    /// Attach to containers and report their traffic
    Run(Run),
    /// Inspect a binary and print the probes that would be attached to it
    Inspect(Inspect),
}

/// Reconstruct the application traffic of containers
///
/// tapline attaches uprobes to the TLS functions of container binaries,
/// reassembles the intercepted messages and tags those carrying sensitive
/// data.
#[derive(Parser, Debug)]
#[command(name = "tapline", version)]
pub(crate) struct TaplineCli {
    #[command(flatten)]
    pub(crate) main_config: MainConfig,
    #[command(subcommand)]
    pub(crate) subcommand: SubCommands,
}

impl TaplineCli {
    /// Parse the command line, exiting on errors (including `--help`).
    pub(crate) fn new() -> TaplineCli {
        TaplineCli::parse()
    }

    pub(crate) fn try_from_args<I, T>(args: I) -> Result<TaplineCli, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        TaplineCli::try_parse_from(args)
    }

    /// Set up logging and run the selected subcommand.
    pub(crate) fn run(mut self) -> Result<()> {
        Logger::init(Logger::parse_level(&self.main_config.log_level)?)?;

        match &mut self.subcommand {
            SubCommands::Run(cmd) => cmd.run(&self.main_config),
            SubCommands::Inspect(cmd) => cmd.run(&self.main_config),
        }
    }
}
