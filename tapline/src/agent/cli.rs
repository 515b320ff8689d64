//! The `run` subcommand.

use std::{
    collections::HashMap,
    fs::OpenOptions,
    io::{self, BufWriter},
    path::PathBuf,
    sync::mpsc,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use log::info;

use super::{Agent, PodEvent};
use crate::{
    cli::{MainConfig, SubCommandParserRunner},
    core::{
        events::PerfSource,
        inspect::check::agent_prerequisites,
        probe::bpf::BpfBackend,
        user::proc::ProcFs,
    },
    events::{ContainerId, ContainerInfo},
    helpers::signals::Running,
    report::{PrintFormat, Printer},
};

/// Parse a `<runtime>://<id>=<pid>[@<pod-ip>]` target.
pub(crate) fn parse_target(raw: &str) -> Result<ContainerInfo> {
    let (id, rest) = raw
        .rsplit_once('=')
        .ok_or_else(|| anyhow!("target '{raw}' is not of the <runtime>://<id>=<pid>[@<ip>] form"))?;
    let (pid, ip) = match rest.split_once('@') {
        Some((pid, ip)) => (pid, Some(ip)),
        None => (rest, None),
    };

    let pid: u32 = pid
        .parse()
        .with_context(|| format!("invalid pid in target '{raw}'"))?;
    let mut info = ContainerInfo::new(ContainerId::parse(id)?, pid);
    if let Some(ip) = ip {
        if ip.is_empty() {
            bail!("empty pod IP in target '{raw}'");
        }
        info = info.with_pod_ip(ip);
    }
    Ok(info)
}

/// Options of the `run` subcommand.
#[derive(Args, Debug, Default)]
pub(crate) struct Run {
    #[arg(long, help = "BPF object holding the probe programs")]
    pub(crate) bpf_object: Option<PathBuf>,
    #[arg(long, help = "Host procfs mount point [default: /proc]")]
    pub(crate) proc_root: Option<PathBuf>,
    #[arg(
        long,
        value_parser = parse_target,
        help = "Container to target, as <runtime>://<id>=<pid>[@<pod-ip>]. Can be used multiple times"
    )]
    pub(crate) target: Vec<ContainerInfo>,
    #[arg(long, help = "Write events to a file, as JSON lines")]
    pub(crate) out: Option<PathBuf>,
    #[arg(long, help = "Print events to stdout (default when --out is not used)")]
    pub(crate) print: bool,
}

impl Run {
    fn printers(&self) -> Result<Vec<Printer>> {
        let mut printers = Vec::new();

        if let Some(out) = &self.out {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(out)
                .with_context(|| format!("Could not open {}", out.display()))?;
            printers.push(Printer::new(
                Box::new(BufWriter::new(file)),
                PrintFormat::Json,
            ));
        }

        if self.print || printers.is_empty() {
            printers.push(Printer::new(Box::new(io::stdout()), PrintFormat::Text));
        }

        Ok(printers)
    }
}

impl SubCommandParserRunner for Run {
    fn run(&mut self, main: &MainConfig) -> Result<()> {
        let mut config = main.load_config()?;
        if let Some(proc_root) = &self.proc_root {
            config.proc_root = proc_root.clone();
        }
        if let Some(bpf_object) = &self.bpf_object {
            config.bpf_object = Some(bpf_object.clone());
        }

        agent_prerequisites(&config.proc_root)?;

        let bpf_object = config
            .bpf_object
            .clone()
            .ok_or_else(|| anyhow!("No BPF object given (--bpf-object or bpf_object)"))?;
        let backend = BpfBackend::load(&bpf_object)?;
        let source = PerfSource::new(backend.events_map()?);
        let resolver = ProcFs::new(&config.proc_root);

        // Static targets are handled as running, opted-in pods.
        let (pods_tx, pods) = mpsc::channel();
        if !self.target.is_empty() {
            info!("{} static target(s)", self.target.len());
            pods_tx.send(PodEvent::Running {
                labels: HashMap::from([(config.opt_in_label.clone(), String::new())]),
                containers: self.target.clone(),
            })?;
        }
        drop(pods_tx);

        let printers = self.printers()?;
        Agent::new(
            config,
            Box::new(backend),
            Box::new(source),
            Box::new(resolver),
        )
        .run(Running::new()?, pods, printers)
    }
}
