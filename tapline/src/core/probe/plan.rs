//! Computation of the probes needed for a container: which executables and
//! which offsets, from the inspection of the container's binaries.

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::Deserialize;

use super::{Executable, ProbeSpec};
use crate::{
    core::{
        inspect::{BinaryDescriptor, InspectError, Inspector},
        user::proc::ProcFs,
    },
    events::ContainerInfo,
};

/// A function of interest and the BPF programs to attach to it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub(crate) struct SymbolTarget {
    pub(crate) symbol: String,
    /// Program attached at the function entry.
    #[serde(default)]
    pub(crate) entry: Option<String>,
    /// Program attached at every return instruction of the function.
    #[serde(default)]
    pub(crate) returns: Option<String>,
    /// Program attached as a uretprobe.
    #[serde(default)]
    pub(crate) retprobe: Option<String>,
}

impl SymbolTarget {
    fn new(symbol: &str) -> SymbolTarget {
        SymbolTarget {
            symbol: symbol.to_string(),
            entry: None,
            returns: None,
            retprobe: None,
        }
    }

    fn entry(mut self, program: &str) -> SymbolTarget {
        self.entry = Some(program.to_string());
        self
    }

    fn returns(mut self, program: &str) -> SymbolTarget {
        self.returns = Some(program.to_string());
        self
    }

    fn retprobe(mut self, program: &str) -> SymbolTarget {
        self.retprobe = Some(program.to_string());
        self
    }

    /// Go crypto/tls functions probed by default.
    pub(crate) fn go_tls() -> Vec<SymbolTarget> {
        vec![
            Self::new("crypto/tls.(*Conn).Write").entry("go_tls_write_enter"),
            Self::new("crypto/tls.(*Conn).Read")
                .entry("gotls_read_enter")
                .returns("gotls_read_return"),
        ]
    }

    /// OpenSSL functions probed by default.
    pub(crate) fn openssl() -> Vec<SymbolTarget> {
        ["SSL_write", "SSL_write_ex"]
            .iter()
            .map(|s| {
                Self::new(s)
                    .entry("ssl_write_enter")
                    .retprobe("ssl_write_return")
            })
            .collect()
    }
}

/// OpenSSL probing configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct OpenSslConfig {
    pub(crate) enabled: bool,
    /// Candidate library paths, inside the container. The first one found is
    /// used.
    pub(crate) libraries: Vec<PathBuf>,
    pub(crate) symbols: Vec<SymbolTarget>,
}

impl Default for OpenSslConfig {
    fn default() -> OpenSslConfig {
        OpenSslConfig {
            enabled: false,
            libraries: [
                "/usr/lib/x86_64-linux-gnu/libssl.so.3",
                "/usr/lib/aarch64-linux-gnu/libssl.so.3",
                "/lib/x86_64-linux-gnu/libssl.so.3",
                "/lib/aarch64-linux-gnu/libssl.so.3",
                "/usr/lib64/libssl.so.3",
                "/usr/lib/libssl.so.3",
                "/lib/libssl.so.3",
            ]
            .iter()
            .map(PathBuf::from)
            .collect(),
            symbols: SymbolTarget::openssl(),
        }
    }
}

/// Probes to attach to one executable.
#[derive(Debug)]
pub(crate) struct ExecutablePlan {
    pub(crate) exe: Executable,
    pub(crate) probes: Vec<ProbeSpec>,
}

/// Probes to attach for one container.
#[derive(Debug)]
pub(crate) struct TargetPlan {
    pub(crate) pid_ns: u32,
    pub(crate) executables: Vec<ExecutablePlan>,
}

pub(crate) struct Planner {
    proc: ProcFs,
    inspector: Inspector,
    symbols: Vec<SymbolTarget>,
    openssl: OpenSslConfig,
}

impl Planner {
    pub(crate) fn new(
        proc: ProcFs,
        inspector: Inspector,
        symbols: Vec<SymbolTarget>,
        openssl: OpenSslConfig,
    ) -> Planner {
        Planner {
            proc,
            inspector,
            symbols,
            openssl,
        }
    }

    /// Compute the probes of every symbol target from an inspected binary:
    /// entry uprobes, one uprobe per return site and uretprobes.
    pub(crate) fn symbol_probes(
        desc: &BinaryDescriptor,
        targets: &[SymbolTarget],
    ) -> Result<Vec<ProbeSpec>, InspectError> {
        let mut probes = Vec::new();

        for target in targets.iter() {
            let name = target.symbol.as_str();

            if target.returns.is_some() {
                let site = desc.function_site(name)?;
                if let Some(prog) = &target.entry {
                    probes.push(ProbeSpec::uprobe(name, site.entry_offset as u64, prog));
                }
                if let Some(prog) = &target.returns {
                    site.return_offsets
                        .iter()
                        .for_each(|off| probes.push(ProbeSpec::uprobe(name, *off as u64, prog)));
                }
                if let Some(prog) = &target.retprobe {
                    probes.push(ProbeSpec::uretprobe(name, site.entry_offset as u64, prog));
                }
                continue;
            }

            let offset = desc.file_offset(name)?;
            if let Some(prog) = &target.entry {
                probes.push(ProbeSpec::uprobe(name, offset, prog));
            }
            if let Some(prog) = &target.retprobe {
                probes.push(ProbeSpec::uretprobe(name, offset, prog));
            }
        }

        Ok(probes)
    }

    /// Compute the probes needed for a container. Nothing is attached here,
    /// this only reads from procfs and the container's filesystem.
    pub(crate) fn plan(&self, info: &ContainerInfo) -> Result<TargetPlan> {
        let pid = info.pid;
        let pid_ns = self.proc.pid_namespace(pid)?;
        let mut executables = Vec::new();

        let openssl = self.openssl_plan(pid)?;

        let path = self.proc.executable(pid)?;
        match self.inspector.inspect(&path) {
            Ok(desc) => {
                let probes = Self::symbol_probes(&desc, &self.symbols)
                    .with_context(|| format!("Could not inspect {}", path.display()))?;
                info!(
                    "{}: {} {}, {} probe(s)",
                    path.display(),
                    desc.architecture,
                    desc.toolchain
                        .as_ref()
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                    probes.len()
                );
                executables.push(ExecutablePlan {
                    exe: Executable::open(&path)?,
                    probes,
                });
            }
            // Not a Go binary, it can still use OpenSSL.
            Err(InspectError::ToolchainNotDetected) if openssl.is_some() => {
                debug!("{} is not a Go binary, only probing OpenSSL", path.display());
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Could not inspect {}", path.display())))
            }
        }

        executables.extend(openssl);
        Ok(TargetPlan {
            pid_ns,
            executables,
        })
    }

    fn openssl_plan(&self, pid: u32) -> Result<Option<ExecutablePlan>> {
        if !self.openssl.enabled {
            return Ok(None);
        }

        let Some(path) = self
            .openssl
            .libraries
            .iter()
            .map(|lib| self.proc.path_in_root(pid, lib))
            .find(|path| path.exists())
        else {
            debug!("No OpenSSL library found for pid {pid}");
            return Ok(None);
        };

        let desc = self
            .inspector
            .inspect_library(&path)
            .with_context(|| format!("Could not inspect {}", path.display()))?;

        // Libraries export a subset of the functions depending on their
        // version.
        let targets: Vec<SymbolTarget> = self
            .openssl
            .symbols
            .iter()
            .filter(|t| desc.has_symbol(&t.symbol))
            .cloned()
            .collect();
        let probes = Self::symbol_probes(&desc, &targets)
            .with_context(|| format!("Could not inspect {}", path.display()))?;
        if probes.is_empty() {
            return Ok(None);
        }

        Ok(Some(ExecutablePlan {
            exe: Executable::open(&path)?,
            probes,
        }))
    }
}
