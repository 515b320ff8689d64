//! # Configuration
//!
//! Agent configuration, read from a YAML file. Every field has a default so
//! an empty (or missing) file is a valid configuration; command line options
//! take precedence over the file.

use std::{fs, path::Path, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{
    classify::{InterpreterKind, DEFAULT_PLAINTEXT_THRESHOLD},
    core::{
        events::{ReaderConfig, ReassemblyConfig, DEFAULT_PAYLOAD_CAPACITY},
        inspect::GoVersion,
        probe::{OpenSslConfig, SymbolTarget},
    },
};

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Config {
    /// Host procfs, eg. /host/proc when running in a pod.
    pub(crate) proc_root: PathBuf,
    /// Compiled BPF object holding the probe programs and maps.
    pub(crate) bpf_object: Option<PathBuf>,
    /// Pods are only targeted when they carry this label.
    pub(crate) opt_in_label: String,
    /// Oldest Go toolchain supported. Quote it in YAML ("1.20"), unquoted
    /// values are read as floats.
    pub(crate) min_toolchain: GoVersion,
    /// Go functions to probe.
    pub(crate) symbols: Vec<SymbolTarget>,
    pub(crate) openssl: OpenSslConfig,
    pub(crate) reader: ReaderSettings,
    pub(crate) classify: ClassifySettings,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            proc_root: PathBuf::from("/proc"),
            bpf_object: None,
            opt_in_label: "ebpf".to_string(),
            min_toolchain: GoVersion::new(1, 18),
            symbols: SymbolTarget::go_tls(),
            openssl: OpenSslConfig::default(),
            reader: ReaderSettings::default(),
            classify: ClassifySettings::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ReaderSettings {
    /// Maximum payload size of a raw record. Must match the BPF programs.
    pub(crate) payload_capacity: usize,
    pub(crate) max_message_size: usize,
    pub(crate) reassembly_timeout_ms: u64,
    /// Maximum number of messages being reassembled at once.
    pub(crate) max_in_flight: usize,
    /// Size of the queue feeding the classification pipeline.
    pub(crate) queue_size: usize,
    pub(crate) stats_interval_secs: u64,
}

impl Default for ReaderSettings {
    fn default() -> ReaderSettings {
        ReaderSettings {
            payload_capacity: DEFAULT_PAYLOAD_CAPACITY,
            max_message_size: 1024 * 1024,
            reassembly_timeout_ms: 5000,
            max_in_flight: 4096,
            queue_size: 1024,
            stats_interval_secs: 60,
        }
    }
}

impl ReaderSettings {
    pub(crate) fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            payload_capacity: self.payload_capacity,
            reassembly: ReassemblyConfig {
                max_message_size: self.max_message_size,
                timeout_ns: self.reassembly_timeout_ms.saturating_mul(1_000_000),
                max_in_flight: self.max_in_flight,
            },
            stats_interval: Duration::from_secs(self.stats_interval_secs.max(1)),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ClassifySettings {
    /// Minimum ratio of printable bytes for a message to be plain text.
    pub(crate) plaintext_threshold: f64,
    /// Interpreters, in the order messages are offered to them.
    pub(crate) interpreters: Vec<InterpreterKind>,
}

impl Default for ClassifySettings {
    fn default() -> ClassifySettings {
        ClassifySettings {
            plaintext_threshold: DEFAULT_PLAINTEXT_THRESHOLD,
            interpreters: InterpreterKind::defaults(),
        }
    }
}

impl Config {
    pub(crate) fn parse(content: &str) -> Result<Config> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration from a file, or use the defaults.
    pub(crate) fn load(path: Option<&Path>) -> Result<Config> {
        let Some(path) = path else {
            return Ok(Config::default());
        };

        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read configuration {}", path.display()))?;
        // An empty document is not an empty map for serde_yaml.
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        Config::parse(&content)
            .with_context(|| format!("Invalid configuration {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        let threshold = self.classify.plaintext_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            anyhow::bail!("plaintext_threshold must be within [0, 1] (got {threshold})");
        }
        if self.reader.queue_size == 0 {
            anyhow::bail!("reader queue_size can't be 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() -> Result<()> {
        let config = Config::load(None)?;
        assert_eq!(config.proc_root, PathBuf::from("/proc"));
        assert_eq!(config.opt_in_label, "ebpf");
        assert_eq!(config.min_toolchain, GoVersion::new(1, 18));
        assert_eq!(config.symbols, SymbolTarget::go_tls());
        assert!(!config.openssl.enabled);
        assert_eq!(config.reader.payload_capacity, 30720);
        assert_eq!(config.classify.plaintext_threshold, 0.70);
        assert_eq!(config.classify.interpreters, InterpreterKind::defaults());
        Ok(())
    }

    #[test]
    fn from_file() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"
proc_root: /host/proc
min_toolchain: "1.20"
symbols:
  - symbol: crypto/tls.(*Conn).Read
    entry: gotls_read_enter
    returns: gotls_read_return
openssl:
  enabled: true
reader:
  reassembly_timeout_ms: 250
classify:
  plaintext_threshold: 0.9
  interpreters: [plaintext, http-request]
"#
        )?;

        let config = Config::load(Some(file.path()))?;
        assert_eq!(config.proc_root, PathBuf::from("/host/proc"));
        assert_eq!(config.min_toolchain, GoVersion::new(1, 20));
        assert_eq!(config.symbols.len(), 1);
        assert_eq!(config.symbols[0].returns.as_deref(), Some("gotls_read_return"));
        assert!(config.openssl.enabled);
        assert_eq!(config.openssl.symbols, SymbolTarget::openssl());
        assert_eq!(
            config.classify.interpreters,
            vec![InterpreterKind::Plaintext, InterpreterKind::HttpRequest]
        );

        let reader = config.reader.reader_config();
        assert_eq!(reader.reassembly.timeout_ns, 250_000_000);
        assert_eq!(reader.payload_capacity, 30720);
        Ok(())
    }

    #[test]
    fn empty_file() -> Result<()> {
        let file = tempfile::NamedTempFile::new()?;
        assert_eq!(Config::load(Some(file.path()))?.opt_in_label, "ebpf");
        Ok(())
    }

    #[test]
    fn invalid() {
        assert!(Config::parse("unknown: 1").is_err());
        assert!(Config::parse("classify:\n  plaintext_threshold: 1.5").is_err());
        assert!(Config::parse("classify:\n  interpreters: [grpc]").is_err());
        assert!(Config::load(Some(Path::new("/nonexistent/tapline.yaml"))).is_err());
    }
}
