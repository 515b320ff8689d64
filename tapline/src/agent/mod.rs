//! # Agent
//!
//! Wires the probe manager, the event reader and the classification
//! pipeline together, and handles the shutdown sequence.

use std::{
    sync::{mpsc, Arc},
    thread,
};

use anyhow::{anyhow, Result};
use log::{debug, info};

use crate::{
    classify::Pipeline,
    config::Config,
    core::{
        events::{EventReader, NamespaceResolver, RecordSource},
        inspect::Inspector,
        probe::{Planner, ProbeBackend, ProbeManager},
        targets::ContainerRegistry,
        user::proc::ProcFs,
    },
    helpers::signals::Running,
    report::Printer,
};

pub(crate) mod cli;
pub(crate) mod controller;
pub(crate) use controller::*;

pub(crate) struct Agent {
    config: Config,
    backend: Box<dyn ProbeBackend>,
    source: Box<dyn RecordSource>,
    resolver: Box<dyn NamespaceResolver>,
}

impl Agent {
    pub(crate) fn new(
        config: Config,
        backend: Box<dyn ProbeBackend>,
        source: Box<dyn RecordSource>,
        resolver: Box<dyn NamespaceResolver>,
    ) -> Agent {
        Agent {
            config,
            backend,
            source,
            resolver,
        }
    }

    /// Run until `run` is terminated. Pod events are consumed from `pods`
    /// and classified messages are written to the printers.
    pub(crate) fn run(
        self,
        run: Running,
        pods: mpsc::Receiver<PodEvent>,
        printers: Vec<Printer>,
    ) -> Result<()> {
        let config = self.config;
        let registry = ContainerRegistry::new();

        let planner = Planner::new(
            ProcFs::new(&config.proc_root),
            Inspector::new(config.min_toolchain.clone()),
            config.symbols.clone(),
            config.openssl.clone(),
        );
        let manager = Arc::new(ProbeManager::new(planner, self.backend, registry.clone()));

        // Classification pipeline.
        let pipeline = Pipeline::from_kinds(
            &config.classify.interpreters,
            config.classify.plaintext_threshold,
        )?;
        info!("Interpreters: {}", pipeline.stage_names().join(", "));
        let pipeline_stats = pipeline.stats();
        let (msg_tx, msg_rx) = mpsc::sync_channel(config.reader.queue_size);
        let pipeline = pipeline.start(msg_rx, printers)?;

        // Event reader, closed on termination.
        let reader = EventReader::new(
            config.reader.reader_config(),
            self.resolver,
            registry.clone(),
            msg_tx,
        );
        let reader_stats = reader.stats();
        let handle = reader.handle();
        run.on_terminate(move || handle.close());

        let source = self.source.start(reader.sender(), run.clone())?;

        // Pod lifecycle.
        let controller = TargetController::new(Arc::clone(&manager), &config.opt_in_label);
        let controller_run = run.clone();
        let controller = thread::Builder::new()
            .name("controller".to_string())
            .spawn(move || controller.run(pods, controller_run))?;

        info!("Waiting for events, press Ctrl-C to stop");
        let ret = reader.run();
        // The reader can also stop on its own, make sure everything else
        // does.
        run.terminate();

        debug!("Stopping the event source");
        source
            .join()
            .map_err(|_| anyhow!("Failed to join the event source thread"))?;
        debug!("Stopping the pipeline");
        pipeline
            .join()
            .map_err(|_| anyhow!("Failed to join the pipeline thread"))?;
        controller
            .join()
            .map_err(|_| anyhow!("Failed to join the controller thread"))?;

        info!(
            "Detaching {} container(s), {} probe(s)",
            registry.len(),
            manager.probe_count()
        );
        for (pid_ns, info) in registry.snapshot().iter() {
            debug!("Detaching {info} (PID namespace {pid_ns})");
        }
        manager.close();

        reader_stats.log();
        pipeline_stats.log();
        ret
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap, fs, os::unix::fs::symlink, path::Path, sync::mpsc::SyncSender,
        time::Duration,
    };

    use super::*;
    use crate::{
        core::{
            events::{raw_record, SourceItem},
            inspect::test_elf::go_tls_binary,
            probe::fake::FakeBackend,
        },
        events::{ContainerId, ContainerInfo, Direction, EventTag, ReportEvent},
        report::{PrintFormat, SharedBuffer},
    };

    // Replays its items once the gate opens.
    struct GatedSource {
        gate: mpsc::Receiver<()>,
        items: Vec<SourceItem>,
    }

    impl RecordSource for GatedSource {
        fn start(
            self: Box<Self>,
            tx: SyncSender<SourceItem>,
            _: Running,
        ) -> Result<thread::JoinHandle<()>> {
            Ok(thread::spawn(move || {
                if self.gate.recv().is_err() {
                    return;
                }
                for item in self.items.into_iter() {
                    if tx.send(item).is_err() {
                        break;
                    }
                }
            }))
        }
    }

    fn fake_pid(proc: &Path, pid: u32, ns: u32) {
        let dir = proc.join(pid.to_string());
        fs::create_dir_all(dir.join("ns")).unwrap();
        fs::create_dir_all(dir.join("root/app")).unwrap();
        fs::write(dir.join("root/app/server"), go_tls_binary("go1.22.1")).unwrap();
        symlink(format!("pid:[{ns}]"), dir.join("ns/pid")).unwrap();
        symlink("/app/server", dir.join("exe")).unwrap();
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("timed out");
    }

    #[test]
    fn end_to_end() -> Result<()> {
        let proc = tempfile::tempdir()?;
        fake_pid(proc.path(), 42, 1001);

        let request = b"POST /checkout HTTP/1.1\r\nHost: shop.example.com\r\n\r\ncard=4111111111111111";
        let (first, second) = request.split_at(20);
        let total = request.len() as u32;
        let items = vec![
            SourceItem::Lost(3),
            SourceItem::Sample(raw_record(42, Direction::Egress, 0, total, 10, first)),
            SourceItem::Sample(raw_record(42, Direction::Egress, 20, total, 20, second)),
            // Not a target.
            SourceItem::Sample(raw_record(7, Direction::Egress, 0, 5, 30, b"HELLO")),
        ];

        let (gate_tx, gate) = mpsc::channel();
        let backend = FakeBackend::default();
        let config = Config {
            proc_root: proc.path().to_path_buf(),
            ..Default::default()
        };
        let agent = Agent::new(
            config,
            Box::new(backend.clone()),
            Box::new(GatedSource { gate, items }),
            Box::new(ProcFs::new(proc.path())),
        );

        let (pods_tx, pods) = mpsc::channel();
        pods_tx.send(PodEvent::Running {
            labels: HashMap::from([("ebpf".to_string(), "true".to_string())]),
            containers: vec![
                ContainerInfo::new(ContainerId::parse("containerd://abcd")?, 42)
                    .with_pod_ip("10.0.0.9"),
            ],
        })?;

        let buf = SharedBuffer::default();
        let printer = Printer::new(Box::new(buf.clone()), PrintFormat::Json);
        let run = Running::ignore_signals();
        let agent_run = run.clone();
        let agent = thread::spawn(move || agent.run(agent_run, pods, vec![printer]));

        // Probes attached, let the records flow.
        let b = backend.clone();
        wait_for(move || b.kernel().handles() == 4);
        assert!(backend.kernel().enabled.contains(&1001));
        gate_tx.send(())?;

        let out = buf.clone();
        wait_for(move || !out.lines().is_empty());
        run.terminate();
        agent.join().unwrap()?;

        // Everything was detached on shutdown.
        assert_eq!(backend.kernel().handles(), 0);
        assert!(backend.kernel().enabled.is_empty());

        let lines = buf.lines();
        assert_eq!(lines.len(), 1);
        let event = ReportEvent::from_json(&lines[0])?;
        assert_eq!(event.pid, 42);
        assert_eq!(event.size, request.len());
        assert_eq!(event.http_request.unwrap().path, "/checkout");
        assert_eq!(event.container.unwrap().pod_ip.as_deref(), Some("10.0.0.9"));
        assert!(event.tags.contains(&EventTag::Pci));
        drop(pods_tx);
        Ok(())
    }
}
