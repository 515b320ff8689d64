//! Pod lifecycle handling: decides which containers are targeted and drives
//! the probe manager accordingly.

use std::{
    collections::HashMap,
    sync::{
        mpsc::{Receiver, RecvTimeoutError},
        Arc,
    },
    time::Duration,
};

use log::{debug, warn};

use crate::{core::probe::ProbeManager, events::ContainerInfo, helpers::signals::Running};

/// Timeout when waiting for pod events, between two termination checks.
const POD_EVENTS_POLL_TIMEOUT_MS: u64 = 200;

/// Pod lifecycle events, as reported by the pod reconciliation collaborator.
#[derive(Clone, Debug)]
pub(crate) enum PodEvent {
    /// The pod is running, with its labels and its containers.
    Running {
        labels: HashMap<String, String>,
        containers: Vec<ContainerInfo>,
    },
    /// The pod was deleted.
    Deleted { containers: Vec<ContainerInfo> },
}

pub(crate) struct TargetController {
    manager: Arc<ProbeManager>,
    /// Only pods with this label are targeted, whatever its value.
    opt_in_label: String,
}

impl TargetController {
    pub(crate) fn new(manager: Arc<ProbeManager>, opt_in_label: &str) -> TargetController {
        TargetController {
            manager,
            opt_in_label: opt_in_label.to_string(),
        }
    }

    /// Handle a pod event. Failures are logged per container and never stop
    /// the processing of the others; their number is returned.
    pub(crate) fn handle(&self, event: PodEvent) -> usize {
        let mut failures = 0;

        match event {
            PodEvent::Running { labels, containers } => {
                if !labels.contains_key(&self.opt_in_label) {
                    debug!(
                        "Ignoring pod without the {} label ({} container(s))",
                        self.opt_in_label,
                        containers.len()
                    );
                    // The label might have been removed.
                    return self.detach_all(&containers);
                }

                for container in containers.iter() {
                    if let Err(e) = self.manager.attach_to_target(container) {
                        warn!("Could not attach to container {container}: {e:#}");
                        failures += 1;
                    }
                }
            }
            PodEvent::Deleted { containers } => failures += self.detach_all(&containers),
        }

        failures
    }

    fn detach_all(&self, containers: &[ContainerInfo]) -> usize {
        containers
            .iter()
            .filter(|c| {
                if let Err(e) = self.manager.detach_from_target(c) {
                    warn!("Could not detach from container {c}: {e:#}");
                    return true;
                }
                false
            })
            .count()
    }

    /// Handle pod events until termination or until all senders are gone.
    pub(crate) fn run(&self, rx: Receiver<PodEvent>, run: Running) {
        while run.running() {
            match rx.recv_timeout(Duration::from_millis(POD_EVENTS_POLL_TIMEOUT_MS)) {
                Ok(event) => {
                    self.handle(event);
                }
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, os::unix::fs::symlink, path::Path, sync::mpsc};

    use super::*;
    use crate::{
        core::{
            inspect::{test_elf::go_tls_binary, GoVersion, Inspector},
            probe::{fake::FakeBackend, OpenSslConfig, Planner, SymbolTarget},
            targets::ContainerRegistry,
            user::proc::ProcFs,
        },
        events::ContainerId,
    };

    fn fake_pid(proc: &Path, pid: u32, ns: u32, version: &str) {
        let dir = proc.join(pid.to_string());
        fs::create_dir_all(dir.join("ns")).unwrap();
        fs::create_dir_all(dir.join("root/app")).unwrap();
        fs::write(dir.join("root/app/server"), go_tls_binary(version)).unwrap();
        symlink(format!("pid:[{ns}]"), dir.join("ns/pid")).unwrap();
        symlink("/app/server", dir.join("exe")).unwrap();
    }

    fn controller(proc: &Path) -> (TargetController, Arc<ProbeManager>, FakeBackend) {
        let backend = FakeBackend::default();
        let planner = Planner::new(
            ProcFs::new(proc),
            Inspector::new(GoVersion::new(1, 18)),
            SymbolTarget::go_tls(),
            OpenSslConfig::default(),
        );
        let manager = Arc::new(ProbeManager::new(
            planner,
            Box::new(backend.clone()),
            ContainerRegistry::new(),
        ));
        (
            TargetController::new(Arc::clone(&manager), "ebpf"),
            manager,
            backend,
        )
    }

    fn container(id: &str, pid: u32) -> ContainerInfo {
        ContainerInfo::new(ContainerId::parse(&format!("containerd://{id}")).unwrap(), pid)
    }

    fn labels(labels: &[&str]) -> HashMap<String, String> {
        labels
            .iter()
            .map(|l| (l.to_string(), String::new()))
            .collect()
    }

    #[test]
    fn label_gate() {
        let proc = tempfile::tempdir().unwrap();
        fake_pid(proc.path(), 42, 1001, "go1.21.5");
        let (controller, manager, _) = controller(proc.path());
        let a = container("a", 42);

        let failures = controller.handle(PodEvent::Running {
            labels: labels(&["app"]),
            containers: vec![a.clone()],
        });
        assert_eq!(failures, 0);
        assert!(!manager.is_attached(&a.id));

        controller.handle(PodEvent::Running {
            labels: labels(&["app", "ebpf"]),
            containers: vec![a.clone()],
        });
        assert!(manager.is_attached(&a.id));

        // Label removed.
        controller.handle(PodEvent::Running {
            labels: labels(&["app"]),
            containers: vec![a.clone()],
        });
        assert!(!manager.is_attached(&a.id));
    }

    #[test]
    fn failures_are_isolated() {
        let proc = tempfile::tempdir().unwrap();
        fake_pid(proc.path(), 42, 1001, "go1.21.5");
        fake_pid(proc.path(), 43, 1002, "go1.16.2");
        let (controller, manager, backend) = controller(proc.path());
        let (a, b, c) = (container("a", 42), container("b", 43), container("c", 44));

        let failures = controller.handle(PodEvent::Running {
            labels: labels(&["ebpf"]),
            containers: vec![b.clone(), c.clone(), a.clone()],
        });
        assert_eq!(failures, 2);
        assert!(manager.is_attached(&a.id));
        assert_eq!(backend.kernel().handles(), 4);

        controller.handle(PodEvent::Deleted {
            containers: vec![a.clone(), b.clone()],
        });
        assert!(!manager.is_attached(&a.id));
        assert_eq!(backend.kernel().handles(), 0);
    }

    #[test]
    fn run_until_disconnected() {
        let proc = tempfile::tempdir().unwrap();
        fake_pid(proc.path(), 42, 1001, "go1.21.5");
        let (controller, manager, _) = controller(proc.path());

        let (tx, rx) = mpsc::channel();
        tx.send(PodEvent::Running {
            labels: labels(&["ebpf"]),
            containers: vec![container("a", 42)],
        })
        .unwrap();
        drop(tx);

        controller.run(rx, Running::ignore_signals());
        assert_eq!(manager.probe_count(), 4);
    }
}
