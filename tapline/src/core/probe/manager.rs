use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use anyhow::{Context, Result};
use log::{debug, info, warn};

use super::{Executable, Planner, ProbeBackend, ProbeIdentity, ProbeLink, TargetPlan};
use crate::{
    core::targets::ContainerRegistry,
    events::{ContainerId, ContainerInfo},
};

/// A kernel probe and the containers using it.
struct AttachedProbe {
    link: Box<dyn ProbeLink>,
    users: HashSet<ContainerId>,
}

/// A container whose probes are attached.
struct AttachedContainer {
    pid_ns: u32,
    /// Probes referenced by the container.
    probes: Vec<ProbeIdentity>,
}

/// Everything shared between containers, only accessed under the manager's
/// lock.
struct ManagerState {
    backend: Box<dyn ProbeBackend>,
    probes: HashMap<ProbeIdentity, AttachedProbe>,
    /// Number of containers per enabled PID namespace.
    namespaces: HashMap<u32, usize>,
    containers: HashMap<ContainerId, AttachedContainer>,
}

impl ManagerState {
    fn enable_namespace(&mut self, pid_ns: u32) -> Result<()> {
        match self.namespaces.get_mut(&pid_ns) {
            Some(count) => *count += 1,
            None => {
                self.backend.enable_target(pid_ns)?;
                self.namespaces.insert(pid_ns, 1);
            }
        }
        Ok(())
    }

    fn disable_namespace(&mut self, pid_ns: u32) {
        let Some(count) = self.namespaces.get_mut(&pid_ns) else {
            return;
        };

        *count -= 1;
        if *count == 0 {
            self.namespaces.remove(&pid_ns);
            if let Err(e) = self.backend.disable_target(pid_ns) {
                warn!("Could not disable PID namespace {pid_ns}: {e}");
            }
        }
    }

    /// Reference a probe on behalf of a container, attaching it if nobody did
    /// already. Returns false if the container already referenced it.
    fn take(
        &mut self,
        exe: &Executable,
        identity: &ProbeIdentity,
        id: &ContainerId,
    ) -> Result<bool> {
        if let Some(probe) = self.probes.get_mut(identity) {
            return Ok(probe.users.insert(id.clone()));
        }

        let link = self.backend.attach(exe, identity)?;
        self.probes.insert(
            identity.clone(),
            AttachedProbe {
                link,
                users: HashSet::from([id.clone()]),
            },
        );
        Ok(true)
    }

    /// Drop the references a container holds, closing the probes no container
    /// uses anymore. Close errors are logged and do not stop the release.
    fn release(&mut self, id: &ContainerId, identities: &[ProbeIdentity]) {
        for identity in identities.iter() {
            let Some(probe) = self.probes.get_mut(identity) else {
                continue;
            };
            probe.users.remove(id);
            if !probe.users.is_empty() {
                continue;
            }

            if let Some(probe) = self.probes.remove(identity) {
                match probe.link.close() {
                    Ok(()) => debug!("Detached {identity}"),
                    Err(e) => warn!("Could not detach {identity}: {e}"),
                }
            }
        }
    }
}

/// Attaches and detaches the probes of containers.
///
/// Probes are keyed by their identity (binary inode, symbol, offset, kind and
/// program): containers sharing a binary share its probes, which are only
/// detached when the last container using them goes away. The same applies to
/// PID namespaces in the target enablement map.
///
/// All operations are serialized by a single lock; the slow inspection of the
/// binaries happens before taking it.
pub(crate) struct ProbeManager {
    planner: Planner,
    registry: ContainerRegistry,
    state: Mutex<ManagerState>,
}

impl ProbeManager {
    pub(crate) fn new(
        planner: Planner,
        backend: Box<dyn ProbeBackend>,
        registry: ContainerRegistry,
    ) -> ProbeManager {
        ProbeManager {
            planner,
            registry,
            state: Mutex::new(ManagerState {
                backend,
                probes: HashMap::new(),
                namespaces: HashMap::new(),
                containers: HashMap::new(),
            }),
        }
    }

    /// Attach the probes of a container. Attaching an already attached
    /// container is a no-op.
    ///
    /// On failure every reference taken by the call is released: probes it
    /// created are detached, shared ones only lose the container as a user
    /// and its PID namespace is disabled if it enabled it.
    pub(crate) fn attach_to_target(&self, info: &ContainerInfo) -> Result<()> {
        if self.is_attached(&info.id) {
            debug!("Container {} is already attached", info.id);
            return Ok(());
        }

        let plan = self
            .planner
            .plan(info)
            .with_context(|| format!("Could not compute probes for container {}", info.id))?;
        self.attach_plan(info, plan)
    }

    fn attach_plan(&self, info: &ContainerInfo, plan: TargetPlan) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        // Lost a race with another attach.
        if state.containers.contains_key(&info.id) {
            return Ok(());
        }

        state
            .enable_namespace(plan.pid_ns)
            .with_context(|| format!("Could not enable container {}", info.id))?;
        self.registry.insert(plan.pid_ns, info.clone());

        let mut taken = Vec::new();
        for exe in plan.executables.iter() {
            for spec in exe.probes.iter() {
                let identity = ProbeIdentity::new(exe.exe.inode, spec);

                match state.take(&exe.exe, &identity, &info.id) {
                    Ok(true) => taken.push(identity),
                    Ok(false) => (),
                    Err(e) => {
                        state.release(&info.id, &taken);
                        self.registry.remove(plan.pid_ns, &info.id);
                        state.disable_namespace(plan.pid_ns);
                        return Err(e.context(format!(
                            "Could not attach probes for container {} ({})",
                            info.id,
                            exe.exe.path.display()
                        )));
                    }
                }
            }
        }

        info!(
            "Attached container {} (pid {}, PID namespace {}): {} probe(s)",
            info.id,
            info.pid,
            plan.pid_ns,
            taken.len()
        );
        state.containers.insert(
            info.id.clone(),
            AttachedContainer {
                pid_ns: plan.pid_ns,
                probes: taken,
            },
        );

        Ok(())
    }

    /// Detach the probes of a container. Probes shared with other containers
    /// stay attached. Detaching an unknown container is a no-op.
    pub(crate) fn detach_from_target(&self, info: &ContainerInfo) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(container) = state.containers.remove(&info.id) else {
            debug!("Container {} is not attached", info.id);
            return Ok(());
        };

        self.registry.remove(container.pid_ns, &info.id);
        state.disable_namespace(container.pid_ns);
        state.release(&info.id, &container.probes);

        info!("Detached container {}", info.id);
        Ok(())
    }

    /// Detach everything. Called on shutdown, and when the manager is
    /// dropped.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock().unwrap();

        let containers: Vec<_> = state.containers.drain().collect();
        for (id, container) in containers.iter() {
            self.registry.remove(container.pid_ns, id);
        }

        let probes: Vec<_> = state.probes.drain().collect();
        if !probes.is_empty() {
            info!("Detaching {} probe(s)", probes.len());
        }
        for (identity, probe) in probes.into_iter() {
            if let Err(e) = probe.link.close() {
                warn!("Could not detach {identity}: {e}");
            }
        }

        let namespaces: Vec<u32> = state.namespaces.drain().map(|(ns, _)| ns).collect();
        for ns in namespaces.into_iter() {
            if let Err(e) = state.backend.disable_target(ns) {
                warn!("Could not disable PID namespace {ns}: {e}");
            }
        }
    }

    pub(crate) fn is_attached(&self, id: &ContainerId) -> bool {
        self.state.lock().unwrap().containers.contains_key(id)
    }

    /// Number of probes currently attached.
    pub(crate) fn probe_count(&self) -> usize {
        self.state.lock().unwrap().probes.len()
    }

    /// Number of containers using a probe.
    #[cfg(test)]
    pub(crate) fn probe_users(&self, identity: &ProbeIdentity) -> usize {
        self.state
            .lock()
            .unwrap()
            .probes
            .get(identity)
            .map(|p| p.users.len())
            .unwrap_or(0)
    }
}

impl Drop for ProbeManager {
    fn drop(&mut self) {
        self.close();
    }
}
