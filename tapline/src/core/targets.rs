//! Registry of the containers currently targeted, indexed by PID namespace
//! inode. The probe manager writes to it on attach and detach, the event
//! reader reads from it to attribute records.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use crate::events::{ContainerId, ContainerInfo};

#[derive(Clone, Default)]
pub(crate) struct ContainerRegistry {
    // Containers of a pod can share their PID namespace, keep them all.
    inner: Arc<RwLock<HashMap<u32, Vec<ContainerInfo>>>>,
    /// Bumped every time a container is added or removed.
    generation: Arc<AtomicU64>,
}

impl ContainerRegistry {
    pub(crate) fn new() -> ContainerRegistry {
        ContainerRegistry::default()
    }

    /// Register a container in a PID namespace. Registering the same
    /// container twice updates it.
    pub(crate) fn insert(&self, pid_ns: u32, info: ContainerInfo) {
        let mut inner = self.inner.write().unwrap();
        let containers = inner.entry(pid_ns).or_default();

        match containers.iter_mut().find(|c| c.id == info.id) {
            Some(existing) => *existing = info,
            None => {
                containers.push(info);
                self.generation.fetch_add(1, Ordering::Release);
            }
        }
    }

    /// Unregister a container, returns true if it was known.
    pub(crate) fn remove(&self, pid_ns: u32, id: &ContainerId) -> bool {
        let mut inner = self.inner.write().unwrap();
        let Some(containers) = inner.get_mut(&pid_ns) else {
            return false;
        };

        let before = containers.len();
        containers.retain(|c| &c.id != id);
        let removed = containers.len() != before;

        if containers.is_empty() {
            inner.remove(&pid_ns);
        }
        if removed {
            self.generation.fetch_add(1, Ordering::Release);
        }
        removed
    }

    /// Changes each time the set of registered containers changes. Allows
    /// users to invalidate what they derived from it.
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Container owning a PID namespace. When several containers share it the
    /// first registered one is returned.
    pub(crate) fn lookup(&self, pid_ns: u32) -> Option<ContainerInfo> {
        self.inner
            .read()
            .unwrap()
            .get(&pid_ns)
            .and_then(|c| c.first().cloned())
    }

    /// Number of registered containers.
    pub(crate) fn len(&self) -> usize {
        self.inner.read().unwrap().values().map(Vec::len).sum()
    }

    /// Copy of the registry content, taken under the lock.
    pub(crate) fn snapshot(&self) -> Vec<(u32, ContainerInfo)> {
        self.inner
            .read()
            .unwrap()
            .iter()
            .flat_map(|(ns, containers)| containers.iter().map(|c| (*ns, c.clone())))
            .collect()
    }
}
