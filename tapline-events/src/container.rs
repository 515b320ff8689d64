//! Container identity, as provided by the container runtime and the pod
//! reconciliation collaborators.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Errors returned while parsing a runtime container id.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ContainerIdError {
    /// The id does not follow the `<runtime>://<id>` form.
    #[error("container id '{0}' is not of the <runtime>://<id> form")]
    Malformed(String),
    /// Either the runtime or the id part is empty.
    #[error("container id '{0}' has an empty runtime or id")]
    Empty(String),
}

/// Container id as reported in pod statuses, eg. `containerd://0123abcd`.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContainerId {
    /// Runtime name, eg. `containerd` or `cri-o`.
    pub runtime: String,
    /// Runtime specific container id.
    pub id: String,
}

impl ContainerId {
    pub fn parse(raw: &str) -> Result<ContainerId, ContainerIdError> {
        let (runtime, id) = raw
            .split_once("://")
            .ok_or_else(|| ContainerIdError::Malformed(raw.to_string()))?;

        if runtime.is_empty() || id.is_empty() {
            return Err(ContainerIdError::Empty(raw.to_string()));
        }

        Ok(ContainerId {
            runtime: runtime.to_string(),
            id: id.to_string(),
        })
    }

    /// Short form of the id, useful for logs.
    pub fn short(&self) -> &str {
        match self.id.char_indices().nth(12) {
            Some((end, _)) => &self.id[..end],
            None => &self.id,
        }
    }
}

impl FromStr for ContainerId {
    type Err = ContainerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContainerId::parse(s)
    }
}

impl TryFrom<String> for ContainerId {
    type Error = ContainerIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ContainerId::parse(&value)
    }
}

impl From<ContainerId> for String {
    fn from(id: ContainerId) -> String {
        id.to_string()
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.runtime, self.id)
    }
}

/// Pod the container belongs to.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Information about a container that can be probed.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Runtime container id.
    pub id: ContainerId,
    /// Host pid of the container's main process.
    pub pid: u32,
    /// IP address of the pod, if known.
    pub pod_ip: Option<String>,
    /// Owning pod, if known.
    pub pod: Option<PodRef>,
}

impl ContainerInfo {
    pub fn new(id: ContainerId, pid: u32) -> ContainerInfo {
        ContainerInfo {
            id,
            pid,
            pod_ip: None,
            pod: None,
        }
    }

    pub fn with_pod_ip(mut self, ip: &str) -> ContainerInfo {
        self.pod_ip = Some(ip.to_string());
        self
    }

    pub fn with_pod(mut self, namespace: &str, name: &str) -> ContainerInfo {
        self.pod = Some(PodRef {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        self
    }
}

impl fmt::Display for ContainerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (pid {})", self.id.short(), self.pid)?;
        if let Some(pod) = &self.pod {
            write!(f, " in {pod}")?;
        }
        Ok(())
    }
}
