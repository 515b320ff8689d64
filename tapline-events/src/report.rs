//! Report records, one per classified application message.

use std::{collections::BTreeSet, fmt};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{ContainerInfo, Direction, EventTag};

/// Summary of a parsed HTTP request.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct HttpRequestSection {
    pub method: String,
    pub path: String,
    /// Minor HTTP/1 version.
    pub version: u8,
    /// Value of the Host header.
    pub host: Option<String>,
    /// Size of the body available in the message.
    pub body_len: usize,
}

/// Summary of a parsed HTTP response.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct HttpResponseSection {
    pub status: u16,
    pub reason: Option<String>,
    pub version: u8,
    pub body_len: usize,
}

/// A reconstructed message and what was learned about it.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReportEvent {
    /// Timestamp of the first fragment, in nanoseconds since boot.
    pub timestamp: u64,
    pub pid: u32,
    pub direction: Direction,
    /// Container the message was captured in, if it could be resolved.
    pub container: Option<ContainerInfo>,
    /// Size of the reconstructed message.
    pub size: usize,
    /// Name of the interpreter that accepted the message.
    pub kind: Option<String>,
    pub http_request: Option<HttpRequestSection>,
    pub http_response: Option<HttpResponseSection>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<EventTag>,
}

impl ReportEvent {
    pub fn new(timestamp: u64, pid: u32, direction: Direction, size: usize) -> ReportEvent {
        ReportEvent {
            timestamp,
            pid,
            direction,
            container: None,
            size,
            kind: None,
            http_request: None,
            http_response: None,
            tags: BTreeSet::new(),
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(line: &str) -> Result<ReportEvent> {
        Ok(serde_json::from_str(line)?)
    }
}

impl fmt::Display for ReportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pid {}", self.timestamp, self.pid)?;
        if let Some(container) = &self.container {
            write!(f, " [{container}]")?;
        }
        write!(f, " {} {}B", self.direction, self.size)?;
        if let Some(kind) = &self.kind {
            write!(f, " {kind}")?;
        }

        if let Some(req) = &self.http_request {
            write!(f, " {} {} HTTP/1.{}", req.method, req.path, req.version)?;
            if let Some(host) = &req.host {
                write!(f, " host={host}")?;
            }
        }
        if let Some(resp) = &self.http_response {
            write!(f, " HTTP/1.{} {}", resp.version, resp.status)?;
            if let Some(reason) = &resp.reason {
                write!(f, " {reason}")?;
            }
        }

        if !self.tags.is_empty() {
            let tags: Vec<String> = self.tags.iter().map(|t| t.to_string()).collect();
            write!(f, " tags={}", tags.join(","))?;
        }
        Ok(())
    }
}
