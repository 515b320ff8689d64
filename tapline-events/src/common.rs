use std::fmt;

use serde::{Deserialize, Serialize};

/// Direction of an intercepted buffer, seen from the probed process. The raw
/// values match the ones emitted by the BPF programs.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Data written by the process (eg. `tls.(*Conn).Write`).
    Egress,
    /// Data read by the process (eg. `tls.(*Conn).Read`).
    Ingress,
}

impl Direction {
    /// Convert the raw BPF representation into a Direction.
    pub fn from_raw(raw: u32) -> Option<Direction> {
        match raw {
            0 => Some(Direction::Egress),
            1 => Some(Direction::Ingress),
            _ => None,
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Direction::Egress => 0,
            Direction::Ingress => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Egress => write!(f, "egress"),
            Direction::Ingress => write!(f, "ingress"),
        }
    }
}
