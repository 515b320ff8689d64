//! Reassembly of fragments into complete messages.
//!
//! Fragments of a message are expected in order. A fragment not continuing
//! the in-flight message of its (pid, direction) key (different message size
//! or unexpected position) discards it: out of order delivery is treated as a
//! reset, not reordered.

use std::collections::HashMap;

use log::trace;

use super::RawEventRecord;
use crate::events::{ContainerInfo, Direction};

/// Bounds of the reassembly state.
#[derive(Clone, Debug)]
pub(crate) struct ReassemblyConfig {
    /// Messages larger than this are never reassembled.
    pub(crate) max_message_size: usize,
    /// In-flight messages not receiving fragments for this long (in record
    /// time, nanoseconds) are discarded.
    pub(crate) timeout_ns: u64,
    /// Maximum number of in-flight messages. The stalest one is evicted to
    /// make room.
    pub(crate) max_in_flight: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            max_message_size: 1024 * 1024,
            timeout_ns: 5_000_000_000,
            max_in_flight: 4096,
        }
    }
}

/// A complete application message.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Message {
    pub(crate) pid: u32,
    pub(crate) direction: Direction,
    /// Timestamp of the first fragment.
    pub(crate) timestamp: u64,
    /// Container the message was attributed to.
    pub(crate) container: Option<ContainerInfo>,
    pub(crate) data: Vec<u8>,
}

impl Message {
    pub(crate) fn new(pid: u32, direction: Direction, timestamp: u64, data: Vec<u8>) -> Message {
        Message {
            pid,
            direction,
            timestamp,
            container: None,
            data,
        }
    }
}

type Key = (u32, Direction);

struct InFlight {
    total_size: usize,
    first_seen: u64,
    last_seen: u64,
    data: Vec<u8>,
}

#[derive(Default)]
pub(crate) struct Reassembler {
    config: ReassemblyConfig,
    in_flight: HashMap<Key, InFlight>,
    /// Messages and fragments discarded since the last call to
    /// `take_discarded()`.
    discarded: u64,
}

impl Reassembler {
    pub(crate) fn new(config: ReassemblyConfig) -> Reassembler {
        Reassembler {
            config,
            ..Default::default()
        }
    }

    /// Add a fragment. Returns the message it completes, if any.
    pub(crate) fn push(&mut self, rec: &RawEventRecord) -> Option<Message> {
        let key = (rec.pid, rec.direction);
        let total_size = rec.total_size as usize;

        // A fragment going past its message is corrupted, and so is the
        // stream it belongs to.
        if rec.position as usize + rec.payload.len() > total_size {
            trace!(
                "Fragment {}+{} of pid {} ({}) goes past its message size {}",
                rec.position,
                rec.payload.len(),
                rec.pid,
                rec.direction,
                total_size
            );
            if self.in_flight.remove(&key).is_some() {
                self.discarded += 1;
            }
            self.discarded += 1;
            return None;
        }

        if let Some(buf) = self.in_flight.get(&key) {
            if buf.total_size != total_size
                || buf.data.len() != rec.position as usize
                || rec.timestamp.saturating_sub(buf.last_seen) > self.config.timeout_ns
            {
                trace!(
                    "Discarding in-flight message of pid {} ({}): {}/{} bytes",
                    rec.pid,
                    rec.direction,
                    buf.data.len(),
                    buf.total_size
                );
                self.in_flight.remove(&key);
                self.discarded += 1;
            }
        }

        if let Some(buf) = self.in_flight.get_mut(&key) {
            buf.data.extend_from_slice(rec.payload);
            buf.last_seen = rec.timestamp;

            if buf.data.len() < buf.total_size {
                return None;
            }
            return self.in_flight.remove(&key).map(|buf| {
                Message::new(rec.pid, rec.direction, buf.first_seen, buf.data)
            });
        }

        // New message.
        if rec.position != 0 || total_size > self.config.max_message_size {
            self.discarded += 1;
            return None;
        }

        if rec.payload.len() == total_size {
            return Some(Message::new(
                rec.pid,
                rec.direction,
                rec.timestamp,
                rec.payload.to_vec(),
            ));
        }

        if self.in_flight.len() >= self.config.max_in_flight {
            self.expire(rec.timestamp);
            if self.in_flight.len() >= self.config.max_in_flight {
                self.evict_stalest();
            }
        }

        let mut data = Vec::with_capacity(total_size);
        data.extend_from_slice(rec.payload);
        self.in_flight.insert(
            key,
            InFlight {
                total_size,
                first_seen: rec.timestamp,
                last_seen: rec.timestamp,
                data,
            },
        );
        None
    }

    /// Discard the in-flight messages which did not get fragments since
    /// `now - timeout`.
    pub(crate) fn expire(&mut self, now: u64) {
        let timeout = self.config.timeout_ns;
        let before = self.in_flight.len();

        self.in_flight
            .retain(|_, buf| now.saturating_sub(buf.last_seen) <= timeout);
        self.discarded += (before - self.in_flight.len()) as u64;
    }

    fn evict_stalest(&mut self) {
        let stalest = self
            .in_flight
            .iter()
            .min_by_key(|(_, buf)| buf.last_seen)
            .map(|(key, _)| *key);

        if let Some(key) = stalest {
            self.in_flight.remove(&key);
            self.discarded += 1;
        }
    }

    /// Number of in-flight messages.
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub(crate) fn take_discarded(&mut self) -> u64 {
        std::mem::take(&mut self.discarded)
    }

    /// Drop all in-flight messages, eg. on shutdown.
    pub(crate) fn clear(&mut self) {
        self.in_flight.clear();
    }
}
