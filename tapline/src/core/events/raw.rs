//! Raw records as written by the BPF programs: a fixed header followed by a
//! fragment of the intercepted payload.

use std::mem;

use plain::Plain;

use crate::events::Direction;

/// Default capacity of the payload part of a record. Must match the BPF side.
pub(crate) const DEFAULT_PAYLOAD_CAPACITY: usize = 30720;

/// Header of a raw record, shared with the BPF programs.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct RawRecordHeader {
    pub(crate) pid: u32,
    /// Offset of the fragment in its message.
    pub(crate) position: u32,
    /// Monotonic timestamp, in nanoseconds.
    pub(crate) timestamp: u64,
    pub(crate) data_size: u32,
    pub(crate) total_size: u32,
    pub(crate) direction: u32,
    pad: u32,
}

unsafe impl Plain for RawRecordHeader {}

pub(crate) const RAW_RECORD_HEADER_SIZE: usize = mem::size_of::<RawRecordHeader>();

/// Errors returned when a raw record can't be parsed.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub(crate) enum RecordError {
    #[error("record is too short to hold a header ({0} bytes)")]
    TooShort(usize),
    #[error("fragment size {data_size} exceeds the payload capacity ({capacity})")]
    Oversized { data_size: u32, capacity: usize },
    #[error("fragment size {data_size} goes past the record ({available} bytes available)")]
    Truncated { data_size: u32, available: usize },
    #[error("invalid direction {0}")]
    Direction(u32),
    #[error("fragment {position}+{data_size} goes past the message size {total_size}")]
    OutOfBounds {
        position: u32,
        data_size: u32,
        total_size: u32,
    },
    #[error("message size is 0")]
    EmptyMessage,
}

/// A parsed raw record, borrowing its payload from the buffer it was read
/// from.
#[derive(Debug)]
pub(crate) struct RawEventRecord<'a> {
    pub(crate) pid: u32,
    pub(crate) position: u32,
    pub(crate) timestamp: u64,
    pub(crate) total_size: u32,
    pub(crate) direction: Direction,
    pub(crate) payload: &'a [u8],
}

impl<'a> RawEventRecord<'a> {
    /// Parse a record. Trailing bytes after the payload (eg. perf sample
    /// padding) are ignored.
    pub(crate) fn parse(data: &'a [u8], capacity: usize) -> Result<Self, RecordError> {
        let mut header = RawRecordHeader::default();
        plain::copy_from_bytes(&mut header, data).map_err(|_| RecordError::TooShort(data.len()))?;

        if header.data_size as usize > capacity {
            return Err(RecordError::Oversized {
                data_size: header.data_size,
                capacity,
            });
        }

        let available = data.len() - RAW_RECORD_HEADER_SIZE;
        if header.data_size as usize > available {
            return Err(RecordError::Truncated {
                data_size: header.data_size,
                available,
            });
        }

        let direction =
            Direction::from_raw(header.direction).ok_or(RecordError::Direction(header.direction))?;

        if header.total_size == 0 {
            return Err(RecordError::EmptyMessage);
        }
        if header.position as u64 + header.data_size as u64 > header.total_size as u64 {
            return Err(RecordError::OutOfBounds {
                position: header.position,
                data_size: header.data_size,
                total_size: header.total_size,
            });
        }

        let start = RAW_RECORD_HEADER_SIZE;
        Ok(RawEventRecord {
            pid: header.pid,
            position: header.position,
            timestamp: header.timestamp,
            total_size: header.total_size,
            direction,
            payload: &data[start..start + header.data_size as usize],
        })
    }
}

/// Builds raw records, as the BPF programs would.
#[cfg(test)]
pub(crate) fn raw_record(
    pid: u32,
    direction: Direction,
    position: u32,
    total_size: u32,
    timestamp: u64,
    payload: &[u8],
) -> Vec<u8> {
    let header = RawRecordHeader {
        pid,
        position,
        timestamp,
        data_size: payload.len() as u32,
        total_size,
        direction: direction.to_raw(),
        pad: 0,
    };

    let mut data = Vec::with_capacity(RAW_RECORD_HEADER_SIZE + payload.len());
    data.extend_from_slice(&header.pid.to_ne_bytes());
    data.extend_from_slice(&header.position.to_ne_bytes());
    data.extend_from_slice(&header.timestamp.to_ne_bytes());
    data.extend_from_slice(&header.data_size.to_ne_bytes());
    data.extend_from_slice(&header.total_size.to_ne_bytes());
    data.extend_from_slice(&header.direction.to_ne_bytes());
    data.extend_from_slice(&header.pad.to_ne_bytes());
    data.extend_from_slice(payload);
    data
}
