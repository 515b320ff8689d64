//! Producers of raw records.

use std::{
    sync::mpsc::{self, SyncSender},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Result};
use log::{error, warn};

use crate::helpers::signals::Running;

/// Timeout when polling for new events from BPF.
const BPF_EVENTS_POLL_TIMEOUT_MS: u64 = 200;
/// Per-CPU size of the perf buffer, in pages.
const PERF_BUFFER_PAGES: usize = 64;

/// Items delivered to the event reader.
#[derive(Debug)]
pub(crate) enum SourceItem {
    /// A raw record.
    Sample(Vec<u8>),
    /// The kernel dropped samples.
    Lost(u64),
    /// No data, used to wake up the reader.
    Wake,
}

/// Source of raw records, feeding the event reader from its own thread.
pub(crate) trait RecordSource: Send {
    /// Start producing items until `run` is terminated or the reader goes
    /// away.
    fn start(
        self: Box<Self>,
        tx: SyncSender<SourceItem>,
        run: Running,
    ) -> Result<thread::JoinHandle<()>>;
}

/// Records read from the BPF perf event array.
pub(crate) struct PerfSource {
    map: libbpf_rs::MapHandle,
}

impl PerfSource {
    pub(crate) fn new(map: libbpf_rs::MapHandle) -> PerfSource {
        PerfSource { map }
    }
}

impl RecordSource for PerfSource {
    fn start(
        self: Box<Self>,
        tx: SyncSender<SourceItem>,
        run: Running,
    ) -> Result<thread::JoinHandle<()>> {
        // The perf buffer can't be moved across threads, build it in the
        // polling one and report the outcome.
        let (ready_tx, ready_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("perf-events".to_string())
            .spawn(move || {
                let samples = tx.clone();
                let perf = libbpf_rs::PerfBufferBuilder::new(&self.map)
                    .pages(PERF_BUFFER_PAGES)
                    .sample_cb(move |_cpu, data: &[u8]| {
                        // The reader is gone, we're shutting down.
                        _ = samples.send(SourceItem::Sample(data.to_vec()));
                    })
                    .lost_cb(move |cpu, count| {
                        warn!("Lost {count} event(s) on cpu {cpu}");
                        _ = tx.send(SourceItem::Lost(count));
                    })
                    .build();

                let perf = match perf {
                    Ok(perf) => {
                        _ = ready_tx.send(Ok(()));
                        perf
                    }
                    Err(e) => {
                        _ = ready_tx.send(Err(anyhow!("Could not build the perf buffer: {e}")));
                        return;
                    }
                };

                while run.running() {
                    if let Err(e) = perf.poll(Duration::from_millis(BPF_EVENTS_POLL_TIMEOUT_MS)) {
                        match e.kind() {
                            libbpf_rs::ErrorKind::Interrupted => (),
                            _ => error!("Unexpected error while polling ({e})"),
                        }
                    }
                }
            })?;

        ready_rx
            .recv()
            .map_err(|_| anyhow!("Perf event thread exited unexpectedly"))??;
        Ok(handle)
    }
}

/// Replays a fixed list of items, for tests.
#[cfg(test)]
pub(crate) struct ReplaySource(pub(crate) Vec<SourceItem>);

#[cfg(test)]
impl RecordSource for ReplaySource {
    fn start(
        self: Box<Self>,
        tx: SyncSender<SourceItem>,
        _: Running,
    ) -> Result<thread::JoinHandle<()>> {
        Ok(thread::spawn(move || {
            for item in self.0.into_iter() {
                if tx.send(item).is_err() {
                    break;
                }
            }
        }))
    }
}
