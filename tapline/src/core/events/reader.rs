//! Event reader: drains the raw records, attributes them to containers and
//! reassembles messages which are handed over to the classification
//! pipeline.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::Result;
use log::{debug, info, trace, warn};

use super::{
    Message, NamespaceResolver, RawEventRecord, ReassemblyConfig, Reassembler, SourceItem,
    DEFAULT_PAYLOAD_CAPACITY,
};
use crate::{
    core::targets::ContainerRegistry, events::ContainerInfo, helpers::time::monotonic_timestamp,
};

/// Maximum number of cached pid to PID namespace resolutions.
const NS_CACHE_SIZE: usize = 4096;

/// Pid to PID namespace resolutions. Pids get reused, so entries are only
/// trusted while the set of targeted containers is the one they were resolved
/// against, and for at most one statistics interval.
#[derive(Default)]
struct NamespaceCache {
    entries: HashMap<u32, u32>,
    /// Registry generation the entries were resolved against.
    generation: u64,
}

impl NamespaceCache {
    fn sync(&mut self, generation: u64) {
        if generation != self.generation {
            self.entries.clear();
            self.generation = generation;
        }
    }

    fn get(&self, pid: u32) -> Option<u32> {
        self.entries.get(&pid).copied()
    }

    fn insert(&mut self, pid: u32, pid_ns: u32) {
        if self.entries.len() >= NS_CACHE_SIZE {
            self.entries.clear();
        }
        self.entries.insert(pid, pid_ns);
    }

    fn remove(&mut self, pid: u32) {
        self.entries.remove(&pid);
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ReaderConfig {
    pub(crate) payload_capacity: usize,
    pub(crate) reassembly: ReassemblyConfig,
    /// Size of the queue between the record sources and the reader.
    pub(crate) source_queue_size: usize,
    /// Interval between two statistics reports and expiration of stale
    /// in-flight messages.
    pub(crate) stats_interval: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            payload_capacity: DEFAULT_PAYLOAD_CAPACITY,
            reassembly: ReassemblyConfig::default(),
            source_queue_size: 4096,
            stats_interval: Duration::from_secs(60),
        }
    }
}

/// Counters of the event reader.
#[derive(Debug, Default)]
pub(crate) struct ReaderStats {
    pub(crate) records: AtomicU64,
    pub(crate) lost_samples: AtomicU64,
    /// Records from an unknown PID namespace.
    pub(crate) unattributed: AtomicU64,
    pub(crate) malformed: AtomicU64,
    /// In-flight messages and fragments discarded by the reassembly.
    pub(crate) reassembly_resets: AtomicU64,
    pub(crate) messages: AtomicU64,
    /// Messages dropped because the pipeline was lagging behind.
    pub(crate) pipeline_dropped: AtomicU64,
}

impl ReaderStats {
    pub(crate) fn log(&self) {
        let lost = self.lost_samples.load(Ordering::Relaxed);
        let msg = format!(
            "Reader: {} record(s), {} lost, {} unattributed, {} malformed, {} reassembly reset(s), {} message(s), {} dropped by the pipeline",
            self.records.load(Ordering::Relaxed),
            lost,
            self.unattributed.load(Ordering::Relaxed),
            self.malformed.load(Ordering::Relaxed),
            self.reassembly_resets.load(Ordering::Relaxed),
            self.messages.load(Ordering::Relaxed),
            self.pipeline_dropped.load(Ordering::Relaxed),
        );

        match lost {
            0 => info!("{msg}"),
            _ => warn!("{msg}"),
        }
    }
}

/// Handle to close a running reader, from any thread.
#[derive(Clone)]
pub(crate) struct ReaderHandle {
    closed: Arc<AtomicBool>,
    tx: SyncSender<SourceItem>,
}

impl ReaderHandle {
    /// Make the reader loop exit. A reader blocked waiting for records is
    /// woken up.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // A full queue means the reader is busy and will see the flag after
        // the current item.
        _ = self.tx.try_send(SourceItem::Wake);
    }
}

pub(crate) struct EventReader {
    config: ReaderConfig,
    resolver: Box<dyn NamespaceResolver>,
    registry: ContainerRegistry,
    ns_cache: NamespaceCache,
    reassembler: Reassembler,
    stats: Arc<ReaderStats>,
    closed: Arc<AtomicBool>,
    tx: SyncSender<SourceItem>,
    rx: Receiver<SourceItem>,
    output: SyncSender<Message>,
}

impl EventReader {
    pub(crate) fn new(
        config: ReaderConfig,
        resolver: Box<dyn NamespaceResolver>,
        registry: ContainerRegistry,
        output: SyncSender<Message>,
    ) -> EventReader {
        let (tx, rx) = mpsc::sync_channel(config.source_queue_size);

        EventReader {
            reassembler: Reassembler::new(config.reassembly.clone()),
            config,
            resolver,
            registry,
            ns_cache: NamespaceCache::default(),
            stats: Arc::new(ReaderStats::default()),
            closed: Arc::new(AtomicBool::new(false)),
            tx,
            rx,
            output,
        }
    }

    /// Sender to give to record sources.
    pub(crate) fn sender(&self) -> SyncSender<SourceItem> {
        self.tx.clone()
    }

    pub(crate) fn handle(&self) -> ReaderHandle {
        ReaderHandle {
            closed: Arc::clone(&self.closed),
            tx: self.tx.clone(),
        }
    }

    pub(crate) fn stats(&self) -> Arc<ReaderStats> {
        Arc::clone(&self.stats)
    }

    /// Process items until the reader is closed. In-flight messages are
    /// discarded on exit. Expiration and statistics run every stats interval,
    /// whether items keep coming or not.
    pub(crate) fn run(mut self) -> Result<()> {
        let mut last_tick = Instant::now();

        while !self.closed.load(Ordering::SeqCst) {
            let next_tick = self
                .config
                .stats_interval
                .saturating_sub(last_tick.elapsed());
            match self.rx.recv_timeout(next_tick) {
                Ok(item) => self.process(item),
                Err(RecvTimeoutError::Timeout) => (),
                // Can't happen as we hold a sender, but exit cleanly anyway.
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if last_tick.elapsed() >= self.config.stats_interval {
                self.tick()?;
                last_tick = Instant::now();
            }
        }

        if self.reassembler.in_flight() > 0 {
            debug!(
                "Discarding {} in-flight message(s)",
                self.reassembler.in_flight()
            );
        }
        self.reassembler.clear();
        Ok(())
    }

    fn tick(&mut self) -> Result<()> {
        self.ns_cache.clear();
        self.reassembler.expire(monotonic_timestamp()?);
        self.update_resets();
        self.stats.log();
        Ok(())
    }

    fn update_resets(&mut self) {
        let discarded = self.reassembler.take_discarded();
        if discarded > 0 {
            self.stats
                .reassembly_resets
                .fetch_add(discarded, Ordering::Relaxed);
        }
    }

    pub(crate) fn process(&mut self, item: SourceItem) {
        match item {
            SourceItem::Sample(data) => self.process_sample(&data),
            SourceItem::Lost(count) => {
                self.stats.lost_samples.fetch_add(count, Ordering::Relaxed);
            }
            SourceItem::Wake => (),
        }
    }

    fn process_sample(&mut self, data: &[u8]) {
        self.stats.records.fetch_add(1, Ordering::Relaxed);

        let rec = match RawEventRecord::parse(data, self.config.payload_capacity) {
            Ok(rec) => rec,
            Err(e) => {
                debug!("Could not parse raw record: {e}");
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let Some(container) = self.attribute(rec.pid) else {
            self.stats.unattributed.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let message = self.reassembler.push(&rec);
        self.update_resets();

        let Some(mut message) = message else {
            return;
        };
        message.container = Some(container);
        self.stats.messages.fetch_add(1, Ordering::Relaxed);

        match self.output.try_send(message) {
            Ok(()) => (),
            Err(TrySendError::Full(_)) => {
                self.stats.pipeline_dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                if self.stats.pipeline_dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                    warn!("Classification pipeline is gone, dropping messages");
                }
            }
        }
    }

    /// Find the container a pid belongs to.
    fn attribute(&mut self, pid: u32) -> Option<ContainerInfo> {
        self.ns_cache.sync(self.registry.generation());

        if let Some(pid_ns) = self.ns_cache.get(pid) {
            if let Some(container) = self.registry.lookup(pid_ns) {
                return Some(container);
            }
            // The pid may have been reused in another namespace.
            self.ns_cache.remove(pid);
        }

        let pid_ns = match self.resolver.pid_namespace(pid) {
            Ok(pid_ns) => pid_ns,
            Err(e) => {
                trace!("Could not resolve the PID namespace of pid {pid}: {e}");
                return None;
            }
        };

        let Some(container) = self.registry.lookup(pid_ns) else {
            trace!("No container for PID namespace {pid_ns} (pid {pid})");
            return None;
        };
        self.ns_cache.insert(pid, pid_ns);
        Some(container)
    }
}
