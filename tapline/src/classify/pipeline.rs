//! Classification pipeline: offers messages to the registered stages, in
//! order, and reports the ones at least one interpreter understood.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::Receiver,
        Arc,
    },
    thread,
};

use anyhow::Result;
use log::{debug, info, warn};

use super::{InterpreterKind, Offer, Stage};
use crate::{
    core::events::Message,
    events::{EventMetadata, ReportEvent},
    report::Printer,
};

/// Counters of the pipeline.
#[derive(Debug, Default)]
pub(crate) struct PipelineStats {
    /// Messages accepted by at least one interpreter.
    pub(crate) classified: AtomicU64,
    /// Messages no interpreter could parse.
    pub(crate) uninterpretable: AtomicU64,
    pub(crate) handler_failures: AtomicU64,
}

impl PipelineStats {
    pub(crate) fn log(&self) {
        info!(
            "Pipeline: {} classified, {} uninterpretable, {} handler failure(s)",
            self.classified.load(Ordering::Relaxed),
            self.uninterpretable.load(Ordering::Relaxed),
            self.handler_failures.load(Ordering::Relaxed),
        );
    }
}

pub(crate) struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    pub(crate) fn new(stages: Vec<Box<dyn Stage>>) -> Pipeline {
        Pipeline {
            stages,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    /// Build a pipeline from a list of interpreters, registered in the given
    /// order.
    pub(crate) fn from_kinds(kinds: &[InterpreterKind], plaintext_threshold: f64) -> Result<Pipeline> {
        Ok(Pipeline::new(
            kinds
                .iter()
                .map(|k| k.stage(plaintext_threshold))
                .collect::<Result<Vec<_>>>()?,
        ))
    }

    pub(crate) fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Names of the registered stages, in order.
    pub(crate) fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Offer a message to every stage. Returns the report event if at least
    /// one of them accepted it.
    pub(crate) fn process(&self, msg: &Message) -> Option<ReportEvent> {
        let mut event = ReportEvent::new(msg.timestamp, msg.pid, msg.direction, msg.data.len());
        let mut metadata = EventMetadata::new();

        for stage in self.stages.iter() {
            match stage.offer(msg, &mut event, &mut metadata) {
                Offer::Rejected => continue,
                Offer::Accepted => (),
                Offer::HandlerFailed(e) => {
                    debug!("Message from pid {}: {e:#}", msg.pid);
                    self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                }
            }

            if event.kind.is_none() {
                event.kind = Some(stage.name().to_string());
            }
        }

        if event.kind.is_none() {
            self.stats.uninterpretable.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.stats.classified.fetch_add(1, Ordering::Relaxed);
        event.container = msg.container.clone();
        event.tags = metadata.into_tags();
        Some(event)
    }

    /// Start the pipeline worker. It processes messages until all senders are
    /// gone, then flushes the printers.
    pub(crate) fn start(
        self,
        rx: Receiver<Message>,
        mut printers: Vec<Printer>,
    ) -> Result<thread::JoinHandle<()>> {
        Ok(thread::Builder::new()
            .name("pipeline".to_string())
            .spawn(move || {
                for msg in rx.iter() {
                    let Some(event) = self.process(&msg) else {
                        continue;
                    };

                    printers.iter_mut().for_each(|p| {
                        if let Err(e) = p.process_one(&event) {
                            warn!("Could not report event: {e}");
                        }
                    });
                }

                printers.iter_mut().for_each(|p| {
                    if let Err(e) = p.flush() {
                        warn!("Could not flush reporter: {e}");
                    }
                });
            })?)
    }
}
