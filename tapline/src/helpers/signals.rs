/// # Signals
///
/// Provides a simple way for both registering signal handlers or
/// simply notify terminations to the threads.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
};

use anyhow::Result;
use log::info;
use signal_hook::iterator::Signals;

type Callback = Box<dyn FnOnce() + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Running {
    condition: Arc<AtomicBool>,
    // Callbacks run once, when termination is requested.
    callbacks: Arc<Mutex<Vec<Callback>>>,
}

impl Running {
    // Create a new Running instance stopping upon receiving one of the
    // termination signals (e.g. SIGTERM).
    pub(crate) fn new() -> Result<Running> {
        let mut sigs = Signals::new(signal_hook::consts::TERM_SIGNALS)?;

        let run = Self::ignore_signals();
        let signaled = run.clone();

        thread::spawn(move || {
            sigs.wait();
            info!("Received signal, terminating...");
            signaled.terminate();
        });

        Ok(run)
    }

    // Same as `new()` but without handling termination signals. Termination
    // *must* be manually handled here.
    pub(crate) fn ignore_signals() -> Running {
        Self {
            condition: Arc::new(AtomicBool::new(false)),
            callbacks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    // Add a callback to be run on termination. It runs right away if
    // termination was already requested.
    pub(crate) fn on_terminate<F>(&self, cb: F)
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        let mut callbacks = self.callbacks.lock().unwrap();
        if !self.running() {
            drop(callbacks);
            cb();
            return;
        }
        callbacks.push(Box::new(cb))
    }

    pub(crate) fn running(&self) -> bool {
        !self.condition.load(Ordering::Relaxed)
    }

    pub(crate) fn terminate(&self) {
        self.condition.store(true, Ordering::Relaxed);
        let callbacks: Vec<Callback> = self.callbacks.lock().unwrap().drain(..).collect();
        callbacks.into_iter().for_each(|cb| cb());
    }
}
