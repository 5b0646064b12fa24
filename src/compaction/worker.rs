//! Compaction Worker
//!
//! Background thread that runs a compaction cycle on a fixed period.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};

use crate::engine::EngineShared;
use crate::error::Result;

use super::Compactor;

/// Handle to the background compaction thread
///
/// Dropping the handle stops the thread and waits for it, so segment handles
/// are never touched after the engine shuts down.
pub struct CompactionWorker {
    /// Dropping the sender disconnects the channel and wakes the thread
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CompactionWorker {
    /// Start compacting `shared` every `interval`
    pub(crate) fn spawn(shared: Arc<EngineShared>, interval: Duration) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);
        let ticker = channel::tick(interval);

        let handle = thread::Builder::new()
            .name("emberkv-compactor".to_string())
            .spawn(move || {
                tracing::debug!(interval_ms = interval.as_millis() as u64, "compaction worker started");

                loop {
                    crossbeam::select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            // A failed cycle leaves the engine untouched; try again next tick
                            if let Err(e) = Compactor::new(&shared).run() {
                                tracing::error!(error = %e, "compaction cycle failed");
                            }
                        }
                    }
                }

                tracing::debug!("compaction worker stopped");
            })?;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for an in-flight cycle to finish
    pub fn stop(&mut self) {
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("compaction worker panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for CompactionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
