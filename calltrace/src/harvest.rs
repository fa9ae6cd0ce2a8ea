//! Background driver for the controller's harvest hook
//!
//! The host agent normally calls [`TraceController::on_harvest_tick`] from
//! its own scheduler. `HarvestLoop` is a stand-alone scheduler for hosts that
//! don't have one: a named thread that ticks at a fixed interval until
//! stopped.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{select, tick, Sender};
use log::{debug, info, warn};

use crate::engine::TraceController;

pub struct HarvestLoop {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<u64>>,
}

impl HarvestLoop {
    /// Start ticking `controller` every `interval`
    ///
    /// # Errors
    /// Returns an error if the harvest thread cannot be spawned
    pub fn spawn(controller: Arc<TraceController>, interval: Duration) -> Result<Self> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let ticker = tick(interval);

        let handle = std::thread::Builder::new()
            .name("calltrace-harvest".to_string())
            .spawn(move || {
                let mut completed = 0u64;
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            if let Some(reason) = controller.on_harvest_tick() {
                                debug!("Harvest tick completed a trace ({})", reason.as_str());
                                completed += 1;
                            }
                        }
                        recv(stop_rx) -> _ => break,
                    }
                }
                completed
            })
            .context("Failed to spawn harvest thread")?;

        info!("Harvest loop started, interval {}ms", interval.as_millis());
        Ok(Self { stop_tx: Some(stop_tx), handle: Some(handle) })
    }

    /// Stop the loop and return how many traces its ticks completed
    pub fn stop(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        // Dropping the sender also wakes the loop.
        self.stop_tx.take();
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(completed)) => completed,
            Some(Err(_)) => {
                warn!("Harvest thread panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for HarvestLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
