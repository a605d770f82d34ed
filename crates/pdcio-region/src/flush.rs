//! Background flush daemon
//!
//! A dedicated thread wakes every sweep interval and flushes buckets that
//! have been idle for the flush interval. Shutdown is a message on a
//! channel, so it is observed within one sweep interval.

use crate::cache::RegionCache;
use crate::error::{RegionError, RegionResult};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct FlushDaemon {
    shutdown_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl FlushDaemon {
    /// Start sweeping `cache` on a new thread
    pub fn spawn(
        cache: Arc<RegionCache>,
        flush_interval: Duration,
        sweep_interval: Duration,
    ) -> RegionResult<Self> {
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("pdcio-flush".into())
            .spawn(move || sweep_loop(&cache, &shutdown_rx, flush_interval, sweep_interval))
            .map_err(RegionError::Daemon)?;

        info!(
            "Flush daemon started (idle threshold {flush_interval:?}, sweep every {sweep_interval:?})"
        );
        Ok(Self {
            shutdown_tx,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to exit
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        // A full channel or a dead receiver both mean the thread is stopping
        let _ = self.shutdown_tx.try_send(());
        if handle.join().is_err() {
            warn!("Flush daemon thread panicked");
        }
        info!("Flush daemon stopped");
    }

    pub const fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for FlushDaemon {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sweep_loop(
    cache: &RegionCache,
    shutdown_rx: &Receiver<()>,
    flush_interval: Duration,
    sweep_interval: Duration,
) {
    loop {
        match shutdown_rx.recv_timeout(sweep_interval) {
            Err(RecvTimeoutError::Timeout) => {
                let flushed = cache.flush_idle(flush_interval);
                if flushed > 0 {
                    debug!("Sweep flushed {flushed} idle buckets");
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
