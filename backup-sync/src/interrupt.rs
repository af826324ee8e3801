//! SIGINT/SIGTERM handling.
//!
//! A signal does not abort the running operation. It is recorded and
//! broadcast; the caller lets the current step finish, rolls back the
//! in-flight backup and skips the remaining targets.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// SIGINT and SIGTERM handlers, registered when created.
///
/// Once installed, either signal is queued for [`InterruptWatcher::wait_for_signal`]
/// instead of terminating the process.
pub struct SignalHandlers {
    interrupt: Signal,
    terminate: Signal,
}

impl SignalHandlers {
    /// Register both handlers. Must be called from within a tokio runtime.
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }
}

/// Records and broadcasts the first interrupt.
pub struct InterruptWatcher {
    interrupt_tx: broadcast::Sender<()>,
    interrupted: Arc<AtomicBool>,
}

impl InterruptWatcher {
    pub fn new() -> Self {
        let (interrupt_tx, _) = broadcast::channel(1);
        Self {
            interrupt_tx,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.interrupt_tx.subscribe()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Wait on already installed handlers, then record and broadcast the signal.
    pub async fn wait_for_signal(&self, mut handlers: SignalHandlers) {
        tokio::select! {
            _ = handlers.interrupt.recv() => {
                info!("Received SIGINT, stopping after the current step");
            }
            _ = handlers.terminate.recv() => {
                info!("Received SIGTERM, stopping after the current step");
            }
        }

        self.trigger();
    }

    fn trigger(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        if let Err(e) = self.interrupt_tx.send(()) {
            warn!("Nothing was listening for the interrupt: {}", e);
        }
    }
}

impl Default for InterruptWatcher {
    fn default() -> Self {
        Self::new()
    }
}
