//! Cooperative cancellation
//!
//! An interrupt flips a watch channel to `true`. The dispatch loop checks it
//! between repositories and while waiting for a free slot; running git
//! processes are left alone.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Create a connected trigger/signal pair
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// Sending half, held by whoever decides to stop
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half, observed by the scheduler
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_trigger, signal) = shutdown_channel();
        signal
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested; pend forever if the trigger is
    /// dropped without firing.
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Wait for Ctrl-C, or SIGTERM on unix, and return the signal name
pub async fn wait_for_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => interrupt_or_pending(result).await,
                    _ = terminate.recv() => "terminated",
                }
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                interrupt_or_pending(tokio::signal::ctrl_c().await).await
            }
        }
    }

    #[cfg(not(unix))]
    {
        interrupt_or_pending(tokio::signal::ctrl_c().await).await
    }
}

async fn interrupt_or_pending(result: std::io::Result<()>) -> &'static str {
    match result {
        Ok(()) => "interrupt",
        Err(e) => {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending().await
        }
    }
}

/// Trigger shutdown on the first interrupt or termination signal
pub fn spawn_signal_listener(trigger: ShutdownTrigger) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = wait_for_signal().await;
        println!("Signal caught: {}", name);
        debug!("Shutdown requested, no new repositories will be started");
        trigger.trigger();
    })
}
