//! Background saver for the [`StatsStore`].
//!
//! One tokio task per store. It sleeps until a save is requested, waits out
//! the debounce window so a burst of records turns into a single write, and
//! runs the save on the blocking pool. Shutdown (or dropping the
//! [`AutoSaver`]) flushes any pending save before the task exits.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::stats::StatsStore;

/// Handle to a running autosave task.
#[derive(Debug)]
pub struct AutoSaver {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl AutoSaver {
    /// Spawn the saver on the current tokio runtime.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn spawn(store: Arc<StatsStore>, debounce: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(store, debounce, shutdown_rx));
        info!(debounce_secs = debounce.as_secs(), "Autosave started");
        Self { shutdown_tx, handle }
    }

    /// Stop the task, waiting for a final flush of any pending save.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Autosave task ended abnormally");
        }
    }
}

async fn run(store: Arc<StatsStore>, debounce: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            () = store.save_signal().notified() => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
        }

        let stopping = tokio::select! {
            () = tokio::time::sleep(debounce) => false,
            changed = shutdown_rx.changed() => changed.is_err() || *shutdown_rx.borrow(),
        };

        if store.take_pending() {
            flush(&store).await;
        }
        if stopping {
            break;
        }
    }

    if store.take_pending() {
        flush(&store).await;
    }
    info!("Autosave stopped");
}

async fn flush(store: &Arc<StatsStore>) {
    let store = Arc::clone(store);
    match tokio::task::spawn_blocking(move || store.save()).await {
        Ok(Ok(())) => debug!("Autosave complete"),
        Ok(Err(e)) => error!(error = %e, "Autosave failed"),
        Err(e) => error!(error = %e, "Autosave worker panicked"),
    }
}
