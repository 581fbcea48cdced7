use crate::entry::Frame;
use log::{debug, trace, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

/// Fan-out hub for live observer frames.
///
/// Best-effort, at-most-once: a lagging observer loses frames and nobody
/// is retried — the bounded store is the durable record, this stream is a
/// live-view convenience. Observers attach and detach asynchronously; the
/// hub only tracks how many are attached so it can skip serialization and
/// send work entirely when no one is listening.
#[derive(Clone)]
pub struct BroadcastHub {
    tx: broadcast::Sender<String>,
    observers: Arc<AtomicUsize>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            observers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.load(Ordering::Relaxed)
    }

    /// Register a live observer; detaches when the returned guard drops.
    pub fn attach(&self) -> Observer {
        self.observers.fetch_add(1, Ordering::Relaxed);
        debug!("Observer attached ({} total)", self.observer_count());
        Observer {
            rx: self.tx.subscribe(),
            observers: Arc::clone(&self.observers),
        }
    }

    /// Serialize and fan out one frame; a no-op when nobody is attached.
    pub fn send(&self, frame: &Frame) {
        if self.observer_count() == 0 {
            trace!("No observers attached, skipping broadcast");
            return;
        }
        let line = match serde_json::to_string(frame) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize broadcast frame: {}", e);
                return;
            }
        };
        // Send only fails when every receiver detached since the count
        // check; that race is a normal skip, not an error.
        let _ = self.tx.send(line);
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Observer {
    rx: broadcast::Receiver<String>,
    observers: Arc<AtomicUsize>,
}

impl Observer {
    /// Next frame line, or `None` once the hub is gone. Lag is swallowed:
    /// the observer just resumes with the newest frames.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(line) => return Some(line),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Observer lagged, {} frames dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.observers.fetch_sub(1, Ordering::Relaxed);
    }
}
