//! Viewer set and best-effort fan-out.
//!
//! Each viewer is an `mpsc` queue drained by its socket task. A full queue
//! means the viewer is not ready, so the message is skipped for it; a closed
//! queue means the viewer is gone, so it is dropped from the set.

use std::collections::BTreeMap;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::ws::WsMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ViewerId(pub u64);

#[derive(Debug, Default)]
pub struct BroadcastHub {
    viewers: BTreeMap<ViewerId, mpsc::Sender<String>>,
    next_id: u64,
}

/// What happened to one viewer during a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    Skipped,
    Gone,
}

fn deliver(queue: &mpsc::Sender<String>, payload: &str) -> Delivery {
    match queue.try_send(payload.to_string()) {
        Ok(()) => Delivery::Sent,
        Err(TrySendError::Full(_)) => Delivery::Skipped,
        Err(TrySendError::Closed(_)) => Delivery::Gone,
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.viewers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.viewers.is_empty()
    }

    /// Add a viewer, sending `initial` before any broadcast can reach it.
    /// Returns `None` if the viewer hung up before the snapshot was queued.
    pub fn register(&mut self, queue: mpsc::Sender<String>, initial: &WsMessage) -> Option<ViewerId> {
        let payload = match serde_json::to_string(initial) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize initial snapshot");
                return None;
            }
        };
        // The queue is fresh, so only a closed receiver can fail here.
        if deliver(&queue, &payload) == Delivery::Gone {
            return None;
        }
        let id = ViewerId(self.next_id);
        self.next_id += 1;
        self.viewers.insert(id, queue);
        debug!(viewer = id.0, viewers = self.viewers.len(), "viewer connected");
        Some(id)
    }

    pub fn unregister(&mut self, id: ViewerId) {
        if self.viewers.remove(&id).is_some() {
            debug!(viewer = id.0, viewers = self.viewers.len(), "viewer disconnected");
        }
    }

    /// Serialize once and queue for every viewer.
    pub fn broadcast(&mut self, msg: &WsMessage) {
        if self.viewers.is_empty() {
            return;
        }
        let payload = match serde_json::to_string(msg) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize broadcast message");
                return;
            }
        };

        let mut gone = Vec::new();
        for (id, queue) in &self.viewers {
            match deliver(queue, &payload) {
                Delivery::Sent => {}
                Delivery::Skipped => debug!(viewer = id.0, "viewer queue full, message skipped"),
                Delivery::Gone => gone.push(*id),
            }
        }
        for id in gone {
            self.unregister(id);
        }
    }

    /// Drop every viewer queue; socket tasks see the close and hang up.
    pub fn close_all(&mut self) {
        self.viewers.clear();
    }
}
