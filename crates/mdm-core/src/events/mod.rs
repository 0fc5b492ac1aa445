//! Room-scoped pub/sub for live job events.
//!
//! Rooms are keyed `job:<id>`. Each room is a broadcast channel with a
//! bounded buffer; a slow subscriber lags and loses the oldest events instead
//! of back-pressuring publishers. Ordering is preserved per room per
//! publisher. Nothing is durable: subscribers only see events published while
//! they are attached.

mod types;

pub use types::{
    CompletedPayload, FailedPayload, JobEvent, JobUpdatePayload, LogLevel, LogPayload,
    ProgressPayload,
};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Default per-subscriber buffer before the oldest events are dropped.
pub const DEFAULT_ROOM_CAPACITY: usize = 256;

/// An event together with the room it was published to.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub room: String,
    pub event: JobEvent,
}

/// Room name for a job's event stream.
pub fn job_room(job_id: &str) -> String {
    format!("job:{}", job_id)
}

struct BusInner {
    rooms: RwLock<HashMap<String, broadcast::Sender<Envelope>>>,
    all: broadcast::Sender<Envelope>,
    capacity: usize,
}

/// In-process event bus. Cheap to clone; all clones share the same rooms.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_ROOM_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (all, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                rooms: RwLock::new(HashMap::new()),
                all,
                capacity: capacity.max(1),
            }),
        }
    }

    /// Publish an event to one room. Never blocks; if the room has no
    /// subscribers the event is dropped (and the idle room is pruned).
    pub fn publish(&self, room: &str, event: JobEvent) {
        let envelope = Envelope {
            room: room.to_string(),
            event,
        };

        let delivered = {
            let rooms = self.inner.rooms.read().unwrap();
            match rooms.get(room) {
                Some(tx) => tx.send(envelope.clone()).is_ok(),
                None => false,
            }
        };
        if !delivered {
            self.prune_room(room);
        }

        let _ = self.inner.all.send(envelope);
    }

    /// Publish an event to every subscriber regardless of room membership.
    pub fn broadcast(&self, event: JobEvent) {
        let _ = self.inner.all.send(Envelope {
            room: String::new(),
            event,
        });
    }

    /// Join a room. The subscription sees events published after this call.
    pub fn subscribe(&self, room: &str) -> Subscription {
        let rx = {
            let mut rooms = self.inner.rooms.write().unwrap();
            rooms
                .entry(room.to_string())
                .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
                .subscribe()
        };
        Subscription {
            room: room.to_string(),
            rx,
        }
    }

    /// Subscribe to everything: all rooms plus `broadcast` events.
    pub fn subscribe_all(&self) -> Subscription {
        Subscription {
            room: String::new(),
            rx: self.inner.all.subscribe(),
        }
    }

    /// Drop a room entry once its last subscriber is gone.
    fn prune_room(&self, room: &str) {
        let mut rooms = self.inner.rooms.write().unwrap();
        if let Some(tx) = rooms.get(room) {
            if tx.receiver_count() == 0 {
                rooms.remove(room);
            }
        }
    }

    #[cfg(test)]
    fn room_count(&self) -> usize {
        self.inner.rooms.read().unwrap().len()
    }
}

/// Handle to a room subscription. Dropping it leaves the room.
pub struct Subscription {
    room: String,
    rx: broadcast::Receiver<Envelope>,
}

impl Subscription {
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Next event, skipping over any gap left by dropped (lagged) events.
    /// Returns `None` once the bus side is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(room = %self.room, skipped, "subscriber lagged, oldest events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant; `None` when no event is ready.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
