//! Fan-out of telemetry and log frames to observers.
//!
//! Every observer owns a bounded queue. Publishing never waits: a frame that
//! does not fit, or a queue whose receiver is gone, drops that observer on the
//! spot. Frames are serialized once and shared as `Bytes`.

use avc_control::TelemetrySink;
use avc_proto::{Envelope, LogEvent, TelemetrySnapshot};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Events logged under this target are never forwarded to observers.
pub const TARGET: &str = "avc_monitor::broadcast";

pub struct Observer {
    pub id: u64,
    pub rx: mpsc::Receiver<Bytes>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    closed: bool,
    observers: HashMap<u64, mpsc::Sender<Bytes>>,
}

pub struct Broadcaster {
    queue_len: usize,
    registry: Mutex<Registry>,
}

impl Broadcaster {
    pub fn new(queue_len: usize) -> Self {
        Self { queue_len: queue_len.max(1), registry: Mutex::new(Registry::default()) }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new observer. It sees only frames published from now on.
    /// Returns `None` once the broadcaster is closed.
    pub fn attach(&self) -> Option<Observer> {
        let (tx, rx) = mpsc::channel(self.queue_len);
        let id = {
            let mut reg = self.registry();
            if reg.closed {
                return None;
            }
            reg.next_id += 1;
            let id = reg.next_id;
            reg.observers.insert(id, tx);
            id
        };
        debug!(target: TARGET, observer = id, "observer attached");
        Some(Observer { id, rx })
    }

    pub fn detach(&self, id: u64) {
        if self.registry().observers.remove(&id).is_some() {
            debug!(target: TARGET, observer = id, "observer detached");
        }
    }

    pub fn observer_count(&self) -> usize {
        self.registry().observers.len()
    }

    /// Queues `frame` for every observer and returns how many accepted it.
    pub fn publish_frame(&self, frame: Bytes) -> usize {
        let mut dropped = Vec::new();
        let delivered = {
            let mut reg = self.registry();
            let mut delivered = 0;
            reg.observers.retain(|id, tx| match tx.try_send(frame.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    dropped.push((*id, "queue full"));
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    dropped.push((*id, "closed"));
                    false
                }
            });
            delivered
        };
        // Logged after the registry lock is released.
        for (id, why) in dropped {
            warn!(target: TARGET, observer = id, "dropping observer: {}", why);
        }
        delivered
    }

    pub fn publish_envelope(&self, envelope: &Envelope) {
        match envelope.to_line() {
            Ok(line) => {
                self.publish_frame(Bytes::from(line));
            }
            Err(e) => warn!(target: TARGET, "envelope encode failed: {}", e),
        }
    }

    pub fn publish_log(&self, event: &LogEvent) {
        self.publish_envelope(&Envelope::log(event));
    }

    /// Drops every observer queue and refuses later attaches.
    pub fn close(&self) {
        let n = {
            let mut reg = self.registry();
            reg.closed = true;
            let n = reg.observers.len();
            reg.observers.clear();
            n
        };
        debug!(target: TARGET, observers = n, "broadcaster closed");
    }
}

impl TelemetrySink for Broadcaster {
    fn publish(&self, snapshot: &TelemetrySnapshot) {
        match Envelope::telemetry(snapshot) {
            Ok(env) => self.publish_envelope(&env),
            Err(e) => warn!(target: TARGET, "telemetry encode failed: {}", e),
        }
    }
}
