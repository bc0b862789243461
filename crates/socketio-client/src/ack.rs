//! Acknowledgement registry.
//!
//! Every outgoing emit that expects a reply registers a pending ack keyed
//! by a monotonically increasing id. The pending ack is destroyed exactly
//! once: either by [`AckRegistry::resolve`] when the matching ack packet
//! arrives, or by [`AckRegistry::expire`] when the deadline elapses, in
//! which case the callback receives the [`NO_ACK`] sentinel. Resolution
//! and expiry race by removing the entry from the map under one lock, so
//! the callback can never fire twice.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use socketio_client_core::Value;
use tokio::task::JoinHandle;

/// The sentinel value delivered to an ack callback when its deadline
/// elapsed with no server reply
pub const NO_ACK: &str = "NO ACK";

pub(crate) type AckCallback = Box<dyn FnOnce(Vec<Value>) + Send + 'static>;

struct PendingAck {
    callback: AckCallback,
    timer: Option<JoinHandle<()>>,
}

/// Tracks pending acknowledgement callbacks keyed by integer id.
///
/// Ids are unique within one logical connection; a fresh connection gets a
/// fresh registry.
#[derive(Default)]
pub struct AckRegistry {
    next_id: AtomicI64,
    pending: Mutex<HashMap<i64, PendingAck>>,
}

impl AckRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next ack id, starting at 0
    pub fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Store a pending ack. With a deadline, a timer is armed that expires
    /// the ack with the [`NO_ACK`] sentinel; without one the ack waits
    /// forever.
    pub fn register<F>(self: &Arc<Self>, id: i64, callback: F, timeout: Option<Duration>)
    where
        F: FnOnce(Vec<Value>) + Send + 'static,
    {
        let timer = timeout.map(|timeout| {
            let registry = Arc::downgrade(self);
            tokio::spawn(expire_after(registry, id, timeout))
        });
        self.pending.lock().unwrap().insert(
            id,
            PendingAck {
                callback: Box::new(callback),
                timer,
            },
        );
    }

    /// Atomically remove and invoke the matching pending ack. A resolve
    /// for an unknown id is a silent no-op: the ack may have already
    /// expired.
    pub fn resolve(&self, id: i64, data: Vec<Value>) {
        if let Some(ack) = self.pending.lock().unwrap().remove(&id) {
            if let Some(timer) = ack.timer {
                timer.abort();
            }
            (ack.callback)(data);
        } else {
            tracing::trace!(id, "ack already resolved or expired");
        }
    }

    /// Atomically remove the pending ack and invoke its callback with the
    /// [`NO_ACK`] sentinel
    pub fn expire(&self, id: i64) {
        if let Some(ack) = self.pending.lock().unwrap().remove(&id) {
            if let Some(timer) = ack.timer {
                timer.abort();
            }
            (ack.callback)(vec![Value::from(NO_ACK)]);
        }
    }

    /// Drop one pending ack without invoking its callback. Used when the
    /// emit that registered it could not be sent.
    pub(crate) fn discard(&self, id: i64) {
        if let Some(ack) = self.pending.lock().unwrap().remove(&id) {
            if let Some(timer) = ack.timer {
                timer.abort();
            }
        }
    }

    /// Drop every pending ack and disarm its timer, without invoking any
    /// callback. Used when the connection is deliberately closed.
    pub(crate) fn clear(&self) {
        let pending = std::mem::take(&mut *self.pending.lock().unwrap());
        for ack in pending.into_values() {
            if let Some(timer) = ack.timer {
                timer.abort();
            }
        }
    }
}

async fn expire_after(registry: Weak<AckRegistry>, id: i64, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    if let Some(registry) = registry.upgrade() {
        tracing::debug!(id, "ack timed out");
        registry.expire(id);
    }
}

impl std::fmt::Debug for AckRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckRegistry")
            .field("pending", &self.pending.lock().unwrap().len())
            .finish()
    }
}
