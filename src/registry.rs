//! The client registry: every accepted connection registers under its
//! monotonic id for the lifetime of the socket.
//!
//! The registry owns an [`Arc<ClientHandle>`] per connection; the handle
//! carries the outbox sender (for monitor fan-out), the monitoring flag and
//! a snapshot of the connection state that CLIENT LIST renders. Connection
//! tasks update their own snapshot after each command; nothing ever holds
//! the registry lock while waiting on a connection, so the locks cannot
//! deadlock against each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use jiff::Timestamp;

use crate::pubsub::Outbox;

/// The CLIENT LIST view of one connection.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    pub id: u64,
    pub addr: String,
    pub name: String,
    pub db_index: usize,
    pub channel_count: usize,
    pub pattern_count: usize,
    pub last_command: String,
    pub created_at: Timestamp,
    pub last_activity: Timestamp,
}

impl ClientSnapshot {
    pub fn new(id: u64, addr: String) -> Self {
        let now = Timestamp::now();

        ClientSnapshot {
            id,
            addr,
            name: String::new(),
            db_index: 0,
            channel_count: 0,
            pattern_count: 0,
            last_command: String::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// One CLIENT LIST line.
    pub fn render(&self, now: Timestamp) -> String {
        let age = (now.as_second() - self.created_at.as_second()).max(0);
        let idle = (now.as_second() - self.last_activity.as_second()).max(0);

        format!(
            "id={} addr={} name={} age={} idle={} db={} sub={} psub={} cmd={}",
            self.id,
            self.addr,
            self.name,
            age,
            idle,
            self.db_index,
            self.channel_count,
            self.pattern_count,
            self.last_command,
        )
    }
}

/// Shared per-connection handle held by the registry, the pub/sub bus and
/// the connection task itself.
pub struct ClientHandle {
    pub id: u64,
    pub outbox: Outbox,
    pub monitoring: AtomicBool,
    snapshot: parking_lot::Mutex<ClientSnapshot>,
}

impl ClientHandle {
    pub fn new(id: u64, addr: String, outbox: Outbox) -> Self {
        ClientHandle {
            id,
            outbox,
            monitoring: AtomicBool::new(false),
            snapshot: parking_lot::Mutex::new(ClientSnapshot::new(id, addr)),
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::Relaxed)
    }

    pub fn update_snapshot(&self, snapshot: ClientSnapshot) {
        *self.snapshot.lock() = snapshot;
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        self.snapshot.lock().clone()
    }
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: parking_lot::Mutex<HashMap<u64, Arc<ClientHandle>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Arc<ClientHandle>) {
        self.clients.lock().insert(handle.id, handle);
    }

    pub fn remove(&self, id: u64) -> Option<Arc<ClientHandle>> {
        self.clients.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Outboxes of every monitoring client except `exclude`.
    pub fn monitor_outboxes(&self, exclude: u64) -> Vec<Outbox> {
        self.clients
            .lock()
            .values()
            .filter(|handle| handle.id != exclude && handle.is_monitoring())
            .map(|handle| handle.outbox.clone())
            .collect()
    }

    /// Snapshots of all registered clients, ordered by id.
    pub fn snapshots(&self) -> Vec<ClientSnapshot> {
        let mut snapshots = self
            .clients
            .lock()
            .values()
            .map(|handle| handle.snapshot())
            .collect::<Vec<ClientSnapshot>>();

        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }
}
