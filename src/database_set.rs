//! The fixed sequence of sixteen databases a server hosts.
//!
//! One reader/writer lock guards the entire set; read-dominant commands
//! take the read side, every mutator the write side. Connections address a
//! database by its index (default 0).

use std::sync::Arc;

use jiff::Timestamp;
use tokio::sync::RwLock;

use crate::database::{Database, SavePoint};
use crate::snapshot::SnapshotManager;

/// Number of databases in a set, as in classic Redis.
pub const DATABASE_COUNT: usize = 16;

pub struct DatabaseSet {
    databases: Vec<Database>,
}

impl DatabaseSet {
    pub fn new() -> Self {
        Self::from_databases(Vec::new())
    }

    /// Builds a set from loaded databases, appending empty ones until the
    /// fixed count is reached. Surplus entries in a dump are dropped.
    pub fn from_databases(mut databases: Vec<Database>) -> Self {
        databases.truncate(DATABASE_COUNT);
        while databases.len() < DATABASE_COUNT {
            databases.push(Database::new());
        }

        DatabaseSet { databases }
    }

    /// Wires every database to its slot, the sweep-timer handle and the
    /// save-point notifier, then schedules the initial expiration sweeps so
    /// keys that expired while the dump was on disk are removed promptly.
    pub fn attach(
        &mut self,
        set_handle: &Arc<RwLock<DatabaseSet>>,
        snapshots: &Arc<SnapshotManager>,
        save_points: Arc<[SavePoint]>,
    ) {
        let now = Timestamp::now();

        for (index, database) in self.databases.iter_mut().enumerate() {
            database.attach(
                index,
                Arc::downgrade(set_handle),
                Arc::downgrade(snapshots),
                Arc::clone(&save_points),
            );
            database.schedule_expiration(now);
        }
    }

    pub fn database(&self, index: usize) -> &Database {
        &self.databases[index]
    }

    pub fn database_mut(&mut self, index: usize) -> &mut Database {
        &mut self.databases[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Database> {
        self.databases.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Database> {
        self.databases.iter_mut()
    }

    /// Exchanges the databases at `first` and `second` atomically (the
    /// caller holds the write lock). Pending sweep timers for both slots
    /// are invalidated and rescheduled from the swapped contents.
    pub fn swap(&mut self, first: usize, second: usize) {
        if first == second {
            return;
        }

        self.databases.swap(first, second);

        let now = Timestamp::now();
        for index in [first, second] {
            let database = &mut self.databases[index];
            database.set_index(index);
            database.invalidate_sweep();
            database.schedule_expiration(now);
        }
    }

    pub(crate) fn reset_change_counters(&mut self) {
        for database in &mut self.databases {
            database.reset_change_counter();
        }
    }
}

impl Default for DatabaseSet {
    fn default() -> Self {
        Self::new()
    }
}
