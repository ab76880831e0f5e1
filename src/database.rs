//! A single logical keyspace: byte-keyed storage, per-key expirations, the
//! change counter and save-point notification.
//!
//! Expirations are swept by wall-clock timer only; reads never expire keys
//! lazily. Wake-ups are quantized to 10 ms ticks and coalesced so that a
//! burst of EXPIRE calls schedules at most one timer per tick. The sweep
//! task re-acquires the database-set write lock on its own tokio task, so
//! scheduling from inside a locked region never re-enters the lock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use jiff::Timestamp;
use tokio::sync::RwLock;
use tracing::debug;

use crate::commands::CommandError;
use crate::database_set::DatabaseSet;
use crate::snapshot::SnapshotManager;
use crate::value::StoredValue;

/// Width of one expiration scheduler tick.
const TICK_MILLIS: i64 = 10;

/// A save-point rule: schedule a snapshot `delay` after the change counter
/// reaches exactly `changes` writes.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct SavePoint {
    pub delay: Duration,
    pub changes: u64,
}

impl SavePoint {
    pub fn new(delay: Duration, changes: u64) -> Self {
        SavePoint { delay, changes }
    }
}

/// One of the sixteen in-process keyspaces.
pub struct Database {
    keys: HashMap<Vec<u8>, StoredValue>,
    expirations: HashMap<Vec<u8>, Timestamp>,
    changes: u64,
    index: usize,
    save_points: Arc<[SavePoint]>,
    snapshots: Weak<SnapshotManager>,
    set_handle: Weak<RwLock<DatabaseSet>>,
    scheduled_tick: Option<i64>,
    sweep_generation: u64,
}

impl Database {
    pub fn new() -> Self {
        Self::from_parts(HashMap::new(), HashMap::new())
    }

    /// Builds a database from restored dump contents. Expirations without a
    /// matching key are dropped to preserve the keyspace invariant.
    pub fn from_parts(
        keys: HashMap<Vec<u8>, StoredValue>,
        mut expirations: HashMap<Vec<u8>, Timestamp>,
    ) -> Self {
        expirations.retain(|key, _| keys.contains_key(key));

        Database {
            keys,
            expirations,
            changes: 0,
            index: 0,
            save_points: Arc::from(Vec::new()),
            snapshots: Weak::new(),
            set_handle: Weak::new(),
            scheduled_tick: None,
            sweep_generation: 0,
        }
    }

    /// Wires the database into its set: its slot index, the handle the
    /// sweep timers re-acquire, and the save-point notifier.
    pub(crate) fn attach(
        &mut self,
        index: usize,
        set_handle: Weak<RwLock<DatabaseSet>>,
        snapshots: Weak<SnapshotManager>,
        save_points: Arc<[SavePoint]>,
    ) {
        self.index = index;
        self.set_handle = set_handle;
        self.snapshots = snapshots;
        self.save_points = save_points;
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn change_count(&self) -> u64 {
        self.changes
    }

    pub(crate) fn reset_change_counter(&mut self) {
        self.changes = 0;
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.keys.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.keys.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &StoredValue)> {
        self.keys.iter()
    }

    pub fn expirations(&self) -> impl Iterator<Item = (&Vec<u8>, &Timestamp)> {
        self.expirations.iter()
    }

    pub fn get(&self, key: &[u8]) -> Option<&StoredValue> {
        self.keys.get(key)
    }

    /// Removes every key and expiration. The caller records the change.
    pub fn clear(&mut self) {
        self.keys.clear();
        self.expirations.clear();
    }

    // ── Typed accessors ──────────────────────────────────────────────────

    pub fn string(&self, key: &[u8]) -> Result<Option<&Vec<u8>>, CommandError> {
        match self.keys.get(key) {
            None => Ok(None),
            Some(StoredValue::String(bytes)) => Ok(Some(bytes)),
            Some(_) => Err(CommandError::WrongType),
        }
    }

    pub fn string_mut(&mut self, key: &[u8]) -> Result<Option<&mut Vec<u8>>, CommandError> {
        match self.keys.get_mut(key) {
            None => Ok(None),
            Some(StoredValue::String(bytes)) => Ok(Some(bytes)),
            Some(_) => Err(CommandError::WrongType),
        }
    }

    pub fn list(&self, key: &[u8]) -> Result<Option<&VecDeque<Vec<u8>>>, CommandError> {
        match self.keys.get(key) {
            None => Ok(None),
            Some(StoredValue::List(list)) => Ok(Some(list)),
            Some(_) => Err(CommandError::WrongType),
        }
    }

    pub fn list_mut(&mut self, key: &[u8]) -> Result<Option<&mut VecDeque<Vec<u8>>>, CommandError> {
        match self.keys.get_mut(key) {
            None => Ok(None),
            Some(StoredValue::List(list)) => Ok(Some(list)),
            Some(_) => Err(CommandError::WrongType),
        }
    }

    /// The list at `key`, created empty when the key is absent.
    pub fn list_entry(&mut self, key: &[u8]) -> Result<&mut VecDeque<Vec<u8>>, CommandError> {
        let slot = self
            .keys
            .entry(key.to_vec())
            .or_insert_with(|| StoredValue::List(VecDeque::new()));

        match slot {
            StoredValue::List(list) => Ok(list),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn set_members(&self, key: &[u8]) -> Result<Option<&HashSet<Vec<u8>>>, CommandError> {
        match self.keys.get(key) {
            None => Ok(None),
            Some(StoredValue::Set(members)) => Ok(Some(members)),
            Some(_) => Err(CommandError::WrongType),
        }
    }

    pub fn set_members_mut(
        &mut self,
        key: &[u8],
    ) -> Result<Option<&mut HashSet<Vec<u8>>>, CommandError> {
        match self.keys.get_mut(key) {
            None => Ok(None),
            Some(StoredValue::Set(members)) => Ok(Some(members)),
            Some(_) => Err(CommandError::WrongType),
        }
    }

    pub fn set_entry(&mut self, key: &[u8]) -> Result<&mut HashSet<Vec<u8>>, CommandError> {
        let slot = self
            .keys
            .entry(key.to_vec())
            .or_insert_with(|| StoredValue::Set(HashSet::new()));

        match slot {
            StoredValue::Set(members) => Ok(members),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn hash(&self, key: &[u8]) -> Result<Option<&HashMap<Vec<u8>, Vec<u8>>>, CommandError> {
        match self.keys.get(key) {
            None => Ok(None),
            Some(StoredValue::Hash(fields)) => Ok(Some(fields)),
            Some(_) => Err(CommandError::WrongType),
        }
    }

    pub fn hash_mut(
        &mut self,
        key: &[u8],
    ) -> Result<Option<&mut HashMap<Vec<u8>, Vec<u8>>>, CommandError> {
        match self.keys.get_mut(key) {
            None => Ok(None),
            Some(StoredValue::Hash(fields)) => Ok(Some(fields)),
            Some(_) => Err(CommandError::WrongType),
        }
    }

    pub fn hash_entry(&mut self, key: &[u8]) -> Result<&mut HashMap<Vec<u8>, Vec<u8>>, CommandError> {
        let slot = self
            .keys
            .entry(key.to_vec())
            .or_insert_with(|| StoredValue::Hash(HashMap::new()));

        match slot {
            StoredValue::Hash(fields) => Ok(fields),
            _ => Err(CommandError::WrongType),
        }
    }

    // ── Writes ───────────────────────────────────────────────────────────

    /// Stores `value` under `key`, discarding any previous value and its
    /// expiration.
    pub fn set_value(&mut self, key: Vec<u8>, value: StoredValue) {
        self.expirations.remove(&key);
        self.keys.insert(key, value);
    }

    pub fn set_value_with_expiration(
        &mut self,
        key: Vec<u8>,
        value: StoredValue,
        deadline: Timestamp,
    ) {
        self.keys.insert(key.clone(), value);
        self.expirations.insert(key.clone(), deadline);
        self.schedule_wakeup(deadline);
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<StoredValue> {
        self.expirations.remove(key);
        self.keys.remove(key)
    }

    /// Moves the value and expiration from `source` to `destination`. Any
    /// previous destination value and expiration are discarded.
    pub fn rename(&mut self, source: &[u8], destination: &[u8]) -> Result<(), CommandError> {
        if source == destination {
            return match self.keys.contains_key(source) {
                true => Ok(()),
                false => Err(CommandError::NoSuchKey),
            };
        }

        let Some(value) = self.keys.remove(source) else {
            return Err(CommandError::NoSuchKey);
        };

        self.keys.insert(destination.to_vec(), value);
        match self.expirations.remove(source) {
            Some(deadline) => {
                self.expirations.insert(destination.to_vec(), deadline);
            }
            None => {
                self.expirations.remove(destination);
            }
        }

        Ok(())
    }

    // ── Expirations ──────────────────────────────────────────────────────

    pub fn expiration(&self, key: &[u8]) -> Option<Timestamp> {
        self.expirations.get(key).copied()
    }

    /// Stores an absolute deadline for an existing key and arranges a
    /// wake-up no later than one tick after it. Returns false when the key
    /// does not exist.
    pub fn set_expiration(&mut self, key: &[u8], deadline: Timestamp) -> bool {
        if !self.keys.contains_key(key) {
            return false;
        }

        self.expirations.insert(key.to_vec(), deadline);
        self.schedule_wakeup(deadline);
        true
    }

    /// Drops the expiration of `key`, keeping the value. Returns true when
    /// an expiration existed.
    pub fn clear_expiration(&mut self, key: &[u8]) -> bool {
        self.expirations.remove(key).is_some()
    }

    /// Removes every entry whose deadline has passed, then schedules the
    /// next wake-up from the earliest remaining deadline.
    pub fn sweep_expired(&mut self, now: Timestamp) -> usize {
        let expired = self
            .expirations
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect::<Vec<Vec<u8>>>();

        for key in &expired {
            self.keys.remove(key);
            self.expirations.remove(key);
        }

        if !expired.is_empty() {
            debug!(db = self.index, expired = expired.len(), "swept expired keys");
        }

        self.schedule_expiration(now);
        expired.len()
    }

    /// Schedules the next sweep from the earliest remaining deadline, if
    /// any. Called after load and after SWAPDB.
    pub fn schedule_expiration(&mut self, _now: Timestamp) {
        if let Some(deadline) = self.expirations.values().min().copied() {
            self.schedule_wakeup(deadline);
        }
    }

    /// Forgets any pending wake-up so in-flight sweep tasks become no-ops.
    pub(crate) fn invalidate_sweep(&mut self) {
        self.scheduled_tick = None;
        self.sweep_generation += 1;
    }

    fn schedule_wakeup(&mut self, deadline: Timestamp) {
        let tick = deadline.as_millisecond().div_euclid(TICK_MILLIS) + 1;

        if let Some(pending) = self.scheduled_tick {
            if pending <= tick {
                return;
            }
        }

        let Some(set) = self.set_handle.upgrade() else {
            // Detached database (unit tests); sweeps run manually.
            return;
        };

        self.scheduled_tick = Some(tick);
        self.sweep_generation += 1;
        let generation = self.sweep_generation;
        let index = self.index;

        tokio::spawn(async move {
            let wait = tick * TICK_MILLIS - Timestamp::now().as_millisecond();
            if wait > 0 {
                tokio::time::sleep(Duration::from_millis(wait as u64)).await;
            }

            let mut guard = set.write().await;
            let database = guard.database_mut(index);

            if database.sweep_generation != generation {
                return;
            }

            database.scheduled_tick = None;
            database.sweep_expired(Timestamp::now());
        });
    }

    // ── Change counter ───────────────────────────────────────────────────

    /// Called exactly once per successful write command. Bumps the change
    /// counter and fires the save-point whose threshold equals the new
    /// count; with several matches the one with the smallest delay wins.
    pub fn record_change(&mut self) {
        self.changes += 1;

        let fired = self
            .save_points
            .iter()
            .filter(|point| point.changes == self.changes)
            .min_by_key(|point| point.delay);

        if let Some(point) = fired {
            if let Some(snapshots) = self.snapshots.upgrade() {
                debug!(
                    db = self.index,
                    changes = self.changes,
                    delay_secs = point.delay.as_secs(),
                    "save point reached"
                );
                snapshots.schedule_save(point.delay);
            }
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_value(bytes: &[u8]) -> StoredValue {
        StoredValue::String(bytes.to_vec())
    }

    fn in_one_hour() -> Timestamp {
        Timestamp::now() + jiff::SignedDuration::from_secs(3600)
    }

    #[test]
    fn test_set_get_remove() {
        let mut db = Database::new();
        db.set_value(b"foo".to_vec(), string_value(b"bar"));

        assert_eq!(db.get(b"foo"), Some(&string_value(b"bar")));
        assert_eq!(db.string(b"foo").unwrap(), Some(&b"bar".to_vec()));
        assert_eq!(db.len(), 1);

        assert_eq!(db.remove(b"foo"), Some(string_value(b"bar")));
        assert_eq!(db.get(b"foo"), None);
        assert!(db.is_empty());
    }

    #[test]
    fn test_typed_accessors_enforce_kind() {
        let mut db = Database::new();
        db.set_value(b"s".to_vec(), string_value(b"v"));

        assert_eq!(db.list(b"s"), Err(CommandError::WrongType));
        assert_eq!(db.set_members(b"s"), Err(CommandError::WrongType));
        assert_eq!(db.hash(b"s"), Err(CommandError::WrongType));
        assert_eq!(db.list_entry(b"s"), Err(CommandError::WrongType));

        // Missing keys are None, not an error.
        assert_eq!(db.list(b"missing"), Ok(None));
    }

    #[test]
    fn test_overwrite_removes_expiration() {
        let mut db = Database::new();
        db.set_value_with_expiration(b"k".to_vec(), string_value(b"v"), in_one_hour());
        assert!(db.expiration(b"k").is_some());

        db.set_value(b"k".to_vec(), string_value(b"w"));
        assert_eq!(db.expiration(b"k"), None);
    }

    #[test]
    fn test_remove_clears_expiration() {
        let mut db = Database::new();
        db.set_value_with_expiration(b"k".to_vec(), string_value(b"v"), in_one_hour());
        db.remove(b"k");

        db.set_value(b"k".to_vec(), string_value(b"w"));
        assert_eq!(db.expiration(b"k"), None);
    }

    #[test]
    fn test_set_expiration_requires_existing_key() {
        let mut db = Database::new();
        assert!(!db.set_expiration(b"missing", in_one_hour()));

        db.set_value(b"k".to_vec(), string_value(b"v"));
        assert!(db.set_expiration(b"k", in_one_hour()));
        assert!(db.expiration(b"k").is_some());
    }

    #[test]
    fn test_rename_preserves_source_expiration() {
        let deadline = in_one_hour();
        let mut db = Database::new();
        db.set_value_with_expiration(b"src".to_vec(), string_value(b"v"), deadline);
        db.set_value_with_expiration(
            b"dst".to_vec(),
            string_value(b"old"),
            in_one_hour() + jiff::SignedDuration::from_secs(60),
        );

        db.rename(b"src", b"dst").unwrap();

        assert_eq!(db.get(b"src"), None);
        assert_eq!(db.get(b"dst"), Some(&string_value(b"v")));
        assert_eq!(db.expiration(b"dst"), Some(deadline));
    }

    #[test]
    fn test_rename_without_source_expiration_clears_destination() {
        let mut db = Database::new();
        db.set_value(b"src".to_vec(), string_value(b"v"));
        db.set_value_with_expiration(b"dst".to_vec(), string_value(b"old"), in_one_hour());

        db.rename(b"src", b"dst").unwrap();
        assert_eq!(db.expiration(b"dst"), None);
    }

    #[test]
    fn test_rename_to_itself() {
        let mut db = Database::new();
        assert_eq!(db.rename(b"k", b"k"), Err(CommandError::NoSuchKey));

        db.set_value(b"k".to_vec(), string_value(b"v"));
        assert_eq!(db.rename(b"k", b"k"), Ok(()));
        assert_eq!(db.get(b"k"), Some(&string_value(b"v")));
    }

    #[test]
    fn test_change_counter_increments_by_one() {
        let mut db = Database::new();
        assert_eq!(db.change_count(), 0);

        db.set_value(b"a".to_vec(), string_value(b"1"));
        db.record_change();
        db.set_value(b"b".to_vec(), string_value(b"2"));
        db.record_change();

        assert_eq!(db.change_count(), 2);

        db.reset_change_counter();
        assert_eq!(db.change_count(), 0);
    }

    #[test]
    fn test_sweep_removes_only_expired_entries() {
        let now = Timestamp::now();
        let mut db = Database::new();
        db.set_value_with_expiration(
            b"dead".to_vec(),
            string_value(b"v"),
            now - jiff::SignedDuration::from_secs(1),
        );
        db.set_value_with_expiration(b"alive".to_vec(), string_value(b"v"), in_one_hour());
        db.set_value(b"forever".to_vec(), string_value(b"v"));

        let swept = db.sweep_expired(now);

        assert_eq!(swept, 1);
        assert_eq!(db.get(b"dead"), None);
        assert_eq!(db.expiration(b"dead"), None);
        assert!(db.get(b"alive").is_some());
        assert!(db.get(b"forever").is_some());
    }

    #[test]
    fn test_from_parts_drops_orphan_expirations() {
        let mut keys = HashMap::new();
        keys.insert(b"k".to_vec(), string_value(b"v"));

        let mut expirations = HashMap::new();
        expirations.insert(b"k".to_vec(), in_one_hour());
        expirations.insert(b"ghost".to_vec(), in_one_hour());

        let db = Database::from_parts(keys, expirations);
        assert!(db.expiration(b"k").is_some());
        assert_eq!(db.expiration(b"ghost"), None);
    }
}
