//! JSON snapshot persistence: serializing the database set to the dump
//! file, loading it back at startup, and the save-point timer.
//!
//! The manager owns a single worker task fed through an mpsc channel, so
//! save attempts can never overlap. The snapshot copy is taken under the
//! write lock (which also resets the change counters); the lock is released
//! before any file I/O happens.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};

use crate::database::Database;
use crate::database_set::DatabaseSet;
use crate::value::StoredValue;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("corrupt dump: {0}")]
    Corrupt(#[from] base64::DecodeError),
    #[error("database set is gone")]
    Detached,
}

// ── Serializable mirror types ─────────────────────────────────────────────

/// One stored value in its dump form. Binary payloads travel base64-encoded
/// so the file stays valid JSON regardless of key or value contents.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
enum DumpEntry {
    String(String),
    List(Vec<String>),
    Set(Vec<String>),
    Hash(BTreeMap<String, String>),
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct DumpDatabase {
    keys: BTreeMap<String, DumpEntry>,
    expirations: BTreeMap<String, Timestamp>,
}

fn encode_entry(value: &StoredValue) -> DumpEntry {
    match value {
        StoredValue::String(bytes) => DumpEntry::String(BASE64.encode(bytes)),
        StoredValue::List(items) => {
            DumpEntry::List(items.iter().map(|item| BASE64.encode(item)).collect())
        }
        StoredValue::Set(members) => {
            DumpEntry::Set(members.iter().map(|member| BASE64.encode(member)).collect())
        }
        StoredValue::Hash(fields) => DumpEntry::Hash(
            fields
                .iter()
                .map(|(field, value)| (BASE64.encode(field), BASE64.encode(value)))
                .collect(),
        ),
    }
}

fn decode_entry(entry: DumpEntry) -> Result<StoredValue, SnapshotError> {
    Ok(match entry {
        DumpEntry::String(text) => StoredValue::String(BASE64.decode(text)?),
        DumpEntry::List(items) => StoredValue::List(
            items
                .into_iter()
                .map(|item| BASE64.decode(item))
                .collect::<Result<_, _>>()?,
        ),
        DumpEntry::Set(members) => StoredValue::Set(
            members
                .into_iter()
                .map(|member| BASE64.decode(member))
                .collect::<Result<_, _>>()?,
        ),
        DumpEntry::Hash(fields) => StoredValue::Hash(
            fields
                .into_iter()
                .map(|(field, value)| Ok((BASE64.decode(field)?, BASE64.decode(value)?)))
                .collect::<Result<_, SnapshotError>>()?,
        ),
    })
}

fn dump_database(database: &Database) -> DumpDatabase {
    DumpDatabase {
        keys: database
            .iter()
            .map(|(key, value)| (BASE64.encode(key), encode_entry(value)))
            .collect(),
        expirations: database
            .expirations()
            .map(|(key, deadline)| (BASE64.encode(key), *deadline))
            .collect(),
    }
}

fn restore_database(dump: DumpDatabase) -> Result<Database, SnapshotError> {
    let mut keys = HashMap::new();
    for (key, entry) in dump.keys {
        keys.insert(BASE64.decode(key)?, decode_entry(entry)?);
    }

    let mut expirations = HashMap::new();
    for (key, deadline) in dump.expirations {
        expirations.insert(BASE64.decode(key)?, deadline);
    }

    Ok(Database::from_parts(keys, expirations))
}

// ── Manager ───────────────────────────────────────────────────────────────

struct SaveJob {
    reply: Option<oneshot::Sender<Result<(), String>>>,
}

struct PendingSave {
    deadline_ms: i64,
    generation: u64,
}

struct LastSave {
    at: Timestamp,
    duration: Duration,
}

/// Owns the dump path, the save worker and the save-point timer state.
pub struct SnapshotManager {
    path: PathBuf,
    jobs: mpsc::UnboundedSender<SaveJob>,
    worker_inbox: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<SaveJob>>>,
    databases: OnceLock<Weak<RwLock<DatabaseSet>>>,
    last_save: parking_lot::Mutex<LastSave>,
    pending: parking_lot::Mutex<Option<PendingSave>>,
    generation: AtomicU64,
}

impl SnapshotManager {
    pub fn new(path: PathBuf) -> Self {
        let (jobs, inbox) = mpsc::unbounded_channel();

        SnapshotManager {
            path,
            jobs,
            worker_inbox: parking_lot::Mutex::new(Some(inbox)),
            databases: OnceLock::new(),
            last_save: parking_lot::Mutex::new(LastSave {
                at: Timestamp::now(),
                duration: Duration::ZERO,
            }),
            pending: parking_lot::Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn dump_path(&self) -> &Path {
        &self.path
    }

    /// Instant and duration of the most recent successful save. Before the
    /// first save, the instant is the manager's construction time.
    pub fn last_save(&self) -> (Timestamp, Duration) {
        let last = self.last_save.lock();
        (last.at, last.duration)
    }

    /// Loads a dump file into a database set. A missing, near-empty or
    /// undecodable file yields a fresh empty set; decode failures are
    /// logged, never fatal.
    pub fn load(path: &Path) -> DatabaseSet {
        match Self::try_load(path) {
            Ok(set) => set,
            Err(error) => {
                error!(path = %path.display(), %error, "failed to load dump, starting empty");
                DatabaseSet::new()
            }
        }
    }

    fn try_load(path: &Path) -> Result<DatabaseSet, SnapshotError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(DatabaseSet::new());
            }
            Err(error) => return Err(error.into()),
        };

        if bytes.len() < 2 {
            return Ok(DatabaseSet::new());
        }

        let dumps: Vec<DumpDatabase> = serde_json::from_slice(&bytes)?;
        let databases = dumps
            .into_iter()
            .map(restore_database)
            .collect::<Result<Vec<Database>, SnapshotError>>()?;

        Ok(DatabaseSet::from_databases(databases))
    }

    /// Wires the manager to the database set and starts the save worker.
    pub fn attach(self: &Arc<Self>, set: &Arc<RwLock<DatabaseSet>>) {
        let _ = self.databases.set(Arc::downgrade(set));

        let Some(mut inbox) = self.worker_inbox.lock().take() else {
            return;
        };

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(job) = inbox.recv().await {
                let result = manager.perform_save().await;

                if let Err(error) = &result {
                    warn!(%error, "snapshot save failed");
                }

                if let Some(reply) = job.reply {
                    let _ = reply.send(result.map_err(|error| error.to_string()));
                }
            }
        });
    }

    /// Enqueues a save on the worker stream. Returns false when the worker
    /// is gone (only during shutdown).
    pub fn submit_save(&self, reply: Option<oneshot::Sender<Result<(), String>>>) -> bool {
        self.jobs.send(SaveJob { reply }).is_ok()
    }

    /// Enqueues a save and waits for its result.
    pub async fn save_sync(&self) -> Result<(), String> {
        let (tx, rx) = oneshot::channel();

        if !self.submit_save(Some(tx)) {
            return Err("snapshot worker unavailable".to_string());
        }

        rx.await
            .map_err(|_| "snapshot worker dropped the request".to_string())?
    }

    /// Schedules a save `delay` from now. An already pending earlier save
    /// wins; a pending later one is superseded (its timer becomes a no-op).
    pub fn schedule_save(self: &Arc<Self>, delay: Duration) {
        let deadline_ms = Timestamp::now().as_millisecond() + delay.as_millis() as i64;

        {
            let mut pending = self.pending.lock();

            if let Some(current) = &*pending {
                if current.deadline_ms <= deadline_ms {
                    return;
                }
            }

            let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
            *pending = Some(PendingSave {
                deadline_ms,
                generation,
            });

            let manager = Arc::clone(self);
            tokio::spawn(async move {
                let wait = deadline_ms - Timestamp::now().as_millisecond();
                if wait > 0 {
                    tokio::time::sleep(Duration::from_millis(wait as u64)).await;
                }

                {
                    let mut pending = manager.pending.lock();
                    match &*pending {
                        Some(current) if current.generation == generation => *pending = None,
                        _ => return,
                    }
                }

                debug!("scheduled save point fired");
                manager.submit_save(None);
            });
        }
    }

    /// Serializes the whole set and atomically replaces the dump file.
    /// Change counters reset under the write lock before serialization.
    async fn perform_save(&self) -> Result<(), SnapshotError> {
        let set = self
            .databases
            .get()
            .and_then(Weak::upgrade)
            .ok_or(SnapshotError::Detached)?;

        let started = std::time::Instant::now();

        let dumps = {
            let mut guard = set.write().await;
            guard.reset_change_counters();
            guard.iter().map(dump_database).collect::<Vec<DumpDatabase>>()
        };

        let bytes = serde_json::to_vec(&dumps)?;
        write_atomic(&self.path, &bytes)?;

        let duration = started.elapsed();
        {
            let mut last = self.last_save.lock();
            last.at = Timestamp::now();
            last.duration = duration;
        }

        info!(
            path = %self.path.display(),
            bytes = bytes.len(),
            elapsed_ms = duration.as_millis() as u64,
            "database saved"
        );
        Ok(())
    }
}

/// Write-to-temp then rename, so readers never observe a torn dump.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
