//! The execution context handed to every command handler.
//!
//! Handlers are synchronous: the connection acquires the database lock
//! dictated by the command's flags, builds a [`CommandContext`] around the
//! guard, invokes the typed handler, and drops the guard before touching
//! the socket again. A handler that needs work done off the lock (SAVE)
//! returns a deferred receiver the connection awaits afterwards.

use std::collections::HashSet;
use std::sync::Arc;

use jiff::Timestamp;
use tokio::sync::{oneshot, RwLockReadGuard, RwLockWriteGuard};

use crate::commands::CommandError;
use crate::database::Database;
use crate::database_set::DatabaseSet;
use crate::registry::{ClientHandle, ClientSnapshot};
use crate::resp::RespValue;
use crate::server::ServerShared;

/// What a handler hands back to the connection.
pub enum CommandOutcome {
    /// One reply frame.
    Reply(RespValue),
    /// Several reply frames written back to back (subscribe confirmations).
    Frames(Vec<RespValue>),
    /// The reply arrives later from the snapshot worker; awaited with no
    /// locks held.
    Deferred(oneshot::Receiver<Result<(), String>>),
    /// Write the frame, then close the connection (QUIT).
    Close(RespValue),
}

pub type HandlerResult = Result<CommandOutcome, CommandError>;

/// The database access a command's flags granted it.
pub enum DbAccess<'a> {
    None,
    Read(RwLockReadGuard<'a, DatabaseSet>),
    Write(RwLockWriteGuard<'a, DatabaseSet>),
}

/// Mutable per-connection state owned by the connection task.
pub struct ConnectionState {
    pub id: u64,
    pub addr: String,
    pub created_at: Timestamp,
    pub last_activity: Timestamp,
    pub last_command: String,
    pub name: String,
    pub db_index: usize,
    pub monitoring: bool,
    pub channels: HashSet<Vec<u8>>,
    pub patterns: HashSet<Vec<u8>>,
}

impl ConnectionState {
    pub fn new(id: u64, addr: String) -> Self {
        let now = Timestamp::now();

        ConnectionState {
            id,
            addr,
            created_at: now,
            last_activity: now,
            last_command: String::new(),
            name: String::new(),
            db_index: 0,
            monitoring: false,
            channels: HashSet::new(),
            patterns: HashSet::new(),
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }

    /// A connection is in subscribe mode while it holds at least one
    /// channel or pattern subscription.
    pub fn in_subscribe_mode(&self) -> bool {
        self.subscription_count() > 0
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            id: self.id,
            addr: self.addr.clone(),
            name: self.name.clone(),
            db_index: self.db_index,
            channel_count: self.channels.len(),
            pattern_count: self.patterns.len(),
            last_command: self.last_command.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }
}

pub struct CommandContext<'a> {
    pub db: DbAccess<'a>,
    pub state: &'a mut ConnectionState,
    pub handle: &'a Arc<ClientHandle>,
    pub shared: &'a ServerShared,
}

impl CommandContext<'_> {
    /// The connection's selected database, read access.
    pub fn database(&self) -> Result<&Database, CommandError> {
        let index = self.state.db_index;

        match &self.db {
            DbAccess::Read(guard) => Ok(guard.database(index)),
            DbAccess::Write(guard) => Ok(guard.database(index)),
            DbAccess::None => Err(CommandError::Internal(
                "command executed without database access".to_string(),
            )),
        }
    }

    /// The connection's selected database, write access.
    pub fn database_mut(&mut self) -> Result<&mut Database, CommandError> {
        let index = self.state.db_index;

        match &mut self.db {
            DbAccess::Write(guard) => Ok(guard.database_mut(index)),
            _ => Err(CommandError::Internal(
                "write command executed without the write lock".to_string(),
            )),
        }
    }

    /// The whole set, for SWAPDB and FLUSHALL.
    pub fn database_set_mut(&mut self) -> Result<&mut DatabaseSet, CommandError> {
        match &mut self.db {
            DbAccess::Write(guard) => Ok(&mut **guard),
            _ => Err(CommandError::Internal(
                "write command executed without the write lock".to_string(),
            )),
        }
    }
}
