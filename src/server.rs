//! Server bootstrap: configuration, the shared state every connection sees,
//! dump loading, socket setup and the accept loop.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize};
use std::sync::Arc;
use std::time::Duration;

use jiff::Timestamp;
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::command_table::CommandTable;
use crate::connection::handle_client_connection;
use crate::database::SavePoint;
use crate::database_set::DatabaseSet;
use crate::pubsub::PubSubBus;
use crate::registry::ClientRegistry;
use crate::snapshot::SnapshotManager;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("cannot resolve listen address {0}")]
    InvalidHost(String),
    #[error("failed to bind listener: {0}")]
    Bind(std::io::Error),
}

/// Server configuration. `host` of `None` binds all interfaces.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: u16,
    pub db_filename: PathBuf,
    pub save_points: Vec<SavePoint>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: None,
            port: 6379,
            db_filename: PathBuf::from("dump.json"),
            save_points: vec![
                SavePoint::new(Duration::from_secs(3600), 1),
                SavePoint::new(Duration::from_secs(300), 100),
                SavePoint::new(Duration::from_secs(60), 10000),
            ],
        }
    }
}

/// Everything a connection task needs a handle to.
pub struct ServerShared {
    pub config: ServerConfig,
    pub databases: Arc<RwLock<DatabaseSet>>,
    pub snapshots: Arc<SnapshotManager>,
    pub bus: PubSubBus,
    pub clients: ClientRegistry,
    pub commands: CommandTable,
    pub monitor_count: AtomicUsize,
    pub next_client_id: AtomicU64,
    pub start_time: Timestamp,
    pub pid: u32,
}

pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Server { config }
    }

    /// Loads the dump, wires the storage/persistence pair and binds the
    /// listening socket with SO_REUSEADDR.
    pub async fn bind(self) -> Result<BoundServer, ServerError> {
        let config = self.config;

        let databases = Arc::new(RwLock::new(SnapshotManager::load(&config.db_filename)));
        let snapshots = Arc::new(SnapshotManager::new(config.db_filename.clone()));
        snapshots.attach(&databases);

        let save_points: Arc<[SavePoint]> = config.save_points.clone().into();
        databases
            .write()
            .await
            .attach(&databases, &snapshots, save_points);

        let addr = resolve_listen_addr(&config).await?;
        let listener = bind_listener(addr).map_err(ServerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ServerError::Bind)?;

        let shared = Arc::new(ServerShared {
            config,
            databases,
            snapshots,
            bus: PubSubBus::new(),
            clients: ClientRegistry::new(),
            commands: CommandTable::new(),
            monitor_count: AtomicUsize::new(0),
            next_client_id: AtomicU64::new(0),
            start_time: Timestamp::now(),
            pid: std::process::id(),
        });

        info!(
            port = local_addr.port(),
            pid = shared.pid,
            dump = %shared.config.db_filename.display(),
            "server listening"
        );

        Ok(BoundServer {
            listener,
            local_addr,
            shared,
        })
    }
}

async fn resolve_listen_addr(config: &ServerConfig) -> Result<SocketAddr, ServerError> {
    let host = config
        .host
        .clone()
        .unwrap_or_else(|| "0.0.0.0".to_string());

    // Bare IPv6 addresses need brackets before the port is appended.
    let target = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, config.port)
    } else {
        format!("{}:{}", host, config.port)
    };

    let mut addrs = tokio::net::lookup_host(&target)
        .await
        .map_err(|_| ServerError::InvalidHost(target.clone()))?;
    let first = addrs.next();
    drop(addrs);
    first.ok_or(ServerError::InvalidHost(target))
}

fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(1024)
}

/// A bound server ready to accept connections.
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    shared: Arc<ServerShared>,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shared(&self) -> &Arc<ServerShared> {
        &self.shared
    }

    /// Accepts connections until the task is dropped; each socket gets its
    /// own connection task.
    pub async fn serve(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(handle_client_connection(stream, addr, shared));
                }
                Err(error) => {
                    error!(%error, "failed to accept connection");
                }
            }
        }
    }
}
