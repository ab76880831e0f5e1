//! A Redis-compatible in-memory key/value server.
//!
//! This crate implements the core of a server speaking the RESP wire
//! format:
//!
//! - RESP framing with inline/telnet mode
//! - sixteen in-process databases holding strings, lists, sets and hashes,
//!   with per-key expirations swept by quantized wall-clock timers
//! - a static command table dispatching typed argument shapes into
//!   per-family handlers
//! - a publish/subscribe bus with exact-channel and pattern subscriptions
//! - JSON snapshot persistence with save-point scheduling
//!
//! Connections are served concurrently with Tokio; one reader/writer lock
//! guards the database set, and per-connection outbox channels keep the
//! lock away from socket writes.

pub mod command_table;
pub mod commands;
pub mod connection;
pub mod database;
pub mod database_set;
pub mod pattern;
pub mod pubsub;
pub mod registry;
pub mod resp;
pub mod server;
pub mod snapshot;
pub mod value;
