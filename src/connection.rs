//! Per-connection handling: the frame loop, command dispatch under the
//! database lock, monitor fan-out and the reply/delivery outbox.
//!
//! Each connection runs two tasks: the reader loop owned by this module and
//! a writer task draining the outbox channel. Command replies and pub/sub
//! deliveries share the outbox, which gives the per-connection ordering
//! guarantee; the database lock is always released before anything touches
//! the socket.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use jiff::Timestamp;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::command_table::CommandFlags;
use crate::commands::context::{CommandContext, CommandOutcome, ConnectionState, DbAccess};
use crate::commands::CommandError;
use crate::registry::ClientHandle;
use crate::resp::RespValue;
use crate::server::ServerShared;

enum Flow {
    Continue,
    Close,
}

pub async fn handle_client_connection(
    stream: TcpStream,
    addr: std::net::SocketAddr,
    shared: Arc<ServerShared>,
) {
    if let Err(error) = stream.set_nodelay(true) {
        warn!(%error, "failed to set TCP_NODELAY");
    }

    let (reader, writer) = stream.into_split();
    let (outbox, outbox_rx) = mpsc::unbounded_channel();

    let id = shared.next_client_id.fetch_add(1, Ordering::Relaxed) + 1;
    let addr = addr.to_string();
    let handle = Arc::new(ClientHandle::new(id, addr.clone(), outbox));
    shared.clients.insert(Arc::clone(&handle));

    let writer_task = tokio::spawn(drain_outbox(writer, outbox_rx));

    let mut state = ConnectionState::new(id, addr);
    debug!(client = id, addr = %state.addr, "client connected");

    read_loop(reader, &mut state, &handle, &shared).await;

    // Remove the registry entry before anything else so the back-reference
    // is only ever used for this final cleanup.
    shared.clients.remove(id);
    shared.bus.remove_client(id);
    if state.monitoring {
        shared.monitor_count.fetch_sub(1, Ordering::Relaxed);
    }

    drop(handle);
    let _ = writer_task.await;
    debug!(client = id, "client disconnected");
}

async fn drain_outbox(mut writer: OwnedWriteHalf, mut outbox: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = outbox.recv().await {
        if writer.write_all(&frame).await.is_err() {
            break;
        }
    }

    let _ = writer.shutdown().await;
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    state: &mut ConnectionState,
    handle: &Arc<ClientHandle>,
    shared: &ServerShared,
) {
    let mut buffer = BytesMut::with_capacity(4096);

    loop {
        // Drain every complete frame currently buffered; partial frames
        // wait for the next read.
        loop {
            match RespValue::decode(&buffer) {
                Ok(Some((frame, consumed))) => {
                    buffer.advance(consumed);

                    match process_frame(frame, state, handle, shared).await {
                        Flow::Continue => (),
                        Flow::Close => return,
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    warn!(client = state.id, %error, "protocol error, closing connection");
                    return;
                }
            }
        }

        match reader.read_buf(&mut buffer).await {
            Ok(0) => return,
            Ok(_) => (),
            Err(error) => {
                debug!(client = state.id, %error, "read failed");
                return;
            }
        }
    }
}

async fn process_frame(
    frame: RespValue,
    state: &mut ConnectionState,
    handle: &Arc<ClientHandle>,
    shared: &ServerShared,
) -> Flow {
    let parts = match command_parts(frame) {
        Ok(Some(parts)) => parts,
        Ok(None) => return Flow::Continue,
        Err(()) => {
            warn!(client = state.id, "malformed command frame, closing connection");
            return Flow::Close;
        }
    };

    let name = String::from_utf8_lossy(&parts[0]).to_ascii_uppercase();
    state.last_command = name.to_lowercase();
    state.last_activity = Timestamp::now();

    let flow = dispatch(&name, parts, state, handle, shared).await;
    handle.update_snapshot(state.snapshot());
    flow
}

/// A command frame is a non-empty array of bulk strings. Empty arrays
/// (blank inline lines) are skipped; anything else is a framing violation
/// that closes the connection.
fn command_parts(frame: RespValue) -> Result<Option<Vec<Vec<u8>>>, ()> {
    match frame {
        RespValue::Array(elements) => {
            if elements.is_empty() {
                return Ok(None);
            }

            let mut parts = Vec::with_capacity(elements.len());
            for element in elements {
                match element {
                    RespValue::BulkString(bytes) => parts.push(bytes.to_vec()),
                    _ => return Err(()),
                }
            }

            Ok(Some(parts))
        }
        RespValue::NullArray => Ok(None),
        _ => Err(()),
    }
}

fn send(handle: &ClientHandle, reply: RespValue) {
    let _ = handle.outbox.send(reply.encode());
}

/// In subscribe mode only the subscription family, PING, QUIT and PUBSUB
/// are accepted.
fn allowed_in_subscribe_mode(name: &str) -> bool {
    matches!(
        name,
        "SUBSCRIBE" | "UNSUBSCRIBE" | "PSUBSCRIBE" | "PUNSUBSCRIBE" | "PING" | "QUIT" | "PUBSUB"
    )
}

async fn dispatch(
    name: &str,
    parts: Vec<Vec<u8>>,
    state: &mut ConnectionState,
    handle: &Arc<ClientHandle>,
    shared: &ServerShared,
) -> Flow {
    let Some(spec) = shared.commands.lookup(name) else {
        let original = String::from_utf8_lossy(&parts[0]).into_owned();
        send(handle, CommandError::UnknownCommand(original).to_resp());
        return Flow::Continue;
    };

    if !spec.arity.accepts(parts.len()) {
        send(handle, CommandError::WrongArity(name.to_lowercase()).to_resp());
        return Flow::Continue;
    }

    if state.in_subscribe_mode() && !allowed_in_subscribe_mode(spec.name) {
        send(
            handle,
            CommandError::SubscribeModeRestricted(name.to_lowercase()).to_resp(),
        );
        return Flow::Continue;
    }

    if shared.monitor_count.load(Ordering::Relaxed) > 0 {
        let line = format_monitor_line(state.db_index, &state.addr, &parts);
        let frame = RespValue::SimpleString(line).encode();

        for outbox in shared.clients.monitor_outboxes(state.id) {
            let _ = outbox.send(frame.clone());
        }
    }

    let mut args = parts;
    args.remove(0);

    // The guard lives exactly as long as the handler call; everything that
    // can wait (deferred replies, socket writes) happens after this block.
    let outcome = {
        let access = if spec.flags.contains(CommandFlags::WRITE) {
            DbAccess::Write(shared.databases.write().await)
        } else if spec.flags.contains(CommandFlags::READONLY) {
            DbAccess::Read(shared.databases.read().await)
        } else {
            DbAccess::None
        };

        let mut ctx = CommandContext {
            db: access,
            state,
            handle,
            shared,
        };

        spec.invoke(args, &mut ctx)
    };

    match outcome {
        Ok(CommandOutcome::Reply(reply)) => {
            send(handle, reply);
            Flow::Continue
        }
        Ok(CommandOutcome::Frames(frames)) => {
            for frame in frames {
                send(handle, frame);
            }
            Flow::Continue
        }
        Ok(CommandOutcome::Deferred(receiver)) => {
            let reply = match receiver.await {
                Ok(Ok(())) => RespValue::ok(),
                Ok(Err(reason)) => CommandError::SaveFailed(reason).to_resp(),
                Err(_) => CommandError::Internal("snapshot worker dropped the request".to_string())
                    .to_resp(),
            };

            send(handle, reply);
            Flow::Continue
        }
        Ok(CommandOutcome::Close(reply)) => {
            send(handle, reply);
            Flow::Close
        }
        Err(error) => {
            send(handle, error.to_resp());
            Flow::Continue
        }
    }
}

/// One monitor line: unix timestamp with six fractional digits, database
/// index, peer address, then the command array with double-quoted strings.
fn format_monitor_line(db_index: usize, addr: &str, parts: &[Vec<u8>]) -> String {
    let micros = Timestamp::now().as_microsecond();
    let mut line = format!(
        "{}.{:06} [{} {}]",
        micros.div_euclid(1_000_000),
        micros.rem_euclid(1_000_000),
        db_index,
        addr
    );

    for part in parts {
        line.push(' ');
        line.push('"');
        for &byte in part {
            match byte {
                b'"' => line.push_str("\\\""),
                b'\\' => line.push_str("\\\\"),
                b'\n' => line.push_str("\\n"),
                b'\r' => line.push_str("\\r"),
                0x20..=0x7e => line.push(byte as char),
                _ => line.push_str(&format!("\\x{:02x}", byte)),
            }
        }
        line.push('"');
    }

    line
}
