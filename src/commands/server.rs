//! Server and connection commands: PING/ECHO/QUIT, database selection,
//! monitoring, the save commands, COMMAND introspection and CLIENT.

use std::sync::atomic::Ordering;

use jiff::Timestamp;
use tokio::sync::oneshot;

use crate::commands::context::{CommandContext, CommandOutcome, HandlerResult};
use crate::commands::CommandError;
use crate::database_set::DATABASE_COUNT;
use crate::resp::RespValue;
use crate::value::parse_integer;

pub fn ping(message: Option<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    // In subscribe mode the reply takes the array form so it cannot be
    // confused with a delivered message.
    let reply = if ctx.state.in_subscribe_mode() {
        RespValue::Array(vec![
            RespValue::bulk(&b"pong"[..]),
            RespValue::bulk(message.unwrap_or_default()),
        ])
    } else {
        match message {
            Some(message) => RespValue::bulk(message),
            None => RespValue::SimpleString("PONG".to_string()),
        }
    };

    Ok(CommandOutcome::Reply(reply))
}

pub fn echo(message: Vec<u8>, _ctx: &mut CommandContext) -> HandlerResult {
    Ok(CommandOutcome::Reply(RespValue::bulk(message)))
}

pub fn quit(_ctx: &mut CommandContext) -> HandlerResult {
    Ok(CommandOutcome::Close(RespValue::ok()))
}

fn parse_db_index(value: &[u8]) -> Result<usize, CommandError> {
    let index = parse_integer(value)?;

    usize::try_from(index)
        .ok()
        .filter(|index| *index < DATABASE_COUNT)
        .ok_or(CommandError::DbIndexOutOfRange)
}

pub fn select(index: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    ctx.state.db_index = parse_db_index(&index)?;
    Ok(CommandOutcome::Reply(RespValue::ok()))
}

pub fn swapdb(first: Vec<u8>, second: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let first = parse_db_index(&first)?;
    let second = parse_db_index(&second)?;

    ctx.database_set_mut()?.swap(first, second);
    Ok(CommandOutcome::Reply(RespValue::ok()))
}

pub fn monitor(ctx: &mut CommandContext) -> HandlerResult {
    if !ctx.state.monitoring {
        ctx.state.monitoring = true;
        ctx.handle.monitoring.store(true, Ordering::Relaxed);
        ctx.shared.monitor_count.fetch_add(1, Ordering::Relaxed);
    }

    Ok(CommandOutcome::Reply(RespValue::ok()))
}

/// Enqueues a synchronous save; the connection awaits the worker's reply
/// with no locks held.
pub fn save(ctx: &mut CommandContext) -> HandlerResult {
    let (tx, rx) = oneshot::channel();

    if !ctx.shared.snapshots.submit_save(Some(tx)) {
        return Err(CommandError::SaveFailed("snapshot worker unavailable".to_string()));
    }

    Ok(CommandOutcome::Deferred(rx))
}

pub fn bgsave(ctx: &mut CommandContext) -> HandlerResult {
    if !ctx.shared.snapshots.submit_save(None) {
        return Err(CommandError::SaveFailed("snapshot worker unavailable".to_string()));
    }

    Ok(CommandOutcome::Reply(RespValue::SimpleString(
        "Background saving started".to_string(),
    )))
}

pub fn lastsave(ctx: &mut CommandContext) -> HandlerResult {
    let (at, _) = ctx.shared.snapshots.last_save();
    Ok(CommandOutcome::Reply(RespValue::Integer(at.as_second())))
}

pub fn command(subcommand: Option<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    match subcommand {
        None => Ok(CommandOutcome::Reply(ctx.shared.commands.to_resp())),
        Some(subcommand) => match subcommand.to_ascii_uppercase().as_slice() {
            b"COUNT" => Ok(CommandOutcome::Reply(RespValue::Integer(
                ctx.shared.commands.len() as i64,
            ))),
            _ => Err(CommandError::UnknownSubcommand(
                String::from_utf8_lossy(&subcommand).to_lowercase(),
            )),
        },
    }
}

fn is_valid_client_name(name: &[u8]) -> bool {
    name.iter().all(|byte| (33..=126).contains(byte))
}

pub fn client(mut args: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    let subcommand = args.remove(0).to_ascii_uppercase();

    match subcommand.as_slice() {
        b"SETNAME" if args.len() == 1 => {
            let name = args.remove(0);

            if !is_valid_client_name(&name) {
                return Err(CommandError::InvalidClientName);
            }

            ctx.state.name = String::from_utf8_lossy(&name).into_owned();
            Ok(CommandOutcome::Reply(RespValue::ok()))
        }
        b"GETNAME" if args.is_empty() => Ok(CommandOutcome::Reply(RespValue::bulk(
            ctx.state.name.clone().into_bytes(),
        ))),
        b"ID" if args.is_empty() => {
            Ok(CommandOutcome::Reply(RespValue::Integer(ctx.state.id as i64)))
        }
        b"LIST" if args.is_empty() => {
            let now = Timestamp::now();
            let mut listing = String::new();

            for snapshot in ctx.shared.clients.snapshots() {
                // The caller's registry snapshot lags by one command; render
                // its live state instead.
                let line = if snapshot.id == ctx.state.id {
                    ctx.state.snapshot().render(now)
                } else {
                    snapshot.render(now)
                };

                listing.push_str(&line);
                listing.push('\n');
            }

            Ok(CommandOutcome::Reply(RespValue::bulk(listing.into_bytes())))
        }
        _ => Err(CommandError::UnknownSubcommand(
            String::from_utf8_lossy(&subcommand).to_lowercase(),
        )),
    }
}
