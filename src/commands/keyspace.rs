//! Keyspace commands: KEYS, EXISTS, DEL, TYPE, RENAME, RENAMENX, DBSIZE
//! and the flush commands.

use crate::commands::context::{CommandContext, CommandOutcome, HandlerResult};
use crate::commands::CommandError;
use crate::pattern::Pattern;
use crate::resp::RespValue;

pub fn keys(pattern: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let pattern = Pattern::parse(&pattern).map_err(|_| CommandError::PatternNotImplemented)?;
    let database = ctx.database()?;

    let matches = database
        .keys()
        .filter(|key| pattern.matches(key))
        .map(|key| RespValue::bulk(key.clone()))
        .collect();

    Ok(CommandOutcome::Reply(RespValue::Array(matches)))
}

/// Counts keys that exist; a key named several times counts several times.
pub fn exists(keys: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database()?;
    let count = keys
        .iter()
        .filter(|key| database.contains_key(key))
        .count();

    Ok(CommandOutcome::Reply(RespValue::Integer(count as i64)))
}

pub fn del(keys: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database_mut()?;
    let mut removed = 0;

    for key in keys {
        if database.remove(&key).is_some() {
            removed += 1;
        }
    }

    if removed > 0 {
        database.record_change();
    }

    Ok(CommandOutcome::Reply(RespValue::Integer(removed)))
}

pub fn type_command(key: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let name = match ctx.database()?.get(&key) {
        Some(value) => value.type_name(),
        None => "none",
    };

    Ok(CommandOutcome::Reply(RespValue::SimpleString(
        name.to_string(),
    )))
}

pub fn rename(source: Vec<u8>, destination: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database_mut()?;
    database.rename(&source, &destination)?;
    database.record_change();
    Ok(CommandOutcome::Reply(RespValue::ok()))
}

pub fn renamenx(source: Vec<u8>, destination: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database_mut()?;

    if !database.contains_key(&source) {
        return Err(CommandError::NoSuchKey);
    }

    if database.contains_key(&destination) {
        return Ok(CommandOutcome::Reply(RespValue::Integer(0)));
    }

    database.rename(&source, &destination)?;
    database.record_change();
    Ok(CommandOutcome::Reply(RespValue::Integer(1)))
}

pub fn dbsize(ctx: &mut CommandContext) -> HandlerResult {
    let length = ctx.database()?.len();
    Ok(CommandOutcome::Reply(RespValue::Integer(length as i64)))
}

pub fn flushdb(ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database_mut()?;
    database.clear();
    database.record_change();
    Ok(CommandOutcome::Reply(RespValue::ok()))
}

pub fn flushall(ctx: &mut CommandContext) -> HandlerResult {
    let set = ctx.database_set_mut()?;

    for database in set.iter_mut() {
        database.clear();
        database.record_change();
    }

    Ok(CommandOutcome::Reply(RespValue::ok()))
}
