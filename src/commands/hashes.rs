//! Hash commands: field reads and writes, bulk forms and HINCRBY.

use std::collections::HashMap;

use crate::commands::context::{CommandContext, CommandOutcome, HandlerResult};
use crate::commands::CommandError;
use crate::resp::RespValue;
use crate::value::parse_integer;

pub fn hlen(key: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let length = ctx.database()?.hash(&key)?.map_or(0, HashMap::len);
    Ok(CommandOutcome::Reply(RespValue::Integer(length as i64)))
}

pub fn hget(key: Vec<u8>, field: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let reply = match ctx.database()?.hash(&key)?.and_then(|fields| fields.get(&field)) {
        Some(value) => RespValue::bulk(value.clone()),
        None => RespValue::NullBulkString,
    };

    Ok(CommandOutcome::Reply(reply))
}

pub fn hexists(key: Vec<u8>, field: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let present = ctx
        .database()?
        .hash(&key)?
        .is_some_and(|fields| fields.contains_key(&field));

    Ok(CommandOutcome::Reply(RespValue::Integer(present as i64)))
}

pub fn hstrlen(key: Vec<u8>, field: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let length = ctx
        .database()?
        .hash(&key)?
        .and_then(|fields| fields.get(&field))
        .map_or(0, Vec::len);

    Ok(CommandOutcome::Reply(RespValue::Integer(length as i64)))
}

pub fn hkeys(key: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let reply = match ctx.database()?.hash(&key)? {
        Some(fields) => RespValue::Array(
            fields
                .keys()
                .map(|field| RespValue::bulk(field.clone()))
                .collect(),
        ),
        None => RespValue::Array(Vec::new()),
    };

    Ok(CommandOutcome::Reply(reply))
}

pub fn hvals(key: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let reply = match ctx.database()?.hash(&key)? {
        Some(fields) => RespValue::Array(
            fields
                .values()
                .map(|value| RespValue::bulk(value.clone()))
                .collect(),
        ),
        None => RespValue::Array(Vec::new()),
    };

    Ok(CommandOutcome::Reply(reply))
}

pub fn hgetall(key: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let mut reply = Vec::new();

    if let Some(fields) = ctx.database()?.hash(&key)? {
        for (field, value) in fields {
            reply.push(RespValue::bulk(field.clone()));
            reply.push(RespValue::bulk(value.clone()));
        }
    }

    Ok(CommandOutcome::Reply(RespValue::Array(reply)))
}

/// Returns 1 when the field is new, 0 when an existing field was updated.
pub fn hset(key: Vec<u8>, field: Vec<u8>, value: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database_mut()?;
    let fields = database.hash_entry(&key)?;

    let created = fields.insert(field, value).is_none();
    database.record_change();

    Ok(CommandOutcome::Reply(RespValue::Integer(created as i64)))
}

pub fn hsetnx(key: Vec<u8>, field: Vec<u8>, value: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database_mut()?;
    let fields = database.hash_entry(&key)?;

    if fields.contains_key(&field) {
        return Ok(CommandOutcome::Reply(RespValue::Integer(0)));
    }

    fields.insert(field, value);
    database.record_change();
    Ok(CommandOutcome::Reply(RespValue::Integer(1)))
}

pub fn hmset(key: Vec<u8>, values: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    if values.is_empty() || values.len() % 2 != 0 {
        return Err(CommandError::WrongArity("hmset".to_string()));
    }

    let database = ctx.database_mut()?;
    let fields = database.hash_entry(&key)?;

    let mut iter = values.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        fields.insert(field, value);
    }

    database.record_change();
    Ok(CommandOutcome::Reply(RespValue::ok()))
}

pub fn hmget(key: Vec<u8>, fields: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    let stored = ctx.database()?.hash(&key)?;

    let replies = fields
        .iter()
        .map(|field| {
            match stored.and_then(|existing| existing.get(field)) {
                Some(value) => RespValue::bulk(value.clone()),
                None => RespValue::NullBulkString,
            }
        })
        .collect();

    Ok(CommandOutcome::Reply(RespValue::Array(replies)))
}

pub fn hdel(key: Vec<u8>, fields: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database_mut()?;
    let mut removed = 0;

    if let Some(existing) = database.hash_mut(&key)? {
        for field in fields {
            if existing.remove(&field).is_some() {
                removed += 1;
            }
        }
    }

    if removed > 0 {
        database.record_change();
    }

    Ok(CommandOutcome::Reply(RespValue::Integer(removed)))
}

/// Creates the field at 0 when missing; fails when the stored field does
/// not parse as an integer.
pub fn hincrby(key: Vec<u8>, field: Vec<u8>, delta: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let delta = parse_integer(&delta)?;
    let database = ctx.database_mut()?;
    let fields = database.hash_entry(&key)?;

    let current = match fields.get(&field) {
        Some(value) => parse_integer(value)?,
        None => 0,
    };

    let updated = current
        .checked_add(delta)
        .ok_or(CommandError::IntegerOverflow)?;
    fields.insert(field, updated.to_string().into_bytes());

    database.record_change();
    Ok(CommandOutcome::Reply(RespValue::Integer(updated)))
}
