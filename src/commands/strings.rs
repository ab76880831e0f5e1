//! String commands: GET, SET and its option forms, ranges, multi-key
//! variants and the integer counters.

use jiff::Timestamp;

use crate::commands::context::{CommandContext, CommandOutcome, HandlerResult};
use crate::commands::CommandError;
use crate::resp::RespValue;
use crate::value::{normalize_range, parse_integer, StoredValue};

pub fn get(key: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let reply = match ctx.database()?.string(&key)? {
        Some(bytes) => RespValue::bulk(bytes.clone()),
        None => RespValue::NullBulkString,
    };

    Ok(CommandOutcome::Reply(reply))
}

/// SET options after key and value: EX seconds, PX milliseconds, NX, XX.
struct SetOptions {
    deadline: Option<Timestamp>,
    only_if_absent: bool,
    only_if_present: bool,
}

impl SetOptions {
    fn parse(options: &[Vec<u8>]) -> Result<Self, CommandError> {
        let mut parsed = SetOptions {
            deadline: None,
            only_if_absent: false,
            only_if_present: false,
        };

        let mut iter = options.iter();
        while let Some(option) = iter.next() {
            match option.to_ascii_uppercase().as_slice() {
                b"NX" => parsed.only_if_absent = true,
                b"XX" => parsed.only_if_present = true,
                b"EX" => {
                    let seconds = parse_integer(iter.next().ok_or(CommandError::Syntax)?)?;
                    parsed.deadline = Some(deadline_after(seconds, 1000, "set")?);
                }
                b"PX" => {
                    let millis = parse_integer(iter.next().ok_or(CommandError::Syntax)?)?;
                    parsed.deadline = Some(deadline_after(millis, 1, "set")?);
                }
                _ => return Err(CommandError::Syntax),
            }
        }

        if parsed.only_if_absent && parsed.only_if_present {
            return Err(CommandError::Syntax);
        }

        Ok(parsed)
    }
}

/// An absolute deadline `amount * unit_millis` from now; the amount must be
/// positive.
fn deadline_after(amount: i64, unit_millis: i64, command: &str) -> Result<Timestamp, CommandError> {
    if amount <= 0 {
        return Err(CommandError::InvalidExpireTime(command.to_string()));
    }

    let deadline_ms = amount
        .checked_mul(unit_millis)
        .and_then(|offset| Timestamp::now().as_millisecond().checked_add(offset))
        .ok_or_else(|| CommandError::InvalidExpireTime(command.to_string()))?;

    Timestamp::from_millisecond(deadline_ms)
        .map_err(|_| CommandError::InvalidExpireTime(command.to_string()))
}

pub fn set(key: Vec<u8>, value: Vec<u8>, options: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    let options = SetOptions::parse(&options)?;
    let database = ctx.database_mut()?;
    let exists = database.contains_key(&key);

    if (options.only_if_absent && exists) || (options.only_if_present && !exists) {
        return Ok(CommandOutcome::Reply(RespValue::NullBulkString));
    }

    match options.deadline {
        Some(deadline) => {
            database.set_value_with_expiration(key, StoredValue::String(value), deadline)
        }
        None => database.set_value(key, StoredValue::String(value)),
    }

    database.record_change();
    Ok(CommandOutcome::Reply(RespValue::ok()))
}

pub fn setnx(key: Vec<u8>, value: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database_mut()?;

    if database.contains_key(&key) {
        return Ok(CommandOutcome::Reply(RespValue::Integer(0)));
    }

    database.set_value(key, StoredValue::String(value));
    database.record_change();
    Ok(CommandOutcome::Reply(RespValue::Integer(1)))
}

pub fn setex(key: Vec<u8>, seconds: i64, value: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    store_with_expiration(key, seconds, 1000, value, "setex", ctx)
}

pub fn psetex(key: Vec<u8>, millis: i64, value: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    store_with_expiration(key, millis, 1, value, "psetex", ctx)
}

fn store_with_expiration(
    key: Vec<u8>,
    amount: i64,
    unit_millis: i64,
    value: Vec<u8>,
    command: &str,
    ctx: &mut CommandContext,
) -> HandlerResult {
    let deadline = deadline_after(amount, unit_millis, command)?;
    let database = ctx.database_mut()?;

    database.set_value_with_expiration(key, StoredValue::String(value), deadline);
    database.record_change();
    Ok(CommandOutcome::Reply(RespValue::ok()))
}

pub fn getset(key: Vec<u8>, value: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database_mut()?;
    let previous = database.string(&key)?.cloned();

    database.set_value(key, StoredValue::String(value));
    database.record_change();

    let reply = match previous {
        Some(bytes) => RespValue::bulk(bytes),
        None => RespValue::NullBulkString,
    };
    Ok(CommandOutcome::Reply(reply))
}

pub fn append(key: Vec<u8>, value: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database_mut()?;

    // Appending to an existing string keeps its expiration.
    let appended = match database.string_mut(&key)? {
        Some(existing) => {
            existing.extend_from_slice(&value);
            Some(existing.len())
        }
        None => None,
    };

    let length = match appended {
        Some(length) => length,
        None => {
            let length = value.len();
            database.set_value(key, StoredValue::String(value));
            length
        }
    };

    database.record_change();
    Ok(CommandOutcome::Reply(RespValue::Integer(length as i64)))
}

pub fn strlen(key: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let length = ctx
        .database()?
        .string(&key)?
        .map_or(0, |bytes| bytes.len());
    Ok(CommandOutcome::Reply(RespValue::Integer(length as i64)))
}

pub fn getrange(key: Vec<u8>, start: i64, stop: i64, ctx: &mut CommandContext) -> HandlerResult {
    let reply = match ctx.database()?.string(&key)? {
        Some(bytes) => match normalize_range(start, stop, bytes.len()) {
            Some((from, to)) => RespValue::bulk(bytes[from..=to].to_vec()),
            None => RespValue::bulk(&b""[..]),
        },
        None => RespValue::bulk(&b""[..]),
    };

    Ok(CommandOutcome::Reply(reply))
}

pub fn setrange(key: Vec<u8>, offset: i64, value: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let offset = usize::try_from(offset).map_err(|_| CommandError::IndexOutOfRange)?;
    let database = ctx.database_mut()?;

    let patched = match database.string_mut(&key)? {
        Some(existing) => {
            if value.is_empty() {
                return Ok(CommandOutcome::Reply(RespValue::Integer(existing.len() as i64)));
            }

            let end = offset + value.len();
            if existing.len() < end {
                existing.resize(end, 0);
            }
            existing[offset..end].copy_from_slice(&value);
            Some(existing.len())
        }
        None => None,
    };

    let length = match patched {
        Some(length) => length,
        None => {
            if value.is_empty() {
                return Ok(CommandOutcome::Reply(RespValue::Integer(0)));
            }

            let mut fresh = vec![0u8; offset];
            fresh.extend_from_slice(&value);
            let length = fresh.len();
            database.set_value(key, StoredValue::String(fresh));
            length
        }
    };

    database.record_change();
    Ok(CommandOutcome::Reply(RespValue::Integer(length as i64)))
}

pub fn mget(keys: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database()?;

    let replies = keys
        .iter()
        .map(|key| match database.get(key) {
            Some(StoredValue::String(bytes)) => RespValue::bulk(bytes.clone()),
            _ => RespValue::NullBulkString,
        })
        .collect();

    Ok(CommandOutcome::Reply(RespValue::Array(replies)))
}

pub fn mset(pairs: Vec<(Vec<u8>, Vec<u8>)>, ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database_mut()?;

    for (key, value) in pairs {
        database.set_value(key, StoredValue::String(value));
    }

    database.record_change();
    Ok(CommandOutcome::Reply(RespValue::ok()))
}

pub fn msetnx(pairs: Vec<(Vec<u8>, Vec<u8>)>, ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database_mut()?;

    if pairs.iter().any(|(key, _)| database.contains_key(key)) {
        return Ok(CommandOutcome::Reply(RespValue::Integer(0)));
    }

    for (key, value) in pairs {
        database.set_value(key, StoredValue::String(value));
    }

    database.record_change();
    Ok(CommandOutcome::Reply(RespValue::Integer(1)))
}

pub fn incr(key: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    increment_by(key, 1, ctx)
}

pub fn decr(key: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    increment_by(key, -1, ctx)
}

pub fn incrby(key: Vec<u8>, delta: i64, ctx: &mut CommandContext) -> HandlerResult {
    increment_by(key, delta, ctx)
}

pub fn decrby(key: Vec<u8>, delta: i64, ctx: &mut CommandContext) -> HandlerResult {
    increment_by(key, delta.checked_neg().ok_or(CommandError::IntegerOverflow)?, ctx)
}

/// A missing key counts as 0; a non-integer string fails. The rewrite
/// happens in place so an expiration survives the increment.
fn increment_by(key: Vec<u8>, delta: i64, ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database_mut()?;

    let rewritten = match database.string_mut(&key)? {
        Some(existing) => {
            let current = parse_integer(existing)?;
            let updated = current
                .checked_add(delta)
                .ok_or(CommandError::IntegerOverflow)?;
            *existing = updated.to_string().into_bytes();
            Some(updated)
        }
        None => None,
    };

    let updated = match rewritten {
        Some(updated) => updated,
        None => {
            database.set_value(key, StoredValue::String(delta.to_string().into_bytes()));
            delta
        }
    };

    database.record_change();
    Ok(CommandOutcome::Reply(RespValue::Integer(updated)))
}
