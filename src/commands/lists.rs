//! List commands: pushes, pops, index access and ranges. Negative indices
//! count from the tail; `-1` is the last element.

use std::collections::VecDeque;

use crate::commands::context::{CommandContext, CommandOutcome, HandlerResult};
use crate::commands::CommandError;
use crate::resp::RespValue;
use crate::value::{normalize_index, normalize_range};

pub fn llen(key: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let length = ctx.database()?.list(&key)?.map_or(0, VecDeque::len);
    Ok(CommandOutcome::Reply(RespValue::Integer(length as i64)))
}

pub fn lrange(key: Vec<u8>, start: i64, stop: i64, ctx: &mut CommandContext) -> HandlerResult {
    let reply = match ctx.database()?.list(&key)? {
        Some(list) => match normalize_range(start, stop, list.len()) {
            Some((from, to)) => RespValue::Array(
                list.iter()
                    .skip(from)
                    .take(to - from + 1)
                    .map(|item| RespValue::bulk(item.clone()))
                    .collect(),
            ),
            None => RespValue::Array(Vec::new()),
        },
        None => RespValue::Array(Vec::new()),
    };

    Ok(CommandOutcome::Reply(reply))
}

pub fn lindex(key: Vec<u8>, index: i64, ctx: &mut CommandContext) -> HandlerResult {
    let reply = match ctx.database()?.list(&key)? {
        Some(list) => match normalize_index(index, list.len()) {
            Some(position) => RespValue::bulk(list[position].clone()),
            None => RespValue::NullBulkString,
        },
        None => RespValue::NullBulkString,
    };

    Ok(CommandOutcome::Reply(reply))
}

pub fn lset(key: Vec<u8>, index: i64, value: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database_mut()?;

    let Some(list) = database.list_mut(&key)? else {
        return Err(CommandError::NoSuchKey);
    };

    let position = normalize_index(index, list.len()).ok_or(CommandError::IndexOutOfRange)?;
    list[position] = value;

    database.record_change();
    Ok(CommandOutcome::Reply(RespValue::ok()))
}

pub fn lpush(key: Vec<u8>, values: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    push(key, values, true, false, ctx)
}

pub fn rpush(key: Vec<u8>, values: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    push(key, values, false, false, ctx)
}

pub fn lpushx(key: Vec<u8>, values: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    push(key, values, true, true, ctx)
}

pub fn rpushx(key: Vec<u8>, values: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    push(key, values, false, true, ctx)
}

fn push(
    key: Vec<u8>,
    values: Vec<Vec<u8>>,
    front: bool,
    require_existing: bool,
    ctx: &mut CommandContext,
) -> HandlerResult {
    let database = ctx.database_mut()?;

    if require_existing && database.list(&key)?.is_none() {
        return Ok(CommandOutcome::Reply(RespValue::Integer(0)));
    }

    let list = database.list_entry(&key)?;
    for value in values {
        if front {
            list.push_front(value);
        } else {
            list.push_back(value);
        }
    }
    let length = list.len();

    database.record_change();
    Ok(CommandOutcome::Reply(RespValue::Integer(length as i64)))
}

pub fn lpop(key: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    pop(key, true, ctx)
}

pub fn rpop(key: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    pop(key, false, ctx)
}

fn pop(key: Vec<u8>, front: bool, ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database_mut()?;

    let popped = match database.list_mut(&key)? {
        Some(list) => {
            if front {
                list.pop_front()
            } else {
                list.pop_back()
            }
        }
        None => None,
    };

    let reply = match popped {
        Some(value) => {
            database.record_change();
            RespValue::bulk(value)
        }
        None => RespValue::NullBulkString,
    };

    Ok(CommandOutcome::Reply(reply))
}
