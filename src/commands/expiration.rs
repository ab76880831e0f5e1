//! Expiration commands: the EXPIRE family, TTL reporting and PERSIST.

use jiff::Timestamp;

use crate::commands::context::{CommandContext, CommandOutcome, HandlerResult};
use crate::commands::CommandError;
use crate::resp::RespValue;

pub fn expire(key: Vec<u8>, seconds: i64, ctx: &mut CommandContext) -> HandlerResult {
    let deadline = relative_deadline(seconds, 1000, "expire")?;
    apply_deadline(key, deadline, ctx)
}

pub fn pexpire(key: Vec<u8>, millis: i64, ctx: &mut CommandContext) -> HandlerResult {
    let deadline = relative_deadline(millis, 1, "pexpire")?;
    apply_deadline(key, deadline, ctx)
}

pub fn expireat(key: Vec<u8>, epoch_seconds: i64, ctx: &mut CommandContext) -> HandlerResult {
    let deadline = absolute_deadline(epoch_seconds, 1000, "expireat")?;
    apply_deadline(key, deadline, ctx)
}

pub fn pexpireat(key: Vec<u8>, epoch_millis: i64, ctx: &mut CommandContext) -> HandlerResult {
    let deadline = absolute_deadline(epoch_millis, 1, "pexpireat")?;
    apply_deadline(key, deadline, ctx)
}

fn relative_deadline(amount: i64, unit_millis: i64, command: &str) -> Result<Timestamp, CommandError> {
    let deadline_ms = amount
        .checked_mul(unit_millis)
        .and_then(|offset| Timestamp::now().as_millisecond().checked_add(offset))
        .ok_or_else(|| CommandError::InvalidExpireTime(command.to_string()))?;

    Timestamp::from_millisecond(deadline_ms)
        .map_err(|_| CommandError::InvalidExpireTime(command.to_string()))
}

fn absolute_deadline(amount: i64, unit_millis: i64, command: &str) -> Result<Timestamp, CommandError> {
    let deadline_ms = amount
        .checked_mul(unit_millis)
        .ok_or_else(|| CommandError::InvalidExpireTime(command.to_string()))?;

    Timestamp::from_millisecond(deadline_ms)
        .map_err(|_| CommandError::InvalidExpireTime(command.to_string()))
}

/// A deadline already in the past deletes the key immediately; either way
/// the command reports success iff the key existed.
fn apply_deadline(key: Vec<u8>, deadline: Timestamp, ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database_mut()?;

    if !database.contains_key(&key) {
        return Ok(CommandOutcome::Reply(RespValue::Integer(0)));
    }

    if deadline <= Timestamp::now() {
        database.remove(&key);
    } else {
        database.set_expiration(&key, deadline);
    }

    database.record_change();
    Ok(CommandOutcome::Reply(RespValue::Integer(1)))
}

pub fn ttl(key: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let reply = match remaining_millis(&key, ctx)? {
        TtlState::Missing => -2,
        TtlState::NoExpiration => -1,
        // Round up so a key expiring within the second still reports 1.
        TtlState::Remaining(millis) => (millis + 999) / 1000,
    };

    Ok(CommandOutcome::Reply(RespValue::Integer(reply)))
}

pub fn pttl(key: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let reply = match remaining_millis(&key, ctx)? {
        TtlState::Missing => -2,
        TtlState::NoExpiration => -1,
        TtlState::Remaining(millis) => millis,
    };

    Ok(CommandOutcome::Reply(RespValue::Integer(reply)))
}

enum TtlState {
    Missing,
    NoExpiration,
    Remaining(i64),
}

fn remaining_millis(key: &[u8], ctx: &mut CommandContext) -> Result<TtlState, CommandError> {
    let database = ctx.database()?;

    if !database.contains_key(key) {
        return Ok(TtlState::Missing);
    }

    match database.expiration(key) {
        None => Ok(TtlState::NoExpiration),
        Some(deadline) => {
            // Expired but not yet swept reports zero, never negative.
            let remaining = deadline.as_millisecond() - Timestamp::now().as_millisecond();
            Ok(TtlState::Remaining(remaining.max(0)))
        }
    }
}

pub fn persist(key: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database_mut()?;

    if database.clear_expiration(&key) {
        database.record_change();
        return Ok(CommandOutcome::Reply(RespValue::Integer(1)));
    }

    Ok(CommandOutcome::Reply(RespValue::Integer(0)))
}
