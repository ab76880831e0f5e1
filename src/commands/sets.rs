//! Set commands: membership, cardinality and the set algebra with its
//! STORE variants.

use std::collections::HashSet;

use crate::commands::context::{CommandContext, CommandOutcome, HandlerResult};
use crate::commands::CommandError;
use crate::resp::RespValue;
use crate::value::StoredValue;

pub fn scard(key: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let count = ctx.database()?.set_members(&key)?.map_or(0, HashSet::len);
    Ok(CommandOutcome::Reply(RespValue::Integer(count as i64)))
}

pub fn smembers(key: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let reply = match ctx.database()?.set_members(&key)? {
        Some(members) => RespValue::Array(
            members
                .iter()
                .map(|member| RespValue::bulk(member.clone()))
                .collect(),
        ),
        None => RespValue::Array(Vec::new()),
    };

    Ok(CommandOutcome::Reply(reply))
}

pub fn sismember(key: Vec<u8>, member: Vec<u8>, ctx: &mut CommandContext) -> HandlerResult {
    let present = ctx
        .database()?
        .set_members(&key)?
        .is_some_and(|members| members.contains(&member));

    Ok(CommandOutcome::Reply(RespValue::Integer(present as i64)))
}

pub fn sadd(key: Vec<u8>, members: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database_mut()?;
    let stored = database.set_entry(&key)?;

    let mut added = 0;
    for member in members {
        if stored.insert(member) {
            added += 1;
        }
    }

    if added > 0 {
        database.record_change();
    }

    Ok(CommandOutcome::Reply(RespValue::Integer(added)))
}

pub fn srem(key: Vec<u8>, members: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    let database = ctx.database_mut()?;
    let mut removed = 0;

    if let Some(stored) = database.set_members_mut(&key)? {
        for member in members {
            if stored.remove(&member) {
                removed += 1;
            }
        }
    }

    if removed > 0 {
        database.record_change();
    }

    Ok(CommandOutcome::Reply(RespValue::Integer(removed)))
}

enum SetAlgebra {
    Difference,
    Intersection,
    Union,
}

/// Clones the operand sets up front, so a STORE destination that is also a
/// source sees the fully evaluated result.
fn evaluate(
    operation: SetAlgebra,
    keys: &[Vec<u8>],
    ctx: &CommandContext,
) -> Result<HashSet<Vec<u8>>, CommandError> {
    let database = ctx.database()?;

    let mut operands = keys.iter().map(|key| {
        Ok(database
            .set_members(key)?
            .cloned()
            .unwrap_or_default())
    });

    let first: HashSet<Vec<u8>> = match operands.next() {
        Some(operand) => operand?,
        None => HashSet::new(),
    };

    operands.try_fold(first, |result, operand: Result<HashSet<Vec<u8>>, CommandError>| {
        let operand = operand?;

        Ok(match operation {
            SetAlgebra::Difference => result.difference(&operand).cloned().collect(),
            SetAlgebra::Intersection => result.intersection(&operand).cloned().collect(),
            SetAlgebra::Union => result.union(&operand).cloned().collect(),
        })
    })
}

fn reply_with_members(members: HashSet<Vec<u8>>) -> HandlerResult {
    Ok(CommandOutcome::Reply(RespValue::Array(
        members
            .into_iter()
            .map(RespValue::bulk)
            .collect(),
    )))
}

pub fn sdiff(keys: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    reply_with_members(evaluate(SetAlgebra::Difference, &keys, ctx)?)
}

pub fn sinter(keys: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    reply_with_members(evaluate(SetAlgebra::Intersection, &keys, ctx)?)
}

pub fn sunion(keys: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    reply_with_members(evaluate(SetAlgebra::Union, &keys, ctx)?)
}

/// The destination is overwritten with a set value even when the result is
/// empty; any previous expiration on it is dropped.
fn store(operation: SetAlgebra, mut keys: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    let destination = keys.remove(0);
    let result = evaluate(operation, &keys, ctx)?;
    let cardinality = result.len();

    let database = ctx.database_mut()?;
    database.set_value(destination, StoredValue::Set(result));
    database.record_change();

    Ok(CommandOutcome::Reply(RespValue::Integer(cardinality as i64)))
}

pub fn sdiffstore(keys: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    store(SetAlgebra::Difference, keys, ctx)
}

pub fn sinterstore(keys: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    store(SetAlgebra::Intersection, keys, ctx)
}

pub fn sunionstore(keys: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
    store(SetAlgebra::Union, keys, ctx)
}
