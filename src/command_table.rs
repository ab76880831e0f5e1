//! The static command table: for every verb its argument shape, flags, key
//! positions and arity, plus the typed dispatch that turns validated wire
//! arguments into a handler call.

use std::collections::HashMap;

use crate::commands::context::{CommandContext, HandlerResult};
use crate::commands::{expiration, hashes, keyspace, lists, pubsub, server, sets, strings};
use crate::commands::CommandError;
use crate::resp::RespValue;
use crate::value::parse_integer;

/// Declared argument count. `Fixed(n)` accepts exactly `n` arguments after
/// the command name; `Minimum(n)` accepts more than `n` elements including
/// the name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arity {
    Fixed(usize),
    Minimum(usize),
}

impl Arity {
    /// `argc` counts the command name itself.
    pub fn accepts(&self, argc: usize) -> bool {
        match self {
            Arity::Fixed(n) => argc == n + 1,
            Arity::Minimum(n) => argc > *n,
        }
    }

    /// The classic Redis encoding: positive for fixed arities, negative
    /// for minimums, both counting the command name.
    pub fn encode(&self) -> i64 {
        match self {
            Arity::Fixed(n) => (n + 1) as i64,
            Arity::Minimum(n) => -((n + 1) as i64),
        }
    }
}

/// Command flag bitset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandFlags(u32);

impl CommandFlags {
    pub const WRITE: CommandFlags = CommandFlags(1);
    pub const READONLY: CommandFlags = CommandFlags(1 << 1);
    pub const DENYOOM: CommandFlags = CommandFlags(1 << 2);
    pub const ADMIN: CommandFlags = CommandFlags(1 << 3);
    pub const PUBSUB: CommandFlags = CommandFlags(1 << 4);
    pub const NOSCRIPT: CommandFlags = CommandFlags(1 << 5);
    pub const RANDOM: CommandFlags = CommandFlags(1 << 6);
    pub const LOADING: CommandFlags = CommandFlags(1 << 7);
    pub const STALE: CommandFlags = CommandFlags(1 << 8);
    pub const FAST: CommandFlags = CommandFlags(1 << 9);
    pub const SORT_FOR_SCRIPT: CommandFlags = CommandFlags(1 << 10);

    pub const fn with(self, other: CommandFlags) -> CommandFlags {
        CommandFlags(self.0 | other.0)
    }

    pub const fn contains(self, other: CommandFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn names(self) -> Vec<&'static str> {
        const NAMES: [(CommandFlags, &str); 11] = [
            (CommandFlags::WRITE, "write"),
            (CommandFlags::READONLY, "readonly"),
            (CommandFlags::DENYOOM, "denyoom"),
            (CommandFlags::ADMIN, "admin"),
            (CommandFlags::PUBSUB, "pubsub"),
            (CommandFlags::NOSCRIPT, "noscript"),
            (CommandFlags::RANDOM, "random"),
            (CommandFlags::LOADING, "loading"),
            (CommandFlags::STALE, "stale"),
            (CommandFlags::FAST, "fast"),
            (CommandFlags::SORT_FOR_SCRIPT, "sort_for_script"),
        ];

        NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

/// The closed set of call signatures a handler can have. Dispatch is a
/// match over the tag; every variant carries the function with the exact
/// typed arity it demands.
#[derive(Clone, Copy)]
pub enum CommandShape {
    NoArgs(fn(&mut CommandContext) -> HandlerResult),
    OptionalValue(fn(Option<Vec<u8>>, &mut CommandContext) -> HandlerResult),
    SingleValue(fn(Vec<u8>, &mut CommandContext) -> HandlerResult),
    ValueValue(fn(Vec<u8>, Vec<u8>, &mut CommandContext) -> HandlerResult),
    Values(fn(Vec<Vec<u8>>, &mut CommandContext) -> HandlerResult),
    Key(fn(Vec<u8>, &mut CommandContext) -> HandlerResult),
    KeyKey(fn(Vec<u8>, Vec<u8>, &mut CommandContext) -> HandlerResult),
    KeyValue(fn(Vec<u8>, Vec<u8>, &mut CommandContext) -> HandlerResult),
    KeyValueValue(fn(Vec<u8>, Vec<u8>, Vec<u8>, &mut CommandContext) -> HandlerResult),
    KeyValueOptions(fn(Vec<u8>, Vec<u8>, Vec<Vec<u8>>, &mut CommandContext) -> HandlerResult),
    KeyValues(fn(Vec<u8>, Vec<Vec<u8>>, &mut CommandContext) -> HandlerResult),
    KeyRange(fn(Vec<u8>, i64, i64, &mut CommandContext) -> HandlerResult),
    KeyIndex(fn(Vec<u8>, i64, &mut CommandContext) -> HandlerResult),
    KeyIndexValue(fn(Vec<u8>, i64, Vec<u8>, &mut CommandContext) -> HandlerResult),
    Keys(fn(Vec<Vec<u8>>, &mut CommandContext) -> HandlerResult),
    KeyValueMap(fn(Vec<(Vec<u8>, Vec<u8>)>, &mut CommandContext) -> HandlerResult),
}

pub struct CommandSpec {
    pub name: &'static str,
    pub shape: CommandShape,
    pub flags: CommandFlags,
    pub first_key: i64,
    pub last_key: i64,
    pub step: i64,
    pub arity: Arity,
}

impl CommandSpec {
    /// Binds the validated wire arguments (everything after the command
    /// name) to the shape's typed signature and calls the handler.
    pub fn invoke(&self, args: Vec<Vec<u8>>, ctx: &mut CommandContext) -> HandlerResult {
        let mut iter = args.into_iter();

        match self.shape {
            CommandShape::NoArgs(handler) => handler(ctx),
            CommandShape::OptionalValue(handler) => handler(iter.next(), ctx),
            CommandShape::SingleValue(handler) => handler(next_arg(&mut iter)?, ctx),
            CommandShape::ValueValue(handler) => {
                let first = next_arg(&mut iter)?;
                let second = next_arg(&mut iter)?;
                handler(first, second, ctx)
            }
            CommandShape::Values(handler) => handler(iter.collect(), ctx),
            CommandShape::Key(handler) => handler(next_arg(&mut iter)?, ctx),
            CommandShape::KeyKey(handler) | CommandShape::KeyValue(handler) => {
                let key = next_arg(&mut iter)?;
                let second = next_arg(&mut iter)?;
                handler(key, second, ctx)
            }
            CommandShape::KeyValueValue(handler) => {
                let key = next_arg(&mut iter)?;
                let first = next_arg(&mut iter)?;
                let second = next_arg(&mut iter)?;
                handler(key, first, second, ctx)
            }
            CommandShape::KeyValueOptions(handler) => {
                let key = next_arg(&mut iter)?;
                let value = next_arg(&mut iter)?;
                handler(key, value, iter.collect(), ctx)
            }
            CommandShape::KeyValues(handler) => {
                let key = next_arg(&mut iter)?;
                handler(key, iter.collect(), ctx)
            }
            CommandShape::KeyRange(handler) => {
                let key = next_arg(&mut iter)?;
                let start = parse_integer(&next_arg(&mut iter)?)?;
                let stop = parse_integer(&next_arg(&mut iter)?)?;
                handler(key, start, stop, ctx)
            }
            CommandShape::KeyIndex(handler) => {
                let key = next_arg(&mut iter)?;
                let index = parse_integer(&next_arg(&mut iter)?)?;
                handler(key, index, ctx)
            }
            CommandShape::KeyIndexValue(handler) => {
                let key = next_arg(&mut iter)?;
                let index = parse_integer(&next_arg(&mut iter)?)?;
                let value = next_arg(&mut iter)?;
                handler(key, index, value, ctx)
            }
            CommandShape::Keys(handler) => handler(iter.collect(), ctx),
            CommandShape::KeyValueMap(handler) => {
                let remaining = iter.collect::<Vec<Vec<u8>>>();

                if remaining.is_empty() || remaining.len() % 2 != 0 {
                    return Err(CommandError::WrongArity(self.name.to_lowercase()));
                }

                let mut pairs = Vec::with_capacity(remaining.len() / 2);
                let mut iter = remaining.into_iter();
                while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                    pairs.push((key, value));
                }

                handler(pairs, ctx)
            }
        }
    }

    /// The COMMAND reply entry: `[name, arity, flags, first, last, step]`.
    fn to_resp(&self) -> RespValue {
        RespValue::Array(vec![
            RespValue::bulk(self.name.to_lowercase().into_bytes()),
            RespValue::Integer(self.arity.encode()),
            RespValue::Array(
                self.flags
                    .names()
                    .into_iter()
                    .map(|name| RespValue::SimpleString(name.to_string()))
                    .collect(),
            ),
            RespValue::Integer(self.first_key),
            RespValue::Integer(self.last_key),
            RespValue::Integer(self.step),
        ])
    }
}

fn next_arg(iter: &mut std::vec::IntoIter<Vec<u8>>) -> Result<Vec<u8>, CommandError> {
    // Arity validation runs before binding; running out of arguments here
    // means the table entry itself is wrong.
    iter.next()
        .ok_or_else(|| CommandError::Internal("argument shape mismatch".to_string()))
}

const W: CommandFlags = CommandFlags::WRITE;
const R: CommandFlags = CommandFlags::READONLY;
const M: CommandFlags = CommandFlags::DENYOOM;
const A: CommandFlags = CommandFlags::ADMIN;
const P: CommandFlags = CommandFlags::PUBSUB;
const N: CommandFlags = CommandFlags::NOSCRIPT;
const RN: CommandFlags = CommandFlags::RANDOM;
const L: CommandFlags = CommandFlags::LOADING;
const ST: CommandFlags = CommandFlags::STALE;
const F: CommandFlags = CommandFlags::FAST;
const SS: CommandFlags = CommandFlags::SORT_FOR_SCRIPT;

const fn spec(
    name: &'static str,
    shape: CommandShape,
    flags: CommandFlags,
    first_key: i64,
    last_key: i64,
    step: i64,
    arity: Arity,
) -> CommandSpec {
    CommandSpec {
        name,
        shape,
        flags,
        first_key,
        last_key,
        step,
        arity,
    }
}

use Arity::{Fixed, Minimum};
use CommandShape::*;

/// The canonical table, uppercase names. Lookup is a case-insensitive
/// ASCII fold over this set.
static COMMANDS: &[CommandSpec] = &[
    // Strings
    spec("GET", Key(strings::get), R.with(F), 1, 1, 1, Fixed(1)),
    spec("SET", KeyValueOptions(strings::set), W.with(M), 1, 1, 1, Minimum(2)),
    spec("SETNX", KeyValue(strings::setnx), W.with(M).with(F), 1, 1, 1, Fixed(2)),
    spec("SETEX", KeyIndexValue(strings::setex), W.with(M), 1, 1, 1, Fixed(3)),
    spec("PSETEX", KeyIndexValue(strings::psetex), W.with(M), 1, 1, 1, Fixed(3)),
    spec("GETSET", KeyValue(strings::getset), W.with(M), 1, 1, 1, Fixed(2)),
    spec("APPEND", KeyValue(strings::append), W.with(M), 1, 1, 1, Fixed(2)),
    spec("STRLEN", Key(strings::strlen), R.with(F), 1, 1, 1, Fixed(1)),
    spec("GETRANGE", KeyRange(strings::getrange), R, 1, 1, 1, Fixed(3)),
    spec("SUBSTR", KeyRange(strings::getrange), R, 1, 1, 1, Fixed(3)),
    spec("SETRANGE", KeyIndexValue(strings::setrange), W.with(M), 1, 1, 1, Fixed(3)),
    spec("MGET", Keys(strings::mget), R.with(F), 1, -1, 1, Minimum(1)),
    spec("MSET", KeyValueMap(strings::mset), W.with(M), 1, -1, 2, Minimum(2)),
    spec("MSETNX", KeyValueMap(strings::msetnx), W.with(M), 1, -1, 2, Minimum(2)),
    spec("INCR", Key(strings::incr), W.with(M).with(F), 1, 1, 1, Fixed(1)),
    spec("DECR", Key(strings::decr), W.with(M).with(F), 1, 1, 1, Fixed(1)),
    spec("INCRBY", KeyIndex(strings::incrby), W.with(M).with(F), 1, 1, 1, Fixed(2)),
    spec("DECRBY", KeyIndex(strings::decrby), W.with(M).with(F), 1, 1, 1, Fixed(2)),
    // Keyspace
    spec("KEYS", SingleValue(keyspace::keys), R.with(SS), 0, 0, 0, Fixed(1)),
    spec("EXISTS", Keys(keyspace::exists), R.with(F), 1, -1, 1, Minimum(1)),
    spec("DEL", Keys(keyspace::del), W, 1, -1, 1, Minimum(1)),
    spec("TYPE", Key(keyspace::type_command), R.with(F), 1, 1, 1, Fixed(1)),
    spec("RENAME", KeyKey(keyspace::rename), W, 1, 2, 1, Fixed(2)),
    spec("RENAMENX", KeyKey(keyspace::renamenx), W.with(F), 1, 2, 1, Fixed(2)),
    spec("DBSIZE", NoArgs(keyspace::dbsize), R.with(F), 0, 0, 0, Fixed(0)),
    spec("FLUSHDB", NoArgs(keyspace::flushdb), W, 0, 0, 0, Fixed(0)),
    spec("FLUSHALL", NoArgs(keyspace::flushall), W, 0, 0, 0, Fixed(0)),
    // Expirations
    spec("EXPIRE", KeyIndex(expiration::expire), W.with(F), 1, 1, 1, Fixed(2)),
    spec("PEXPIRE", KeyIndex(expiration::pexpire), W.with(F), 1, 1, 1, Fixed(2)),
    spec("EXPIREAT", KeyIndex(expiration::expireat), W.with(F), 1, 1, 1, Fixed(2)),
    spec("PEXPIREAT", KeyIndex(expiration::pexpireat), W.with(F), 1, 1, 1, Fixed(2)),
    spec("TTL", Key(expiration::ttl), R.with(F), 1, 1, 1, Fixed(1)),
    spec("PTTL", Key(expiration::pttl), R.with(F), 1, 1, 1, Fixed(1)),
    spec("PERSIST", Key(expiration::persist), W.with(F), 1, 1, 1, Fixed(1)),
    // Lists
    spec("LLEN", Key(lists::llen), R.with(F), 1, 1, 1, Fixed(1)),
    spec("LRANGE", KeyRange(lists::lrange), R, 1, 1, 1, Fixed(3)),
    spec("LINDEX", KeyIndex(lists::lindex), R, 1, 1, 1, Fixed(2)),
    spec("LSET", KeyIndexValue(lists::lset), W.with(M), 1, 1, 1, Fixed(3)),
    spec("LPUSH", KeyValues(lists::lpush), W.with(M).with(F), 1, 1, 1, Minimum(2)),
    spec("RPUSH", KeyValues(lists::rpush), W.with(M).with(F), 1, 1, 1, Minimum(2)),
    spec("LPUSHX", KeyValues(lists::lpushx), W.with(M).with(F), 1, 1, 1, Minimum(2)),
    spec("RPUSHX", KeyValues(lists::rpushx), W.with(M).with(F), 1, 1, 1, Minimum(2)),
    spec("LPOP", Key(lists::lpop), W.with(F), 1, 1, 1, Fixed(1)),
    spec("RPOP", Key(lists::rpop), W.with(F), 1, 1, 1, Fixed(1)),
    // Hashes
    spec("HLEN", Key(hashes::hlen), R.with(F), 1, 1, 1, Fixed(1)),
    spec("HGETALL", Key(hashes::hgetall), R, 1, 1, 1, Fixed(1)),
    spec("HGET", KeyValue(hashes::hget), R.with(F), 1, 1, 1, Fixed(2)),
    spec("HEXISTS", KeyValue(hashes::hexists), R.with(F), 1, 1, 1, Fixed(2)),
    spec("HSTRLEN", KeyValue(hashes::hstrlen), R.with(F), 1, 1, 1, Fixed(2)),
    spec("HKEYS", Key(hashes::hkeys), R.with(SS), 1, 1, 1, Fixed(1)),
    spec("HVALS", Key(hashes::hvals), R.with(SS), 1, 1, 1, Fixed(1)),
    spec("HSET", KeyValueValue(hashes::hset), W.with(M).with(F), 1, 1, 1, Fixed(3)),
    spec("HSETNX", KeyValueValue(hashes::hsetnx), W.with(M).with(F), 1, 1, 1, Fixed(3)),
    spec("HINCRBY", KeyValueValue(hashes::hincrby), W.with(M).with(F), 1, 1, 1, Fixed(3)),
    spec("HMSET", KeyValues(hashes::hmset), W.with(M), 1, 1, 1, Minimum(3)),
    spec("HMGET", KeyValues(hashes::hmget), R.with(F), 1, 1, 1, Minimum(2)),
    spec("HDEL", KeyValues(hashes::hdel), W.with(F), 1, 1, 1, Minimum(2)),
    // Sets
    spec("SCARD", Key(sets::scard), R.with(F), 1, 1, 1, Fixed(1)),
    spec("SMEMBERS", Key(sets::smembers), R.with(SS), 1, 1, 1, Fixed(1)),
    spec("SISMEMBER", KeyValue(sets::sismember), R.with(F), 1, 1, 1, Fixed(2)),
    spec("SADD", KeyValues(sets::sadd), W.with(M).with(F), 1, 1, 1, Minimum(2)),
    spec("SREM", KeyValues(sets::srem), W.with(F), 1, 1, 1, Minimum(2)),
    spec("SDIFF", Keys(sets::sdiff), R.with(SS), 1, -1, 1, Minimum(1)),
    spec("SINTER", Keys(sets::sinter), R.with(SS), 1, -1, 1, Minimum(1)),
    spec("SUNION", Keys(sets::sunion), R.with(SS), 1, -1, 1, Minimum(1)),
    spec("SDIFFSTORE", Keys(sets::sdiffstore), W.with(M), 1, -1, 1, Minimum(2)),
    spec("SINTERSTORE", Keys(sets::sinterstore), W.with(M), 1, -1, 1, Minimum(2)),
    spec("SUNIONSTORE", Keys(sets::sunionstore), W.with(M), 1, -1, 1, Minimum(2)),
    // Pub/Sub
    spec("PUBLISH", ValueValue(pubsub::publish), P.with(L).with(ST).with(F), 0, 0, 0, Fixed(2)),
    spec("SUBSCRIBE", Values(pubsub::subscribe), P.with(N).with(L).with(ST), 0, 0, 0, Minimum(1)),
    spec("UNSUBSCRIBE", Values(pubsub::unsubscribe), P.with(N).with(L).with(ST), 0, 0, 0, Minimum(0)),
    spec("PSUBSCRIBE", Values(pubsub::psubscribe), P.with(N).with(L).with(ST), 0, 0, 0, Minimum(1)),
    spec("PUNSUBSCRIBE", Values(pubsub::punsubscribe), P.with(N).with(L).with(ST), 0, 0, 0, Minimum(0)),
    spec("PUBSUB", Values(pubsub::pubsub), P.with(RN).with(L).with(ST), 0, 0, 0, Minimum(1)),
    // Server
    spec("PING", OptionalValue(server::ping), ST.with(F), 0, 0, 0, Minimum(0)),
    spec("ECHO", SingleValue(server::echo), F, 0, 0, 0, Fixed(1)),
    spec("QUIT", NoArgs(server::quit), A.with(N).with(L).with(ST), 0, 0, 0, Fixed(0)),
    spec("SELECT", SingleValue(server::select), L.with(ST).with(F), 0, 0, 0, Fixed(1)),
    spec("SWAPDB", ValueValue(server::swapdb), W.with(F), 0, 0, 0, Fixed(2)),
    spec("MONITOR", NoArgs(server::monitor), A.with(N).with(L).with(ST), 0, 0, 0, Fixed(0)),
    spec("SAVE", NoArgs(server::save), A.with(N), 0, 0, 0, Fixed(0)),
    spec("BGSAVE", NoArgs(server::bgsave), A.with(N), 0, 0, 0, Fixed(0)),
    spec("LASTSAVE", NoArgs(server::lastsave), RN.with(L).with(ST).with(F), 0, 0, 0, Fixed(0)),
    spec("COMMAND", OptionalValue(server::command), L.with(ST).with(RN), 0, 0, 0, Minimum(0)),
    spec("CLIENT", Values(server::client), A.with(N).with(RN).with(L).with(ST), 0, 0, 0, Minimum(1)),
];

/// The uppercase-name index the server dispatches through.
#[derive(Clone)]
pub struct CommandTable {
    index: HashMap<&'static str, &'static CommandSpec>,
}

impl CommandTable {
    pub fn new() -> Self {
        CommandTable {
            index: COMMANDS.iter().map(|spec| (spec.name, spec)).collect(),
        }
    }

    /// Case-insensitive ASCII fold lookup.
    pub fn lookup(&self, name: &str) -> Option<&'static CommandSpec> {
        self.index.get(name.to_ascii_uppercase().as_str()).copied()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The full table as the COMMAND reply.
    pub fn to_resp(&self) -> RespValue {
        RespValue::Array(COMMANDS.iter().map(CommandSpec::to_resp).collect())
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}
