//! The stored-value model: the typed union a key can hold and the container
//! behavior shared by the list, set and hash commands.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::commands::CommandError;

/// The value kinds a database key can hold. A key holds exactly one kind;
/// operations for any other kind fail with `WRONGTYPE`.
#[derive(Debug, PartialEq, Clone)]
pub enum StoredValue {
    String(Vec<u8>),
    List(VecDeque<Vec<u8>>),
    Set(HashSet<Vec<u8>>),
    Hash(HashMap<Vec<u8>, Vec<u8>>),
}

impl StoredValue {
    /// The name reported by the TYPE command.
    pub fn type_name(&self) -> &'static str {
        match self {
            StoredValue::String(_) => "string",
            StoredValue::List(_) => "list",
            StoredValue::Set(_) => "set",
            StoredValue::Hash(_) => "hash",
        }
    }
}

/// Normalizes a possibly negative index against `length`; `-1` is the last
/// element. Returns `None` when the index falls outside `0..length`.
pub fn normalize_index(index: i64, length: usize) -> Option<usize> {
    let length = length as i64;
    let resolved = if index < 0 { length + index } else { index };

    if resolved < 0 || resolved >= length {
        None
    } else {
        Some(resolved as usize)
    }
}

/// Resolves an inclusive `(start, stop)` range the way LRANGE and GETRANGE
/// do: negative indices count from the tail and out-of-range ends clamp to
/// the container. Returns `None` for an empty result.
pub fn normalize_range(start: i64, stop: i64, length: usize) -> Option<(usize, usize)> {
    if length == 0 {
        return None;
    }

    let length = length as i64;
    let start = if start < 0 { length + start } else { start }.max(0);
    let stop = if stop < 0 { length + stop } else { stop }.min(length - 1);

    if start > stop || start >= length {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

/// Parses a binary-safe string as a base-10 signed 64-bit integer, the way
/// INCR and friends interpret stored strings.
pub fn parse_integer(bytes: &[u8]) -> Result<i64, CommandError> {
    str::from_utf8(bytes)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or(CommandError::NotAnInteger)
}
