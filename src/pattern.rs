//! The restricted glob subset used by KEYS and PSUBSCRIBE.
//!
//! Only five shapes are supported: `*`, `prefix*`, `*suffix`, `*infix*`
//! and exact literals. Anything else (`?`, character classes, escapes,
//! interior stars) is rejected so the caller can fail the command instead
//! of silently matching the wrong keys. Matching is byte-exact.

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
#[error("pattern not implemented")]
pub struct PatternError;

#[derive(Debug, PartialEq, Clone)]
pub enum Pattern {
    MatchAll,
    Exact(Vec<u8>),
    Prefix(Vec<u8>),
    Suffix(Vec<u8>),
    Infix(Vec<u8>),
}

impl Pattern {
    /// Single-pass parse of a pattern source. Rejects every construct
    /// outside the supported subset.
    pub fn parse(source: &[u8]) -> Result<Self, PatternError> {
        if source
            .iter()
            .any(|&b| b == b'?' || b == b'[' || b == b'^' || b == b'\\')
        {
            return Err(PatternError);
        }

        let stars = source.iter().filter(|&&b| b == b'*').count();
        let leading = source.first() == Some(&b'*');
        let trailing = source.len() > 1 && source.last() == Some(&b'*');

        match (stars, leading, trailing) {
            (0, _, _) => Ok(Pattern::Exact(source.to_vec())),
            (1, true, false) if source.len() == 1 => Ok(Pattern::MatchAll),
            (1, true, false) => Ok(Pattern::Suffix(source[1..].to_vec())),
            (1, false, true) => Ok(Pattern::Prefix(source[..source.len() - 1].to_vec())),
            (2, true, true) => Ok(Pattern::Infix(source[1..source.len() - 1].to_vec())),
            _ => Err(PatternError),
        }
    }

    pub fn matches(&self, key: &[u8]) -> bool {
        match self {
            Pattern::MatchAll => true,
            Pattern::Exact(literal) => key == literal.as_slice(),
            Pattern::Prefix(prefix) => key.starts_with(prefix),
            Pattern::Suffix(suffix) => key.ends_with(suffix),
            Pattern::Infix(infix) => {
                infix.is_empty()
                    || key
                        .windows(infix.len())
                        .any(|window| window == infix.as_slice())
            }
        }
    }
}
