use thiserror::Error;

use crate::resp::RespValue;

/// The failure modes a command can surface to a client. Every variant maps
/// to one RESP error line via [`CommandError::to_resp`]; the connection
/// writes it and keeps processing subsequent commands.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum CommandError {
    #[error("operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("no such key")]
    NoSuchKey,
    #[error("index out of range")]
    IndexOutOfRange,
    #[error("value is not an integer or out of range")]
    NotAnInteger,
    #[error("increment or decrement would overflow")]
    IntegerOverflow,
    #[error("syntax error")]
    Syntax,
    #[error("unknown command {0}")]
    UnknownCommand(String),
    #[error("unknown subcommand for {0}")]
    UnknownSubcommand(String),
    #[error("wrong number of arguments for {0}")]
    WrongArity(String),
    #[error("db index out of range")]
    DbIndexOutOfRange,
    #[error("invalid expire time in {0}")]
    InvalidExpireTime(String),
    #[error("pattern not implemented")]
    PatternNotImplemented,
    #[error("command {0} not allowed while subscribed")]
    SubscribeModeRestricted(String),
    #[error("invalid client name")]
    InvalidClientName,
    #[error("save failed: {0}")]
    SaveFailed(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl CommandError {
    /// The RESP error value written back to the client, using the exact
    /// code prefixes clients pattern-match on.
    pub fn to_resp(&self) -> RespValue {
        let message = match self {
            CommandError::WrongType => {
                "WRONGTYPE Operation against a key holding the wrong kind of value".to_string()
            }
            CommandError::NoSuchKey => "ERR no such key".to_string(),
            CommandError::IndexOutOfRange => "ERR index out of range".to_string(),
            CommandError::NotAnInteger => {
                "ERR value is not an integer or out of range".to_string()
            }
            CommandError::IntegerOverflow => {
                "ERR increment or decrement would overflow".to_string()
            }
            CommandError::Syntax => "ERR syntax error".to_string(),
            CommandError::UnknownCommand(name) => {
                format!("ERR unknown command '{}'", name)
            }
            CommandError::UnknownSubcommand(name) => format!(
                "ERR Unknown subcommand or wrong number of arguments for '{}'",
                name
            ),
            CommandError::WrongArity(name) => {
                format!("ERR wrong number of arguments for '{}' command", name)
            }
            CommandError::DbIndexOutOfRange => "ERR DB index is out of range".to_string(),
            CommandError::InvalidExpireTime(command) => {
                format!("ERR invalid expire time in '{}' command", command)
            }
            CommandError::PatternNotImplemented => "500 pattern not implemented".to_string(),
            CommandError::SubscribeModeRestricted(name) => format!(
                "ERR Can't execute '{}': only (P|UN)SUBSCRIBE / PING / QUIT / PUBSUB are allowed in this context",
                name
            ),
            CommandError::InvalidClientName => {
                "ERR Client names cannot contain spaces, newlines or special characters."
                    .to_string()
            }
            CommandError::SaveFailed(reason) => format!("ERR save failed: {}", reason),
            CommandError::Internal(reason) => format!("500 internal error: {}", reason),
        };

        RespValue::Error(message)
    }
}
