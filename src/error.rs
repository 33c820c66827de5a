//! Command-level errors.
//!
//! Every variant maps onto a client-visible error reply; none of them close
//! the connection.

use thiserror::Error;

use crate::protocol::RespValue;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR value is not a valid float")]
    NotFloat,

    #[error("ERR no such key")]
    NoSuchKey,

    #[error("ERR index out of range")]
    IndexOutOfRange,

    #[error("ERR increment or decrement would overflow")]
    Overflow,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpire(String),

    #[error("ERR unknown option '{0}'")]
    UnknownOption(String),

    #[error("ERR {0}")]
    Other(String),
}

impl CommandError {
    /// Converts this error into its RESP error reply.
    pub fn to_resp(&self) -> RespValue {
        RespValue::Error(self.to_string())
    }
}

impl From<CommandError> for RespValue {
    fn from(err: CommandError) -> Self {
        err.to_resp()
    }
}

pub type CommandResult<T = RespValue> = Result<T, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_replies() {
        assert_eq!(
            CommandError::WrongType.to_resp().serialize(),
            b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n"
        );
        assert_eq!(
            CommandError::WrongArity("get".into()).to_string(),
            "ERR wrong number of arguments for 'get' command"
        );
        assert_eq!(
            CommandError::UnknownCommand("foo".into()).to_resp(),
            RespValue::Error("ERR unknown command 'foo'".into())
        );
    }
}
