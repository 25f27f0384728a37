//! Client-side errors.

use std::fmt;
use std::io;

/// Failure talking to the store or interpreting what it sent.
#[derive(Debug)]
pub enum ClientError {
    /// Socket-level failure.
    Io(io::Error),
    /// A reply that does not decode as the fixed reply struct.
    MalformedReply,
    /// A reply referenced a mapping this client has never attached.
    UnknownMapping(i32),
    /// A reply's offsets fall outside the mapping it referenced.
    OutOfBounds {
        offset: i64,
        len: i64,
        map_size: usize,
    },
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Io(e) => write!(f, "I/O error: {e}"),
            ClientError::MalformedReply => write!(f, "malformed reply from store"),
            ClientError::UnknownMapping(fd) => {
                write!(f, "reply referenced unknown store mapping {fd}")
            }
            ClientError::OutOfBounds {
                offset,
                len,
                map_size,
            } => {
                write!(
                    f,
                    "reply range {offset}+{len} outside mapping of {map_size} bytes"
                )
            }
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Io(e)
    }
}
