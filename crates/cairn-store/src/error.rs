//! Fatal store errors.
//!
//! The store's protocol is success-only: there are no error replies. Every
//! error here indicates either a client violating a precondition or an I/O
//! failure the store is not designed to survive; the daemon logs it and
//! exits non-zero.

use std::fmt;
use std::io;

use cairn_arena::ArenaError;
use cairn_wire::ObjectId;

/// A condition that terminates the store process.
#[derive(Debug)]
pub enum FatalError {
    /// CREATE for an identifier that is already live (open or sealed).
    DuplicateCreate(ObjectId),
    /// DELETE for an identifier that is not currently sealed.
    DeleteUnsealed(ObjectId),
    /// SUBSCRIBE arrived after objects already existed; seal events are not
    /// replayed, so a late subscriber would silently miss history.
    SubscribeAfterActivity,
    /// A message type the store does not handle (unknown or reserved).
    UnhandledMessage(i64),
    /// A request frame whose payload is not the fixed request struct.
    MalformedRequest { ty: i64, len: usize },
    /// CREATE with a negative or overflowing size.
    InvalidSizes {
        id: ObjectId,
        data_size: i64,
        metadata_size: i64,
    },
    /// The arena could not back an allocation.
    Arena(ArenaError),
    /// An I/O failure on a command socket.
    CommandIo(io::Error),
    /// The listening socket failed.
    Listener(io::Error),
    /// Signal handler installation failed.
    Signal(io::Error),
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::DuplicateCreate(id) => {
                write!(f, "cannot create object {id} twice")
            }
            FatalError::DeleteUnsealed(id) => {
                write!(f, "cannot delete object {id}: not sealed")
            }
            FatalError::SubscribeAfterActivity => {
                write!(f, "subscribe must happen before any object is created")
            }
            FatalError::UnhandledMessage(ty) => {
                write!(f, "unhandled message type {ty}")
            }
            FatalError::MalformedRequest { ty, len } => {
                write!(f, "malformed request of type {ty}: payload of {len} bytes")
            }
            FatalError::InvalidSizes {
                id,
                data_size,
                metadata_size,
            } => {
                write!(
                    f,
                    "invalid sizes for object {id}: data_size={data_size}, \
                     metadata_size={metadata_size}"
                )
            }
            FatalError::Arena(e) => write!(f, "arena failure: {e}"),
            FatalError::CommandIo(e) => write!(f, "I/O failure on a command socket: {e}"),
            FatalError::Listener(e) => write!(f, "listener failure: {e}"),
            FatalError::Signal(e) => write!(f, "failed to install signal handler: {e}"),
        }
    }
}

impl std::error::Error for FatalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FatalError::Arena(e) => Some(e),
            FatalError::CommandIo(e) | FatalError::Listener(e) | FatalError::Signal(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ArenaError> for FatalError {
    fn from(e: ArenaError) -> Self {
        FatalError::Arena(e)
    }
}
