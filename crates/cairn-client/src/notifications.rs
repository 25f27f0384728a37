//! The subscriber's end of the notification channel.

use std::io::ErrorKind;

use cairn_wire::{OBJECT_ID_LEN, ObjectId};
use tokio::net::UnixStream;

use crate::error::ClientError;

/// A dedicated socket carrying newly sealed identifiers, in the order the
/// store sealed them, as raw back-to-back 20-byte frames.
pub struct Subscription {
    stream: UnixStream,
}

impl Subscription {
    pub(crate) fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    /// The next sealed identifier. Waits until the store seals something.
    pub async fn next(&mut self) -> Result<ObjectId, ClientError> {
        let mut buf = [0u8; OBJECT_ID_LEN];
        let mut filled = 0;
        while filled < buf.len() {
            self.stream.readable().await?;
            match self.stream.try_read(&mut buf[filled..]) {
                Ok(0) => return Err(ClientError::Io(ErrorKind::UnexpectedEof.into())),
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(ObjectId::from_bytes(buf))
    }
}
