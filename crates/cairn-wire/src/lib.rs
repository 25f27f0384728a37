//! Wire protocol for the cairn object store.
//!
//! Clients talk to the store over a unix stream socket. Requests travel as
//! length-prefixed frames (`type: i64`, `length: i64`, payload); replies are
//! bare fixed-layout structs, because a reply that grants access to a buffer
//! rides in the same `sendmsg` as the passed file descriptor. Notification
//! frames on a subscriber socket are raw 20-byte identifiers, back to back.
//!
//! All integers on the wire are little-endian.

pub mod framing;
pub mod id;
pub mod message;

pub use framing::{FRAME_HEADER_SIZE, MAX_FRAME_PAYLOAD, read_frame, write_frame};
pub use id::{OBJECT_ID_LEN, ObjectId};
pub use message::{MessageType, REPLY_SIZE, REQUEST_SIZE, Reply, Request};
