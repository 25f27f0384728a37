//! cairn-store: a local, single-node shared-memory object store.
//!
//! Producers allocate a buffer inside a shared arena, write an opaque blob
//! plus metadata, and seal it under a 20-byte identifier. Consumers on the
//! same host receive the buffer's file descriptor over a unix socket and map
//! the same bytes, so large payloads cross the process boundary without a
//! copy. A publish/subscribe channel streams newly sealed identifiers to
//! subscribers in seal order.
//!
//! # Architecture
//!
//! One process, one thread, one event loop:
//!
//! ```text
//! producers ──┐                     ┌── subscribers (20-byte frames,
//!             ├──▶ unix socket ──▶ store ──┘    write-readiness drained)
//! consumers ──┘        │
//!                      ▼
//!              shared arena (mmap segments, fds passed via SCM_RIGHTS)
//! ```
//!
//! An object is **open** from CREATE until SEAL, then **sealed** and
//! immutable. GET on an unsealed identifier parks the caller as a waiter;
//! the seal fans the reply out to every waiter in arrival order. Clients
//! that violate the lifecycle (duplicate CREATE, DELETE of unsealed) are
//! bugs the store refuses to tolerate: it logs and exits.

pub mod error;
pub mod object_table;
pub mod server;
pub mod store;
pub mod subscriber;
pub mod waiters;

pub use error::FatalError;
pub use server::{DEFAULT_SEGMENT_SIZE, Server};
pub use store::{ClientId, Outbound, SealFanout, Store, SubscriberId};
