//! Client library for the cairn object store.
//!
//! A [`Client`] connects to the store's unix socket and drives the object
//! lifecycle: [`create`](Client::create) a writable buffer, fill it in,
//! [`seal`](Client::seal) it, and any client on the host can
//! [`get`](Client::get) the same bytes without a copy: the store passes the
//! arena's file descriptor over the socket and the client maps it. Each
//! distinct arena segment is mapped once per client and shared by every
//! buffer that lives in it.

pub mod buffer;
pub mod error;
pub mod notifications;

pub use buffer::ObjectBuffer;
pub use error::ClientError;
pub use notifications::Subscription;

use std::collections::HashMap;
use std::io::ErrorKind;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::rc::Rc;

use cairn_arena::MmapRegion;
use cairn_fdpass::{recv_with_fd, send_with_fd};
use cairn_wire::framing::write_frame;
use cairn_wire::{MessageType, ObjectId, REPLY_SIZE, Reply, Request};
use tokio::net::UnixStream;
use tracing::debug;

/// A connection to the store.
pub struct Client {
    stream: UnixStream,
    /// Attached arena segments, keyed by the store-side fd value from the
    /// reply. The fd received alongside a reply for an already-attached
    /// segment is just closed.
    mappings: HashMap<i32, Rc<MmapRegion>>,
}

impl Client {
    /// Connect to a store listening at `path`.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self {
            stream,
            mappings: HashMap::new(),
        })
    }

    /// Create an object and return its writable buffer. `metadata` is copied
    /// into place immediately; the data bytes are the caller's to fill in
    /// before sealing.
    pub async fn create(
        &mut self,
        id: ObjectId,
        data_size: usize,
        metadata: &[u8],
    ) -> Result<ObjectBuffer, ClientError> {
        let req = Request {
            id,
            data_size: data_size as i64,
            metadata_size: metadata.len() as i64,
            addr: [0; 4],
            port: 0,
        };
        self.send_request(MessageType::Create, &req).await?;
        let reply = self.read_handle_reply().await?;
        let mut buffer = self.resolve(&reply)?;
        buffer.write_metadata(metadata);
        debug!(%id, data_size, "created object");
        Ok(buffer)
    }

    /// Seal an object this client created. The store sends no reply.
    pub async fn seal(&mut self, id: ObjectId) -> Result<(), ClientError> {
        self.send_request(MessageType::Seal, &Request::for_id(id))
            .await
    }

    /// Fetch a sealed object's buffer. If the object has not been sealed
    /// yet, this waits until it is.
    pub async fn get(&mut self, id: ObjectId) -> Result<ObjectBuffer, ClientError> {
        self.send_request(MessageType::Get, &Request::for_id(id))
            .await?;
        let reply = self.read_handle_reply().await?;
        self.resolve(&reply)
    }

    /// Fetch only a sealed object's metadata bytes. Waits like
    /// [`get`](Client::get).
    pub async fn get_metadata(&mut self, id: ObjectId) -> Result<Vec<u8>, ClientError> {
        let buffer = self.get(id).await?;
        Ok(buffer.metadata().to_vec())
    }

    /// Whether the object is sealed. Open objects report `false`.
    pub async fn contains(&mut self, id: ObjectId) -> Result<bool, ClientError> {
        self.send_request(MessageType::Contains, &Request::for_id(id))
            .await?;
        let mut buf = [0u8; REPLY_SIZE];
        self.read_plain(&mut buf).await?;
        let reply = Reply::from_le_bytes(&buf).ok_or(ClientError::MalformedReply)?;
        Ok(reply.has_object != 0)
    }

    /// Delete a sealed object, releasing its arena bytes.
    pub async fn delete(&mut self, id: ObjectId) -> Result<(), ClientError> {
        self.send_request(MessageType::Delete, &Request::for_id(id))
            .await
    }

    /// Register for seal notifications on a dedicated socket.
    ///
    /// Must be called before any object is created anywhere in the store;
    /// past seals are not replayed.
    pub async fn subscribe(&mut self) -> Result<Subscription, ClientError> {
        let (ours, theirs) = std::os::unix::net::UnixStream::pair()?;
        self.send_request(MessageType::Subscribe, &Request::for_id(ObjectId::repeat(0)))
            .await?;
        send_with_fd(&self.stream, theirs.as_raw_fd(), &[0u8]).await?;
        drop(theirs); // the store holds its own reference now

        ours.set_nonblocking(true)?;
        Ok(Subscription::new(UnixStream::from_std(ours)?))
    }

    /// Tell the store to forget this connection, then drop it.
    pub async fn disconnect(mut self) -> Result<(), ClientError> {
        self.send_request(MessageType::Disconnect, &Request::for_id(ObjectId::repeat(0)))
            .await
    }

    async fn send_request(&mut self, ty: MessageType, req: &Request) -> Result<(), ClientError> {
        write_frame(&self.stream, ty.code(), &req.to_le_bytes()).await?;
        Ok(())
    }

    /// Read a reply that arrives glued to a passed arena fd, attaching the
    /// segment if this client has not seen it before.
    async fn read_handle_reply(&mut self) -> Result<Reply, ClientError> {
        let mut buf = [0u8; REPLY_SIZE];
        let (fd, n) = recv_with_fd(&self.stream, &mut buf).await?;
        if n < REPLY_SIZE {
            self.read_plain(&mut buf[n..]).await?;
        }
        let reply = Reply::from_le_bytes(&buf).ok_or(ClientError::MalformedReply)?;

        if !self.mappings.contains_key(&reply.store_fd_val) {
            let region = MmapRegion::attach(fd, reply.map_size as usize)?;
            debug!(
                store_fd = reply.store_fd_val,
                map_size = reply.map_size,
                "attached arena segment"
            );
            self.mappings.insert(reply.store_fd_val, Rc::new(region));
        }
        // An fd for an already-attached segment is dropped (closed) here.
        Ok(reply)
    }

    async fn read_plain(&mut self, buf: &mut [u8]) -> Result<(), ClientError> {
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
        Ok(())
    }

    fn resolve(&self, reply: &Reply) -> Result<ObjectBuffer, ClientError> {
        let region = self
            .mappings
            .get(&reply.store_fd_val)
            .ok_or(ClientError::UnknownMapping(reply.store_fd_val))?
            .clone();
        ObjectBuffer::new(region, reply)
    }
}
