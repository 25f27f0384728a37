//! Fixed-layout request and reply payloads.
//!
//! Both structs are pinned to an exact byte layout so existing clients keep
//! working: a 48-byte request and a 48-byte reply, little-endian throughout.
//! The codecs are hand-written rather than derived; the layout is the
//! contract, not an implementation detail.

use crate::id::{OBJECT_ID_LEN, ObjectId};

/// Request type codes. CREATE starts at 128 and the numeric order of the
/// remaining codes is part of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Allocate a buffer for a new object.
    Create = 128,
    /// Fetch a sealed object, or wait for it to be sealed.
    Get = 129,
    /// Ask whether an object is sealed.
    Contains = 130,
    /// Make an open object visible to everyone.
    Seal = 131,
    /// Drop a sealed object and release its buffer.
    Delete = 132,
    /// Cross-store transfer. Reserved; the store refuses it.
    Transfer = 133,
    /// Header for pushed object data. Reserved; the store refuses it.
    Data = 134,
    /// Register a notification socket for sealed-object events.
    Subscribe = 135,
    /// Orderly teardown of this connection.
    Disconnect = 136,
}

impl MessageType {
    /// Decode a wire type code.
    pub fn from_i64(raw: i64) -> Option<Self> {
        match raw {
            128 => Some(Self::Create),
            129 => Some(Self::Get),
            130 => Some(Self::Contains),
            131 => Some(Self::Seal),
            132 => Some(Self::Delete),
            133 => Some(Self::Transfer),
            134 => Some(Self::Data),
            135 => Some(Self::Subscribe),
            136 => Some(Self::Disconnect),
            _ => None,
        }
    }

    /// The wire type code.
    pub const fn code(self) -> i64 {
        self as i64
    }
}

/// Size of an encoded [`Request`] in bytes.
pub const REQUEST_SIZE: usize = 48;

/// Size of an encoded [`Reply`] in bytes. Five i64 fields then two i32
/// fields, packed tight: the layout is already 8-aligned with no padding.
pub const REPLY_SIZE: usize = 48;

/// The fixed request payload carried by every framed message.
///
/// Layout: `id` at 0, 4 bytes of zero padding at 20, `data_size` at 24,
/// `metadata_size` at 32, `addr` at 40, `port` at 44.
///
/// `addr` and `port` name a peer manager in transfer requests; the store
/// leaves them on the wire but never reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub id: ObjectId,
    pub data_size: i64,
    pub metadata_size: i64,
    pub addr: [u8; 4],
    pub port: i32,
}

impl Request {
    /// A request carrying only an identifier (GET, CONTAINS, SEAL, DELETE).
    pub fn for_id(id: ObjectId) -> Self {
        Self {
            id,
            data_size: 0,
            metadata_size: 0,
            addr: [0; 4],
            port: 0,
        }
    }

    pub fn to_le_bytes(&self) -> [u8; REQUEST_SIZE] {
        let mut buf = [0u8; REQUEST_SIZE];
        buf[0..20].copy_from_slice(self.id.as_bytes());
        buf[24..32].copy_from_slice(&self.data_size.to_le_bytes());
        buf[32..40].copy_from_slice(&self.metadata_size.to_le_bytes());
        buf[40..44].copy_from_slice(&self.addr);
        buf[44..48].copy_from_slice(&self.port.to_le_bytes());
        buf
    }

    /// Decode a request payload. `None` if the slice is not exactly
    /// [`REQUEST_SIZE`] bytes.
    pub fn from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() != REQUEST_SIZE {
            return None;
        }
        let id = ObjectId::from_slice(&buf[0..OBJECT_ID_LEN])?;
        Some(Self {
            id,
            data_size: i64::from_le_bytes(buf[24..32].try_into().unwrap()),
            metadata_size: i64::from_le_bytes(buf[32..40].try_into().unwrap()),
            addr: buf[40..44].try_into().unwrap(),
            port: i32::from_le_bytes(buf[44..48].try_into().unwrap()),
        })
    }
}

/// The fixed reply payload.
///
/// For CREATE, GET and SEAL this travels as the `sendmsg` payload next to the
/// passed arena fd; for CONTAINS it is written alone with `has_object` set.
/// Offsets are byte positions inside the peer's mapping of `store_fd_val`,
/// never process addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reply {
    /// Offset of the object data inside the mapping.
    pub data_offset: i64,
    /// Offset of the metadata, immediately after the data.
    pub metadata_offset: i64,
    /// Total length of the mapping the peer must establish.
    pub map_size: i64,
    pub data_size: i64,
    pub metadata_size: i64,
    /// CONTAINS result: 1 if the object is sealed, 0 otherwise.
    pub has_object: i32,
    /// The store-side value of the passed fd. Peers key their mapping cache
    /// on this, since the fd number they receive differs per transfer.
    pub store_fd_val: i32,
}

impl Reply {
    pub fn to_le_bytes(&self) -> [u8; REPLY_SIZE] {
        let mut buf = [0u8; REPLY_SIZE];
        buf[0..8].copy_from_slice(&self.data_offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.metadata_offset.to_le_bytes());
        buf[16..24].copy_from_slice(&self.map_size.to_le_bytes());
        buf[24..32].copy_from_slice(&self.data_size.to_le_bytes());
        buf[32..40].copy_from_slice(&self.metadata_size.to_le_bytes());
        buf[40..44].copy_from_slice(&self.has_object.to_le_bytes());
        buf[44..48].copy_from_slice(&self.store_fd_val.to_le_bytes());
        buf
    }

    /// Decode a reply payload. `None` if the slice is not exactly
    /// [`REPLY_SIZE`] bytes.
    pub fn from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() != REPLY_SIZE {
            return None;
        }
        Some(Self {
            data_offset: i64::from_le_bytes(buf[0..8].try_into().unwrap()),
            metadata_offset: i64::from_le_bytes(buf[8..16].try_into().unwrap()),
            map_size: i64::from_le_bytes(buf[16..24].try_into().unwrap()),
            data_size: i64::from_le_bytes(buf[24..32].try_into().unwrap()),
            metadata_size: i64::from_le_bytes(buf[32..40].try_into().unwrap()),
            has_object: i32::from_le_bytes(buf[40..44].try_into().unwrap()),
            store_fd_val: i32::from_le_bytes(buf[44..48].try_into().unwrap()),
        })
    }
}
