//! Views into mapped object bytes.

use std::rc::Rc;

use cairn_arena::MmapRegion;
use cairn_wire::Reply;

use crate::error::ClientError;

/// One object's bytes inside a shared mapping: the data slice followed by
/// the metadata slice.
///
/// The view is writable between CREATE and SEAL (the producer fills it in)
/// and must be treated as read-only once sealed; the store never rewrites
/// sealed bytes, so what `data()` returns is stable from then on.
pub struct ObjectBuffer {
    region: Rc<MmapRegion>,
    data_offset: usize,
    data_size: usize,
    metadata_offset: usize,
    metadata_size: usize,
}

impl ObjectBuffer {
    /// Build a view from an access-granting reply, bounds-checking every
    /// range against the mapping before anything is dereferenced.
    pub(crate) fn new(region: Rc<MmapRegion>, reply: &Reply) -> Result<Self, ClientError> {
        let check = |offset: i64, len: i64| -> Result<usize, ClientError> {
            let out_of_bounds = ClientError::OutOfBounds {
                offset,
                len,
                map_size: region.len(),
            };
            let (offset_u, len_u) = match (usize::try_from(offset), usize::try_from(len)) {
                (Ok(o), Ok(l)) => (o, l),
                _ => return Err(out_of_bounds),
            };
            match offset_u.checked_add(len_u) {
                Some(end) if end <= region.len() => Ok(offset_u),
                _ => Err(out_of_bounds),
            }
        };

        let data_offset = check(reply.data_offset, reply.data_size)?;
        let metadata_offset = check(reply.metadata_offset, reply.metadata_size)?;
        Ok(Self {
            region,
            data_offset,
            data_size: reply.data_size as usize,
            metadata_offset,
            metadata_size: reply.metadata_size as usize,
        })
    }

    /// The object's data bytes.
    pub fn data(&self) -> &[u8] {
        self.region.slice(self.data_offset, self.data_size)
    }

    /// Writable data bytes. Only meaningful before the object is sealed.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.region.slice_mut(self.data_offset, self.data_size)
    }

    /// The object's metadata bytes.
    pub fn metadata(&self) -> &[u8] {
        self.region.slice(self.metadata_offset, self.metadata_size)
    }

    pub(crate) fn write_metadata(&mut self, metadata: &[u8]) {
        self.region
            .slice_mut(self.metadata_offset, self.metadata_size)
            .copy_from_slice(metadata);
    }

    pub fn data_len(&self) -> usize {
        self.data_size
    }

    pub fn metadata_len(&self) -> usize {
        self.metadata_size
    }
}
