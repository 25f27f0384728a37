//! The two-state object table.
//!
//! A live object is in exactly one of two maps: **open** (created, its
//! producer still writing) or **sealed** (immutable, visible to everyone).
//! Entries own their arena allocation and move between the maps only through
//! the seal transition; no identifier is ever re-opened.

use std::collections::HashMap;

use cairn_arena::{Alloc, Handle};
use cairn_wire::{ObjectId, Reply};

/// Per-object metadata.
#[derive(Debug, Clone, Copy)]
pub struct ObjectInfo {
    pub data_size: i64,
    pub metadata_size: i64,
    /// Unix time (seconds) the object was created.
    pub create_time: i64,
    /// Seconds between create and seal; 0 while the object is open.
    pub construct_duration: i64,
}

/// One live object: identifier, metadata, its arena allocation, and the
/// handle triple peers use to map the bytes. Data and metadata are contiguous
/// in that order inside the allocation.
#[derive(Debug)]
pub struct ObjectEntry {
    pub id: ObjectId,
    pub info: ObjectInfo,
    pub alloc: Alloc,
    pub handle: Handle,
}

impl ObjectEntry {
    /// The reply granting access to this object's bytes. `has_object` is left
    /// zero; only CONTAINS replies use it.
    pub fn reply(&self) -> Reply {
        Reply {
            data_offset: self.handle.offset,
            metadata_offset: self.handle.offset + self.info.data_size,
            map_size: self.handle.map_size,
            data_size: self.info.data_size,
            metadata_size: self.info.metadata_size,
            has_object: 0,
            store_fd_val: self.handle.fd,
        }
    }
}

/// The open and sealed maps.
#[derive(Default)]
pub struct ObjectTable {
    open: HashMap<ObjectId, ObjectEntry>,
    sealed: HashMap<ObjectId, ObjectEntry>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the identifier is live in either state.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.open.contains_key(id) || self.sealed.contains_key(id)
    }

    /// True if no object exists in either state.
    pub fn is_empty(&self) -> bool {
        self.open.is_empty() && self.sealed.is_empty()
    }

    pub fn insert_open(&mut self, entry: ObjectEntry) {
        debug_assert!(!self.contains(&entry.id));
        self.open.insert(entry.id, entry);
    }

    /// Move an entry from open to sealed, stamping `construct_duration`.
    /// Returns the sealed entry, or `None` if the identifier is not open.
    pub fn seal(&mut self, id: &ObjectId, seal_time: i64) -> Option<&ObjectEntry> {
        let mut entry = self.open.remove(id)?;
        entry.info.construct_duration = seal_time - entry.info.create_time;
        self.sealed.insert(*id, entry);
        self.sealed.get(id)
    }

    pub fn find_sealed(&self, id: &ObjectId) -> Option<&ObjectEntry> {
        self.sealed.get(id)
    }

    /// Remove a sealed entry, transferring ownership to the caller.
    pub fn remove_sealed(&mut self, id: &ObjectId) -> Option<ObjectEntry> {
        self.sealed.remove(id)
    }

    /// `(open, sealed)` entry counts.
    pub fn counts(&self) -> (usize, usize) {
        (self.open.len(), self.sealed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: ObjectId, data_size: i64, metadata_size: i64) -> ObjectEntry {
        ObjectEntry {
            id,
            info: ObjectInfo {
                data_size,
                metadata_size,
                create_time: 1000,
                construct_duration: 0,
            },
            alloc: test_alloc(data_size + metadata_size),
            handle: Handle {
                fd: 5,
                map_size: 1 << 16,
                offset: 64,
            },
        }
    }

    fn test_alloc(len: i64) -> Alloc {
        use cairn_arena::{Arena, MapArena};
        MapArena::new(1 << 16).alloc(len as usize).unwrap()
    }

    #[test]
    fn entry_is_in_exactly_one_state() {
        let mut table = ObjectTable::new();
        let id = ObjectId::repeat(1);
        table.insert_open(entry(id, 8, 0));
        assert!(table.contains(&id));
        assert!(table.find_sealed(&id).is_none());
        assert_eq!(table.counts(), (1, 0));

        table.seal(&id, 1005).unwrap();
        assert!(table.contains(&id));
        assert!(table.find_sealed(&id).is_some());
        assert_eq!(table.counts(), (0, 1));
    }

    #[test]
    fn seal_stamps_construct_duration() {
        let mut table = ObjectTable::new();
        let id = ObjectId::repeat(2);
        table.insert_open(entry(id, 8, 0));
        let sealed = table.seal(&id, 1042).unwrap();
        assert_eq!(sealed.info.construct_duration, 42);
    }

    #[test]
    fn seal_of_unknown_id_is_none() {
        let mut table = ObjectTable::new();
        assert!(table.seal(&ObjectId::repeat(3), 0).is_none());
    }

    #[test]
    fn remove_sealed_transfers_the_entry() {
        let mut table = ObjectTable::new();
        let id = ObjectId::repeat(4);
        table.insert_open(entry(id, 16, 4));
        table.seal(&id, 1001).unwrap();
        let removed = table.remove_sealed(&id).unwrap();
        assert_eq!(removed.id, id);
        assert!(table.is_empty());
        // Unsealed ids are not removable.
        assert!(table.remove_sealed(&id).is_none());
    }

    #[test]
    fn reply_lays_metadata_after_data() {
        let e = entry(ObjectId::repeat(5), 100, 20);
        let reply = e.reply();
        assert_eq!(reply.data_offset, 64);
        assert_eq!(reply.metadata_offset, 164);
        assert_eq!(reply.map_size, 1 << 16);
        assert_eq!(reply.data_size, 100);
        assert_eq!(reply.metadata_size, 20);
        assert_eq!(reply.has_object, 0);
        assert_eq!(reply.store_fd_val, 5);
    }
}
