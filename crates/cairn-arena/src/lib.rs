//! Shared-memory arena for the cairn object store.
//!
//! Object buffers live in file-backed `MAP_SHARED` segments. The store
//! allocates out of the arena and describes each allocation to peers as a
//! `(fd, map_size, offset)` handle triple; a peer maps the fd and reads the
//! producer's bytes without a copy. Backing files are anonymous temporaries,
//! unlinked from birth; nothing persists.

pub mod arena;
pub mod region;

pub use arena::{ALLOC_ALIGN, Alloc, Arena, ArenaError, Handle, MapArena};
pub use region::MmapRegion;
