//! File-backed memory-mapped regions shared across processes.
//!
//! The store creates regions over anonymous temporary files (already
//! unlinked, so nothing persists) and hands the fd to peers; peers attach to
//! a received fd. Both sides map with `MAP_SHARED`, so they observe the same
//! bytes.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// A shared memory mapping over a file descriptor.
pub struct MmapRegion {
    ptr: *mut u8,
    len: usize,
    /// Keeps the backing file open for the lifetime of the mapping.
    fd: OwnedFd,
}

impl MmapRegion {
    /// Create a region over a fresh anonymous temporary file.
    ///
    /// The file is unlinked from birth; it disappears once every process
    /// holding an fd or mapping lets go.
    pub fn create(len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "region length must be > 0",
            ));
        }
        let file = tempfile::tempfile()?;
        file.set_len(len as u64)?;
        Self::map(file.into(), len)
    }

    /// Attach to a region received from a peer.
    ///
    /// `len` must be the `map_size` the peer reported for this fd.
    pub fn attach(fd: OwnedFd, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "region length must be > 0",
            ));
        }
        Self::map(fd, len)
    }

    fn map(fd: OwnedFd, len: usize) -> io::Result<Self> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            ptr: ptr as *mut u8,
            len,
            fd,
        })
    }

    /// Length of the mapping in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The fd backing this mapping.
    #[inline]
    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Base pointer of the mapping.
    ///
    /// The mapping is valid for `len` bytes for the lifetime of `self`.
    /// Peers may be writing the same bytes concurrently; callers decide when
    /// a range is quiescent (in cairn, a sealed object's range is).
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Borrow `len` bytes starting at `offset`.
    ///
    /// # Panics
    /// Panics if the range falls outside the mapping.
    pub fn slice(&self, offset: usize, len: usize) -> &[u8] {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "range {offset}+{len} outside mapping of {} bytes",
            self.len
        );
        // SAFETY: in-bounds per the assert; mapping lives as long as self.
        unsafe { std::slice::from_raw_parts(self.ptr.add(offset), len) }
    }

    /// Mutably borrow `len` bytes starting at `offset`.
    ///
    /// # Panics
    /// Panics if the range falls outside the mapping.
    #[allow(clippy::mut_from_ref)]
    pub fn slice_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "range {offset}+{len} outside mapping of {} bytes",
            self.len
        );
        // SAFETY: in-bounds per the assert. Shared-memory aliasing is
        // inherent here; exclusive use of a range is a protocol property
        // (only the producer writes an open object).
        unsafe { std::slice::from_raw_parts_mut(self.ptr.add(offset), len) }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

// SAFETY: the mapping stays valid wherever the value moves; the underlying
// memory is shared with other processes regardless.
unsafe impl Send for MmapRegion {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::FromRawFd;

    fn dup_fd(region: &MmapRegion) -> OwnedFd {
        let raw = unsafe { libc::dup(region.as_raw_fd()) };
        assert!(raw >= 0);
        unsafe { OwnedFd::from_raw_fd(raw) }
    }

    #[test]
    fn create_and_write_read() {
        let region = MmapRegion::create(4096).unwrap();
        assert_eq!(region.len(), 4096);
        region.slice_mut(100, 4).copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(region.slice(100, 4), &[1, 2, 3, 4]);
    }

    #[test]
    fn attach_sees_creator_writes() {
        let writer = MmapRegion::create(8192).unwrap();
        writer.slice_mut(4000, 8).copy_from_slice(b"DEADBEEF");

        let reader = MmapRegion::attach(dup_fd(&writer), writer.len()).unwrap();
        assert_eq!(reader.slice(4000, 8), b"DEADBEEF");

        // And the other way round.
        reader.slice_mut(0, 3).copy_from_slice(b"abc");
        assert_eq!(writer.slice(0, 3), b"abc");
    }

    #[test]
    fn zero_length_rejected() {
        assert!(MmapRegion::create(0).is_err());
    }

    #[test]
    #[should_panic(expected = "outside mapping")]
    fn out_of_bounds_slice_panics() {
        let region = MmapRegion::create(1024).unwrap();
        let _ = region.slice(1000, 100);
    }
}
