// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::os::unix::io::AsRawFd;
use std::ptr::null_mut;

use remain::sorted;

use crate::errno;

#[sorted]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("requested memory range spans past the end of the region: offset={0} count={1} region_size={2}")]
    InvalidRange(usize, usize, usize),
    #[error("mmap system call failed: {0}")]
    SystemCallFailed(errno::Error),
}
pub type Result<T> = std::result::Result<T, Error>;

/// An owned shared memory mapping. The region is valid for the lifetime of
/// the struct and is unmapped exactly once, on drop.
#[derive(Debug)]
pub struct MemoryMapping {
    addr: *mut u8,
    size: usize,
}

// SAFETY: the mapped region is plain memory owned exclusively by this struct.
unsafe impl Send for MemoryMapping {}
// SAFETY: see above.
unsafe impl Sync for MemoryMapping {}

impl MemoryMapping {
    /// Creates an anonymous shared read/write mapping of `size` bytes.
    pub fn new(size: usize) -> Result<MemoryMapping> {
        // SAFETY: anonymous mapping, no fd involved and the result is checked.
        unsafe { MemoryMapping::try_mmap(size, libc::MAP_SHARED | libc::MAP_ANONYMOUS, -1, 0) }
    }

    /// Maps `size` bytes of `fd` at `offset`, shared and populated. This is
    /// the mapping mode the io_uring ring regions require.
    pub fn from_fd_offset_populate(
        fd: &dyn AsRawFd,
        size: usize,
        offset: u64,
    ) -> Result<MemoryMapping> {
        // SAFETY: the fd is borrowed for the duration of the call and the
        // result is checked.
        unsafe {
            MemoryMapping::try_mmap(
                size,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                fd.as_raw_fd(),
                offset,
            )
        }
    }

    unsafe fn try_mmap(
        size: usize,
        flags: libc::c_int,
        fd: libc::c_int,
        offset: u64,
    ) -> Result<MemoryMapping> {
        let addr = libc::mmap(
            null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            fd,
            offset as libc::off_t,
        );
        if addr == libc::MAP_FAILED {
            return Err(Error::SystemCallFailed(errno::Error::last()));
        }
        Ok(MemoryMapping {
            addr: addr as *mut u8,
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.addr
    }

    /// Reads a `u32` at `offset` from the start of the region, bounds checked.
    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        let end = offset
            .checked_add(std::mem::size_of::<u32>())
            .ok_or(Error::InvalidRange(offset, std::mem::size_of::<u32>(), self.size))?;
        if end > self.size {
            return Err(Error::InvalidRange(
                offset,
                std::mem::size_of::<u32>(),
                self.size,
            ));
        }
        // SAFETY: the range was checked against the mapping bounds; the
        // kernel shares this memory so the read must be volatile.
        unsafe { Ok(std::ptr::read_volatile(self.addr.add(offset) as *const u32)) }
    }
}

impl Drop for MemoryMapping {
    fn drop(&mut self) {
        // SAFETY: this struct owns the region and drop runs at most once.
        unsafe {
            libc::munmap(self.addr as *mut libc::c_void, self.size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_map_unmap() {
        let m = MemoryMapping::new(4096).unwrap();
        assert_eq!(m.size(), 4096);
        assert!(!m.as_ptr().is_null());
    }

    #[test]
    fn read_u32_in_bounds() {
        let m = MemoryMapping::new(4096).unwrap();
        assert_eq!(m.read_u32(0).unwrap(), 0);
        assert_eq!(m.read_u32(4092).unwrap(), 0);
    }

    #[test]
    fn read_u32_out_of_bounds() {
        let m = MemoryMapping::new(4096).unwrap();
        assert!(m.read_u32(4093).is_err());
        assert!(m.read_u32(usize::MAX).is_err());
    }
}
