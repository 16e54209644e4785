// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Small OS services the ring driver and its callers need: eventfd wakeup,
//! file and page size queries, and the kernel release string.

use std::ffi::CStr;
use std::fs::File;
use std::mem;
use std::mem::size_of;
use std::os::unix::io::AsRawFd;
use std::os::unix::io::FromRawFd;
use std::os::unix::io::RawFd;

use libc::c_void;

use crate::errno::errno_result;
use crate::errno::Error;
use crate::errno::Result;

/// `BLKGETSIZE64`, `_IOR(0x12, 114, size_t)`: byte size of a block device.
const BLKGETSIZE64: libc::c_ulong = 0x8008_1272;

/// Page size assumed when `sysconf` cannot answer.
const DEFAULT_PAGE_SIZE: usize = 4096;

/// A safe wrapper around a Linux eventfd (man 2 eventfd), created
/// non-inheritable with an initial count of zero. Writing to it unblocks a
/// thread parked in `io_uring_enter` when the fd is registered with the ring
/// or sits in a poll op.
#[derive(Debug)]
pub struct Event {
    event_handle: File,
}

impl Event {
    pub fn new() -> Result<Event> {
        // SAFETY: eventfd merely allocates an fd for our process and the
        // error case is handled.
        let ret = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
        if ret < 0 {
            return errno_result();
        }
        // SAFETY: ret was checked for success and the kernel gave us an fd
        // that we own.
        Ok(Event {
            event_handle: unsafe { File::from_raw_fd(ret) },
        })
    }

    /// Adds `v` to the eventfd's count. Retries transparently if the write is
    /// interrupted by a signal.
    pub fn write(&self, v: u64) -> Result<()> {
        loop {
            // SAFETY: we own the fd and pass the size of the value we point
            // at.
            let ret = unsafe {
                libc::write(
                    self.as_raw_fd(),
                    &v as *const u64 as *const c_void,
                    size_of::<u64>(),
                )
            };
            if ret >= 0 {
                return Ok(());
            }
            let err = Error::last();
            if err.errno() != libc::EINTR {
                return Err(err);
            }
        }
    }

    /// Blocks until the count is non-zero, then returns it and resets it to
    /// zero. Retries transparently on interruption.
    pub fn read(&self) -> Result<u64> {
        let mut buf: u64 = 0;
        loop {
            // SAFETY: we own the fd and pass the size of the value we point
            // at.
            let ret = unsafe {
                libc::read(
                    self.as_raw_fd(),
                    &mut buf as *mut u64 as *mut c_void,
                    size_of::<u64>(),
                )
            };
            if ret >= 0 {
                return Ok(buf);
            }
            let err = Error::last();
            if err.errno() != libc::EINTR {
                return Err(err);
            }
        }
    }
}

impl AsRawFd for Event {
    fn as_raw_fd(&self) -> RawFd {
        self.event_handle.as_raw_fd()
    }
}

/// Returns the byte size of the object behind `fd`: the device size for a
/// block device, the file length for a regular file, and `None` for any
/// other file type, where the question has no answer.
pub fn file_size(fd: &dyn AsRawFd) -> Result<Option<u64>> {
    // SAFETY: the stat buffer is plain-old-data and fstat only writes into
    // it; the return value is checked.
    let mut st: libc::stat = unsafe { mem::zeroed() };
    // SAFETY: see above.
    let ret = unsafe { libc::fstat(fd.as_raw_fd(), &mut st) };
    if ret < 0 {
        return errno_result();
    }
    match st.st_mode & libc::S_IFMT {
        libc::S_IFBLK => {
            let mut bytes: u64 = 0;
            // SAFETY: the ioctl writes a u64 device size into `bytes` and the
            // return value is checked.
            let ret = unsafe { libc::ioctl(fd.as_raw_fd(), BLKGETSIZE64, &mut bytes) };
            if ret < 0 {
                return errno_result();
            }
            Ok(Some(bytes))
        }
        libc::S_IFREG => Ok(Some(st.st_size as u64)),
        _ => Ok(None),
    }
}

/// Returns the system page size, or 4096 if `sysconf` fails.
pub fn page_size() -> usize {
    // SAFETY: trivially safe.
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ret < 0 {
        DEFAULT_PAGE_SIZE
    } else {
        ret as usize
    }
}

/// Returns the running kernel's release string, e.g. "5.15.0-91-generic".
pub fn kernel_version() -> Result<String> {
    // SAFETY: the utsname buffer is plain-old-data and uname only writes
    // into it; the return value is checked.
    let mut uts: libc::utsname = unsafe { mem::zeroed() };
    // SAFETY: see above.
    let ret = unsafe { libc::uname(&mut uts) };
    if ret < 0 {
        return errno_result();
    }
    // SAFETY: uname nul-terminates the release field.
    let release = unsafe { CStr::from_ptr(uts.release.as_ptr()) };
    Ok(release.to_string_lossy().into_owned())
}

/// Returns true if `release` names a kernel of at least `major.minor`.
/// Malformed release strings are treated as too old.
pub fn kernel_version_at_least(release: &str, major: u32, minor: u32) -> bool {
    let mut parts = release.split(|c: char| !c.is_ascii_digit());
    let rel_major: u32 = match parts.next().and_then(|p| p.parse().ok()) {
        Some(v) => v,
        None => return false,
    };
    if rel_major != major {
        return rel_major > major;
    }
    match parts.next().and_then(|p| p.parse::<u32>().ok()) {
        Some(rel_minor) => rel_minor >= minor,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;

    use super::*;

    #[test]
    fn event_write_read() {
        let evt = Event::new().unwrap();
        evt.write(55).unwrap();
        evt.write(1).unwrap();
        assert_eq!(evt.read().unwrap(), 56);
    }

    #[test]
    fn regular_file_size() {
        let f = tempfile::tempfile().unwrap();
        f.set_len(16384).unwrap();
        assert_eq!(file_size(&f).unwrap(), Some(16384));
    }

    #[test]
    fn char_device_size_not_applicable() {
        let f = OpenOptions::new().read(true).open("/dev/null").unwrap();
        assert_eq!(file_size(&f).unwrap(), None);
    }

    #[test]
    fn page_size_sane() {
        let ps = page_size();
        assert!(ps >= 4096);
        assert!(ps.is_power_of_two());
    }

    #[test]
    fn kernel_version_nonempty() {
        let v = kernel_version().unwrap();
        assert!(!v.is_empty());
        // Whatever we run on is newer than the first io_uring kernel.
        assert!(kernel_version_at_least(&v, 5, 1));
    }

    #[test]
    fn version_compare() {
        assert!(kernel_version_at_least("5.11.0", 5, 11));
        assert!(kernel_version_at_least("6.1.0-rc1", 5, 11));
        assert!(!kernel_version_at_least("5.10.12", 5, 11));
        assert!(!kernel_version_at_least("4.19.0", 5, 11));
        assert!(!kernel_version_at_least("garbage", 5, 11));
    }
}
