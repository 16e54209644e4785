// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Provided-buffer ring: a kernel-managed pool of receive buffers, selected
//! automatically for ops submitted with `IOSQE_BUFFER_SELECT`.

use std::mem::size_of;
use std::os::unix::io::AsRawFd;
use std::os::unix::io::RawFd;
use std::sync::atomic::AtomicU16;
use std::sync::atomic::Ordering;

use crate::bindings::io_uring_buf;
use crate::bindings::io_uring_buf_reg;
use crate::mmap::MemoryMapping;
use crate::ops::RegisterOpcode;
use crate::uring::Error;
use crate::uring::Result;
use crate::uring::Ring;

// The ring's tail word overlays the `resv` field of slot zero.
const TAIL_OFFSET: usize = 14;

/// A registered provided-buffer ring: `entries` slots of `io_uring_buf`
/// followed by the buffer payload area, in one anonymous mapping. Buffers are
/// handed to the kernel by advancing the ring tail; the kernel returns one by
/// reporting its buffer id in a completion's flags.
pub struct BufRing {
    mmap: MemoryMapping,
    ring_fd: RawFd,
    entries: u16,
    buf_len: u32,
    bgid: u16,
}

impl BufRing {
    /// Allocates and registers a buffer ring of `entries` buffers (must be a
    /// power of two) of `buf_len` bytes each under buffer group `bgid`.
    ///
    /// The ring must outlive any operation the kernel may satisfy from it,
    /// and must be dropped before `ring` is.
    pub fn new(ring: &Ring, entries: u16, buf_len: u32, bgid: u16) -> Result<BufRing> {
        debug_assert!(entries.is_power_of_two());
        let ring_bytes = entries as usize * size_of::<io_uring_buf>();
        let total = ring_bytes + entries as usize * buf_len as usize;
        let mmap = MemoryMapping::new(total).map_err(Error::MappingBufferRing)?;

        let this = BufRing {
            mmap,
            ring_fd: ring.as_raw_fd(),
            entries,
            buf_len,
            bgid,
        };

        this.publish_all();

        let reg = io_uring_buf_reg {
            ring_addr: this.mmap.as_ptr() as u64,
            ring_entries: entries as u32,
            bgid,
            ..Default::default()
        };
        // SAFETY: reg describes a mapping owned by `this`, which lives until
        // the matching unregister in drop.
        unsafe {
            ring.register(
                RegisterOpcode::RegisterPbufRing,
                &reg as *const _ as *const libc::c_void,
                1,
            )?;
        }
        Ok(this)
    }

    /// Buffer group id this ring registered under; goes into an sqe's
    /// `buf_index` field together with `IOSQE_BUFFER_SELECT`.
    pub fn bgid(&self) -> u16 {
        self.bgid
    }

    pub fn buf_len(&self) -> u32 {
        self.buf_len
    }

    /// Base address of the payload buffer with id `bid`.
    pub fn buf_ptr(&self, bid: u16) -> *mut u8 {
        debug_assert!(bid < self.entries);
        let payload_base = self.entries as usize * size_of::<io_uring_buf>();
        // SAFETY: the offset stays within the mapping, which was sized for
        // entries * buf_len payload bytes past the slot area.
        unsafe {
            self.mmap
                .as_ptr()
                .add(payload_base + bid as usize * self.buf_len as usize)
        }
    }

    /// Returns a consumed buffer to the kernel's pool.
    pub fn recycle(&self, bid: u16) {
        let tail = self.tail().load(Ordering::Relaxed);
        self.write_slot(tail & (self.entries - 1), bid);
        // The slot write must be visible before the kernel sees the new tail.
        self.tail().store(tail.wrapping_add(1), Ordering::Release);
    }

    // Describes every buffer up front, then publishes them all with one
    // tail store.
    fn publish_all(&self) {
        for bid in 0..self.entries {
            self.write_slot(bid, bid);
        }
        self.tail().store(self.entries, Ordering::Release);
    }

    // Fields are written individually because the ring tail overlays slot
    // zero's resv field; a whole-struct store would clobber it.
    fn write_slot(&self, slot: u16, bid: u16) {
        // SAFETY: slot is below entries, so every write stays inside the
        // slot area of the owned mapping.
        unsafe {
            let slot_ptr = (self.mmap.as_ptr() as *mut io_uring_buf).add(slot as usize);
            std::ptr::write_volatile(std::ptr::addr_of_mut!((*slot_ptr).addr), self.buf_ptr(bid) as u64);
            std::ptr::write_volatile(std::ptr::addr_of_mut!((*slot_ptr).len), self.buf_len);
            std::ptr::write_volatile(std::ptr::addr_of_mut!((*slot_ptr).bid), bid);
        }
    }

    fn tail(&self) -> &AtomicU16 {
        // SAFETY: the tail word lives at a fixed offset inside the owned
        // mapping and is only ever accessed atomically.
        unsafe { &*(self.mmap.as_ptr().add(TAIL_OFFSET) as *const AtomicU16) }
    }
}

impl Drop for BufRing {
    fn drop(&mut self) {
        let reg = io_uring_buf_reg {
            bgid: self.bgid,
            ..Default::default()
        };
        // Best effort: the ring fd may already be gone if the caller dropped
        // the Ring first, and the kernel then released the registration with
        // it.
        // SAFETY: reg is a valid unregister block for the duration of the
        // call.
        let _ = unsafe {
            crate::syscalls::io_uring_register(
                self.ring_fd,
                RegisterOpcode::UnregisterPbufRing.into(),
                &reg as *const _ as *const libc::c_void,
                1,
            )
        };
    }
}
