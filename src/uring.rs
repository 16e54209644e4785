// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// This file makes several casts from u8 pointers into more-aligned pointer types.
// We assume that the kernel will give us suitably aligned memory.
#![allow(clippy::cast_ptr_alignment)]

use std::cmp::max;
use std::fs::File;
use std::mem::size_of;
use std::os::unix::io::AsRawFd;
use std::os::unix::io::FromRawFd;
use std::os::unix::io::RawFd;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use remain::sorted;

use crate::bindings::*;
use crate::errno;
use crate::mmap;
use crate::mmap::MemoryMapping;
use crate::ops::Opcode;
use crate::ops::RegisterOpcode;
use crate::syscalls::io_uring_enter;
use crate::syscalls::io_uring_register;
use crate::syscalls::io_uring_setup;

/// Holds per-operation, user specified data. The usage is up to the caller.
/// The most common use is for callers to identify each request.
pub type UserData = u64;

#[sorted]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to map a provided-buffer ring.
    #[error("failed to mmap buffer ring: {0}")]
    MappingBufferRing(mmap::Error),
    /// Failed to map the completion ring.
    #[error("failed to mmap completion ring: {0}")]
    MappingCompleteRing(mmap::Error),
    /// Failed to map the submission entry array.
    #[error("failed to mmap submit entries: {0}")]
    MappingSubmitEntries(mmap::Error),
    /// Failed to map the submission ring.
    #[error("failed to mmap submit ring: {0}")]
    MappingSubmitRing(mmap::Error),
    /// Too many ops are already queued.
    #[error("no space for more ring entries, try increasing the size passed to `new`")]
    NoSpace,
    /// The call to `io_uring_enter` failed.
    #[error("failed to enter io uring: {0}")]
    RingEnter(errno::Error),
    /// The call to `io_uring_register` failed.
    #[error("failed to register with io uring: {0}")]
    RingRegister(errno::Error),
    /// The call to `io_uring_setup` failed.
    #[error("failed to setup io uring: {0}")]
    Setup(errno::Error),
}
pub type Result<T> = std::result::Result<T, Error>;

/// Creation-time configuration of a ring. Immutable once passed to
/// [`Ring::with_params`]. Fields gated by a setup flag are copied into the
/// kernel parameter block only when that flag is present in `flags`.
#[derive(Debug, Copy, Clone, Default)]
pub struct RingParams {
    /// Number of submission entries to ask the kernel for.
    pub entries: u32,
    /// `IORING_SETUP_*` bits.
    pub flags: u32,
    /// CPU to pin the kernel SQ-poll thread to; used with `IORING_SETUP_SQ_AFF`.
    pub sq_thread_cpu: u32,
    /// Idle timeout in milliseconds of the SQ-poll thread; used with
    /// `IORING_SETUP_SQPOLL`.
    pub sq_thread_idle: u32,
    /// Completion queue size override; used with `IORING_SETUP_CQSIZE`.
    pub cq_entries: u32,
    /// Existing ring whose kernel worker pool to share; used with
    /// `IORING_SETUP_ATTACH_WQ`.
    pub wq_fd: RawFd,
}

impl RingParams {
    pub fn new(entries: u32) -> RingParams {
        RingParams {
            entries,
            ..Default::default()
        }
    }
}

/// Flat set of addresses and sizes describing a mapped submission queue.
/// This is the boundary surface a higher-level event loop drives the ring
/// through; everything in it points into memory owned by the [`Ring`].
#[derive(Debug, Copy, Clone)]
pub struct SubmissionQueueView {
    pub head: *const u32,
    pub tail: *const u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub flags: *const u32,
    pub dropped: *const u32,
    pub array: *mut u32,
    pub sqes: *mut io_uring_sqe,
    pub ring_size: usize,
    pub ring_ptr: *mut u8,
    pub ring_fd: RawFd,
}

/// Symmetric view of a mapped completion queue.
#[derive(Debug, Copy, Clone)]
pub struct CompletionQueueView {
    pub head: *const u32,
    pub tail: *const u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub overflow: *const u32,
    pub cqes: *const io_uring_cqe,
    pub ring_size: usize,
    pub ring_ptr: *mut u8,
    pub ring_fd: RawFd,
}

/// Safe wrapper for the kernel's io_uring interface: owns the ring fd and the
/// mapped submission/completion regions, and moves entries through them under
/// the ring protocol's publish rules. Fill entries with [`Ring::push`] or one
/// of the `add_*` helpers, then call [`Ring::submit`] or [`Ring::wait`].
///
/// The queue protocol assumes a single submitting thread; coordination of
/// multiple submitters is the caller's contract, not enforced here.
pub struct Ring {
    sq: SubmissionQueue,
    cq: CompletionQueue,
    flags: u32,
    features: u32,
    added: usize,
    in_flight: usize,
    // Declared last so the fd closes after the regions above unmap.
    ring_file: File,
}

impl Ring {
    /// Creates a ring with space for `entries` simultaneous operations and no
    /// special setup flags.
    pub fn new(entries: u32) -> Result<Ring> {
        Ring::with_params(&RingParams::new(entries))
    }

    /// Creates a ring from `params`. On any mapping failure the regions
    /// mapped so far are unmapped and the ring fd is closed before the error
    /// is returned.
    pub fn with_params(params: &RingParams) -> Result<Ring> {
        let mut p = io_uring_params {
            flags: params.flags,
            ..Default::default()
        };
        if params.flags & IORING_SETUP_SQPOLL != 0 {
            p.sq_thread_idle = params.sq_thread_idle;
        }
        if params.flags & IORING_SETUP_SQ_AFF != 0 {
            p.sq_thread_cpu = params.sq_thread_cpu;
        }
        if params.flags & IORING_SETUP_CQSIZE != 0 {
            p.cq_entries = params.cq_entries;
        }
        if params.flags & IORING_SETUP_ATTACH_WQ != 0 {
            p.wq_fd = params.wq_fd as u32;
        }

        // SAFETY: the kernel is trusted to only fill in `p`, and `File` takes
        // complete ownership of the returned fd.
        let fd = unsafe { io_uring_setup(params.entries, &mut p) }.map_err(Error::Setup)?;
        // SAFETY: we own the fd the kernel just handed us.
        let ring_file = unsafe { File::from_raw_fd(fd) };

        // Ring byte sizes come from the kernel-reported offsets; they are not
        // stable across kernel versions and must never be guessed.
        let sq_ring_size = p.sq_off.array as usize + p.sq_entries as usize * size_of::<u32>();
        let cq_ring_size =
            p.cq_off.cqes as usize + p.cq_entries as usize * size_of::<io_uring_cqe>();
        let single_mmap = p.features & IORING_FEAT_SINGLE_MMAP != 0;
        let sq_map_size = if single_mmap {
            max(sq_ring_size, cq_ring_size)
        } else {
            sq_ring_size
        };

        // Any error below drops the mappings made so far and `ring_file`,
        // which unmaps and closes in that order.
        let sq_mmap =
            MemoryMapping::from_fd_offset_populate(&ring_file, sq_map_size, IORING_OFF_SQ_RING)
                .map_err(Error::MappingSubmitRing)?;
        let cq_mmap = if single_mmap {
            None
        } else {
            Some(
                MemoryMapping::from_fd_offset_populate(
                    &ring_file,
                    cq_ring_size,
                    IORING_OFF_CQ_RING,
                )
                .map_err(Error::MappingCompleteRing)?,
            )
        };
        let sqe_mmap = MemoryMapping::from_fd_offset_populate(
            &ring_file,
            p.sq_entries as usize * size_of::<io_uring_sqe>(),
            IORING_OFF_SQES,
        )
        .map_err(Error::MappingSubmitEntries)?;

        // SAFETY: the mappings were created from the ring fd at the kernel
        // ring offsets and `p` is the params block io_uring_setup filled.
        let cq = unsafe { CompletionQueue::new(cq_mmap, &sq_mmap, &p) };
        // SAFETY: see above.
        let sq = unsafe { SubmissionQueue::new(sq_mmap, sqe_mmap, &p) };

        Ok(Ring {
            sq,
            cq,
            flags: p.flags,
            features: p.features,
            added: 0,
            in_flight: 0,
            ring_file,
        })
    }

    /// Feature bits the kernel reported at setup.
    pub fn features(&self) -> u32 {
        self.features
    }

    /// Effective setup flags of this ring.
    pub fn setup_flags(&self) -> u32 {
        self.flags
    }

    pub fn sq_entries(&self) -> u32 {
        self.sq.ring_entries
    }

    pub fn cq_entries(&self) -> u32 {
        self.cq.ring_entries
    }

    /// Number of submissions the kernel rejected because they were malformed.
    pub fn sq_dropped(&self) -> u32 {
        // SAFETY: the pointer is valid for as long as the sq mapping in self.
        unsafe { (*self.sq.dropped.cast::<AtomicU32>()).load(Ordering::Acquire) }
    }

    /// Number of completions lost to a full completion ring.
    pub fn cq_overflow(&self) -> u32 {
        // SAFETY: the pointer is valid for as long as the cq mapping in self.
        unsafe { (*self.cq.overflow.cast::<AtomicU32>()).load(Ordering::Acquire) }
    }

    /// Flat address view of the submission queue.
    pub fn sq_view(&self) -> SubmissionQueueView {
        SubmissionQueueView {
            head: self.sq.pointers.head as *const u32,
            tail: self.sq.pointers.tail as *const u32,
            ring_mask: self.sq.ring_mask,
            ring_entries: self.sq.ring_entries,
            flags: self.sq.flags,
            dropped: self.sq.dropped,
            array: self.sq.array,
            sqes: self.sq.sqes.as_ptr(),
            ring_size: self.sq.mmap.size(),
            ring_ptr: self.sq.mmap.as_ptr(),
            ring_fd: self.ring_file.as_raw_fd(),
        }
    }

    /// Flat address view of the completion queue. With the single-mmap
    /// feature, `ring_ptr` equals the submission view's `ring_ptr`.
    pub fn cq_view(&self) -> CompletionQueueView {
        CompletionQueueView {
            head: self.cq.pointers.head as *const u32,
            tail: self.cq.pointers.tail as *const u32,
            ring_mask: self.cq.ring_mask,
            ring_entries: self.cq.ring_entries,
            overflow: self.cq.overflow,
            cqes: self.cq.cqes,
            ring_size: self.cq.ring_size,
            ring_ptr: self.cq.ring_ptr,
            ring_fd: self.ring_file.as_raw_fd(),
        }
    }

    // Call `f` with the next available sqe or return an error if none are
    // available. After `f` returns, the sqe is published to the kernel's
    // queue by the tail store.
    fn prep_next_sqe<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&mut io_uring_sqe),
    {
        let tail = self.sq.pointers.tail(Ordering::Relaxed);
        // The Acquire load pairs with the kernel's store when it consumes
        // entries and advances head.
        let head = self.sq.pointers.head(Ordering::Acquire);
        if tail.wrapping_sub(head) >= self.sq.ring_entries {
            return Err(Error::NoSpace);
        }
        let index = (tail & self.sq.ring_mask) as usize;
        let sqe = self.sq.sqe_mut(index);
        *sqe = io_uring_sqe::default();
        f(sqe);

        // Tells the kernel to use the new index when processing the entry at
        // that index.
        self.sq.set_array_entry(index, index as u32);
        // The sqe writes above must be visible before the tail moves;
        // set_tail stores with Release ordering.
        self.sq.pointers.set_tail(tail.wrapping_add(1));

        self.added += 1;

        Ok(())
    }

    /// Copies a fully prepared entry into the next free submission slot and
    /// publishes it. Returns [`Error::NoSpace`] when the ring is full.
    ///
    /// # Safety
    /// Any addresses inside `entry` must stay valid, and the buffers they
    /// name must stay unaliased, until the matching completion is drained.
    pub unsafe fn push(&mut self, entry: &io_uring_sqe) -> Result<()> {
        self.prep_next_sqe(|sqe| *sqe = *entry)
    }

    /// Queues a no-op. Its completion reports `Ok(0)` with `user_data`.
    pub fn add_nop(&mut self, user_data: UserData) -> Result<()> {
        self.prep_next_sqe(|sqe| {
            sqe.opcode = Opcode::Nop.into();
            sqe.fd = -1;
            sqe.user_data = user_data;
        })
    }

    /// Queues a one-shot poll on `fd` for `events` (`libc::POLLIN` etc.).
    /// The user must keep the fd open until the completion is returned, and
    /// re-add the fd to get future events.
    pub fn add_poll_fd(&mut self, fd: RawFd, events: u16, user_data: UserData) -> Result<()> {
        self.prep_next_sqe(|sqe| {
            sqe.opcode = Opcode::PollAdd.into();
            sqe.fd = fd;
            sqe.op_flags = events as u32;
            sqe.user_data = user_data;
        })
    }

    /// Sends queued entries to the kernel without waiting for completions.
    /// Returns the number of entries handed over. With SQ-poll the kernel
    /// thread consumes the queue on its own and is only woken here when it
    /// reports itself idle.
    pub fn submit(&mut self) -> Result<u32> {
        let added = std::mem::take(&mut self.added);
        self.in_flight += added;
        if added == 0 {
            return Ok(0);
        }
        if self.flags & IORING_SETUP_SQPOLL != 0 {
            if self.sq_needs_wakeup() {
                // SAFETY: the rings stay mapped for the duration of the call.
                unsafe {
                    io_uring_enter(self.ring_file.as_raw_fd(), 0, 0, IORING_ENTER_SQ_WAKEUP)
                }
                .map_err(Error::RingEnter)?;
            }
            return Ok(added as u32);
        }
        // SAFETY: the only memory the kernel touches is in the mapped rings,
        // which live as long as self.
        unsafe { io_uring_enter(self.ring_file.as_raw_fd(), added as u32, 0, 0) }
            .map_err(Error::RingEnter)
    }

    /// Sends queued entries and blocks until at least one completion is
    /// ready, then returns an iterator over the completed operations. If
    /// called with nothing new queued, simply waits for in-flight ops.
    pub fn wait(&mut self) -> Result<impl Iterator<Item = (UserData, std::io::Result<u32>)> + '_> {
        let completed = self.cq.num_completed();
        self.in_flight -= completed;
        self.in_flight += self.added;
        let added = std::mem::take(&mut self.added);
        if self.in_flight > 0 {
            let mut flags = IORING_ENTER_GETEVENTS;
            if self.flags & IORING_SETUP_SQPOLL != 0 && self.sq_needs_wakeup() {
                // An idle sq-poll thread never consumes the published
                // entries; without the wakeup this would wait on completions
                // that cannot arrive.
                flags |= IORING_ENTER_SQ_WAKEUP;
            }
            // SAFETY: the only memory modified is in the completion queue,
            // which lives as long as self.
            unsafe { io_uring_enter(self.ring_file.as_raw_fd(), added as u32, 1, flags) }
                .map_err(Error::RingEnter)?;
        }

        // The CompletionQueue will iterate all completed ops.
        Ok(&mut self.cq)
    }

    /// Raw entry call for callers that manage their own batching. An
    /// interrupted call is retried internally; every other failure is
    /// surfaced.
    pub fn enter(&self, to_submit: u32, min_complete: u32, flags: u32) -> Result<u32> {
        // SAFETY: the rings stay mapped for as long as self lives.
        unsafe { io_uring_enter(self.ring_file.as_raw_fd(), to_submit, min_complete, flags) }
            .map_err(Error::RingEnter)
    }

    /// Registers resources with the ring.
    ///
    /// # Safety
    /// `arg` must point to `nr_args` valid elements of the type `opcode`
    /// expects, and registered buffers/files must outlive their use by the
    /// kernel.
    pub unsafe fn register(
        &self,
        opcode: RegisterOpcode,
        arg: *const libc::c_void,
        nr_args: u32,
    ) -> Result<()> {
        io_uring_register(self.ring_file.as_raw_fd(), opcode.into(), arg, nr_args)
            .map_err(Error::RingRegister)
    }

    fn sq_needs_wakeup(&self) -> bool {
        // SAFETY: the flags pointer is valid for as long as the sq mapping.
        let flags = unsafe { (*self.sq.flags.cast::<AtomicU32>()).load(Ordering::Acquire) };
        flags & IORING_SQ_NEED_WAKEUP != 0
    }
}

impl AsRawFd for Ring {
    fn as_raw_fd(&self) -> RawFd {
        self.ring_file.as_raw_fd()
    }
}

struct SubmissionQueue {
    mmap: MemoryMapping,
    sqes: SubmitQueueEntries,
    pointers: QueuePointers,
    ring_mask: u32,
    ring_entries: u32,
    flags: *const u32,
    dropped: *const u32,
    array: *mut u32,
}

// SAFETY: the raw pointers all target the owned mappings above.
unsafe impl Send for SubmissionQueue {}

impl SubmissionQueue {
    // # Safety
    // Safe iff `mmap` maps the uring fd at the SQ_RING offset, `sqe_mmap`
    // maps it at the SQES offset, and `params` is the block io_uring_setup
    // filled in.
    unsafe fn new(
        mmap: MemoryMapping,
        sqe_mmap: MemoryMapping,
        params: &io_uring_params,
    ) -> SubmissionQueue {
        let ptr = mmap.as_ptr();
        // Every pointer is base + kernel-reported field offset, nothing else.
        // A u32 is atomic on all supported architectures and the pointers
        // live until after self is dropped because the mmap is owned.
        let head = ptr.add(params.sq_off.head as usize) as *const AtomicU32;
        let tail = ptr.add(params.sq_off.tail as usize) as *const AtomicU32;
        let ring_mask = mmap.read_u32(params.sq_off.ring_mask as usize).unwrap();
        let ring_entries = mmap.read_u32(params.sq_off.ring_entries as usize).unwrap();
        let flags = ptr.add(params.sq_off.flags as usize) as *const u32;
        let dropped = ptr.add(params.sq_off.dropped as usize) as *const u32;
        let array = ptr.add(params.sq_off.array as usize) as *mut u32;

        // Identity-map the index array once; submission re-stores the slot it
        // uses anyway, but a fully initialized array keeps the kernel's view
        // consistent from the start.
        for i in 0..ring_entries {
            std::ptr::write_volatile(array.add(i as usize), i);
        }

        SubmissionQueue {
            mmap,
            sqes: SubmitQueueEntries {
                mmap: sqe_mmap,
                len: params.sq_entries as usize,
            },
            pointers: QueuePointers { head, tail },
            ring_mask,
            ring_entries,
            flags,
            dropped,
            array,
        }
    }

    fn sqe_mut(&mut self, index: usize) -> &mut io_uring_sqe {
        self.sqes.get_mut(index)
    }

    // Sets the kernel's array entry at the given `index` to `value`.
    fn set_array_entry(&self, index: usize, value: u32) {
        // SAFETY: self being constructed from the correct mmap guarantees
        // the memory is valid to write, and the caller masked the index.
        unsafe {
            std::ptr::write_volatile(self.array.add(index), value);
        }
    }
}

struct SubmitQueueEntries {
    mmap: MemoryMapping,
    len: usize,
}

impl SubmitQueueEntries {
    fn as_ptr(&self) -> *mut io_uring_sqe {
        self.mmap.as_ptr() as *mut io_uring_sqe
    }

    fn get_mut(&mut self, index: usize) -> &mut io_uring_sqe {
        debug_assert!(index < self.len);
        // SAFETY: the mut borrow of self restricts to one mutable reference
        // at a time, the index stays below the entry count the kernel sized
        // this mapping for, and the kernel only reads slots between head and
        // tail, which this one is not.
        unsafe { &mut *self.as_ptr().add(index) }
    }
}

struct CompletionQueue {
    // None when the kernel coalesced both rings into the submit mapping.
    mmap: Option<MemoryMapping>,
    pointers: QueuePointers,
    ring_mask: u32,
    ring_entries: u32,
    overflow: *const u32,
    cqes: *const io_uring_cqe,
    ring_ptr: *mut u8,
    ring_size: usize,
    completed: usize,
}

// SAFETY: the raw pointers all target memory owned by this struct or by the
// sibling SubmissionQueue inside the same Ring.
unsafe impl Send for CompletionQueue {}

impl CompletionQueue {
    // # Safety
    // Safe iff `mmap` maps the uring fd at the CQ_RING offset (or, when None,
    // `sq_mmap` is the shared submit-ring mapping holding both rings, which
    // must outlive self inside the same Ring) and `params` is the block
    // io_uring_setup filled in.
    unsafe fn new(
        mmap: Option<MemoryMapping>,
        sq_mmap: &MemoryMapping,
        params: &io_uring_params,
    ) -> CompletionQueue {
        let backing = mmap.as_ref().unwrap_or(sq_mmap);
        let (ptr, ring_size) = (backing.as_ptr(), backing.size());
        let head = ptr.add(params.cq_off.head as usize) as *const AtomicU32;
        let tail = ptr.add(params.cq_off.tail as usize) as *const AtomicU32;
        let ring_mask = backing.read_u32(params.cq_off.ring_mask as usize).unwrap();
        let ring_entries = backing.read_u32(params.cq_off.ring_entries as usize).unwrap();
        let overflow = ptr.add(params.cq_off.overflow as usize) as *const u32;
        let cqes = ptr.add(params.cq_off.cqes as usize) as *const io_uring_cqe;

        CompletionQueue {
            mmap,
            pointers: QueuePointers { head, tail },
            ring_mask,
            ring_entries,
            overflow,
            cqes,
            ring_ptr: ptr,
            ring_size,
            completed: 0,
        }
    }

    fn get_cqe(&self, head: u32) -> &io_uring_cqe {
        // SAFETY: the kernel sized this region for ring_entries cqes and the
        // index is kept in range by the kernel-provided mask.
        unsafe {
            let index = head & self.ring_mask;
            &*self.cqes.add(index as usize)
        }
    }

    fn num_completed(&mut self) -> usize {
        std::mem::replace(&mut self.completed, 0)
    }
}

// Return the completed ops with their result.
impl Iterator for CompletionQueue {
    type Item = (UserData, std::io::Result<u32>);

    fn next(&mut self) -> Option<Self::Item> {
        let head = self.pointers.head(Ordering::Relaxed);

        // An entry must not be read until the kernel's tail advance over it
        // is observed; the Acquire pairs with the kernel's Release store.
        if head == self.pointers.tail(Ordering::Acquire) {
            return None;
        }

        self.completed += 1;

        let cqe = self.get_cqe(head);
        let user_data = cqe.user_data;
        let res = cqe.res;

        // The reads above must complete before the kernel sees the head
        // advance and reuses the slot; set_head stores with Release ordering.
        self.pointers.set_head(head.wrapping_add(1));

        let io_res = match res {
            r if r < 0 => Err(std::io::Error::from_raw_os_error(-r)),
            r => Ok(r as u32),
        };
        Some((user_data, io_res))
    }
}

// The free-running head and tail words of one mapped ring. The protocol
// fixes which side stores which word: user space publishes the submit tail
// and the completion head, the kernel publishes the other two.
struct QueuePointers {
    head: *const AtomicU32,
    tail: *const AtomicU32,
}

impl QueuePointers {
    fn tail(&self, ordering: Ordering) -> u32 {
        // SAFETY: the pointer targets the owning queue's mapping, which
        // outlives self.
        unsafe { (*self.tail).load(ordering) }
    }

    // Publishes a new submit tail. The Release store makes every sqe write
    // before it visible to the kernel once it observes the new index.
    fn set_tail(&self, next_tail: u32) {
        // SAFETY: the pointer targets the owning queue's mapping, which
        // outlives self; the word is only ever accessed atomically.
        unsafe { (*self.tail).store(next_tail, Ordering::Release) }
    }

    fn head(&self, ordering: Ordering) -> u32 {
        // SAFETY: the pointer targets the owning queue's mapping, which
        // outlives self.
        unsafe { (*self.head).load(ordering) }
    }

    // Publishes a new completion head, returning the consumed slots to the
    // kernel. The Release store orders the cqe reads before the handoff.
    fn set_head(&self, next_head: u32) {
        // SAFETY: the pointer targets the owning queue's mapping, which
        // outlives self; the word is only ever accessed atomically.
        unsafe { (*self.head).store(next_head, Ordering::Release) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_drop_closes_fd() {
        let ring = Ring::new(16).unwrap();
        let fd = ring.as_raw_fd();
        drop(ring);
        // SAFETY: fcntl with F_GETFD touches no memory.
        let ret = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert_eq!(ret, -1);
        assert_eq!(errno::Error::last().errno(), libc::EBADF);
    }

    #[test]
    fn entry_counts_at_least_requested() {
        let ring = Ring::new(8).unwrap();
        assert!(ring.sq_entries() >= 8);
        assert!(ring.cq_entries() >= ring.sq_entries());
    }

    #[test]
    fn coalesced_views_share_base() {
        let ring = Ring::new(8).unwrap();
        if ring.features() & IORING_FEAT_SINGLE_MMAP != 0 {
            assert_eq!(ring.sq_view().ring_ptr, ring.cq_view().ring_ptr);
            assert_eq!(ring.sq_view().ring_size, ring.cq_view().ring_size);
        } else {
            assert_ne!(ring.sq_view().ring_ptr, ring.cq_view().ring_ptr);
        }
    }

    #[test]
    fn queue_full_returns_no_space() {
        let mut ring = Ring::new(4).unwrap();
        let entries = ring.sq_entries();
        for i in 0..entries {
            ring.add_nop(i as UserData).unwrap();
        }
        assert!(matches!(ring.add_nop(999), Err(Error::NoSpace)));
    }

    #[test]
    fn nop_round_trip() {
        let mut ring = Ring::new(16).unwrap();
        ring.add_nop(454).unwrap();
        let (user_data, res) = ring.wait().unwrap().next().unwrap();
        assert_eq!(user_data, 454);
        assert_eq!(res.unwrap(), 0);
    }

    #[test]
    fn nop_wraparound() {
        let mut ring = Ring::new(8).unwrap();
        let entries = ring.sq_entries();
        // Three times around the ring, one at a time.
        for i in 0..u64::from(entries) * 3 {
            ring.add_nop(i).unwrap();
            let (user_data, res) = ring.wait().unwrap().next().unwrap();
            assert_eq!(user_data, i);
            assert_eq!(res.unwrap(), 0);
        }
        assert_eq!(ring.sq_dropped(), 0);
        assert_eq!(ring.cq_overflow(), 0);
    }

    #[test]
    fn submit_then_drain_batch() {
        let mut ring = Ring::new(16).unwrap();
        for i in 0..10u64 {
            ring.add_nop(i).unwrap();
        }
        assert_eq!(ring.submit().unwrap(), 10);
        let mut seen = 0u64;
        while seen < 10 {
            for (user_data, res) in ring.wait().unwrap() {
                assert!(user_data < 10);
                assert_eq!(res.unwrap(), 0);
                seen += 1;
            }
        }
    }

    #[test]
    fn flag_gated_params_require_flag() {
        // With no setup flags set, the gated fields must be ignored rather
        // than passed through (the kernel rejects stray values).
        let params = RingParams {
            sq_thread_idle: 1000,
            sq_thread_cpu: 1,
            cq_entries: 1024,
            ..RingParams::new(8)
        };
        let ring = Ring::with_params(&params).unwrap();
        assert!(ring.cq_entries() < 1024);
    }

    #[test]
    fn cq_size_override() {
        let params = RingParams {
            flags: IORING_SETUP_CQSIZE,
            cq_entries: 128,
            ..RingParams::new(8)
        };
        let ring = Ring::with_params(&params).unwrap();
        assert_eq!(ring.cq_entries(), 128);
    }

    #[test]
    fn setup_failure_reports_errno() {
        // Zero entries is invalid.
        match Ring::new(0) {
            Err(Error::Setup(e)) => assert_eq!(e.errno(), libc::EINVAL),
            other => panic!("expected setup failure, got {:?}", other.map(|_| ())),
        }
    }
}
