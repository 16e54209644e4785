// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hand-pinned `io_uring` kernel ABI: struct layouts and integer constants
//! from `include/uapi/linux/io_uring.h`. The values are stable by contract;
//! the *set* of opcodes a running kernel supports is not, which is what the
//! probe registration exists for.

#![allow(non_camel_case_types)]

/// Offsets into the ring fd used to mmap each region.
pub const IORING_OFF_SQ_RING: u64 = 0;
pub const IORING_OFF_CQ_RING: u64 = 0x800_0000;
pub const IORING_OFF_SQES: u64 = 0x1000_0000;

/// `io_uring_params.flags` bits accepted by `io_uring_setup`.
pub const IORING_SETUP_IOPOLL: u32 = 1 << 0;
pub const IORING_SETUP_SQPOLL: u32 = 1 << 1;
pub const IORING_SETUP_SQ_AFF: u32 = 1 << 2;
pub const IORING_SETUP_CQSIZE: u32 = 1 << 3;
pub const IORING_SETUP_CLAMP: u32 = 1 << 4;
pub const IORING_SETUP_ATTACH_WQ: u32 = 1 << 5;

/// `io_uring_params.features` bits reported back by the kernel.
pub const IORING_FEAT_SINGLE_MMAP: u32 = 1 << 0;
pub const IORING_FEAT_NODROP: u32 = 1 << 1;
pub const IORING_FEAT_SUBMIT_STABLE: u32 = 1 << 2;
pub const IORING_FEAT_SQPOLL_NONFIXED: u32 = 1 << 7;
pub const IORING_FEAT_EXT_ARG: u32 = 1 << 8;

/// `io_uring_enter` flags.
pub const IORING_ENTER_GETEVENTS: u32 = 1 << 0;
pub const IORING_ENTER_SQ_WAKEUP: u32 = 1 << 1;

/// Bits the kernel sets in the submit ring's flags word.
pub const IORING_SQ_NEED_WAKEUP: u32 = 1 << 0;
pub const IORING_SQ_CQ_OVERFLOW: u32 = 1 << 1;

/// `io_uring_sqe.flags` bits.
pub const IOSQE_FIXED_FILE: u8 = 1 << 0;
pub const IOSQE_IO_DRAIN: u8 = 1 << 1;
pub const IOSQE_IO_LINK: u8 = 1 << 2;
pub const IOSQE_ASYNC: u8 = 1 << 4;
pub const IOSQE_BUFFER_SELECT: u8 = 1 << 5;

/// `io_uring_cqe.flags` bits.
pub const IORING_CQE_F_BUFFER: u32 = 1 << 0;
pub const IORING_CQE_BUFFER_SHIFT: u32 = 16;

/// Fsync/splice op flags.
pub const IORING_FSYNC_DATASYNC: u32 = 1 << 0;
pub const SPLICE_F_FD_IN_FIXED: u32 = 1 << 31;

/// `io_uring_probe_op.flags` bit set when the op is supported.
pub const IO_URING_OP_SUPPORTED: u16 = 1 << 0;

#[repr(C)]
#[derive(Default, Debug, Copy, Clone)]
pub struct io_sqring_offsets {
    pub head: u32,
    pub tail: u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub flags: u32,
    pub dropped: u32,
    pub array: u32,
    pub resv1: u32,
    pub resv2: u64,
}

#[repr(C)]
#[derive(Default, Debug, Copy, Clone)]
pub struct io_cqring_offsets {
    pub head: u32,
    pub tail: u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub overflow: u32,
    pub cqes: u32,
    pub flags: u32,
    pub resv1: u32,
    pub resv2: u64,
}

/// Parameter block passed to `io_uring_setup`; the kernel fills in the entry
/// counts, feature bits, and both offset tables.
#[repr(C)]
#[derive(Default, Debug, Copy, Clone)]
pub struct io_uring_params {
    pub sq_entries: u32,
    pub cq_entries: u32,
    pub flags: u32,
    pub sq_thread_cpu: u32,
    pub sq_thread_idle: u32,
    pub features: u32,
    pub wq_fd: u32,
    pub resv: [u32; 3],
    pub sq_off: io_sqring_offsets,
    pub cq_off: io_cqring_offsets,
}

/// A 64-byte submission queue entry. The unions of the kernel header are
/// flattened to the field each overlapping member shares storage with.
#[repr(C)]
#[derive(Default, Debug, Copy, Clone)]
pub struct io_uring_sqe {
    pub opcode: u8,
    pub flags: u8,
    pub ioprio: u16,
    pub fd: i32,
    /// Also `addr2` for ops that take a second address.
    pub off: u64,
    /// Also `splice_off_in`.
    pub addr: u64,
    pub len: u32,
    /// rw_flags / fsync_flags / poll_events / msg_flags / timeout_flags /
    /// accept_flags / open_flags / statx_flags / fallocate mode, per opcode.
    pub op_flags: u32,
    pub user_data: u64,
    /// Also `buf_group` when `IOSQE_BUFFER_SELECT` is set.
    pub buf_index: u16,
    pub personality: u16,
    pub splice_fd_in: i32,
    pub __pad2: [u64; 2],
}

#[repr(C)]
#[derive(Default, Debug, Copy, Clone)]
pub struct io_uring_cqe {
    pub user_data: u64,
    pub res: i32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Default, Debug, Copy, Clone)]
pub struct io_uring_probe_op {
    pub op: u8,
    pub resv: u8,
    pub flags: u16,
    pub resv2: u32,
}

/// Probe header; `ops_len` entries of `io_uring_probe_op` follow it in the
/// buffer handed to the probe registration.
#[repr(C)]
#[derive(Default, Debug, Copy, Clone)]
pub struct io_uring_probe {
    pub last_op: u8,
    pub ops_len: u8,
    pub resv: u16,
    pub resv2: [u32; 3],
}

/// One slot of a provided-buffer ring. The ring's tail word overlays the
/// `resv` field of slot zero, per the kernel's `io_uring_buf_ring` union.
#[repr(C)]
#[derive(Default, Debug, Copy, Clone)]
pub struct io_uring_buf {
    pub addr: u64,
    pub len: u32,
    pub bid: u16,
    pub resv: u16,
}

/// Argument block for registering a provided-buffer ring.
#[repr(C)]
#[derive(Default, Debug, Copy, Clone)]
pub struct io_uring_buf_reg {
    pub ring_addr: u64,
    pub ring_entries: u32,
    pub bgid: u16,
    pub flags: u16,
    pub resv: [u64; 3],
}

#[cfg(test)]
mod tests {
    use std::mem::size_of;

    use super::*;

    #[test]
    fn abi_sizes() {
        assert_eq!(size_of::<io_uring_sqe>(), 64);
        assert_eq!(size_of::<io_uring_cqe>(), 16);
        assert_eq!(size_of::<io_uring_params>(), 120);
        assert_eq!(size_of::<io_uring_probe>(), 16);
        assert_eq!(size_of::<io_uring_probe_op>(), 8);
        assert_eq!(size_of::<io_uring_buf>(), 16);
        assert_eq!(size_of::<io_uring_buf_reg>(), 40);
    }
}
