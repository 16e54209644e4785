// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! User-space driver for the kernel's io_uring interface: ring setup over
//! shared memory, the submission/completion publish protocol, registration,
//! and deterministic teardown. Request bookkeeping, buffer pooling, and
//! back-pressure belong to the event loop built on top of the [`Ring`]
//! handle this crate hands out.

#![cfg(any(target_os = "android", target_os = "linux"))]

pub mod bindings;
mod bufring;
mod errno;
mod mmap;
mod ops;
mod probe;
mod syscalls;
mod sys;
mod uring;

pub use bufring::BufRing;
pub use errno::decode_errno;
pub use errno::Error as Errno;
pub use mmap::Error as MmapError;
pub use mmap::MemoryMapping;
pub use ops::Opcode;
pub use ops::RegisterOpcode;
pub use probe::probe_buffer_size;
pub use probe::probe_op_size;
pub use probe::Probe;
pub use probe::PROBE_OPS_CAP;
pub use sys::file_size;
pub use sys::kernel_version;
pub use sys::kernel_version_at_least;
pub use sys::page_size;
pub use sys::Event;
pub use uring::*;
