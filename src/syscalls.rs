// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::os::unix::io::RawFd;
use std::ptr::null_mut;

use libc::c_int;
use libc::c_long;
use libc::c_void;
use libc::syscall;
use libc::SYS_io_uring_enter;
use libc::SYS_io_uring_register;
use libc::SYS_io_uring_setup;

use crate::bindings::io_uring_params;
use crate::errno::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// # Safety
/// The kernel writes the entry counts, feature bits, and ring offsets back
/// into `params`; the caller takes ownership of the returned fd.
pub unsafe fn io_uring_setup(num_entries: u32, params: &mut io_uring_params) -> Result<RawFd> {
    let ret = syscall(
        SYS_io_uring_setup as c_long,
        num_entries as c_int,
        params as *mut _,
    );
    if ret < 0 {
        return Err(Error::last());
    }
    Ok(ret as RawFd)
}

/// # Safety
/// `fd` must be an io_uring fd whose rings are mapped and stay mapped for the
/// duration of the call; the kernel reads sqes and writes cqes through them.
///
/// An `EINTR` failure is retried transparently; this is the only condition
/// that is. Every other failure is surfaced with its errno.
pub unsafe fn io_uring_enter(
    fd: RawFd,
    to_submit: u32,
    min_complete: u32,
    flags: u32,
) -> Result<u32> {
    loop {
        let ret = syscall(
            SYS_io_uring_enter as c_long,
            fd,
            to_submit as c_int,
            min_complete as c_int,
            flags as c_int,
            null_mut::<c_void>(),
        );
        if ret >= 0 {
            return Ok(ret as u32);
        }
        let err = Error::last();
        if err.errno() != libc::EINTR {
            return Err(err);
        }
    }
}

/// # Safety
/// `arg` must point to `nr_args` elements of whatever `opcode` expects, valid
/// for the duration of the call.
///
/// Registration failures indicate a configuration problem, not a transient
/// condition, so they are surfaced without retry.
pub unsafe fn io_uring_register(
    fd: RawFd,
    opcode: u32,
    arg: *const c_void,
    nr_args: u32,
) -> Result<()> {
    let ret = syscall(
        SYS_io_uring_register as c_long,
        fd,
        opcode as c_int,
        arg,
        nr_args as c_int,
    );
    if ret < 0 {
        return Err(Error::last());
    }
    Ok(())
}
