// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Operation and registration code tables, pinned to the kernel ABI values.
//! These exist for type safety at the syscall boundary only; whether the
//! running kernel actually implements a given opcode is answered by
//! [`Probe`](crate::Probe), not by this table.

/// `io_uring_sqe.opcode` values.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Opcode {
    Nop = 0,
    Readv = 1,
    Writev = 2,
    Fsync = 3,
    ReadFixed = 4,
    WriteFixed = 5,
    PollAdd = 6,
    PollRemove = 7,
    SendMsg = 9,
    RecvMsg = 10,
    Timeout = 11,
    TimeoutRemove = 12,
    Accept = 13,
    Connect = 16,
    Fallocate = 17,
    OpenAt = 18,
    Close = 19,
    Statx = 21,
    Read = 22,
    Write = 23,
    Send = 26,
    Recv = 27,
    Splice = 30,
    Shutdown = 34,
    RenameAt = 35,
    UnlinkAt = 36,
    SendZc = 47,
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

/// `io_uring_register` opcode values.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegisterOpcode {
    RegisterBuffers = 0,
    UnregisterBuffers = 1,
    RegisterFiles = 2,
    UnregisterFiles = 3,
    RegisterEventfd = 4,
    UnregisterEventfd = 5,
    Probe = 8,
    RegisterPbufRing = 22,
    UnregisterPbufRing = 23,
}

impl From<RegisterOpcode> for u32 {
    fn from(op: RegisterOpcode) -> u32 {
        op as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_values_match_abi() {
        assert_eq!(u8::from(Opcode::Nop), 0);
        assert_eq!(u8::from(Opcode::Readv), 1);
        assert_eq!(u8::from(Opcode::Statx), 21);
        assert_eq!(u8::from(Opcode::Read), 22);
        assert_eq!(u8::from(Opcode::SendZc), 47);
    }

    #[test]
    fn register_values_match_abi() {
        assert_eq!(u32::from(RegisterOpcode::RegisterBuffers), 0);
        assert_eq!(u32::from(RegisterOpcode::Probe), 8);
        assert_eq!(u32::from(RegisterOpcode::RegisterPbufRing), 22);
    }
}
