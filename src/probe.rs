// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Opcode capability probe. The set of opcodes a kernel supports grows over
//! releases, so availability is asked of the kernel rather than assumed from
//! the opcode table.

use std::mem::size_of;

use crate::bindings::io_uring_probe;
use crate::bindings::io_uring_probe_op;
use crate::bindings::IO_URING_OP_SUPPORTED;
use crate::ops::Opcode;
use crate::ops::RegisterOpcode;
use crate::uring::Result;
use crate::uring::Ring;

/// Capped maximum opcode count a probe buffer is sized for.
pub const PROBE_OPS_CAP: usize = 256;

/// Byte size of one probe op entry.
pub const fn probe_op_size() -> usize {
    size_of::<io_uring_probe_op>()
}

/// Byte size a caller must allocate for a full probe buffer: the fixed
/// header followed by `PROBE_OPS_CAP` op entries.
pub const fn probe_buffer_size() -> usize {
    size_of::<io_uring_probe>() + PROBE_OPS_CAP * probe_op_size()
}

/// Decoded result of a probe registration.
#[derive(Debug)]
pub struct Probe {
    last_op: u8,
    ops: Vec<io_uring_probe_op>,
}

impl Probe {
    /// Asks the kernel which opcodes `ring` supports.
    pub fn query(ring: &Ring) -> Result<Probe> {
        // The probe buffer is u64-backed so the kernel sees suitably aligned
        // memory for the header and op entries.
        let mut buf = vec![0u64; probe_buffer_size() / size_of::<u64>()];
        // SAFETY: the buffer covers the probe header plus PROBE_OPS_CAP op
        // entries, which is exactly what the registration is told.
        unsafe {
            ring.register(
                RegisterOpcode::Probe,
                buf.as_mut_ptr() as *const libc::c_void,
                PROBE_OPS_CAP as u32,
            )?;
        }

        // SAFETY: the kernel filled the buffer with a probe header; ops_len
        // entries follow it and ops_len is at most PROBE_OPS_CAP.
        let (header, ops) = unsafe {
            let header = *(buf.as_ptr() as *const io_uring_probe);
            let base = (buf.as_ptr() as *const u8).add(size_of::<io_uring_probe>())
                as *const io_uring_probe_op;
            let ops = std::slice::from_raw_parts(base, header.ops_len as usize).to_vec();
            (header, ops)
        };

        Ok(Probe {
            last_op: header.last_op,
            ops,
        })
    }

    /// Highest opcode value the kernel knows about.
    pub fn last_op(&self) -> u8 {
        self.last_op
    }

    /// Returns true if the running kernel supports `op`.
    pub fn is_supported(&self, op: Opcode) -> bool {
        let code = u8::from(op);
        if code > self.last_op {
            return false;
        }
        self.ops
            .iter()
            .any(|entry| entry.op == code && entry.flags & IO_URING_OP_SUPPORTED != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_sizes() {
        assert_eq!(probe_op_size(), 8);
        assert_eq!(probe_buffer_size(), 16 + 256 * probe_op_size());
    }

    #[test]
    fn nop_always_supported() {
        let ring = Ring::new(8).unwrap();
        let probe = match Probe::query(&ring) {
            Ok(p) => p,
            // Kernels before 5.6 lack the probe registration.
            Err(_) => return,
        };
        assert!(probe.is_supported(Opcode::Nop));
        assert!(probe.is_supported(Opcode::Readv));
    }
}
