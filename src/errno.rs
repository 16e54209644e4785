// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::ffi::CStr;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::result;

/// A system error retrieved from errno (man 3 errno), set by a libc function
/// that returned an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Error(i32);
pub type Result<T> = result::Result<T, Error>;

/// First buffer size tried when decoding an errno message; doubled on
/// `ERANGE` until `MSG_BUF_CAP`.
const MSG_BUF_INITIAL: usize = 64;
const MSG_BUF_CAP: usize = 4096;

impl Error {
    /// Constructs a new error with the given error number.
    pub fn new(e: i32) -> Error {
        Error(e)
    }

    /// Constructs an Error from the most recent system error.
    ///
    /// The result of this only has any meaning just after a libc call that
    /// returned a value indicating errno was set.
    pub fn last() -> Error {
        Error(io::Error::last_os_error().raw_os_error().unwrap_or_default())
    }

    /// Gets the errno for this error.
    pub fn errno(self) -> i32 {
        self.0
    }

    /// Returns the human-readable message for this error number.
    pub fn message(self) -> String {
        decode_errno(self.0)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error(e.raw_os_error().unwrap_or_default())
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        io::Error::from_raw_os_error(e.0)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (errno {})", self.message(), self.0)
    }
}

impl std::error::Error for Error {}

/// Returns the last errno as a Result that is always an error.
pub fn errno_result<T>() -> Result<T> {
    Err(Error::last())
}

/// Returns the `strerror` message for `code`. Negative codes are normalized
/// to positive before lookup, so kernel-style `-EINVAL` results decode the
/// same as plain `EINVAL`. The lookup buffer is doubled until the message
/// fits or the cap is reached; the result is never empty.
pub fn decode_errno(code: i32) -> String {
    let errnum = code.wrapping_abs();
    let mut buf = vec![0 as libc::c_char; MSG_BUF_INITIAL];
    loop {
        // SAFETY: the buffer is valid for writes of its full length and
        // strerror_r always nul-terminates on success.
        let ret = unsafe { libc::strerror_r(errnum, buf.as_mut_ptr(), buf.len()) };
        let err = if ret < 0 {
            io::Error::last_os_error().raw_os_error().unwrap_or(libc::EINVAL)
        } else {
            ret
        };
        if ret == 0 {
            // SAFETY: strerror_r succeeded, so the buffer holds a
            // nul-terminated string.
            let msg = unsafe { CStr::from_ptr(buf.as_ptr()) };
            return msg.to_string_lossy().into_owned();
        }
        if err == libc::ERANGE && buf.len() < MSG_BUF_CAP {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        return format!("Unknown error {}", errnum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_known_errno() {
        let msg = decode_errno(libc::ENOENT);
        assert!(!msg.is_empty());
        assert_ne!(msg, format!("Unknown error {}", libc::ENOENT));
    }

    #[test]
    fn decode_normalizes_negative() {
        assert_eq!(decode_errno(-libc::EINVAL), decode_errno(libc::EINVAL));
    }

    #[test]
    fn decode_is_total_and_idempotent() {
        for code in [0, 1, -1, libc::EINTR, -libc::ENOSYS, 4095, -4095] {
            let first = decode_errno(code);
            assert!(!first.is_empty());
            assert_eq!(first, decode_errno(code));
        }
    }

    #[test]
    fn last_reflects_failed_call() {
        // SAFETY: trivially safe, the fd is invalid on purpose.
        let ret = unsafe { libc::close(-1) };
        assert_eq!(ret, -1);
        assert_eq!(Error::last().errno(), libc::EBADF);
    }
}
