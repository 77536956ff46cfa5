//! Native operation failures.
//!
//! Every engine primitive reports its outcome as a signed integer: negative
//! values are failures carrying `-errno` (or [`EOF`]), non-negative values are
//! success or a byte count. On the stream paths a failure is only ever
//! surfaced as an [`ErrorEvent`](crate::event::ErrorEvent); [`Error`] is the
//! typed form of the same code, used by the few constructors that report
//! failure directly.

use std::io;

use thiserror::Error;

/// Code reported when the peer closed its write side.
pub const EOF: i32 = -4095;

/// A native operation failure.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// End of stream.
    #[error("end of file")]
    Eof,

    /// Platform error, holding the negated `errno`.
    #[error("{}", os_message(.0))]
    Os(i32),
}

impl Error {
    /// Builds an error from a negative native result code.
    pub fn from_code(code: i32) -> Self {
        if code == EOF {
            Error::Eof
        } else {
            Error::Os(code)
        }
    }

    /// Native result code of this error.
    pub fn code(&self) -> i32 {
        match self {
            Error::Eof => EOF,
            Error::Os(code) => *code,
        }
    }

    /// Symbolic name of the code, e.g. `"ECONNREFUSED"`.
    pub fn name(&self) -> &'static str {
        name(self.code())
    }

    pub(crate) fn last_os_error() -> Self {
        Error::Os(last_code())
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Eof => io::Error::new(io::ErrorKind::UnexpectedEof, "end of file"),
            Error::Os(code) => io::Error::from_raw_os_error(-code),
        }
    }
}

/// Returns `-errno` for the last failed syscall on this thread.
pub(crate) fn last_code() -> i32 {
    -io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

fn os_message(code: &i32) -> String {
    format!("{} ({})", describe(*code), name(*code))
}

/// Human readable message for a native result code.
pub(crate) fn describe(code: i32) -> String {
    if code == EOF {
        return "end of file".to_owned();
    }

    io::Error::from_raw_os_error(-code).to_string()
}

const NAMES: &[(i32, &str)] = &[
    (libc::EACCES, "EACCES"),
    (libc::EADDRINUSE, "EADDRINUSE"),
    (libc::EADDRNOTAVAIL, "EADDRNOTAVAIL"),
    (libc::EAFNOSUPPORT, "EAFNOSUPPORT"),
    (libc::EAGAIN, "EAGAIN"),
    (libc::EALREADY, "EALREADY"),
    (libc::EBADF, "EBADF"),
    (libc::EBUSY, "EBUSY"),
    (libc::ECANCELED, "ECANCELED"),
    (libc::ECONNABORTED, "ECONNABORTED"),
    (libc::ECONNREFUSED, "ECONNREFUSED"),
    (libc::ECONNRESET, "ECONNRESET"),
    (libc::EINPROGRESS, "EINPROGRESS"),
    (libc::EINTR, "EINTR"),
    (libc::EINVAL, "EINVAL"),
    (libc::EIO, "EIO"),
    (libc::EISCONN, "EISCONN"),
    (libc::EMFILE, "EMFILE"),
    (libc::ENFILE, "ENFILE"),
    (libc::ENOBUFS, "ENOBUFS"),
    (libc::ENOMEM, "ENOMEM"),
    (libc::ENOTCONN, "ENOTCONN"),
    (libc::ENOTSOCK, "ENOTSOCK"),
    (libc::ENOTSUP, "ENOTSUP"),
    (libc::EPERM, "EPERM"),
    (libc::EPIPE, "EPIPE"),
    (libc::ETIMEDOUT, "ETIMEDOUT"),
];

/// Symbolic name for a native result code, `"UNKNOWN"` when not tabulated.
pub(crate) fn name(code: i32) -> &'static str {
    if code == EOF {
        return "EOF";
    }

    NAMES
        .iter()
        .find(|(errno, _)| -errno == code)
        .map(|(_, name)| *name)
        .unwrap_or("UNKNOWN")
}
