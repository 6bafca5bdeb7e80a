//! Structured internal error type.
//!
//! Handlers talk to the kernel in negated-errno terms, but internally we
//! keep the errno together with a cause tag so that logging and the
//! metadata layer can tell a plain syscall failure apart from an internal
//! consistency violation without re-deriving it from the number.

use std::fmt;

/// What produced an [`Error`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Cause {
    /// A backing-filesystem syscall failed; the errno is passed through verbatim.
    Syscall,
    /// The `user.grootfs` record was missing, wrongly sized, or otherwise malformed.
    Metadata,
    /// The operation has no backing implementation (e.g. `mknod`).
    Unsupported,
}

/// Engine-internal error: an errno plus why it occurred.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Error {
    errno: i32,
    cause: Cause,
}

impl Error {
    /// Wrap the calling thread's `errno` as a syscall failure.
    pub fn last_os_error() -> Self {
        Self::syscall(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO))
    }

    /// Build a syscall-cause error from a raw errno value.
    pub fn syscall(errno: i32) -> Self {
        Self { errno, cause: Cause::Syscall }
    }

    /// Build a metadata-consistency error. Always surfaces as `EIO`.
    pub fn metadata() -> Self {
        Self { errno: libc::EIO, cause: Cause::Metadata }
    }

    /// Build an unsupported-operation error. Always surfaces as `EROFS`.
    pub fn unsupported() -> Self {
        Self { errno: libc::EROFS, cause: Cause::Unsupported }
    }

    /// The cause tag.
    pub fn cause(&self) -> Cause {
        self.cause
    }

    /// Positive errno value, suitable for `std::io::Error::from_raw_os_error`.
    pub fn errno(&self) -> i32 {
        self.errno
    }

    /// Negated errno, the form every FUSE operation handler must return on failure.
    pub fn as_negated(&self) -> i32 {
        -self.errno
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cause {
            Cause::Syscall => write!(f, "{}", std::io::Error::from_raw_os_error(self.errno)),
            Cause::Metadata => write!(f, "internal metadata inconsistency"),
            Cause::Unsupported => write!(f, "operation not supported"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::syscall(err.raw_os_error().unwrap_or(libc::EIO))
    }
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
