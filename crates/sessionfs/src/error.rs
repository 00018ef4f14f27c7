use std::io;

use thiserror::Error;

/// Errors returned by session creation, buffered I/O and commit.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("too many open sessions (limit {limit})")]
    TooManySessions { limit: usize },

    #[error("file too large for session buffer: {size} bytes, capacity {capacity}")]
    FileTooLarge { size: u64, capacity: usize },

    #[error("cannot allocate session buffer of {0} bytes")]
    OutOfMemory(usize),

    #[error("offset {offset} out of range (limit {limit})")]
    OutOfRange { offset: u64, limit: u64 },

    #[error("session is torn down")]
    TornDown,

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("no data at offset {0}")]
    NoSuchOffset(i64),

    #[error("handle not opened for {0}")]
    BadDescriptor(&'static str),

    #[error("engine busy: {0} residency pins held")]
    EngineBusy(usize),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    /// The errno a syscall layer would report for this error.
    pub fn errno(&self) -> i32 {
        match self {
            SessionError::TooManySessions { .. } => libc::EMFILE,
            SessionError::FileTooLarge { .. } => libc::EFBIG,
            SessionError::OutOfMemory(_) => libc::ENOMEM,
            SessionError::OutOfRange { .. } => libc::EOVERFLOW,
            SessionError::TornDown => libc::EBADFD,
            SessionError::Unsupported(_) => libc::ENOTSUP,
            SessionError::InvalidArgument(_) => libc::EINVAL,
            SessionError::NoSuchOffset(_) => libc::ENXIO,
            SessionError::BadDescriptor(_) => libc::EBADF,
            SessionError::EngineBusy(_) => libc::EBUSY,
            SessionError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
