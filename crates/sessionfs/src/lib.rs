//! Session-buffered file handles.
//!
//! Opening a file with [`OpenFlags::SESSION`] gives the handle a private,
//! fixed-capacity working copy of the file. Reads, writes and seeks on that
//! handle touch only the copy. Flushing the handle writes the copy back in one
//! go, truncates the file to the session's logical size and puts the handle's
//! original operations back.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sessionfs::{OpenFlags, SessionConfig, SessionEngine};
//!
//! let engine = SessionEngine::new(SessionConfig::default());
//!
//! let handle = engine
//!     .open_path("notes.txt", OpenFlags::read_write() | OpenFlags::SESSION)
//!     .unwrap();
//! handle.write(b"buffered until flush").unwrap();
//!
//! // Commit and close. On failure the handle comes back inside the error.
//! handle.close().unwrap();
//! ```
//!
//! # Limits
//!
//! - At most `max_sessions` sessions are live at once (default 512, cap 2048).
//! - Each session buffer is `4096 << buffer_order` bytes (default order 2,
//!   cap 4). Files larger than that are refused at open.
//!
//! Both come from [`SessionConfig`], which reads TOML files and the
//! `SESSIONFS_MAX_SESSIONS` / `SESSIONFS_BUFFER_ORDER` environment variables.

pub mod admission;
pub mod config;
pub mod engine;
pub mod error;
pub mod flags;
pub mod handle;
pub mod passthrough;
pub mod session;
pub mod state;
pub mod store;

pub use admission::{Admission, AdmissionPermit};
pub use config::SessionConfig;
pub use engine::{ResidencyPin, SessionEngine};
pub use error::{Result, SessionError};
pub use flags::OpenFlags;
pub use handle::{CloseError, FileHandle, FileOperations, HandleTable, PrivateData, Whence};
pub use passthrough::Passthrough;
pub use session::Session;
pub use state::{OperationGuard, SessionState};
pub use store::{BackingStore, FileStore, MemoryStore};
