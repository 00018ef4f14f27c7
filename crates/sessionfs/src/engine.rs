//! The session engine: configuration, admission and the open path.
//!
//! An engine is cheap to clone; clones share one admission counter. Every
//! live session pins the engine, and so does every open call while it runs.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::admission::Admission;
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::flags::OpenFlags;
use crate::handle::FileHandle;
use crate::session::{Session, SessionLease};
use crate::store::{BackingStore, FileStore};

#[derive(Debug)]
struct EngineShared {
    config: SessionConfig,
    admission: Arc<Admission>,
    pins: AtomicUsize,
}

/// Keeps the engine resident while held.
#[derive(Debug)]
pub struct ResidencyPin {
    shared: Arc<EngineShared>,
}

impl Drop for ResidencyPin {
    fn drop(&mut self) {
        self.shared.pins.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Clone)]
pub struct SessionEngine {
    shared: Arc<EngineShared>,
}

impl SessionEngine {
    pub fn new(config: SessionConfig) -> Self {
        debug!(
            max_sessions = config.max_sessions(),
            buffer_capacity = config.buffer_capacity(),
            "session engine initialized"
        );
        Self {
            shared: Arc::new(EngineShared {
                admission: Arc::new(Admission::new(config.max_sessions())),
                config,
                pins: AtomicUsize::new(0),
            }),
        }
    }

    /// Build an engine from raw requested tunables, clamping both.
    pub fn initialize(requested_max_sessions: i64, requested_buffer_order: i64) -> Self {
        Self::new(SessionConfig::clamped(
            requested_max_sessions,
            requested_buffer_order,
        ))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn active_sessions(&self) -> usize {
        self.shared.admission.active()
    }

    /// Pin the engine resident until the returned guard drops.
    pub fn pin(&self) -> ResidencyPin {
        self.shared.pins.fetch_add(1, Ordering::AcqRel);
        ResidencyPin {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn pinned(&self) -> usize {
        self.shared.pins.load(Ordering::Acquire)
    }

    /// Succeeds only when nothing pins the engine.
    pub fn try_unload(&self) -> Result<()> {
        match self.pinned() {
            0 => Ok(()),
            n => Err(SessionError::EngineBusy(n)),
        }
    }

    /// Attach a session to `handle` if `flags` request one; otherwise do
    /// nothing.
    ///
    /// Every failure releases whatever was acquired, including the admission
    /// slot, before returning; the handle keeps its original operations.
    pub fn maybe_create_session(&self, handle: &FileHandle, flags: OpenFlags) -> Result<()> {
        if !flags.wants_session() {
            return Ok(());
        }

        let config = &self.shared.config;
        let Some(permit) = self.shared.admission.try_permit() else {
            warn!(limit = config.max_sessions(), "too many sessions open");
            return Err(SessionError::TooManySessions {
                limit: config.max_sessions(),
            });
        };

        let capacity = config.buffer_capacity();
        let size = handle.store().len()?;
        if size > capacity as u64 {
            warn!(size, capacity, "file too large for session buffer");
            return Err(SessionError::FileTooLarge { size, capacity });
        }

        let session = Arc::new(Session::load(
            handle.store().as_ref(),
            size as usize,
            capacity,
        )?);

        let lease = SessionLease {
            _permit: permit,
            _pin: self.pin(),
        };
        session.install(handle, lease);
        Ok(())
    }

    /// Open a handle over `store`, attaching a session if `flags` ask for one.
    ///
    /// A failed session creation fails the open; the handle is closed rather
    /// than returned with unbuffered behavior.
    pub fn open(&self, store: impl BackingStore + 'static, flags: OpenFlags) -> Result<FileHandle> {
        let _pin = self.pin();
        let handle = FileHandle::new(store, flags);
        self.maybe_create_session(&handle, flags)?;
        Ok(handle)
    }

    /// Open the file at `path` with options derived from `flags`.
    pub fn open_path(&self, path: impl AsRef<Path>, flags: OpenFlags) -> Result<FileHandle> {
        let store = FileStore::open(path, &flags.to_open_options())?;
        self.open(store, flags)
    }
}
