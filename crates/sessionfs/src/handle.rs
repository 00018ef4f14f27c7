//! Open file handles and the operation providers that serve them.
//!
//! A [`FileHandle`] dispatches every read, write, seek and flush through its
//! current [`HandleTable`]: an operation provider plus an opaque private-data
//! slot. Opening installs [`crate::Passthrough`]; a session swaps in itself and
//! swaps the original back on commit. The swap happens under the table's write
//! lock, so callers observe either the old table or the new one.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use thiserror::Error;

use crate::error::{Result, SessionError};
use crate::flags::OpenFlags;
use crate::passthrough::Passthrough;
use crate::session::Session;
use crate::store::BackingStore;

/// Opaque per-handle state owned by whoever installed the current operations.
pub type PrivateData = Arc<dyn Any + Send + Sync>;

/// Origin for [`FileHandle::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
    /// Next offset holding data.
    Data,
    /// Next hole.
    Hole,
}

/// Operation provider for a handle.
///
/// `pos` is the position the call works from; implementations advance it by
/// the bytes transferred and the handle decides whether to keep it.
pub trait FileOperations: Send + Sync {
    fn name(&self) -> &'static str;

    fn read(&self, handle: &FileHandle, buf: &mut [u8], pos: &mut i64) -> Result<usize>;

    fn write(&self, handle: &FileHandle, buf: &[u8], pos: &mut i64) -> Result<usize>;

    fn seek(&self, handle: &FileHandle, offset: i64, whence: Whence) -> Result<i64>;

    /// Called on close.
    fn flush(&self, handle: &FileHandle) -> Result<()>;
}

/// The swappable part of a handle.
#[derive(Clone)]
pub struct HandleTable {
    pub ops: Arc<dyn FileOperations>,
    pub private: Option<PrivateData>,
}

impl HandleTable {
    pub fn passthrough() -> Self {
        Self {
            ops: Arc::new(Passthrough),
            private: None,
        }
    }
}

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("ops", &self.ops.name())
            .field("private", &self.private.is_some())
            .finish()
    }
}

/// An open file.
pub struct FileHandle {
    store: Arc<dyn BackingStore>,
    flags: OpenFlags,
    position: Mutex<i64>,
    table: RwLock<HandleTable>,
}

impl FileHandle {
    /// Open a handle over `store` with pass-through operations.
    pub fn new(store: impl BackingStore + 'static, flags: OpenFlags) -> Self {
        Self::from_shared(Arc::new(store), flags)
    }

    pub fn from_shared(store: Arc<dyn BackingStore>, flags: OpenFlags) -> Self {
        Self {
            store,
            flags,
            position: Mutex::new(0),
            table: RwLock::new(HandleTable::passthrough()),
        }
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    pub fn position(&self) -> i64 {
        *self.lock_position()
    }

    pub(crate) fn set_position(&self, position: i64) {
        *self.lock_position() = position;
    }

    fn lock_position(&self) -> MutexGuard<'_, i64> {
        self.position.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the position under the position lock.
    ///
    /// `compute` receives the current position and returns the target. The
    /// target must be non-negative (unless the handle allows unsigned offsets)
    /// and at most `limit`.
    pub(crate) fn seek_with(
        &self,
        limit: i64,
        compute: impl FnOnce(i64) -> Result<i64>,
    ) -> Result<i64> {
        let mut position = self.lock_position();
        let target = compute(*position)?;
        if target < 0 && !self.flags.contains(OpenFlags::UNSIGNED_OFFSET) {
            return Err(SessionError::InvalidArgument("negative offset"));
        }
        if target > limit {
            return Err(SessionError::InvalidArgument("offset beyond limit"));
        }
        *position = target;
        Ok(target)
    }

    /// Current operation provider.
    pub fn operations(&self) -> Arc<dyn FileOperations> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&table.ops)
    }

    pub fn private_data(&self) -> Option<PrivateData> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table.private.clone()
    }

    pub fn set_private_data(&self, private: Option<PrivateData>) {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        table.private = private;
    }

    /// Swap the whole table, returning the previous one.
    pub(crate) fn replace_table(&self, next: HandleTable) -> HandleTable {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *table, next)
    }

    /// The active session, if this handle currently has one.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.private_data()
            .and_then(|private| private.downcast::<Session>().ok())
    }

    pub fn has_session(&self) -> bool {
        self.session().is_some()
    }

    /// Read at the current position and advance it.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.require(OpenFlags::READ, "reading")?;
        let ops = self.operations();
        let mut pos = self.position();
        let n = ops.read(self, buf, &mut pos)?;
        self.set_position(pos);
        Ok(n)
    }

    /// Read at `offset` without moving the position.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.require(OpenFlags::READ, "reading")?;
        let mut pos = to_position(offset)?;
        self.operations().read(self, buf, &mut pos)
    }

    /// Write at the current position and advance it.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.require(OpenFlags::WRITE, "writing")?;
        let ops = self.operations();
        let mut pos = self.position();
        let n = ops.write(self, buf, &mut pos)?;
        self.set_position(pos);
        Ok(n)
    }

    /// Write at `offset` without moving the position.
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        self.require(OpenFlags::WRITE, "writing")?;
        let mut pos = to_position(offset)?;
        self.operations().write(self, buf, &mut pos)
    }

    pub fn seek(&self, offset: i64, whence: Whence) -> Result<i64> {
        self.operations().seek(self, offset, whence)
    }

    /// Run the current provider's flush. For a session this commits the
    /// buffer and restores the original operations.
    pub fn flush(&self) -> Result<()> {
        self.operations().flush(self)
    }

    /// Flush and close. On failure the handle is handed back inside the error
    /// so the caller can retry or drop it.
    pub fn close(self) -> std::result::Result<(), CloseError> {
        match self.flush() {
            Ok(()) => Ok(()),
            Err(error) => Err(CloseError {
                error,
                handle: self,
            }),
        }
    }

    fn require(&self, flag: OpenFlags, action: &'static str) -> Result<()> {
        if self.flags.contains(flag) {
            Ok(())
        } else {
            Err(SessionError::BadDescriptor(action))
        }
    }
}

fn to_position(offset: u64) -> Result<i64> {
    i64::try_from(offset).map_err(|_| SessionError::InvalidArgument("offset exceeds i64"))
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("flags", &self.flags)
            .field("position", &self.position())
            .field("ops", &self.operations().name())
            .finish()
    }
}

/// A close that failed; the handle is still open.
#[derive(Debug, Error)]
#[error("close failed: {error}")]
pub struct CloseError {
    #[source]
    pub error: SessionError,
    pub handle: FileHandle,
}

impl CloseError {
    pub fn into_handle(self) -> FileHandle {
        self.handle
    }
}
