//! Session objects: a private, fixed-capacity working copy of a file.
//!
//! Concurrency rules, per session:
//! - Reads run concurrently with each other and with writes. They only hold
//!   the size lock long enough to read `loaded`.
//! - Writes are serialized by the writer mutex. A write that extends the
//!   logical size publishes the new size under the size lock's write side
//!   after its bytes are stored, so a reader that sees the new size also sees
//!   the bytes.
//! - Every operation registers with [`SessionState`]; flush sets the draining
//!   flag, waits for registered operations to leave, and only then touches
//!   the handle and the backing store.
//!
//! Buffer bytes are `AtomicU8` cells: a reader may overlap the writer on bytes
//! below the published size, which is allowed to show old or new bytes but
//! must not be a data race.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::admission::AdmissionPermit;
use crate::engine::ResidencyPin;
use crate::error::{Result, SessionError};
use crate::flags::OpenFlags;
use crate::handle::{FileHandle, FileOperations, HandleTable, PrivateData, Whence};
use crate::state::{OperationGuard, SessionState};
use crate::store::BackingStore;

/// Resources a live session holds on behalf of the engine. Dropping the lease
/// gives back the admission slot and the residency pin.
#[derive(Debug)]
pub(crate) struct SessionLease {
    pub(crate) _permit: AdmissionPermit,
    pub(crate) _pin: ResidencyPin,
}

pub struct Session {
    id: Uuid,
    state: SessionState,
    buffer: Box<[AtomicU8]>,
    /// Logically valid bytes in `buffer`.
    loaded: RwLock<usize>,
    writer: Mutex<()>,
    /// Set by the first write.
    dirty: AtomicBool,
    /// The handle's table from before the session, restored on commit.
    saved: Mutex<Option<HandleTable>>,
    lease: Mutex<Option<SessionLease>>,
}

impl Session {
    /// Allocate a buffer of `capacity` bytes and fill it with the first `size`
    /// bytes of `store`.
    ///
    /// The returned session is sealed: it admits no operations until
    /// [`Session::install`] wires it into a handle.
    pub(crate) fn load(store: &dyn BackingStore, size: usize, capacity: usize) -> Result<Self> {
        let mut scratch: Vec<u8> = Vec::new();
        scratch
            .try_reserve_exact(capacity)
            .map_err(|_| SessionError::OutOfMemory(capacity))?;
        scratch.resize(capacity, 0);

        let size = size.min(capacity);
        let mut loaded = 0usize;
        while loaded < size {
            match store.read_at(loaded as u64, &mut scratch[loaded..size]) {
                Ok(0) => break,
                Ok(n) => loaded += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, offset = loaded, "loading session buffer failed");
                    return Err(e.into());
                }
            }
        }

        let mut cells: Vec<AtomicU8> = Vec::new();
        cells
            .try_reserve_exact(capacity)
            .map_err(|_| SessionError::OutOfMemory(capacity))?;
        cells.extend(scratch.into_iter().map(AtomicU8::new));

        Ok(Self {
            id: Uuid::new_v4(),
            state: SessionState::sealed(),
            buffer: cells.into_boxed_slice(),
            loaded: RwLock::new(loaded),
            writer: Mutex::new(()),
            dirty: AtomicBool::new(false),
            saved: Mutex::new(None),
            lease: Mutex::new(None),
        })
    }

    /// Swap this session in as `handle`'s operations and private data, then
    /// open it for I/O. The swap is the single visible transition.
    pub(crate) fn install(self: Arc<Self>, handle: &FileHandle, lease: SessionLease) {
        *self.lease.lock().unwrap_or_else(PoisonError::into_inner) = Some(lease);

        let table = HandleTable {
            ops: Arc::clone(&self) as Arc<dyn FileOperations>,
            private: Some(Arc::clone(&self) as PrivateData),
        };
        let original = handle.replace_table(table);
        *self.saved.lock().unwrap_or_else(PoisonError::into_inner) = Some(original);

        self.state.open();
        debug!(session = %self.id, loaded = self.loaded_size(), "session installed");
    }

    /// Random identifier carried in this session's log fields.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Fixed buffer capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Logical size of the file as seen through the session.
    pub fn loaded_size(&self) -> usize {
        *self.loaded.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Operations currently executing against the session.
    pub fn in_flight(&self) -> u32 {
        self.state.in_flight()
    }

    /// True while no new operations are admitted: before install, during a
    /// flush, and after a successful commit.
    pub fn is_draining(&self) -> bool {
        self.state.is_draining()
    }

    fn enter(&self) -> Result<OperationGuard<'_>> {
        self.state.enter().ok_or_else(|| {
            debug!(session = %self.id, "operation on torn-down session");
            SessionError::TornDown
        })
    }

    /// Copy up to `buf.len()` bytes starting at `offset`, clamped to the
    /// logical size. Fails with `OutOfRange` when `offset` is past it.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let _guard = self.enter()?;

        let (start, len) = {
            let loaded = *self.loaded.read().unwrap_or_else(PoisonError::into_inner);
            if offset > loaded as u64 {
                return Err(SessionError::OutOfRange {
                    offset,
                    limit: loaded as u64,
                });
            }
            let start = offset as usize;
            (start, buf.len().min(loaded - start))
        };

        for (dst, cell) in buf[..len].iter_mut().zip(&self.buffer[start..start + len]) {
            *dst = cell.load(Ordering::Relaxed);
        }
        Ok(len)
    }

    /// Copy `data` into the buffer at `offset`, clamped to capacity, growing
    /// the logical size if the write ends past it.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize> {
        let _guard = self.enter()?;

        let capacity = self.capacity();
        if offset >= capacity as u64 {
            return Err(SessionError::OutOfRange {
                offset,
                limit: capacity as u64,
            });
        }
        let start = offset as usize;
        let len = data.len().min(capacity - start);
        if len == 0 {
            return Ok(0);
        }

        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        for (cell, byte) in self.buffer[start..start + len].iter().zip(data) {
            cell.store(*byte, Ordering::Relaxed);
        }
        self.dirty.store(true, Ordering::Relaxed);

        // Only writers change the size and we hold the writer lock.
        let end = start + len;
        let current = *self.loaded.read().unwrap_or_else(PoisonError::into_inner);
        if end > current {
            *self.loaded.write().unwrap_or_else(PoisonError::into_inner) = end;
        }

        Ok(len)
    }

    /// Snapshot of the logically valid bytes.
    pub fn contents(&self) -> Result<Vec<u8>> {
        let _guard = self.enter()?;
        Ok(self.snapshot(self.loaded_size()))
    }

    fn snapshot(&self, len: usize) -> Vec<u8> {
        self.buffer[..len]
            .iter()
            .map(|cell| cell.load(Ordering::Relaxed))
            .collect()
    }

    /// Write `len` bytes of the buffer to the start of the store and cut the
    /// store to that length. Advances the handle position as bytes land.
    fn commit(&self, handle: &FileHandle, len: usize) -> Result<()> {
        let bytes = self.snapshot(len);
        let store = handle.store();

        let mut written = 0usize;
        while written < len {
            match store.write_at(written as u64, &bytes[written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "backing store accepted no bytes",
                    )
                    .into())
                }
                Ok(n) => {
                    written += n;
                    handle.set_position(written as i64);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        store.set_len(len as u64)?;
        Ok(())
    }
}

impl FileOperations for Session {
    fn name(&self) -> &'static str {
        "session"
    }

    fn read(&self, _handle: &FileHandle, buf: &mut [u8], pos: &mut i64) -> Result<usize> {
        let n = self.read_at(*pos as u64, buf)?;
        *pos += n as i64;
        Ok(n)
    }

    fn write(&self, _handle: &FileHandle, buf: &[u8], pos: &mut i64) -> Result<usize> {
        let n = self.write_at(*pos as u64, buf)?;
        *pos += n as i64;
        Ok(n)
    }

    fn seek(&self, handle: &FileHandle, offset: i64, whence: Whence) -> Result<i64> {
        let _guard = self.enter()?;
        let limit = self.capacity() as i64;

        match whence {
            Whence::Start => handle.seek_with(limit, |_| Ok(offset)),
            Whence::Current if offset == 0 => Ok(handle.position()),
            Whence::Current => handle.seek_with(limit, |pos| {
                pos.checked_add(offset)
                    .ok_or(SessionError::InvalidArgument("offset overflow"))
            }),
            Whence::End => {
                let base = self.loaded_size() as i64;
                handle.seek_with(limit, |_| {
                    base.checked_add(offset)
                        .ok_or(SessionError::InvalidArgument("offset overflow"))
                })
            }
            Whence::Data => Err(SessionError::Unsupported("seek to data")),
            Whence::Hole => Err(SessionError::Unsupported("seek to hole")),
        }
    }

    /// Commit the buffer and tear the session down.
    ///
    /// On a store error the handle gets the session back, the draining flag is
    /// cleared and the position restored, so the session keeps working as if
    /// flush had not been called.
    fn flush(&self, handle: &FileHandle) -> Result<()> {
        if !handle.flags().contains(OpenFlags::WRITE) {
            warn!(session = %self.id, "flush on a handle not opened for writing");
            return Err(SessionError::BadDescriptor("writing"));
        }

        if !self.state.begin_drain() {
            debug!(session = %self.id, "flush on torn-down session");
            return Err(SessionError::TornDown);
        }
        self.state.wait_drained();

        let saved = self
            .saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(original) = saved else {
            return Err(SessionError::TornDown);
        };

        let session_table = handle.replace_table(original);
        let old_position = handle.position();
        handle.set_position(0);

        let len = self.loaded_size();
        match self.commit(handle, len) {
            Ok(()) => {
                let lease = self
                    .lease
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                drop(lease);
                info!(session = %self.id, bytes = len, "session committed");
                Ok(())
            }
            Err(e) => {
                warn!(session = %self.id, error = %e, "commit failed, session restored");
                let original = handle.replace_table(session_table);
                *self.saved.lock().unwrap_or_else(PoisonError::into_inner) = Some(original);
                handle.set_position(old_position);
                self.state.open();
                Err(e)
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let lease = self.lease.get_mut().unwrap_or_else(PoisonError::into_inner);
        if lease.take().is_some() {
            if *self.dirty.get_mut() {
                warn!(session = %self.id, "session dropped without commit, writes discarded");
            } else {
                debug!(session = %self.id, "clean session dropped");
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .field("loaded", &self.loaded_size())
            .field("in_flight", &self.in_flight())
            .field("draining", &self.is_draining())
            .field("dirty", &self.dirty.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use anyhow::Result;

    fn loaded(contents: &[u8], capacity: usize) -> Result<Session> {
        let store = MemoryStore::with_contents(contents.to_vec());
        let session = Session::load(&store, contents.len(), capacity)?;
        session.state.open();
        Ok(session)
    }

    #[test]
    fn test_load_copies_contents_and_zero_fills() -> Result<()> {
        let session = loaded(b"hello", 16)?;
        assert_eq!(session.capacity(), 16);
        assert_eq!(session.loaded_size(), 5);
        assert_eq!(session.contents()?, b"hello");
        assert!(session.buffer[5..]
            .iter()
            .all(|cell| cell.load(Ordering::Relaxed) == 0));
        Ok(())
    }

    #[test]
    fn test_sealed_session_rejects_io() -> Result<()> {
        let store = MemoryStore::with_contents(b"abc".to_vec());
        let session = Session::load(&store, 3, 8)?;
        let mut buf = [0u8; 3];
        assert!(matches!(
            session.read_at(0, &mut buf),
            Err(SessionError::TornDown)
        ));
        Ok(())
    }

    #[test]
    fn test_read_clamps_to_loaded_size() -> Result<()> {
        let session = loaded(b"0123456789", 64)?;
        let mut buf = [0u8; 32];
        assert_eq!(session.read_at(6, &mut buf)?, 4);
        assert_eq!(&buf[..4], b"6789");
        assert_eq!(session.read_at(10, &mut buf)?, 0);
        Ok(())
    }

    #[test]
    fn test_read_past_loaded_size_is_out_of_range() -> Result<()> {
        let session = loaded(b"0123456789", 64)?;
        let mut buf = [0u8; 4];
        let err = session.read_at(11, &mut buf).unwrap_err();
        assert!(matches!(err, SessionError::OutOfRange { offset: 11, limit: 10 }));
        assert_eq!(err.errno(), libc::EOVERFLOW);
        assert_eq!(session.in_flight(), 0);
        Ok(())
    }

    #[test]
    fn test_write_extends_loaded_size() -> Result<()> {
        let session = loaded(b"abc", 64)?;
        assert_eq!(session.write_at(10, b"xyz")?, 3);
        assert_eq!(session.loaded_size(), 13);
        assert_eq!(session.contents()?, b"abc\0\0\0\0\0\0\0xyz");
        Ok(())
    }

    #[test]
    fn test_overwrite_keeps_size() -> Result<()> {
        let session = loaded(b"abcdef", 64)?;
        session.write_at(1, b"ZZ")?;
        assert_eq!(session.loaded_size(), 6);
        assert_eq!(session.contents()?, b"aZZdef");
        Ok(())
    }

    #[test]
    fn test_write_clamped_to_capacity() -> Result<()> {
        let session = loaded(b"", 8)?;
        assert_eq!(session.write_at(6, b"overflow")?, 2);
        assert_eq!(session.loaded_size(), 8);

        let err = session.write_at(8, b"x").unwrap_err();
        assert!(matches!(err, SessionError::OutOfRange { offset: 8, limit: 8 }));
        Ok(())
    }

    #[test]
    fn test_empty_write_does_not_extend() -> Result<()> {
        let session = loaded(b"abc", 16)?;
        assert_eq!(session.write_at(10, b"")?, 0);
        assert_eq!(session.loaded_size(), 3);
        Ok(())
    }

    #[test]
    fn test_short_read_store_loads_in_pieces() -> Result<()> {
        struct Trickle(MemoryStore);

        impl BackingStore for Trickle {
            fn len(&self) -> io::Result<u64> {
                self.0.len()
            }
            fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
                let n = buf.len().min(3);
                self.0.read_at(offset, &mut buf[..n])
            }
            fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
                self.0.write_at(offset, buf)
            }
            fn set_len(&self, len: u64) -> io::Result<()> {
                self.0.set_len(len)
            }
        }

        let store = Trickle(MemoryStore::with_contents(b"loaded three at a time".to_vec()));
        let session = Session::load(&store, 22, 32)?;
        session.state.open();
        assert_eq!(session.contents()?, b"loaded three at a time");
        Ok(())
    }

    #[test]
    fn test_load_stops_at_early_eof() -> Result<()> {
        let store = MemoryStore::with_contents(b"short".to_vec());
        let session = Session::load(&store, 10, 32)?;
        assert_eq!(session.loaded_size(), 5);
        Ok(())
    }
}
