//! Backing stores: the persistent bytes a handle reads from and a session
//! commits back to.
//!
//! The engine only needs positional read and write, the current length and
//! truncation. [`FileStore`] maps these onto a real file; [`MemoryStore`] keeps
//! the bytes in memory for embedding and tests.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

/// Trait for backing store implementations.
///
/// Short reads and writes are allowed; callers loop until done.
pub trait BackingStore: Send + Sync {
    /// Current length in bytes.
    fn len(&self) -> io::Result<u64>;

    /// Read into `buf` starting at `offset`. Returns 0 at or past the end.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Write `buf` at `offset`, growing the store if needed.
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize>;

    /// Truncate or extend to exactly `len` bytes.
    fn set_len(&self, len: u64) -> io::Result<()>;

    fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// A store backed by an open file, using positional I/O so the file's own
/// cursor is never touched.
#[derive(Debug)]
pub struct FileStore {
    file: File,
}

impl FileStore {
    /// Wrap an already-open file.
    pub fn new(file: File) -> Self {
        Self { file }
    }

    /// Open `path` with the given options.
    pub fn open(path: impl AsRef<Path>, options: &std::fs::OpenOptions) -> io::Result<Self> {
        Ok(Self::new(options.open(path)?))
    }

}

impl BackingStore for FileStore {
    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        FileExt::read_at(&self.file, buf, offset)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        FileExt::write_at(&self.file, buf, offset)
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }
}

/// An in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: RwLock::new(data.into()),
        }
    }

    /// Copy of the current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn to_index(offset: u64) -> io::Result<usize> {
    usize::try_from(offset)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset exceeds address space"))
}

impl BackingStore for MemoryStore {
    fn len(&self) -> io::Result<u64> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.len() as u64)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let start = to_index(offset)?;
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let start = to_index(offset)?;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "write overflows"))?;
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.resize(to_index(len)?, 0);
        Ok(())
    }
}
