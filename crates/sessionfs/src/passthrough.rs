//! Direct operations against the backing store; what every handle starts
//! with and what a session restores on commit.

use std::io;

use crate::error::{Result, SessionError};
use crate::handle::{FileHandle, FileOperations, Whence};

#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

fn store_offset(pos: i64) -> Result<u64> {
    u64::try_from(pos).map_err(|_| SessionError::InvalidArgument("negative offset"))
}

fn file_len(handle: &FileHandle) -> Result<i64> {
    let len = handle.store().len()?;
    i64::try_from(len).map_err(|_| SessionError::InvalidArgument("file length exceeds i64"))
}

impl FileOperations for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn read(&self, handle: &FileHandle, buf: &mut [u8], pos: &mut i64) -> Result<usize> {
        let offset = store_offset(*pos)?;
        let n = loop {
            match handle.store().read_at(offset, buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other?,
            }
        };
        *pos += n as i64;
        Ok(n)
    }

    fn write(&self, handle: &FileHandle, buf: &[u8], pos: &mut i64) -> Result<usize> {
        let offset = store_offset(*pos)?;
        let n = loop {
            match handle.store().write_at(offset, buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other?,
            }
        };
        *pos += n as i64;
        Ok(n)
    }

    fn seek(&self, handle: &FileHandle, offset: i64, whence: Whence) -> Result<i64> {
        match whence {
            Whence::Start => handle.seek_with(i64::MAX, |_| Ok(offset)),
            Whence::Current if offset == 0 => Ok(handle.position()),
            Whence::Current => handle.seek_with(i64::MAX, |pos| {
                pos.checked_add(offset)
                    .ok_or(SessionError::InvalidArgument("offset overflow"))
            }),
            Whence::End => {
                let len = file_len(handle)?;
                handle.seek_with(i64::MAX, |_| {
                    len.checked_add(offset)
                        .ok_or(SessionError::InvalidArgument("offset overflow"))
                })
            }
            Whence::Data => {
                let len = file_len(handle)?;
                if offset < 0 || offset >= len {
                    return Err(SessionError::NoSuchOffset(offset));
                }
                handle.seek_with(i64::MAX, |_| Ok(offset))
            }
            Whence::Hole => {
                let len = file_len(handle)?;
                if offset < 0 || offset >= len {
                    return Err(SessionError::NoSuchOffset(offset));
                }
                handle.seek_with(i64::MAX, |_| Ok(len))
            }
        }
    }

    fn flush(&self, _handle: &FileHandle) -> Result<()> {
        Ok(())
    }
}
