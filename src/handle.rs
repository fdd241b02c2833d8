/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::error::{FsError, FsResult};
use crate::flags::OpenFlag;
use crate::fs::MemoryFs;
use crate::tree::Entry;

/// An open cursor over a regular file.
///
/// The handle owns the file entry: content stays readable and writable after
/// the entry is unlinked from its directory, until the last handle drops.
/// Every call re-checks the filesystem's open flag first.
pub struct FileHandle {
    fs: Arc<MemoryFs>,
    entry: Arc<Entry>,
    path: String,
    readable: bool,
    writable: bool,
    append: bool,
    flags: Vec<OpenFlag>,
    position: Mutex<u64>,
    closed: AtomicBool,
}

impl FileHandle {
    pub(crate) fn new(
        fs: Arc<MemoryFs>,
        entry: Arc<Entry>,
        path: String,
        flags: Vec<OpenFlag>,
    ) -> FileHandle {
        let writable =
            flags.contains(&OpenFlag::Write) || flags.contains(&OpenFlag::Append);
        let readable = flags.contains(&OpenFlag::Read) || !writable;
        FileHandle {
            fs,
            entry,
            path,
            readable,
            writable,
            append: flags.contains(&OpenFlag::Append),
            flags,
            position: Mutex::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The flag set this handle was opened with, sharing hints included.
    pub fn flags(&self) -> &[OpenFlag] {
        &self.flags
    }

    fn ensure_open(&self) -> FsResult<()> {
        self.fs.ensure_open()?;
        if self.closed.load(Ordering::Acquire) {
            return Err(FsError::InvalidOperation(format!(
                "handle for '{}' is closed",
                self.path
            )));
        }
        Ok(())
    }

    pub fn size(&self) -> FsResult<u64> {
        self.ensure_open()?;
        let state = self.entry.read();
        Ok(state.content()?.size())
    }

    pub fn position(&self) -> FsResult<u64> {
        self.ensure_open()?;
        Ok(*self.position.lock())
    }

    pub fn set_position(&self, position: u64) -> FsResult<()> {
        self.ensure_open()?;
        *self.position.lock() = position;
        Ok(())
    }

    /// Reads from the current position, advancing it by the bytes read.
    /// Zero at end of file.
    pub fn read(&self, buffer: &mut [u8]) -> FsResult<usize> {
        self.ensure_open()?;
        if !self.readable {
            return Err(FsError::NonReadable);
        }
        let mut position = self.position.lock();
        let mut state = self.entry.write();
        let count = state.content()?.read(*position, buffer);
        state.touch_accessed();
        *position += count as u64;
        Ok(count)
    }

    /// Reads at an explicit position without touching the cursor.
    pub fn read_at(&self, position: u64, buffer: &mut [u8]) -> FsResult<usize> {
        self.ensure_open()?;
        if !self.readable {
            return Err(FsError::NonReadable);
        }
        let mut state = self.entry.write();
        let count = state.content()?.read(position, buffer);
        state.touch_accessed();
        Ok(count)
    }

    /// Writes at the current position, advancing it. An `Append` handle
    /// repositions to the end of the file under the entry's write lock
    /// before each write.
    pub fn write(&self, buffer: &[u8]) -> FsResult<usize> {
        self.ensure_open()?;
        if !self.writable {
            return Err(FsError::NonWritable);
        }
        let mut position = self.position.lock();
        let mut state = self.entry.write();
        if self.append {
            *position = state.content()?.size();
        }
        let count = state.content_mut()?.write(*position, buffer);
        state.touch_modified();
        *position += count as u64;
        trace!("wrote {} bytes to '{}'", count, self.path);
        Ok(count)
    }

    /// Writes at an explicit position without touching the cursor.
    pub fn write_at(&self, position: u64, buffer: &[u8]) -> FsResult<usize> {
        self.ensure_open()?;
        if !self.writable {
            return Err(FsError::NonWritable);
        }
        let mut state = self.entry.write();
        let position = if self.append {
            state.content()?.size()
        } else {
            position
        };
        let count = state.content_mut()?.write(position, buffer);
        state.touch_modified();
        Ok(count)
    }

    /// Shrinks the file to `size`; growing is a no-op. The cursor is clamped
    /// to the new end.
    pub fn truncate(&self, size: u64) -> FsResult<()> {
        self.ensure_open()?;
        if !self.writable {
            return Err(FsError::NonWritable);
        }
        let mut position = self.position.lock();
        let mut state = self.entry.write();
        state.content_mut()?.truncate(size);
        let end = state.content()?.size();
        state.touch_modified();
        if *position > end {
            *position = end;
        }
        Ok(())
    }

    /// Closes the handle. Idempotent; the content is released once every
    /// handle on the file is gone.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
