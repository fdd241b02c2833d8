/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{FsError, FsResult};
use crate::fs::MemoryFs;
use crate::path::FsPath;

/// Handle registered against a directory for watching.
///
/// Event dispatch lives outside the core; the handle's contract here is its
/// closed state: once closed, or once the owning filesystem closes, every
/// use fails with `ClosedWatch`.
pub struct WatchHandle {
    fs: Arc<MemoryFs>,
    path: FsPath,
    closed: AtomicBool,
}

impl WatchHandle {
    pub(crate) fn new(fs: Arc<MemoryFs>, path: FsPath) -> WatchHandle {
        WatchHandle {
            fs,
            path,
            closed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &FsPath {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.fs.is_open()
    }

    pub fn ensure_open(&self) -> FsResult<()> {
        if !self.is_open() {
            return Err(FsError::ClosedWatch);
        }
        Ok(())
    }

    /// Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
