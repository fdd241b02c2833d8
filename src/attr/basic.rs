/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch; the timestamp granularity of every
/// entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileTime(u64);

impl FileTime {
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        FileTime(elapsed.as_millis() as u64)
    }

    pub fn from_millis(millis: u64) -> Self {
        FileTime(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

/// Snapshot of the always-present basic view of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAttributes {
    pub size: u64,
    pub creation_time: FileTime,
    pub last_access_time: FileTime,
    pub last_modified_time: FileTime,
    pub is_regular_file: bool,
    pub is_directory: bool,
    pub is_symbolic_link: bool,
    /// Stable identity of the backing entry; survives renames.
    pub file_key: u64,
}

impl BasicAttributes {
    pub fn is_other(&self) -> bool {
        !(self.is_regular_file || self.is_directory || self.is_symbolic_link)
    }
}
