/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use crate::error::{FsError, FsResult};
use crate::flags::AccessMode;

/// DOS view: four flag bits. None of them requires write access to change,
/// matching Windows behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DosAttrs {
    pub read_only: bool,
    pub hidden: bool,
    pub system: bool,
    pub archive: bool,
}

impl DosAttrs {
    /// Root directories come up flagged `hidden` and `system`.
    pub(crate) fn new(is_root: bool) -> Self {
        DosAttrs {
            read_only: false,
            hidden: is_root,
            system: is_root,
            archive: false,
        }
    }

    pub(crate) fn check_access(&self, modes: &[AccessMode], path: &str) -> FsResult<()> {
        if self.read_only && modes.contains(&AccessMode::Write) {
            return Err(FsError::AccessDenied(path.to_owned()));
        }
        Ok(())
    }
}
