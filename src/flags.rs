/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Flags accepted by `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpenFlag {
    /// Open for reading. Implied when no access flag is given.
    Read,
    /// Open for writing.
    Write,
    /// Open for writing, positioning to the end of the file before each write.
    Append,
    /// Create the file if it does not exist.
    Create,
    /// Create the file, failing if it already exists.
    CreateNew,
    /// Truncate the file to zero length after opening for writing.
    Truncate,
    /// Do not follow a symbolic link in the final path component.
    NoFollow,
    /// Sharing hint: other handles may read concurrently. Stored, not enforced.
    ShareRead,
    /// Sharing hint: other handles may write concurrently. Stored, not enforced.
    ShareWrite,
}

/// Options accepted by `move_entry` and `copy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CopyFlag {
    /// Replace an existing target entry.
    ReplaceExisting,
    /// Copy the source's attribute-view state field by field.
    CopyAttributes,
    /// Operate on a symbolic link itself instead of its target.
    NoFollowLinks,
}

/// Access modes checked against an entry's attribute views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    Read,
    Write,
    Execute,
}

impl Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::Read => write!(f, "read"),
            AccessMode::Write => write!(f, "write"),
            AccessMode::Execute => write!(f, "execute"),
        }
    }
}
