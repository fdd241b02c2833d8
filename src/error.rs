/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use thiserror::Error;

pub type FsResult<T> = std::result::Result<T, FsError>;

/// Failures surfaced by filesystem operations.
///
/// A failed mutation leaves the tree and every attribute view exactly as
/// they were before the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("no such file or directory '{0}'")]
    NoSuchFile(String),
    #[error("'{0}' already exists")]
    AlreadyExists(String),
    #[error("'{0}' is not a directory")]
    NotADirectory(String),
    #[error("'{0}' is a directory")]
    IsADirectory(String),
    #[error("directory '{0}' is not empty")]
    DirectoryNotEmpty(String),
    #[error("access to '{0}' denied")]
    AccessDenied(String),
    #[error("too many symbolic links while resolving '{0}'")]
    TooManyLinks(String),
    #[error("invalid path '{0}'")]
    InvalidPath(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("buffer of {remaining} bytes is too small for value of {needed} bytes")]
    BufferTooSmall { needed: usize, remaining: usize },
    #[error("handle is not open for writing")]
    NonWritable,
    #[error("handle is not open for reading")]
    NonReadable,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("filesystem is closed")]
    ClosedFilesystem,
    #[error("watch handle is closed")]
    ClosedWatch,
    #[error("'{0}' not found")]
    NotFound(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
}
