/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! In-memory virtual filesystem with POSIX, Windows and custom path flavors.
//!
//! Filesystems are built from a [`Config`], interned by identifier in a
//! process-wide [`registry`], and operated on through paths they produce
//! themselves. Everything lives in volatile memory: useful as a test double,
//! for sandboxing, and for deterministic I/O.
//!
//! ```
//! use memfs::{registry, Config, OpenFlag};
//!
//! let fs = registry::create("memory:demo", Config::posix()).unwrap();
//! let path = fs.path("/notes.txt").unwrap();
//! let handle = fs
//!     .open(&path, &[OpenFlag::Read, OpenFlag::Write, OpenFlag::Create])
//!     .unwrap();
//! handle.write(b"hello").unwrap();
//! let mut buffer = [0u8; 5];
//! assert_eq!(5, handle.read_at(0, &mut buffer).unwrap());
//! assert_eq!(b"hello", &buffer);
//! fs.close();
//! ```

pub mod attr;
pub mod config;
mod content;
pub mod error;
pub mod flags;
pub mod fs;
pub mod handle;
pub mod path;
pub mod principal;
pub mod registry;
mod tree;
pub mod watch;

pub use attr::acl::{AclEntry, AclKind, AclPerm};
pub use attr::basic::{BasicAttributes, FileTime};
pub use attr::{AttrValue, ViewKind};
pub use config::{CaseSensitivity, Config, Flavor};
pub use error::{FsError, FsResult};
pub use flags::{AccessMode, CopyFlag, OpenFlag};
pub use fs::MemoryFs;
pub use handle::FileHandle;
pub use path::FsPath;
pub use principal::{GroupPrincipal, Principal, PrincipalGuard, UserPrincipal};
pub use watch::WatchHandle;
