/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{FsError, FsResult};
use crate::fs::MemoryFs;

/// Process-wide map of live filesystems by identifier, behind one mutex.
static REGISTRY: Lazy<Mutex<HashMap<String, Arc<MemoryFs>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Builds a filesystem from `config` and interns it under `identifier`
/// (a `scheme:authority` string). A second create under a live identifier
/// fails with `AlreadyExists`; closing the filesystem frees the identifier.
pub fn create(identifier: &str, config: Config) -> FsResult<Arc<MemoryFs>> {
    let mut registry = REGISTRY.lock();
    if registry.contains_key(identifier) {
        return Err(FsError::AlreadyExists(identifier.to_owned()));
    }
    let fs = MemoryFs::new(identifier, config)?;
    registry.insert(identifier.to_owned(), Arc::clone(&fs));
    Ok(fs)
}

/// The registered filesystem for `identifier`, or `NotFound`.
pub fn get(identifier: &str) -> FsResult<Arc<MemoryFs>> {
    REGISTRY
        .lock()
        .get(identifier)
        .cloned()
        .ok_or_else(|| FsError::NotFound(identifier.to_owned()))
}

pub(crate) fn unregister(identifier: &str) {
    REGISTRY.lock().remove(identifier);
}
