/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::BTreeMap;

use crate::error::{FsError, FsResult};

/// User-defined extended attributes: a name → bytes map, allocated on the
/// first write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAttrs {
    map: Option<BTreeMap<String, Vec<u8>>>,
}

impl UserAttrs {
    /// Copies the value of `name` into `buffer` and returns its length.
    pub fn read(&self, name: &str, buffer: &mut [u8]) -> FsResult<usize> {
        let value = self.get(name)?;
        if value.len() > buffer.len() {
            return Err(FsError::BufferTooSmall {
                needed: value.len(),
                remaining: buffer.len(),
            });
        }
        buffer[..value.len()].copy_from_slice(value);
        Ok(value.len())
    }

    pub fn get(&self, name: &str) -> FsResult<&[u8]> {
        self.map
            .as_ref()
            .and_then(|map| map.get(name))
            .map(Vec::as_slice)
            .ok_or_else(|| FsError::NotFound(name.to_owned()))
    }

    pub fn size(&self, name: &str) -> FsResult<usize> {
        Ok(self.get(name)?.len())
    }

    /// Stores `value` under `name`, replacing any previous value.
    pub fn write(&mut self, name: &str, value: &[u8]) {
        self.map
            .get_or_insert_with(BTreeMap::new)
            .insert(name.to_owned(), value.to_vec());
    }

    pub fn remove(&mut self, name: &str) -> FsResult<()> {
        self.map
            .as_mut()
            .and_then(|map| map.remove(name))
            .map(|_| ())
            .ok_or_else(|| FsError::NotFound(name.to_owned()))
    }

    /// Attribute names, stable for this snapshot of the map.
    pub fn list(&self) -> Vec<String> {
        self.map
            .as_ref()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }
}
