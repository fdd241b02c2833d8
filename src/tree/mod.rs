/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

pub mod traverse;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::attr::basic::{BasicAttributes, FileTime};
use crate::attr::AttrBundle;
use crate::content::ByteStore;
use crate::error::{FsError, FsResult};
use crate::path::PathStyle;

pub(crate) type Name = String;

/// Payload of an entry: the directory/file/symlink distinction.
#[derive(Debug)]
pub(crate) enum Node {
    /// Children keyed by their original-casing name; `.` and `..` are never
    /// stored, they are synthesized during traversal.
    Directory { children: BTreeMap<Name, Arc<Entry>> },
    File { content: ByteStore },
    /// Target stored verbatim, parsed only when followed.
    Symlink { target: String },
}

/// One node of the tree. The id is assigned at creation from a per-filesystem
/// counter and orders multi-entry lock acquisition; the lock guards all
/// mutable state.
#[derive(Debug)]
pub(crate) struct Entry {
    id: u64,
    state: RwLock<EntryState>,
}

#[derive(Debug)]
pub(crate) struct EntryState {
    pub name: Name,
    pub created: FileTime,
    pub accessed: FileTime,
    pub modified: FileTime,
    pub attrs: AttrBundle,
    pub node: Node,
}

impl Entry {
    pub(crate) fn new(id: u64, name: Name, attrs: AttrBundle, node: Node) -> Arc<Entry> {
        let now = FileTime::now();
        Arc::new(Entry {
            id,
            state: RwLock::new(EntryState {
                name,
                created: now,
                accessed: now,
                modified: now,
                attrs,
                node,
            }),
        })
    }

    pub(crate) fn new_directory(id: u64, name: Name, attrs: AttrBundle) -> Arc<Entry> {
        Entry::new(
            id,
            name,
            attrs,
            Node::Directory {
                children: BTreeMap::new(),
            },
        )
    }

    pub(crate) fn new_file(id: u64, name: Name, attrs: AttrBundle) -> Arc<Entry> {
        Entry::new(
            id,
            name,
            attrs,
            Node::File {
                content: ByteStore::new(),
            },
        )
    }

    pub(crate) fn new_symlink(id: u64, name: Name, attrs: AttrBundle, target: String) -> Arc<Entry> {
        Entry::new(id, name, attrs, Node::Symlink { target })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, EntryState> {
        self.state.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, EntryState> {
        self.state.write()
    }
}

impl EntryState {
    pub(crate) fn is_directory(&self) -> bool {
        matches!(self.node, Node::Directory { .. })
    }

    pub(crate) fn is_file(&self) -> bool {
        matches!(self.node, Node::File { .. })
    }

    pub(crate) fn is_symlink(&self) -> bool {
        matches!(self.node, Node::Symlink { .. })
    }

    pub(crate) fn symlink_target(&self) -> Option<&str> {
        match &self.node {
            Node::Symlink { target } => Some(target),
            _ => None,
        }
    }

    pub(crate) fn content(&self) -> FsResult<&ByteStore> {
        match &self.node {
            Node::File { content } => Ok(content),
            _ => Err(FsError::IsADirectory(self.name.clone())),
        }
    }

    pub(crate) fn content_mut(&mut self) -> FsResult<&mut ByteStore> {
        match &mut self.node {
            Node::File { content } => Ok(content),
            _ => Err(FsError::IsADirectory(self.name.clone())),
        }
    }

    /// Looks a child up under the filesystem's case rule. The map stores
    /// original-casing names; insensitive modes compare case-folded.
    pub(crate) fn find_child(&self, style: &PathStyle, name: &str) -> Option<Arc<Entry>> {
        let children = match &self.node {
            Node::Directory { children } => children,
            _ => return None,
        };
        if let Some(child) = children.get(name) {
            return Some(Arc::clone(child));
        }
        children
            .iter()
            .find(|(stored, _)| style.names_equal(stored, name))
            .map(|(_, child)| Arc::clone(child))
    }

    /// Installs a child under `name`. The caller has already checked for a
    /// case-folded collision under this same write lock.
    pub(crate) fn insert_child(&mut self, name: Name, child: Arc<Entry>) {
        if let Node::Directory { children } = &mut self.node {
            children.insert(name, child);
        }
    }

    /// Removes the child stored under the case-equivalent of `name`,
    /// returning it together with its stored original-casing name.
    pub(crate) fn remove_child(&mut self, style: &PathStyle, name: &str) -> Option<(Name, Arc<Entry>)> {
        let children = match &mut self.node {
            Node::Directory { children } => children,
            _ => return None,
        };
        let stored = children
            .keys()
            .find(|stored| style.names_equal(stored, name))?
            .clone();
        children.remove(&stored).map(|child| (stored, child))
    }

    pub(crate) fn child_names(&self) -> Vec<Name> {
        match &self.node {
            Node::Directory { children } => children.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn child_count(&self) -> usize {
        match &self.node {
            Node::Directory { children } => children.len(),
            _ => 0,
        }
    }

    pub(crate) fn size(&self) -> u64 {
        match &self.node {
            Node::File { content } => content.size(),
            Node::Symlink { target } => target.len() as u64,
            Node::Directory { .. } => 0,
        }
    }

    pub(crate) fn basic_attributes(&self, file_key: u64) -> BasicAttributes {
        BasicAttributes {
            size: self.size(),
            creation_time: self.created,
            last_access_time: self.accessed,
            last_modified_time: self.modified,
            is_regular_file: self.is_file(),
            is_directory: self.is_directory(),
            is_symbolic_link: self.is_symlink(),
            file_key,
        }
    }

    /// Stamps a mutation. Timestamps only move forward.
    pub(crate) fn touch_modified(&mut self) {
        let now = FileTime::now();
        self.modified = self.modified.max(now);
        self.accessed = self.accessed.max(now);
    }

    pub(crate) fn touch_accessed(&mut self) {
        self.accessed = self.accessed.max(FileTime::now());
    }
}

/// A top-level directory and its display string (`"/"`, `"C:\"`).
#[derive(Debug)]
pub(crate) struct Root {
    pub display: String,
    pub key: String,
    pub entry: Arc<Entry>,
}
