/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::VecDeque;
use std::sync::Arc;

use log::trace;

use crate::attr::AccessContext;
use crate::error::{FsError, FsResult};
use crate::flags::AccessMode;
use crate::path::{FsPath, PathStyle};

use super::{Entry, Name, Root};

/// How many symbolic links one resolution may follow before failing with
/// `TooManyLinks`.
pub(crate) const MAX_SYMLINK_DEPTH: u32 = 40;

/// Outcome of a resolution: the entry plus the directory chain that led to
/// it, root first. The last chain element is the entry's parent; an empty
/// chain means the entry is a root.
pub(crate) struct Resolution {
    pub entry: Arc<Entry>,
    pub chain: Vec<Arc<Entry>>,
}

impl Resolution {
    pub(crate) fn parent(&self) -> Option<&Arc<Entry>> {
        self.chain.last()
    }
}

/// Walks absolute paths over a set of root trees. Holds at most one entry
/// read lock at a time; every hop requires EXECUTE on the directory it
/// leaves.
pub(crate) struct Traverser<'a> {
    pub roots: &'a [Root],
    pub style: &'a Arc<PathStyle>,
    pub ctx: &'a AccessContext,
}

impl<'a> Traverser<'a> {
    fn root(&self, path: &FsPath) -> FsResult<&'a Root> {
        let key = path
            .root_key()
            .ok_or_else(|| FsError::InvalidPath(path.to_string()))?;
        self.roots
            .iter()
            .find(|root| root.key == key)
            .ok_or_else(|| FsError::NoSuchFile(path.root().unwrap_or_default().to_owned()))
    }

    /// Resolves `path` to an entry. Symbolic links in intermediate positions
    /// are always followed; the final position follows unless `follow_final`
    /// is false.
    pub(crate) fn resolve(&self, path: &FsPath, follow_final: bool) -> FsResult<Resolution> {
        let mut root = self.root(path)?;
        trace!("resolving '{}'", path);
        let mut chain: Vec<Arc<Entry>> = vec![Arc::clone(&root.entry)];
        let mut work: VecDeque<Name> = path.components().iter().cloned().collect();
        let mut walked: Vec<Name> = Vec::new();
        let mut budget = MAX_SYMLINK_DEPTH;

        while let Some(component) = work.pop_front() {
            let current = Arc::clone(chain.last().expect("chain starts at the root"));
            match component.as_str() {
                "." => continue,
                ".." => {
                    // `..` of a root is the root itself.
                    if chain.len() > 1 {
                        chain.pop();
                        walked.pop();
                    }
                    continue;
                }
                _ => {}
            }
            let child = {
                let state = current.read();
                if !state.is_directory() {
                    return Err(FsError::NotADirectory(self.walked_display(root, &walked)));
                }
                state
                    .attrs
                    .check_access(self.ctx, &[AccessMode::Execute], &self.walked_display(root, &walked))?;
                state.find_child(self.style, &component).ok_or_else(|| {
                    walked.push(component.clone());
                    FsError::NoSuchFile(self.walked_display(root, &walked))
                })?
            };
            let target = child.read().symlink_target().map(str::to_owned);
            if let Some(target) = target {
                if !work.is_empty() || follow_final {
                    if budget == 0 {
                        return Err(FsError::TooManyLinks(path.to_string()));
                    }
                    budget -= 1;
                    let target = FsPath::parse(self.style, &target)?;
                    trace!("following symlink '{}' -> '{}'", component, target);
                    if target.is_absolute() {
                        root = self.root(&target)?;
                        chain = vec![Arc::clone(&root.entry)];
                        walked.clear();
                    }
                    // A relative target restarts from the symlink's parent,
                    // which is exactly the current directory.
                    for piece in target.components().iter().rev() {
                        work.push_front(piece.clone());
                    }
                    continue;
                }
            }
            if work.is_empty() {
                return Ok(Resolution {
                    entry: child,
                    chain,
                });
            }
            walked.push(component);
            chain.push(child);
        }
        // Every component consumed without producing a child: the path names
        // the root itself.
        let entry = chain.pop().expect("chain starts at the root");
        Ok(Resolution { entry, chain })
    }

    /// Resolves the parent directory of `path` and yields the final name.
    /// The final component must be a plain name after normalization.
    pub(crate) fn resolve_parent(&self, path: &FsPath) -> FsResult<(Resolution, Name)> {
        let normalized = path.normalize();
        let name = match normalized.file_name() {
            Some(name) => name.to_owned(),
            None => {
                return Err(FsError::InvalidOperation(format!(
                    "'{}' does not name an entry inside a directory",
                    path
                )))
            }
        };
        let parent = normalized
            .parent()
            .expect("a path with a file name has a parent");
        let resolution = self.resolve(&parent, true)?;
        if !resolution.entry.read().is_directory() {
            return Err(FsError::NotADirectory(parent.to_string()));
        }
        Ok((resolution, name))
    }

    fn walked_display(&self, root: &Root, walked: &[Name]) -> String {
        let mut rendered = root.display.clone();
        let mut first = true;
        for component in walked {
            if !first {
                rendered.push(self.style.separator);
            }
            first = false;
            rendered.push_str(component);
        }
        rendered
    }
}
