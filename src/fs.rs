/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info};
use parking_lot::RwLockWriteGuard;

use crate::attr::acl::{AclEntry, AclPerm};
use crate::attr::basic::{BasicAttributes, FileTime};
use crate::attr::{AccessContext, AttrBundle, AttrSpec, AttrValue, ViewKind, ViewSet};
use crate::config::{Config, Flavor};
use crate::error::{FsError, FsResult};
use crate::flags::{AccessMode, CopyFlag, OpenFlag};
use crate::handle::FileHandle;
use crate::path::{root_key, FsPath, PathStyle};
use crate::principal::{GroupPrincipal, PrincipalGuard, PrincipalService, UserPrincipal};
use crate::tree::traverse::Traverser;
use crate::tree::{Entry, EntryState, Node, Root};
use crate::watch::WatchHandle;

static NEXT_FS_ID: AtomicU64 = AtomicU64::new(1);

/// An in-memory filesystem: a set of root trees plus the path style,
/// principal service and attribute-view set every entry shares.
///
/// Closing is terminal: afterwards every operation through the filesystem or
/// any handle it produced fails with `ClosedFilesystem` before taking any
/// entry lock.
pub struct MemoryFs {
    id: u64,
    identifier: String,
    style: Arc<PathStyle>,
    views: ViewSet,
    umask: u32,
    principals: PrincipalService,
    roots: Vec<Root>,
    default_dir: FsPath,
    open: AtomicBool,
    next_entry_id: AtomicU64,
}

impl MemoryFs {
    /// Builds a filesystem from a validated configuration. Interning under
    /// the identifier is the registry's job.
    pub(crate) fn new(identifier: &str, config: Config) -> FsResult<Arc<MemoryFs>> {
        config.validate()?;
        if !identifier.contains(':') {
            return Err(FsError::InvalidConfiguration(format!(
                "identifier '{}' is not a 'scheme:authority' pair",
                identifier
            )));
        }
        let id = NEXT_FS_ID.fetch_add(1, Ordering::Relaxed);
        let style = Arc::new(PathStyle::from_config(id, &config));
        let principals = PrincipalService::new(
            id,
            config.users.clone(),
            config.groups.clone(),
            config.default_user.clone(),
            config.default_group.clone(),
        );
        let views = ViewSet::from_views(&config.additional_views);
        let next_entry_id = AtomicU64::new(1);
        let mut roots = Vec::with_capacity(config.roots.len());
        for display in &config.roots {
            let attrs = AttrBundle::for_new_entry(
                views,
                principals.default_user(),
                principals.default_group(),
                config.umask,
                true,
                true,
            );
            let entry = Entry::new_directory(
                next_entry_id.fetch_add(1, Ordering::Relaxed),
                display.clone(),
                attrs,
            );
            roots.push(Root {
                display: display.clone(),
                key: root_key(config.flavor, display),
                entry,
            });
        }
        let default_dir = FsPath::parse(&style, &config.default_directory)?.normalize();
        if !default_dir.is_absolute() {
            return Err(FsError::InvalidConfiguration(format!(
                "'default-directory' '{}' is not absolute",
                config.default_directory
            )));
        }
        let fs = MemoryFs {
            id,
            identifier: identifier.to_owned(),
            style,
            views,
            umask: config.umask,
            principals,
            roots,
            default_dir,
            open: AtomicBool::new(true),
            next_entry_id,
        };
        fs.create_default_directory()?;
        info!("created filesystem '{}'", identifier);
        Ok(Arc::new(fs))
    }

    /// Materializes the configured default directory, creating missing
    /// intermediate directories. Runs before the filesystem is shared, so no
    /// access checks apply.
    fn create_default_directory(&self) -> FsResult<()> {
        let key = self.default_dir.root_key().expect("default directory is absolute");
        let root = self
            .roots
            .iter()
            .find(|root| root.key == key)
            .ok_or_else(|| {
                FsError::InvalidConfiguration(format!(
                    "'default-directory' '{}' is not under a configured root",
                    self.default_dir
                ))
            })?;
        let mut current = Arc::clone(&root.entry);
        for component in self.default_dir.components() {
            let existing = current.read().find_child(&self.style, component);
            let next = match existing {
                Some(child) => child,
                None => {
                    let child = Entry::new_directory(
                        self.next_entry_id(),
                        component.clone(),
                        self.new_attrs(true, false),
                    );
                    current
                        .write()
                        .insert_child(component.clone(), Arc::clone(&child));
                    child
                }
            };
            if !next.read().is_directory() {
                return Err(FsError::InvalidConfiguration(format!(
                    "'default-directory' '{}' crosses a non-directory",
                    self.default_dir
                )));
            }
            current = next;
        }
        Ok(())
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn flavor(&self) -> Flavor {
        self.style.flavor
    }

    pub fn separator(&self) -> char {
        self.style.separator
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> FsResult<()> {
        if !self.is_open() {
            return Err(FsError::ClosedFilesystem);
        }
        Ok(())
    }

    /// Closes the filesystem and unregisters it. Idempotent; the first call
    /// wins and later calls are no-ops.
    pub fn close(&self) {
        if self
            .open
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            crate::registry::unregister(&self.identifier);
            info!("closed filesystem '{}'", self.identifier);
        }
    }

    /// Parses a path bound to this filesystem.
    pub fn path(&self, input: &str) -> FsResult<FsPath> {
        FsPath::parse(&self.style, input)
    }

    /// Builds a path from pieces as if joined by the separator.
    pub fn path_join(&self, first: &str, rest: &[&str]) -> FsResult<FsPath> {
        FsPath::parse_join(&self.style, first, rest)
    }

    /// One absolute path per root, in configuration order.
    pub fn root_directories(&self) -> Vec<FsPath> {
        self.roots
            .iter()
            .map(|root| FsPath {
                style: Arc::clone(&self.style),
                root: Some(root.display.clone()),
                components: Vec::new(),
            })
            .collect()
    }

    pub fn default_directory(&self) -> FsPath {
        self.default_dir.clone()
    }

    /// Canonical names of the attribute views every entry of this
    /// filesystem carries.
    pub fn supported_views(&self) -> Vec<ViewKind> {
        let mut views = vec![ViewKind::Basic];
        if self.views.posix {
            views.push(ViewKind::Posix);
        }
        if self.views.dos {
            views.push(ViewKind::Dos);
        }
        if self.views.acl {
            views.push(ViewKind::Acl);
        }
        if self.views.posix || self.views.acl {
            views.push(ViewKind::Owner);
        }
        if self.views.user {
            views.push(ViewKind::User);
        }
        views
    }

    pub fn principals(&self) -> &PrincipalService {
        &self.principals
    }

    pub fn lookup_user(&self, name: &str) -> FsResult<UserPrincipal> {
        self.principals.lookup_user(name)
    }

    pub fn lookup_group(&self, name: &str) -> FsResult<GroupPrincipal> {
        self.principals.lookup_group(name)
    }

    /// Overrides the principals access checks on this thread run against,
    /// until the guard drops.
    pub fn push_principals(&self, user: UserPrincipal, group: GroupPrincipal) -> PrincipalGuard {
        self.principals.push_current(user, group)
    }

    fn next_entry_id(&self) -> u64 {
        self.next_entry_id.fetch_add(1, Ordering::Relaxed)
    }

    fn ctx(&self) -> AccessContext {
        let (user, group) = self.principals.current();
        AccessContext { user, group }
    }

    fn new_attrs(&self, is_directory: bool, is_root: bool) -> AttrBundle {
        let (user, group) = self.principals.current();
        AttrBundle::for_new_entry(self.views, user, group, self.umask, is_directory, is_root)
    }

    fn traverser<'a>(&'a self, ctx: &'a AccessContext) -> Traverser<'a> {
        Traverser {
            roots: &self.roots,
            style: &self.style,
            ctx,
        }
    }

    /// Resolves a relative path against the default directory and strips
    /// `.`/`..`.
    fn absolute(&self, path: &FsPath) -> FsResult<FsPath> {
        path.ensure_same_fs(self.id)?;
        let absolute = if path.is_absolute() {
            path.clone()
        } else {
            let mut components = self.default_dir.components().to_vec();
            components.extend(path.components().iter().cloned());
            FsPath {
                style: Arc::clone(&self.style),
                root: self.default_dir.root.clone(),
                components,
            }
        };
        Ok(absolute.normalize())
    }

    fn check_parent_write(
        &self,
        ctx: &AccessContext,
        state: &EntryState,
        parent_path: &str,
    ) -> FsResult<()> {
        state
            .attrs
            .check_access(ctx, &[AccessMode::Write], parent_path)
    }

    /// Creates a directory at `path`. `attrs` are initial `"view:field"`
    /// assignments applied before the entry becomes visible.
    pub fn create_directory(&self, path: &FsPath, attrs: &[(&str, AttrValue)]) -> FsResult<FsPath> {
        self.create_entry(path, attrs, EntryTemplate::Directory)
    }

    /// Creates an empty regular file at `path`.
    pub fn create_file(&self, path: &FsPath, attrs: &[(&str, AttrValue)]) -> FsResult<FsPath> {
        self.create_entry(path, attrs, EntryTemplate::File)
    }

    /// Installs a symbolic link at `link` whose target is stored verbatim,
    /// never resolved at creation time.
    pub fn create_symlink(
        &self,
        link: &FsPath,
        target: &FsPath,
        attrs: &[(&str, AttrValue)],
    ) -> FsResult<FsPath> {
        self.create_entry(link, attrs, EntryTemplate::Symlink(target.to_string()))
    }

    fn create_entry(
        &self,
        path: &FsPath,
        attrs: &[(&str, AttrValue)],
        template: EntryTemplate,
    ) -> FsResult<FsPath> {
        self.ensure_open()?;
        let path = self.absolute(path)?;
        debug!("creating {} '{}'", template.kind_name(), path);
        let ctx = self.ctx();
        let (parent, name) = self.traverser(&ctx).resolve_parent(&path)?;
        let parent_path = path.parent().map(|p| p.to_string()).unwrap_or_default();
        let mut parent_state = parent.entry.write();
        self.check_parent_write(&ctx, &parent_state, &parent_path)?;
        if parent_state.find_child(&self.style, &name).is_some() {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        let entry = match template {
            EntryTemplate::Directory => {
                Entry::new_directory(self.next_entry_id(), name.clone(), self.new_attrs(true, false))
            }
            EntryTemplate::File => {
                Entry::new_file(self.next_entry_id(), name.clone(), self.new_attrs(false, false))
            }
            EntryTemplate::Symlink(target) => Entry::new_symlink(
                self.next_entry_id(),
                name.clone(),
                self.new_attrs(false, false),
                target,
            ),
        };
        {
            // Initial attributes are applied before the entry is installed,
            // so a bad assignment leaves the tree untouched.
            let mut state = entry.write();
            for (attr_name, value) in attrs {
                apply_attribute(&mut state, attr_name, value)?;
            }
        }
        parent_state.insert_child(name, entry);
        parent_state.touch_modified();
        Ok(path)
    }

    /// Opens a file, optionally creating it, and returns a handle.
    pub fn open(self: &Arc<Self>, path: &FsPath, flags: &[OpenFlag]) -> FsResult<FileHandle> {
        self.ensure_open()?;
        let path = self.absolute(path)?;
        debug!("opening '{}'", path);
        let ctx = self.ctx();
        let follow = !flags.contains(&OpenFlag::NoFollow);
        let create = flags.contains(&OpenFlag::Create);
        let create_new = flags.contains(&OpenFlag::CreateNew);
        let entry = match self.traverser(&ctx).resolve(&path, follow) {
            Ok(resolution) => {
                if create_new {
                    return Err(FsError::AlreadyExists(path.to_string()));
                }
                resolution.entry
            }
            Err(FsError::NoSuchFile(_)) if create || create_new => {
                self.create_missing_file(&ctx, &path, create_new)?
            }
            Err(err) => return Err(err),
        };
        let writable = flags.contains(&OpenFlag::Write) || flags.contains(&OpenFlag::Append);
        let readable = flags.contains(&OpenFlag::Read) || !writable;
        {
            let state = entry.read();
            if state.is_directory() {
                return Err(FsError::IsADirectory(path.to_string()));
            }
            if state.is_symlink() {
                // Only reachable with `NoFollow`: the handle cannot operate
                // on the link itself.
                return Err(FsError::TooManyLinks(path.to_string()));
            }
            let mut modes = Vec::new();
            if readable {
                modes.push(AccessMode::Read);
            }
            if writable {
                modes.push(AccessMode::Write);
            }
            state.attrs.check_access(&ctx, &modes, &path.to_string())?;
        }
        if flags.contains(&OpenFlag::Truncate) && writable {
            let mut state = entry.write();
            state.content_mut()?.truncate(0);
            state.touch_modified();
        }
        Ok(FileHandle::new(
            Arc::clone(self),
            entry,
            path.to_string(),
            flags.to_vec(),
        ))
    }

    /// `open` with `Create`/`CreateNew` when resolution came back empty: the
    /// file is created iff the missing piece was the final component (a
    /// missing intermediate directory already failed `resolve_parent`).
    fn create_missing_file(
        &self,
        ctx: &AccessContext,
        path: &FsPath,
        create_new: bool,
    ) -> FsResult<Arc<Entry>> {
        let (parent, name) = self.traverser(ctx).resolve_parent(path)?;
        let parent_path = path.parent().map(|p| p.to_string()).unwrap_or_default();
        let mut parent_state = parent.entry.write();
        if let Some(existing) = parent_state.find_child(&self.style, &name) {
            // Lost a race with a concurrent create.
            if create_new {
                return Err(FsError::AlreadyExists(path.to_string()));
            }
            if existing.read().is_symlink() {
                return Err(FsError::NoSuchFile(path.to_string()));
            }
            return Ok(existing);
        }
        self.check_parent_write(ctx, &parent_state, &parent_path)?;
        let entry = Entry::new_file(self.next_entry_id(), name.clone(), self.new_attrs(false, false));
        parent_state.insert_child(name, Arc::clone(&entry));
        parent_state.touch_modified();
        Ok(entry)
    }

    /// Removes the entry at `path`. Directories must be empty; the emptiness
    /// check and the removal happen under one parent write-lock acquisition.
    /// Open handles on a removed file keep working.
    pub fn delete(&self, path: &FsPath) -> FsResult<()> {
        self.ensure_open()?;
        let path = self.absolute(path)?;
        debug!("deleting '{}'", path);
        let ctx = self.ctx();
        let (parent, name) = self.traverser(&ctx).resolve_parent(&path)?;
        let parent_path = path.parent().map(|p| p.to_string()).unwrap_or_default();
        let mut parent_state = parent.entry.write();
        self.check_parent_write(&ctx, &parent_state, &parent_path)?;
        let child = parent_state
            .find_child(&self.style, &name)
            .ok_or_else(|| FsError::NoSuchFile(path.to_string()))?;
        {
            let child_state = child.read();
            if child_state.is_directory() && child_state.child_count() > 0 {
                return Err(FsError::DirectoryNotEmpty(path.to_string()));
            }
        }
        parent_state.remove_child(&self.style, &name);
        parent_state.touch_modified();
        Ok(())
    }

    /// Moves `source` to `target`, atomically relinking under both parents'
    /// write locks, acquired in ascending entry-id order.
    pub fn move_entry(&self, source: &FsPath, target: &FsPath, flags: &[CopyFlag]) -> FsResult<()> {
        self.ensure_open()?;
        let source = self.absolute(source)?;
        let target = self.absolute(target)?;
        debug!("moving '{}' to '{}'", source, target);
        let ctx = self.ctx();
        let replace = flags.contains(&CopyFlag::ReplaceExisting);
        let traverser = self.traverser(&ctx);
        let (src_parent, src_name) = traverser.resolve_parent(&source)?;
        let (dst_parent, dst_name) = traverser.resolve_parent(&target)?;
        // Every directory on the target's ancestry, for the into-own-descendant check.
        let mut dst_ancestry = dst_parent.chain.clone();
        dst_ancestry.push(Arc::clone(&dst_parent.entry));

        let op = MoveOp {
            fs: self,
            ctx: &ctx,
            source: &source,
            target: &target,
            src_name: &src_name,
            dst_name: &dst_name,
            replace,
            dst_ancestry: &dst_ancestry,
        };
        if src_parent.entry.id() == dst_parent.entry.id() {
            let mut state = src_parent.entry.write();
            op.run_same_parent(&mut state)
        } else if src_parent.entry.id() < dst_parent.entry.id() {
            let mut first = src_parent.entry.write();
            let mut second = dst_parent.entry.write();
            op.run(&mut first, &mut second)
        } else {
            let mut first = dst_parent.entry.write();
            let mut second = src_parent.entry.write();
            op.run(&mut second, &mut first)
        }
    }

    /// Copies `source` to `target`. Directories copy as empty directories;
    /// `CopyAttributes` carries the view state and timestamps over, otherwise
    /// the target starts as a fresh creation.
    pub fn copy(&self, source: &FsPath, target: &FsPath, flags: &[CopyFlag]) -> FsResult<()> {
        self.ensure_open()?;
        let source = self.absolute(source)?;
        let target = self.absolute(target)?;
        debug!("copying '{}' to '{}'", source, target);
        let ctx = self.ctx();
        let follow = !flags.contains(&CopyFlag::NoFollowLinks);
        let replace = flags.contains(&CopyFlag::ReplaceExisting);
        let copy_attributes = flags.contains(&CopyFlag::CopyAttributes);
        let traverser = self.traverser(&ctx);
        let src_res = traverser.resolve(&source, follow)?;
        let (dst_parent, dst_name) = traverser.resolve_parent(&target)?;

        // Both parents stay write-locked, in ascending id order, for the
        // whole check-snapshot-install sequence.
        let mut guards = lock_parent_pair(src_res.parent(), &dst_parent.entry);
        let src_id = src_res.entry.id();
        let snapshot = match guards.iter().find(|(id, _)| *id == src_id) {
            // The source is itself a locked parent (copy into its own
            // subtree); its lock is already held.
            Some((_, state)) => {
                state
                    .attrs
                    .check_access(&ctx, &[AccessMode::Read], &source.to_string())?;
                EntrySnapshot::take(state)
            }
            None => {
                let state = src_res.entry.read();
                state
                    .attrs
                    .check_access(&ctx, &[AccessMode::Read], &source.to_string())?;
                EntrySnapshot::take(&state)
            }
        };
        let dst_id = dst_parent.entry.id();
        let parent_state = guards
            .iter_mut()
            .find(|(id, _)| *id == dst_id)
            .map(|(_, guard)| guard)
            .expect("target parent is always locked");
        let parent_path = target.parent().map(|p| p.to_string()).unwrap_or_default();
        self.check_parent_write(&ctx, parent_state, &parent_path)?;
        if let Some(existing) = parent_state.find_child(&self.style, &dst_name) {
            if !replace {
                return Err(FsError::AlreadyExists(target.to_string()));
            }
            {
                let existing_state = existing.read();
                if existing_state.is_directory() && existing_state.child_count() > 0 {
                    return Err(FsError::DirectoryNotEmpty(target.to_string()));
                }
            }
            parent_state.remove_child(&self.style, &dst_name);
        }
        let node = snapshot.node();
        let attrs = if copy_attributes {
            snapshot.attrs.clone()
        } else {
            self.new_attrs(snapshot.is_directory, false)
        };
        let entry = Entry::new(self.next_entry_id(), dst_name.clone(), attrs, node);
        if copy_attributes {
            let mut state = entry.write();
            state.created = snapshot.created;
            state.accessed = snapshot.accessed;
            state.modified = snapshot.modified;
        }
        parent_state.insert_child(dst_name, entry);
        parent_state.touch_modified();
        Ok(())
    }

    /// Snapshot of the names in a directory at the moment of the call,
    /// stable against later tree mutation.
    pub fn read_directory(&self, path: &FsPath) -> FsResult<Vec<FsPath>> {
        self.read_directory_filtered(path, |_| true)
    }

    pub fn read_directory_filtered(
        &self,
        path: &FsPath,
        filter: impl Fn(&FsPath) -> bool,
    ) -> FsResult<Vec<FsPath>> {
        self.ensure_open()?;
        let path = self.absolute(path)?;
        let ctx = self.ctx();
        let resolution = self.traverser(&ctx).resolve(&path, true)?;
        let names = {
            let mut state = resolution.entry.write();
            if !state.is_directory() {
                return Err(FsError::NotADirectory(path.to_string()));
            }
            state
                .attrs
                .check_access(&ctx, &[AccessMode::Read], &path.to_string())?;
            state.touch_accessed();
            state.child_names()
        };
        let mut listed = Vec::with_capacity(names.len());
        for name in names {
            let child = path.join(&name)?;
            if filter(&child) {
                listed.push(child);
            }
        }
        Ok(listed)
    }

    /// Basic-view stat. `follow` resolves a final symbolic link; without it
    /// the link itself answers.
    pub fn metadata(&self, path: &FsPath, follow: bool) -> FsResult<BasicAttributes> {
        self.ensure_open()?;
        let path = self.absolute(path)?;
        let ctx = self.ctx();
        let resolution = self.traverser(&ctx).resolve(&path, follow)?;
        let state = resolution.entry.read();
        Ok(state.basic_attributes(resolution.entry.id()))
    }

    pub fn exists(&self, path: &FsPath) -> FsResult<bool> {
        match self.metadata(path, true) {
            Ok(_) => Ok(true),
            Err(FsError::NoSuchFile(_) | FsError::NotADirectory(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn is_regular_file(&self, path: &FsPath) -> FsResult<bool> {
        match self.metadata(path, true) {
            Ok(attrs) => Ok(attrs.is_regular_file),
            Err(FsError::NoSuchFile(_) | FsError::NotADirectory(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn is_directory(&self, path: &FsPath) -> FsResult<bool> {
        match self.metadata(path, true) {
            Ok(attrs) => Ok(attrs.is_directory),
            Err(FsError::NoSuchFile(_) | FsError::NotADirectory(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn is_symbolic_link(&self, path: &FsPath) -> FsResult<bool> {
        match self.metadata(path, false) {
            Ok(attrs) => Ok(attrs.is_symbolic_link),
            Err(FsError::NoSuchFile(_) | FsError::NotADirectory(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// The stored target of a symbolic link, exactly as written at creation.
    pub fn read_symbolic_link(&self, path: &FsPath) -> FsResult<FsPath> {
        self.ensure_open()?;
        let path = self.absolute(path)?;
        let ctx = self.ctx();
        let resolution = self.traverser(&ctx).resolve(&path, false)?;
        let state = resolution.entry.read();
        let target = state
            .symlink_target()
            .ok_or_else(|| FsError::InvalidOperation(format!("'{}' is not a symbolic link", path)))?;
        FsPath::parse(&self.style, target)
    }

    /// Fully resolves `path`, following every symbolic link, and renders the
    /// canonical absolute path of the entry it lands on.
    pub fn to_real_path(&self, path: &FsPath) -> FsResult<FsPath> {
        self.ensure_open()?;
        let path = self.absolute(path)?;
        let ctx = self.ctx();
        let resolution = self.traverser(&ctx).resolve(&path, true)?;
        let mut components = Vec::new();
        for entry in resolution.chain.iter().skip(1) {
            components.push(entry.read().name.clone());
        }
        let root_display = match resolution.chain.first() {
            Some(root_entry) => root_entry.read().name.clone(),
            // The entry is a root itself.
            None => resolution.entry.read().name.clone(),
        };
        if !resolution.chain.is_empty() {
            components.push(resolution.entry.read().name.clone());
        }
        Ok(FsPath {
            style: Arc::clone(&self.style),
            root: Some(root_display),
            components,
        })
    }

    /// Evaluates the conjunction of every access-check-capable view on the
    /// entry for the requested modes.
    pub fn check_access(&self, path: &FsPath, modes: &[AccessMode]) -> FsResult<()> {
        self.ensure_open()?;
        let path = self.absolute(path)?;
        let ctx = self.ctx();
        let resolution = self.traverser(&ctx).resolve(&path, true)?;
        let state = resolution.entry.read();
        state.attrs.check_access(&ctx, modes, &path.to_string())
    }

    /// Reads attributes by request string, e.g. `"dos:hidden,size"`. Unknown
    /// fields are skipped.
    pub fn read_attributes(
        &self,
        path: &FsPath,
        request: &str,
    ) -> FsResult<BTreeMap<String, AttrValue>> {
        self.ensure_open()?;
        let spec = AttrSpec::parse(request)?;
        let path = self.absolute(path)?;
        let ctx = self.ctx();
        let resolution = self.traverser(&ctx).resolve(&path, true)?;
        let state = resolution.entry.read();
        if spec.view == ViewKind::Acl {
            if let Some(acl) = &state.attrs.acl {
                acl.check(&ctx, &[AclPerm::ReadAcl], &path.to_string())?;
            }
        }
        let basic = state.basic_attributes(resolution.entry.id());
        state.attrs.read_fields(&spec, &basic)
    }

    /// Writes one attribute named `"view:field"`. Unknown fields fail with
    /// `IllegalArgument`; owner changes require write access; ACL changes
    /// pass the ACL's own WRITE_ACL scan.
    pub fn set_attribute(&self, path: &FsPath, name: &str, value: AttrValue) -> FsResult<()> {
        self.ensure_open()?;
        let (view_name, field) = name
            .split_once(':')
            .ok_or_else(|| FsError::IllegalArgument(format!("'{}' is not 'view:field'", name)))?;
        let view = ViewKind::from_name(view_name)
            .ok_or_else(|| FsError::Unsupported(format!("attribute view '{}'", view_name)))?;
        let path = self.absolute(path)?;
        debug!("setting attribute '{}' on '{}'", name, path);
        let ctx = self.ctx();
        let resolution = self.traverser(&ctx).resolve(&path, true)?;
        let mut state = resolution.entry.write();
        let rendered = path.to_string();
        // The access check and the mutation share one write-lock acquisition.
        match view {
            ViewKind::Posix if field == "owner" || field == "group" => {
                state.attrs.check_access(&ctx, &[AccessMode::Write], &rendered)?;
            }
            ViewKind::Owner => {
                state.attrs.check_access(&ctx, &[AccessMode::Write], &rendered)?;
            }
            ViewKind::Acl => {
                if let Some(acl) = &state.attrs.acl {
                    acl.check(&ctx, &[AclPerm::WriteAcl], &rendered)?;
                }
            }
            _ => {}
        }
        apply_attribute(&mut state, name, &value)?;
        Ok(())
    }

    pub fn set_permissions(&self, path: &FsPath, mode: u32) -> FsResult<()> {
        self.set_attribute(path, "posix:permissions", AttrValue::Mode(mode))
    }

    pub fn set_owner(&self, path: &FsPath, owner: UserPrincipal) -> FsResult<()> {
        self.set_attribute(path, "owner:owner", AttrValue::User(owner))
    }

    pub fn set_group(&self, path: &FsPath, group: GroupPrincipal) -> FsResult<()> {
        self.set_attribute(path, "posix:group", AttrValue::Group(group))
    }

    pub fn set_times(
        &self,
        path: &FsPath,
        modified: Option<FileTime>,
        accessed: Option<FileTime>,
        created: Option<FileTime>,
    ) -> FsResult<()> {
        if let Some(time) = modified {
            self.set_attribute(path, "basic:last_modified_time", AttrValue::Time(time))?;
        }
        if let Some(time) = accessed {
            self.set_attribute(path, "basic:last_access_time", AttrValue::Time(time))?;
        }
        if let Some(time) = created {
            self.set_attribute(path, "basic:creation_time", AttrValue::Time(time))?;
        }
        Ok(())
    }

    /// Ordered ACL entry list of `path`; reading passes the READ_ACL scan.
    pub fn acl(&self, path: &FsPath) -> FsResult<Vec<AclEntry>> {
        match self.read_attributes(path, "acl:acl")?.remove("acl") {
            Some(AttrValue::Acl(entries)) => Ok(entries),
            _ => Err(FsError::Unsupported("attribute view 'acl'".to_owned())),
        }
    }

    pub fn set_acl(&self, path: &FsPath, entries: Vec<AclEntry>) -> FsResult<()> {
        self.set_attribute(path, "acl:acl", AttrValue::Acl(entries))
    }

    /// Copies the user-defined attribute `name` into `buffer`, failing with
    /// `BufferTooSmall` when it does not fit.
    pub fn read_user_attribute(
        &self,
        path: &FsPath,
        name: &str,
        buffer: &mut [u8],
    ) -> FsResult<usize> {
        self.with_entry(path, |state, _| {
            let user = state
                .attrs
                .user
                .as_ref()
                .ok_or_else(|| FsError::Unsupported("attribute view 'user'".to_owned()))?;
            user.read(name, buffer)
        })
    }

    pub fn write_user_attribute(&self, path: &FsPath, name: &str, value: &[u8]) -> FsResult<()> {
        self.ensure_open()?;
        let path = self.absolute(path)?;
        let ctx = self.ctx();
        let resolution = self.traverser(&ctx).resolve(&path, true)?;
        let mut state = resolution.entry.write();
        let user = state
            .attrs
            .user
            .as_mut()
            .ok_or_else(|| FsError::Unsupported("attribute view 'user'".to_owned()))?;
        user.write(name, value);
        Ok(())
    }

    pub fn list_user_attributes(&self, path: &FsPath) -> FsResult<Vec<String>> {
        self.with_entry(path, |state, _| {
            let user = state
                .attrs
                .user
                .as_ref()
                .ok_or_else(|| FsError::Unsupported("attribute view 'user'".to_owned()))?;
            Ok(user.list())
        })
    }

    pub fn remove_user_attribute(&self, path: &FsPath, name: &str) -> FsResult<()> {
        self.ensure_open()?;
        let path = self.absolute(path)?;
        let ctx = self.ctx();
        let resolution = self.traverser(&ctx).resolve(&path, true)?;
        let mut state = resolution.entry.write();
        let user = state
            .attrs
            .user
            .as_mut()
            .ok_or_else(|| FsError::Unsupported("attribute view 'user'".to_owned()))?;
        user.remove(name)
    }

    /// Registers a watch on a directory. Only the closed-state contract of
    /// the returned handle belongs to the core.
    pub fn watch(self: &Arc<Self>, path: &FsPath) -> FsResult<WatchHandle> {
        self.ensure_open()?;
        let path = self.absolute(path)?;
        let ctx = self.ctx();
        let resolution = self.traverser(&ctx).resolve(&path, true)?;
        let state = resolution.entry.read();
        if !state.is_directory() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        state
            .attrs
            .check_access(&ctx, &[AccessMode::Read], &path.to_string())?;
        drop(state);
        Ok(WatchHandle::new(Arc::clone(self), path))
    }

    fn with_entry<T>(
        &self,
        path: &FsPath,
        action: impl FnOnce(&EntryState, &AccessContext) -> FsResult<T>,
    ) -> FsResult<T> {
        self.ensure_open()?;
        let path = self.absolute(path)?;
        let ctx = self.ctx();
        let resolution = self.traverser(&ctx).resolve(&path, true)?;
        let state = resolution.entry.read();
        action(&state, &ctx)
    }
}

/// What `create_entry` is asked to install.
enum EntryTemplate {
    Directory,
    File,
    Symlink(String),
}

impl EntryTemplate {
    fn kind_name(&self) -> &'static str {
        match self {
            EntryTemplate::Directory => "directory",
            EntryTemplate::File => "file",
            EntryTemplate::Symlink(_) => "symlink",
        }
    }
}

/// Copy-relevant state of one entry, taken under its read lock.
struct EntrySnapshot {
    is_directory: bool,
    content: Option<crate::content::ByteStore>,
    symlink_target: Option<String>,
    attrs: AttrBundle,
    created: FileTime,
    accessed: FileTime,
    modified: FileTime,
}

impl EntrySnapshot {
    fn take(state: &EntryState) -> EntrySnapshot {
        let (content, symlink_target) = match &state.node {
            Node::File { content } => (Some(content.clone()), None),
            Node::Symlink { target } => (None, Some(target.clone())),
            Node::Directory { .. } => (None, None),
        };
        EntrySnapshot {
            is_directory: state.is_directory(),
            content,
            symlink_target,
            attrs: state.attrs.clone(),
            created: state.created,
            accessed: state.accessed,
            modified: state.modified,
        }
    }

    fn node(&self) -> Node {
        if let Some(content) = &self.content {
            Node::File {
                content: content.clone(),
            }
        } else if let Some(target) = &self.symlink_target {
            Node::Symlink {
                target: target.clone(),
            }
        } else {
            Node::Directory {
                children: std::collections::BTreeMap::new(),
            }
        }
    }
}

/// Write-locks the source's parent (when it has one) and the target parent
/// in ascending id order, so concurrent two-directory operations cannot
/// deadlock.
fn lock_parent_pair<'a>(
    src_parent: Option<&'a Arc<Entry>>,
    dst_parent: &'a Arc<Entry>,
) -> Vec<(u64, RwLockWriteGuard<'a, EntryState>)> {
    let mut parents: Vec<&'a Arc<Entry>> = Vec::with_capacity(2);
    if let Some(parent) = src_parent {
        parents.push(parent);
    }
    parents.push(dst_parent);
    parents.sort_by_key(|entry| entry.id());
    parents.dedup_by_key(|entry| entry.id());
    parents
        .into_iter()
        .map(|entry| (entry.id(), entry.write()))
        .collect()
}

struct MoveOp<'a> {
    fs: &'a MemoryFs,
    ctx: &'a AccessContext,
    source: &'a FsPath,
    target: &'a FsPath,
    src_name: &'a str,
    dst_name: &'a str,
    replace: bool,
    dst_ancestry: &'a [Arc<Entry>],
}

impl MoveOp<'_> {
    fn run(
        &self,
        src_state: &mut RwLockWriteGuard<'_, EntryState>,
        dst_state: &mut RwLockWriteGuard<'_, EntryState>,
    ) -> FsResult<()> {
        let src_parent_path = self.source.parent().map(|p| p.to_string()).unwrap_or_default();
        let dst_parent_path = self.target.parent().map(|p| p.to_string()).unwrap_or_default();
        self.fs.check_parent_write(self.ctx, src_state, &src_parent_path)?;
        self.fs.check_parent_write(self.ctx, dst_state, &dst_parent_path)?;
        let child = src_state
            .find_child(&self.fs.style, self.src_name)
            .ok_or_else(|| FsError::NoSuchFile(self.source.to_string()))?;
        self.check_not_into_self(&child)?;
        if let Some(existing) = dst_state.find_child(&self.fs.style, self.dst_name) {
            self.displace(dst_state, &existing)?;
        }
        src_state.remove_child(&self.fs.style, self.src_name);
        child.write().name = self.dst_name.to_owned();
        dst_state.insert_child(self.dst_name.to_owned(), child);
        src_state.touch_modified();
        dst_state.touch_modified();
        Ok(())
    }

    fn run_same_parent(&self, state: &mut RwLockWriteGuard<'_, EntryState>) -> FsResult<()> {
        let parent_path = self.source.parent().map(|p| p.to_string()).unwrap_or_default();
        self.fs.check_parent_write(self.ctx, state, &parent_path)?;
        let child = state
            .find_child(&self.fs.style, self.src_name)
            .ok_or_else(|| FsError::NoSuchFile(self.source.to_string()))?;
        if let Some(existing) = state.find_child(&self.fs.style, self.dst_name) {
            if Arc::ptr_eq(&existing, &child) {
                // Case-only rename of the same entry.
                state.remove_child(&self.fs.style, self.src_name);
                child.write().name = self.dst_name.to_owned();
                state.insert_child(self.dst_name.to_owned(), child);
                state.touch_modified();
                return Ok(());
            }
            self.displace(state, &existing)?;
        }
        state.remove_child(&self.fs.style, self.src_name);
        child.write().name = self.dst_name.to_owned();
        state.insert_child(self.dst_name.to_owned(), child);
        state.touch_modified();
        Ok(())
    }

    fn check_not_into_self(&self, child: &Arc<Entry>) -> FsResult<()> {
        if self
            .dst_ancestry
            .iter()
            .any(|ancestor| Arc::ptr_eq(ancestor, child))
        {
            return Err(FsError::InvalidOperation(format!(
                "cannot move '{}' into its own subtree '{}'",
                self.source, self.target
            )));
        }
        Ok(())
    }

    fn displace(
        &self,
        dst_state: &mut RwLockWriteGuard<'_, EntryState>,
        existing: &Arc<Entry>,
    ) -> FsResult<()> {
        if !self.replace {
            return Err(FsError::AlreadyExists(self.target.to_string()));
        }
        {
            let existing_state = existing.read();
            if existing_state.is_directory() && existing_state.child_count() > 0 {
                return Err(FsError::DirectoryNotEmpty(self.target.to_string()));
            }
        }
        dst_state.remove_child(&self.fs.style, self.dst_name);
        Ok(())
    }
}

/// Applies one `"view:field"` assignment to an entry's state. Basic
/// timestamps are entry state; everything else dispatches into the bundle.
fn apply_attribute(state: &mut EntryState, name: &str, value: &AttrValue) -> FsResult<()> {
    let (view_name, field) = name
        .split_once(':')
        .ok_or_else(|| FsError::IllegalArgument(format!("'{}' is not 'view:field'", name)))?;
    let view = ViewKind::from_name(view_name)
        .ok_or_else(|| FsError::Unsupported(format!("attribute view '{}'", view_name)))?;
    if view == ViewKind::Basic {
        return match (field, value) {
            ("creation_time", AttrValue::Time(time)) => {
                state.created = *time;
                Ok(())
            }
            ("last_access_time", AttrValue::Time(time)) => {
                state.accessed = *time;
                Ok(())
            }
            ("last_modified_time", AttrValue::Time(time)) => {
                state.modified = *time;
                Ok(())
            }
            _ => Err(FsError::IllegalArgument(format!(
                "cannot write attribute '{}'",
                name
            ))),
        };
    }
    state.attrs.write_field(view, field, value.clone())
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::attr::acl::{AclEntry, AclPerm};

    fn posix_fs() -> Arc<MemoryFs> {
        MemoryFs::new("memory:test", Config::posix()).unwrap()
    }

    fn windows_fs() -> Arc<MemoryFs> {
        MemoryFs::new("memory:test", Config::windows()).unwrap()
    }

    fn full_config() -> Config {
        let mut config = Config::posix();
        config.additional_views =
            vec![ViewKind::Posix, ViewKind::Dos, ViewKind::Acl, ViewKind::User];
        config
    }

    fn full_fs() -> Arc<MemoryFs> {
        MemoryFs::new("memory:test", full_config()).unwrap()
    }

    #[test]
    fn test_create_file_requires_parent() {
        let fs = posix_fs();
        let file = fs.path("/a/b.txt").unwrap();
        assert_eq!(
            Err(FsError::NoSuchFile("/a".to_owned())),
            fs.create_file(&file, &[])
        );
        fs.create_directory(&fs.path("/a").unwrap(), &[]).unwrap();
        fs.create_file(&file, &[]).unwrap();
        assert!(fs.exists(&file).unwrap());
        assert!(fs.is_regular_file(&file).unwrap());
        assert!(!fs.is_directory(&file).unwrap());
    }

    #[test]
    fn test_create_existing_fails() {
        let fs = posix_fs();
        let dir = fs.path("/a").unwrap();
        fs.create_directory(&dir, &[]).unwrap();
        assert_eq!(
            Err(FsError::AlreadyExists("/a".to_owned())),
            fs.create_directory(&dir, &[])
        );
        assert_eq!(
            Err(FsError::AlreadyExists("/a".to_owned())),
            fs.create_file(&dir, &[])
        );
    }

    #[test]
    fn test_windows_lookup_is_case_insensitive() {
        let fs = windows_fs();
        fs.create_directory(&fs.path("C:\\Temp").unwrap(), &[]).unwrap();
        fs.create_file(&fs.path("C:\\Temp\\Readme.txt").unwrap(), &[])
            .unwrap();
        let folded = fs.path("c:/temp/README.TXT").unwrap();
        assert!(fs.exists(&folded).unwrap());
        assert!(fs.is_regular_file(&folded).unwrap());
    }

    #[test]
    fn test_two_handles_write_and_append() {
        let fs = posix_fs();
        fs.create_directory(&fs.path("/a").unwrap(), &[]).unwrap();
        let file = fs.path("/a/b").unwrap();
        fs.create_file(&file, &[]).unwrap();
        let writer = fs.open(&file, &[OpenFlag::Write]).unwrap();
        let appender = fs.open(&file, &[OpenFlag::Append]).unwrap();
        assert_eq!(5, writer.write(b"hello").unwrap());
        assert_eq!(1, appender.write(b"!").unwrap());
        let reader = fs.open(&file, &[OpenFlag::Read]).unwrap();
        assert_eq!(6, reader.size().unwrap());
        let mut buffer = [0; 8];
        assert_eq!(6, reader.read(&mut buffer).unwrap());
        assert_eq!(b"hello!", &buffer[..6]);
    }

    #[test]
    fn test_unlink_while_open() {
        let fs = posix_fs();
        let file = fs.path("/x").unwrap();
        let handle = fs
            .open(&file, &[OpenFlag::Read, OpenFlag::Write, OpenFlag::Create])
            .unwrap();
        handle.write(b"data").unwrap();
        fs.delete(&file).unwrap();
        assert_eq!(Err(FsError::NoSuchFile("/x".to_owned())), fs.metadata(&file, true));
        assert!(!fs.exists(&file).unwrap());
        let mut buffer = [0; 4];
        assert_eq!(4, handle.read_at(0, &mut buffer).unwrap());
        assert_eq!(b"data", &buffer);
        handle.write(b"!").unwrap();
        assert_eq!(5, handle.size().unwrap());
    }

    #[test]
    fn test_umask_and_execute_access() {
        let mut config = Config::posix();
        config.umask = 0o600;
        config.users.push("outsider".to_owned());
        config.groups.push("others".to_owned());
        let fs = MemoryFs::new("memory:test", config).unwrap();
        let file = fs.path("/f").unwrap();
        fs.create_file(&file, &[]).unwrap();
        assert_eq!(
            Err(FsError::AccessDenied("/f".to_owned())),
            fs.check_access(&file, &[AccessMode::Execute])
        );
        {
            let _guard = fs.push_principals(
                fs.lookup_user("outsider").unwrap(),
                fs.lookup_group("others").unwrap(),
            );
            assert_eq!(
                Err(FsError::AccessDenied("/f".to_owned())),
                fs.check_access(&file, &[AccessMode::Execute])
            );
        }
        fs.set_permissions(&file, 0o700).unwrap();
        fs.check_access(&file, &[AccessMode::Execute]).unwrap();
        {
            let _guard = fs.push_principals(
                fs.lookup_user("outsider").unwrap(),
                fs.lookup_group("others").unwrap(),
            );
            assert_eq!(
                Err(FsError::AccessDenied("/f".to_owned())),
                fs.check_access(&file, &[AccessMode::Execute])
            );
        }
    }

    #[test]
    fn test_move_file() {
        let fs = posix_fs();
        fs.create_directory(&fs.path("/a").unwrap(), &[]).unwrap();
        let source = fs.path("/a/f").unwrap();
        fs.create_file(&source, &[]).unwrap();
        let target = fs.path("/b").unwrap();
        fs.move_entry(&source, &target, &[]).unwrap();
        assert!(!fs.exists(&source).unwrap());
        assert!(fs.exists(&target).unwrap());
        assert_eq!(
            Err(FsError::NoSuchFile("/a/f".to_owned())),
            fs.move_entry(&source, &target, &[])
        );
    }

    #[test]
    fn test_move_requires_replace() {
        let fs = posix_fs();
        let source = fs.path("/src").unwrap();
        let target = fs.path("/dst").unwrap();
        fs.create_file(&source, &[]).unwrap();
        fs.create_file(&target, &[]).unwrap();
        assert_eq!(
            Err(FsError::AlreadyExists("/dst".to_owned())),
            fs.move_entry(&source, &target, &[])
        );
        fs.move_entry(&source, &target, &[CopyFlag::ReplaceExisting])
            .unwrap();
        assert!(!fs.exists(&source).unwrap());
    }

    #[test]
    fn test_move_rejects_nonempty_directory_target() {
        let fs = posix_fs();
        fs.create_directory(&fs.path("/src").unwrap(), &[]).unwrap();
        fs.create_directory(&fs.path("/dst").unwrap(), &[]).unwrap();
        fs.create_file(&fs.path("/dst/child").unwrap(), &[]).unwrap();
        assert_eq!(
            Err(FsError::DirectoryNotEmpty("/dst".to_owned())),
            fs.move_entry(
                &fs.path("/src").unwrap(),
                &fs.path("/dst").unwrap(),
                &[CopyFlag::ReplaceExisting]
            )
        );
    }

    #[test]
    fn test_move_into_own_subtree() {
        let fs = posix_fs();
        fs.create_directory(&fs.path("/m").unwrap(), &[]).unwrap();
        fs.create_directory(&fs.path("/m/n").unwrap(), &[]).unwrap();
        assert!(matches!(
            fs.move_entry(
                &fs.path("/m").unwrap(),
                &fs.path("/m/n/o").unwrap(),
                &[]
            ),
            Err(FsError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_case_only_rename() {
        let fs = windows_fs();
        let lower = fs.path("C:\\file").unwrap();
        fs.create_file(&lower, &[]).unwrap();
        fs.move_entry(&lower, &fs.path("C:\\FILE").unwrap(), &[])
            .unwrap();
        let listed = fs.read_directory(&fs.path("C:\\").unwrap()).unwrap();
        assert_eq!(1, listed.len());
        assert_eq!("C:\\FILE", listed[0].to_string());
    }

    #[test]
    fn test_move_directory_keeps_children() {
        let fs = posix_fs();
        fs.create_directory(&fs.path("/d").unwrap(), &[]).unwrap();
        fs.create_file(&fs.path("/d/f").unwrap(), &[]).unwrap();
        fs.create_directory(&fs.path("/e").unwrap(), &[]).unwrap();
        fs.move_entry(&fs.path("/d").unwrap(), &fs.path("/e/d2").unwrap(), &[])
            .unwrap();
        assert!(fs.exists(&fs.path("/e/d2/f").unwrap()).unwrap());
        assert!(!fs.exists(&fs.path("/d").unwrap()).unwrap());
    }

    #[test]
    fn test_delete_nonempty_directory() {
        let fs = posix_fs();
        fs.create_directory(&fs.path("/d").unwrap(), &[]).unwrap();
        fs.create_file(&fs.path("/d/f").unwrap(), &[]).unwrap();
        assert_eq!(
            Err(FsError::DirectoryNotEmpty("/d".to_owned())),
            fs.delete(&fs.path("/d").unwrap())
        );
        fs.delete(&fs.path("/d/f").unwrap()).unwrap();
        fs.delete(&fs.path("/d").unwrap()).unwrap();
        assert!(!fs.exists(&fs.path("/d").unwrap()).unwrap());
    }

    #[test]
    fn test_copy_attributes() {
        let fs = full_fs();
        let source = fs.path("/src").unwrap();
        fs.create_file(&source, &[]).unwrap();
        fs.set_attribute(&source, "dos:hidden", AttrValue::Bool(true))
            .unwrap();
        fs.set_permissions(&source, 0o640).unwrap();
        fs.write_user_attribute(&source, "origin", b"generated")
            .unwrap();
        let copied = fs.path("/copied").unwrap();
        fs.copy(&source, &copied, &[CopyFlag::CopyAttributes]).unwrap();
        let attrs = fs.read_attributes(&copied, "dos:hidden").unwrap();
        assert_eq!(Some(&AttrValue::Bool(true)), attrs.get("hidden"));
        let posix = fs.read_attributes(&copied, "posix:permissions").unwrap();
        assert_eq!(Some(&AttrValue::Mode(0o640)), posix.get("permissions"));
        let mut buffer = [0; 16];
        assert_eq!(9, fs.read_user_attribute(&copied, "origin", &mut buffer).unwrap());
        // Source timestamps carry over too.
        let src_meta = fs.metadata(&source, true).unwrap();
        let dst_meta = fs.metadata(&copied, true).unwrap();
        assert_eq!(src_meta.creation_time, dst_meta.creation_time);

        let fresh = fs.path("/fresh").unwrap();
        fs.copy(&source, &fresh, &[]).unwrap();
        let attrs = fs.read_attributes(&fresh, "dos:hidden").unwrap();
        assert_eq!(Some(&AttrValue::Bool(false)), attrs.get("hidden"));
        let posix = fs.read_attributes(&fresh, "posix:permissions").unwrap();
        assert_eq!(Some(&AttrValue::Mode(0o644)), posix.get("permissions"));
    }

    #[test]
    fn test_copy_file_content_is_independent() {
        let fs = posix_fs();
        let source = fs.path("/src").unwrap();
        let handle = fs
            .open(&source, &[OpenFlag::Write, OpenFlag::Create])
            .unwrap();
        handle.write(b"payload").unwrap();
        let target = fs.path("/dst").unwrap();
        fs.copy(&source, &target, &[]).unwrap();
        handle.write(b" more").unwrap();
        let reader = fs.open(&target, &[OpenFlag::Read]).unwrap();
        let mut buffer = [0; 16];
        assert_eq!(7, reader.read(&mut buffer).unwrap());
        assert_eq!(b"payload", &buffer[..7]);
    }

    #[test]
    fn test_symlink_resolution() {
        let fs = posix_fs();
        fs.create_directory(&fs.path("/real").unwrap(), &[]).unwrap();
        let file = fs.path("/real/f").unwrap();
        let handle = fs
            .open(&file, &[OpenFlag::Write, OpenFlag::Create])
            .unwrap();
        handle.write(b"seen").unwrap();
        let link = fs.path("/link").unwrap();
        fs.create_symlink(&link, &fs.path("/real").unwrap(), &[])
            .unwrap();
        assert!(fs.is_symbolic_link(&link).unwrap());
        assert!(fs.is_directory(&link).unwrap());
        let through = fs.path("/link/f").unwrap();
        let reader = fs.open(&through, &[OpenFlag::Read]).unwrap();
        let mut buffer = [0; 4];
        assert_eq!(4, reader.read(&mut buffer).unwrap());
        assert_eq!(b"seen", &buffer);
        assert_eq!(fs.path("/real").unwrap(), fs.read_symbolic_link(&link).unwrap());
        assert_eq!("/real/f", fs.to_real_path(&through).unwrap().to_string());
    }

    #[test]
    fn test_relative_symlink_target() {
        let fs = posix_fs();
        fs.create_directory(&fs.path("/real").unwrap(), &[]).unwrap();
        fs.create_file(&fs.path("/real/f").unwrap(), &[]).unwrap();
        fs.create_symlink(
            &fs.path("/real/rel").unwrap(),
            &fs.path("f").unwrap(),
            &[],
        )
        .unwrap();
        assert!(fs.is_regular_file(&fs.path("/real/rel").unwrap()).unwrap());
        assert_eq!(
            "/real/f",
            fs.to_real_path(&fs.path("/real/rel").unwrap())
                .unwrap()
                .to_string()
        );
    }

    #[test]
    fn test_symlink_cycle() {
        let fs = posix_fs();
        fs.create_symlink(&fs.path("/s1").unwrap(), &fs.path("/s2").unwrap(), &[])
            .unwrap();
        fs.create_symlink(&fs.path("/s2").unwrap(), &fs.path("/s1").unwrap(), &[])
            .unwrap();
        assert!(matches!(
            fs.metadata(&fs.path("/s1").unwrap(), true),
            Err(FsError::TooManyLinks(_))
        ));
    }

    #[test]
    fn test_read_directory_snapshot() {
        let fs = posix_fs();
        fs.create_directory(&fs.path("/d").unwrap(), &[]).unwrap();
        fs.create_file(&fs.path("/d/a").unwrap(), &[]).unwrap();
        fs.create_file(&fs.path("/d/b").unwrap(), &[]).unwrap();
        let listed = fs.read_directory(&fs.path("/d").unwrap()).unwrap();
        fs.create_file(&fs.path("/d/c").unwrap(), &[]).unwrap();
        assert_eq!(
            vec!["/d/a".to_owned(), "/d/b".to_owned()],
            listed.iter().map(|p| p.to_string()).collect::<Vec<_>>()
        );
        let filtered = fs
            .read_directory_filtered(&fs.path("/d").unwrap(), |p| {
                p.file_name() != Some("b")
            })
            .unwrap();
        assert_eq!(2, filtered.len());
    }

    #[test]
    fn test_list_file_is_not_a_directory() {
        let fs = posix_fs();
        fs.create_file(&fs.path("/f").unwrap(), &[]).unwrap();
        assert_eq!(
            Err(FsError::NotADirectory("/f".to_owned())),
            fs.read_directory(&fs.path("/f").unwrap()).map(|_| ())
        );
    }

    #[test]
    fn test_open_directory_fails() {
        let fs = posix_fs();
        fs.create_directory(&fs.path("/d").unwrap(), &[]).unwrap();
        assert_eq!(
            Err(FsError::IsADirectory("/d".to_owned())),
            fs.open(&fs.path("/d").unwrap(), &[OpenFlag::Read]).map(|_| ())
        );
    }

    #[test]
    fn test_open_create_new() {
        let fs = posix_fs();
        let file = fs.path("/f").unwrap();
        fs.open(&file, &[OpenFlag::Write, OpenFlag::CreateNew]).unwrap();
        assert_eq!(
            Err(FsError::AlreadyExists("/f".to_owned())),
            fs.open(&file, &[OpenFlag::Write, OpenFlag::CreateNew])
                .map(|_| ())
        );
    }

    #[test]
    fn test_open_truncates() {
        let fs = posix_fs();
        let file = fs.path("/f").unwrap();
        let handle = fs
            .open(&file, &[OpenFlag::Write, OpenFlag::Create])
            .unwrap();
        handle.write(b"content").unwrap();
        let truncating = fs
            .open(&file, &[OpenFlag::Write, OpenFlag::Truncate])
            .unwrap();
        assert_eq!(0, truncating.size().unwrap());
    }

    #[test]
    fn test_handle_direction_checks() {
        let fs = posix_fs();
        let file = fs.path("/f").unwrap();
        fs.create_file(&file, &[]).unwrap();
        let reader = fs.open(&file, &[OpenFlag::Read]).unwrap();
        assert_eq!(Err(FsError::NonWritable), reader.write(b"x"));
        assert_eq!(Err(FsError::NonWritable), reader.truncate(0));
        let writer = fs.open(&file, &[OpenFlag::Write]).unwrap();
        let mut buffer = [0; 1];
        assert_eq!(Err(FsError::NonReadable), writer.read(&mut buffer));
    }

    #[test]
    fn test_initial_attributes_are_atomic() {
        let fs = full_fs();
        let file = fs.path("/f").unwrap();
        fs.create_file(&file, &[("dos:hidden", AttrValue::Bool(true))])
            .unwrap();
        let attrs = fs.read_attributes(&file, "dos:hidden").unwrap();
        assert_eq!(Some(&AttrValue::Bool(true)), attrs.get("hidden"));
        let bad = fs.path("/bad").unwrap();
        assert!(matches!(
            fs.create_file(&bad, &[("dos:nonsense", AttrValue::Bool(true))]),
            Err(FsError::IllegalArgument(_))
        ));
        assert!(!fs.exists(&bad).unwrap());
    }

    #[test]
    fn test_read_attributes_request_string() {
        let fs = full_fs();
        let file = fs.path("/f").unwrap();
        fs.create_file(&file, &[]).unwrap();
        let attrs = fs.read_attributes(&file, "dos:hidden,size").unwrap();
        assert_eq!(Some(&AttrValue::Bool(false)), attrs.get("hidden"));
        assert_eq!(Some(&AttrValue::Size(0)), attrs.get("size"));
        assert_eq!(
            vec![
                ViewKind::Basic,
                ViewKind::Posix,
                ViewKind::Dos,
                ViewKind::Acl,
                ViewKind::Owner,
                ViewKind::User
            ],
            fs.supported_views()
        );
        let all = fs.read_attributes(&file, "posix:*").unwrap();
        assert!(all.contains_key("owner"));
        assert!(all.contains_key("permissions"));
        assert!(all.contains_key("size"));
        assert!(matches!(
            fs.read_attributes(&file, "ntfs:flags"),
            Err(FsError::Unsupported(_))
        ));
    }

    #[test]
    fn test_owner_and_group_changes_require_write() {
        let mut config = full_config();
        config.users.push("outsider".to_owned());
        let fs = MemoryFs::new("memory:test", config).unwrap();
        let file = fs.path("/f").unwrap();
        fs.create_file(&file, &[]).unwrap();
        let outsider = fs.lookup_user("outsider").unwrap();
        // Dropping the owner's write bit blocks chown even for the owner.
        fs.set_permissions(&file, 0o400).unwrap();
        assert_eq!(
            Err(FsError::AccessDenied("/f".to_owned())),
            fs.set_owner(&file, outsider.clone())
        );
        fs.set_permissions(&file, 0o600).unwrap();
        // The DOS read-only flag vetoes writes too, and flipping it needs no
        // write access.
        fs.set_attribute(&file, "dos:read_only", AttrValue::Bool(true))
            .unwrap();
        assert_eq!(
            Err(FsError::AccessDenied("/f".to_owned())),
            fs.set_owner(&file, outsider.clone())
        );
        fs.set_attribute(&file, "dos:read_only", AttrValue::Bool(false))
            .unwrap();
        fs.set_owner(&file, outsider).unwrap();
        let owner = fs.read_attributes(&file, "owner:owner").unwrap();
        assert_eq!(
            Some(&AttrValue::User(fs.lookup_user("outsider").unwrap())),
            owner.get("owner")
        );
    }

    #[test]
    fn test_acl_scan_order() {
        let fs = full_fs();
        let file = fs.path("/f").unwrap();
        fs.create_file(&file, &[]).unwrap();
        let me = fs.lookup_user("user").unwrap();
        fs.set_acl(
            &file,
            vec![AclEntry::deny(me.clone(), vec![AclPerm::Write])],
        )
        .unwrap();
        assert_eq!(
            Err(FsError::AccessDenied("/f".to_owned())),
            fs.check_access(&file, &[AccessMode::Write])
        );
        fs.set_acl(
            &file,
            vec![
                AclEntry::allow(me.clone(), vec![AclPerm::Write]),
                AclEntry::deny(me.clone(), vec![AclPerm::Write]),
            ],
        )
        .unwrap();
        fs.check_access(&file, &[AccessMode::Write]).unwrap();
        // A DENY on WRITE_ACL freezes the list.
        fs.set_acl(&file, vec![AclEntry::deny(me.clone(), vec![AclPerm::WriteAcl])])
            .unwrap();
        assert_eq!(
            Err(FsError::AccessDenied("/f".to_owned())),
            fs.set_acl(&file, vec![])
        );
        assert_eq!(1, fs.acl(&file).unwrap().len());
    }

    #[test]
    fn test_relative_paths_resolve_against_default_directory() {
        let mut config = Config::posix();
        config.default_directory = "/work".to_owned();
        let fs = MemoryFs::new("memory:test", config).unwrap();
        assert!(fs.is_directory(&fs.path("/work").unwrap()).unwrap());
        fs.create_file(&fs.path("notes.txt").unwrap(), &[]).unwrap();
        assert!(fs.exists(&fs.path("/work/notes.txt").unwrap()).unwrap());
        assert_eq!("/work", fs.default_directory().to_string());
    }

    #[test]
    fn test_multiple_windows_roots() {
        let mut config = Config::windows();
        config.roots = vec!["C:\\".to_owned(), "D:\\".to_owned()];
        let fs = MemoryFs::new("memory:test", config).unwrap();
        assert_eq!(2, fs.root_directories().len());
        fs.create_file(&fs.path("D:\\data").unwrap(), &[]).unwrap();
        assert!(fs.exists(&fs.path("d:\\DATA").unwrap()).unwrap());
        assert_eq!(
            Err(FsError::NoSuchFile("E:\\".to_owned())),
            fs.metadata(&fs.path("E:\\x").unwrap(), true)
        );
    }

    #[test]
    fn test_to_real_path_of_root() {
        let fs = posix_fs();
        assert_eq!("/", fs.to_real_path(&fs.path("/").unwrap()).unwrap().to_string());
    }

    #[test]
    fn test_closed_filesystem_is_terminal() {
        let fs = posix_fs();
        let file = fs.path("/f").unwrap();
        let handle = fs
            .open(&file, &[OpenFlag::Read, OpenFlag::Write, OpenFlag::Create])
            .unwrap();
        let watch = fs.watch(&fs.path("/").unwrap()).unwrap();
        let before = fs.path("/f").unwrap();
        fs.close();
        fs.close();
        assert!(!fs.is_open());
        assert_eq!(Err(FsError::ClosedFilesystem), fs.create_file(&file, &[]));
        assert_eq!(Err(FsError::ClosedFilesystem), fs.delete(&file));
        assert_eq!(
            Err(FsError::ClosedFilesystem),
            fs.metadata(&file, true).map(|_| ())
        );
        assert_eq!(
            Err(FsError::ClosedFilesystem),
            fs.read_directory(&fs.path("/").unwrap()).map(|_| ())
        );
        assert_eq!(Err(FsError::ClosedFilesystem), fs.exists(&file).map(|_| ()));
        assert_eq!(Err(FsError::ClosedFilesystem), handle.write(b"x").map(|_| ()));
        let mut buffer = [0; 1];
        assert_eq!(
            Err(FsError::ClosedFilesystem),
            handle.read(&mut buffer).map(|_| ())
        );
        assert_eq!(Err(FsError::ClosedWatch), watch.ensure_open());
        // Paths stay comparable and renderable.
        assert_eq!(before, file);
        assert_eq!("/f", file.to_string());
    }

    #[test]
    fn test_concurrent_create_single_winner() {
        let fs = posix_fs();
        let barrier = Arc::new(Barrier::new(8));
        let mut workers = Vec::new();
        for _ in 0..8 {
            let fs = Arc::clone(&fs);
            let barrier = Arc::clone(&barrier);
            workers.push(thread::spawn(move || {
                let path = fs.path("/race").unwrap();
                barrier.wait();
                fs.create_file(&path, &[])
            }));
        }
        let results: Vec<_> = workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect();
        assert_eq!(1, results.iter().filter(|result| result.is_ok()).count());
        for result in results {
            if let Err(err) = result {
                assert_eq!(FsError::AlreadyExists("/race".to_owned()), err);
            }
        }
        assert_eq!(1, fs.read_directory(&fs.path("/").unwrap()).unwrap().len());
    }

    #[test]
    fn test_concurrent_appends_preserve_every_byte() {
        let fs = posix_fs();
        let file = fs.path("/log").unwrap();
        fs.create_file(&file, &[]).unwrap();
        let mut expected = 0u64;
        for seed in 0..4u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            for _ in 0..50 {
                expected += rng.gen_range(1..=8usize) as u64;
            }
        }
        let mut workers = Vec::new();
        for seed in 0..4u64 {
            let fs = Arc::clone(&fs);
            let file = file.clone();
            workers.push(thread::spawn(move || {
                let handle = fs.open(&file, &[OpenFlag::Append]).unwrap();
                let mut rng = StdRng::seed_from_u64(seed);
                for _ in 0..50 {
                    let len = rng.gen_range(1..=8usize);
                    assert_eq!(len, handle.write(&vec![b'x'; len]).unwrap());
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }
        let reader = fs.open(&file, &[OpenFlag::Read]).unwrap();
        assert_eq!(expected, reader.size().unwrap());
    }

    #[test]
    fn test_user_attributes_round_trip() {
        let fs = full_fs();
        let file = fs.path("/f").unwrap();
        fs.create_file(&file, &[]).unwrap();
        fs.write_user_attribute(&file, "checksum", b"abc123").unwrap();
        assert_eq!(vec!["checksum".to_owned()], fs.list_user_attributes(&file).unwrap());
        let mut small = [0; 2];
        assert_eq!(
            Err(FsError::BufferTooSmall {
                needed: 6,
                remaining: 2
            }),
            fs.read_user_attribute(&file, "checksum", &mut small)
        );
        fs.remove_user_attribute(&file, "checksum").unwrap();
        assert!(fs.list_user_attributes(&file).unwrap().is_empty());
    }
}
