/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

pub mod acl;
pub mod basic;
pub mod dos;
pub mod posix;
pub mod user;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{FsError, FsResult};
use crate::flags::AccessMode;
use crate::principal::{GroupPrincipal, UserPrincipal};

use acl::{AclAttrs, AclEntry, AclPerm};
use basic::BasicAttributes;
use dos::DosAttrs;
use posix::PosixAttrs;
use user::UserAttrs;

/// Canonical view names an attribute request can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewKind {
    Basic,
    Posix,
    Dos,
    Acl,
    Owner,
    User,
}

impl ViewKind {
    pub fn from_name(name: &str) -> Option<ViewKind> {
        match name {
            "basic" => Some(ViewKind::Basic),
            "posix" => Some(ViewKind::Posix),
            "dos" => Some(ViewKind::Dos),
            "acl" => Some(ViewKind::Acl),
            "owner" => Some(ViewKind::Owner),
            "user" => Some(ViewKind::User),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ViewKind::Basic => "basic",
            ViewKind::Posix => "posix",
            ViewKind::Dos => "dos",
            ViewKind::Acl => "acl",
            ViewKind::Owner => "owner",
            ViewKind::User => "user",
        }
    }
}

/// The optional views a filesystem attaches to new entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ViewSet {
    pub posix: bool,
    pub dos: bool,
    pub acl: bool,
    pub user: bool,
}

impl ViewSet {
    pub(crate) fn from_views(views: &[ViewKind]) -> Self {
        let mut set = ViewSet::default();
        for view in views {
            match view {
                ViewKind::Posix => set.posix = true,
                ViewKind::Dos => set.dos = true,
                ViewKind::Acl => set.acl = true,
                ViewKind::User => set.user = true,
                ViewKind::Basic | ViewKind::Owner => {}
            }
        }
        set
    }
}

/// A typed attribute value, as returned by `read_attributes` and accepted by
/// `set_attribute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Bool(bool),
    Size(u64),
    Time(basic::FileTime),
    Mode(u32),
    Bytes(Vec<u8>),
    User(UserPrincipal),
    Group(GroupPrincipal),
    Acl(Vec<AclEntry>),
}

/// Parsed form of an attribute request such as `"dos:hidden,size"`: one view
/// prefix (defaulting to `basic`) and the fields it filters to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrSpec {
    pub view: ViewKind,
    pub fields: Vec<String>,
    pub all: bool,
}

impl AttrSpec {
    pub fn parse(input: &str) -> FsResult<AttrSpec> {
        let (view_name, field_list) = match input.split_once(':') {
            Some((view, fields)) => (view, fields),
            None => ("basic", input),
        };
        let view = ViewKind::from_name(view_name)
            .ok_or_else(|| FsError::Unsupported(format!("attribute view '{}'", view_name)))?;
        let mut fields = Vec::new();
        let mut all = false;
        for field in field_list.split(',') {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            if field == "*" {
                all = true;
            } else {
                fields.push(field.to_owned());
            }
        }
        if fields.is_empty() && !all {
            return Err(FsError::IllegalArgument(format!(
                "no attributes named in '{}'",
                input
            )));
        }
        Ok(AttrSpec { view, fields, all })
    }
}

/// The principal pair an access check runs against.
#[derive(Debug, Clone)]
pub(crate) struct AccessContext {
    pub user: UserPrincipal,
    pub group: GroupPrincipal,
}

/// Per-entry bundle of optional views. `basic` is not stored here: its data
/// (name, timestamps, payload) lives on the entry itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct AttrBundle {
    pub posix: Option<PosixAttrs>,
    pub dos: Option<DosAttrs>,
    pub acl: Option<AclAttrs>,
    pub user: Option<UserAttrs>,
}

impl AttrBundle {
    /// Builds the bundle for a newly created entry from the filesystem's
    /// configured view set. Directories get the execute bits OR-ed into the
    /// umask so they stay traversable.
    pub(crate) fn for_new_entry(
        views: ViewSet,
        owner: UserPrincipal,
        group: GroupPrincipal,
        umask: u32,
        is_directory: bool,
        is_root: bool,
    ) -> Self {
        let mode = if is_directory { umask | 0o111 } else { umask };
        AttrBundle {
            posix: views
                .posix
                .then(|| PosixAttrs::new(owner.clone(), group, mode)),
            dos: views.dos.then(|| DosAttrs::new(is_root)),
            acl: views.acl.then(|| AclAttrs::new(owner)),
            user: views.user.then(UserAttrs::default),
        }
    }

    /// Owner per the precedence rule: `posix` when present, else `acl`.
    pub(crate) fn owner(&self) -> FsResult<&UserPrincipal> {
        if let Some(posix) = &self.posix {
            return Ok(posix.owner());
        }
        if let Some(acl) = &self.acl {
            return Ok(acl.owner());
        }
        Err(FsError::Unsupported("attribute view 'owner'".to_owned()))
    }

    pub(crate) fn set_owner(&mut self, owner: UserPrincipal) -> FsResult<()> {
        if let Some(posix) = &mut self.posix {
            posix.set_owner(owner);
            return Ok(());
        }
        if let Some(acl) = &mut self.acl {
            acl.set_owner(owner);
            return Ok(());
        }
        Err(FsError::Unsupported("attribute view 'owner'".to_owned()))
    }

    /// Conjunction of every access-check-capable view. `basic` always
    /// grants, so it contributes nothing; the others veto in turn.
    pub(crate) fn check_access(
        &self,
        ctx: &AccessContext,
        modes: &[AccessMode],
        path: &str,
    ) -> FsResult<()> {
        if let Some(dos) = &self.dos {
            dos.check_access(modes, path)?;
        }
        if let Some(posix) = &self.posix {
            posix.check_access(ctx, modes, path)?;
        }
        if let Some(acl) = &self.acl {
            let requested: Vec<AclPerm> = modes.iter().map(|mode| acl_perm(*mode)).collect();
            acl.check(ctx, &requested, path)?;
        }
        Ok(())
    }

    fn require<'a, T>(&self, view: ViewKind, slot: &'a Option<T>) -> FsResult<&'a T> {
        slot.as_ref()
            .ok_or_else(|| FsError::Unsupported(format!("attribute view '{}'", view.name())))
    }

    fn require_mut<'a, T>(view: ViewKind, slot: &'a mut Option<T>) -> FsResult<&'a mut T> {
        slot.as_mut()
            .ok_or_else(|| FsError::Unsupported(format!("attribute view '{}'", view.name())))
    }

    /// Reads the fields a request names. Unknown fields are skipped; each
    /// view's namespace includes the basic fields, so `"dos:hidden,size"`
    /// answers both.
    pub(crate) fn read_fields(
        &self,
        spec: &AttrSpec,
        basic: &BasicAttributes,
    ) -> FsResult<BTreeMap<String, AttrValue>> {
        let mut values = BTreeMap::new();
        let fields: Vec<String> = if spec.all {
            self.all_field_names(spec.view)?
        } else {
            spec.fields.clone()
        };
        for field in &fields {
            if let Some(value) = self.read_field(spec.view, field, basic)? {
                values.insert(field.clone(), value);
            }
        }
        Ok(values)
    }

    fn all_field_names(&self, view: ViewKind) -> FsResult<Vec<String>> {
        let mut names: Vec<&str> = match view {
            ViewKind::Basic => vec![],
            ViewKind::Posix => {
                self.require(view, &self.posix)?;
                vec!["owner", "group", "permissions"]
            }
            ViewKind::Dos => {
                self.require(view, &self.dos)?;
                vec!["read_only", "hidden", "system", "archive"]
            }
            ViewKind::Acl => {
                self.require(view, &self.acl)?;
                vec!["acl", "owner"]
            }
            ViewKind::Owner => {
                self.owner()?;
                vec!["owner"]
            }
            ViewKind::User => {
                return Ok(self.require(view, &self.user)?.list());
            }
        };
        if matches!(view, ViewKind::Basic | ViewKind::Posix | ViewKind::Dos) {
            names.extend([
                "size",
                "creation_time",
                "last_access_time",
                "last_modified_time",
                "is_regular_file",
                "is_directory",
                "is_symbolic_link",
                "is_other",
                "file_key",
            ]);
        }
        Ok(names.into_iter().map(str::to_owned).collect())
    }

    fn read_field(
        &self,
        view: ViewKind,
        field: &str,
        basic: &BasicAttributes,
    ) -> FsResult<Option<AttrValue>> {
        let own = match view {
            ViewKind::Basic => None,
            ViewKind::Posix => {
                let posix = self.require(view, &self.posix)?;
                match field {
                    "owner" => Some(AttrValue::User(posix.owner().clone())),
                    "group" => Some(AttrValue::Group(posix.group().clone())),
                    "permissions" => Some(AttrValue::Mode(posix.permissions())),
                    _ => None,
                }
            }
            ViewKind::Dos => {
                let dos = self.require(view, &self.dos)?;
                match field {
                    "read_only" => Some(AttrValue::Bool(dos.read_only)),
                    "hidden" => Some(AttrValue::Bool(dos.hidden)),
                    "system" => Some(AttrValue::Bool(dos.system)),
                    "archive" => Some(AttrValue::Bool(dos.archive)),
                    _ => None,
                }
            }
            ViewKind::Acl => {
                let acl = self.require(view, &self.acl)?;
                match field {
                    "acl" => Some(AttrValue::Acl(acl.entries().to_vec())),
                    "owner" => Some(AttrValue::User(acl.owner().clone())),
                    _ => None,
                }
            }
            ViewKind::Owner => match field {
                "owner" => Some(AttrValue::User(self.owner()?.clone())),
                _ => None,
            },
            ViewKind::User => {
                let user = self.require(view, &self.user)?;
                match user.get(field) {
                    Ok(value) => Some(AttrValue::Bytes(value.to_vec())),
                    Err(_) => None,
                }
            }
        };
        if own.is_some() {
            return Ok(own);
        }
        if matches!(view, ViewKind::Basic | ViewKind::Posix | ViewKind::Dos) {
            return Ok(basic_field(field, basic));
        }
        Ok(None)
    }

    /// Writes one view field. Unknown fields fail, unlike reads.
    pub(crate) fn write_field(
        &mut self,
        view: ViewKind,
        field: &str,
        value: AttrValue,
    ) -> FsResult<()> {
        match view {
            ViewKind::Posix => {
                let posix = Self::require_mut(view, &mut self.posix)?;
                match (field, value) {
                    ("permissions", AttrValue::Mode(mode)) => posix.set_permissions(mode),
                    ("owner", AttrValue::User(owner)) => {
                        posix.set_owner(owner);
                        Ok(())
                    }
                    ("group", AttrValue::Group(group)) => {
                        posix.set_group(group);
                        Ok(())
                    }
                    (field, value) => Err(illegal_field(view, field, &value)),
                }
            }
            ViewKind::Dos => {
                let dos = Self::require_mut(view, &mut self.dos)?;
                match (field, value) {
                    ("read_only", AttrValue::Bool(flag)) => {
                        dos.read_only = flag;
                        Ok(())
                    }
                    ("hidden", AttrValue::Bool(flag)) => {
                        dos.hidden = flag;
                        Ok(())
                    }
                    ("system", AttrValue::Bool(flag)) => {
                        dos.system = flag;
                        Ok(())
                    }
                    ("archive", AttrValue::Bool(flag)) => {
                        dos.archive = flag;
                        Ok(())
                    }
                    (field, value) => Err(illegal_field(view, field, &value)),
                }
            }
            ViewKind::Acl => {
                let acl = Self::require_mut(view, &mut self.acl)?;
                match (field, value) {
                    ("acl", AttrValue::Acl(entries)) => {
                        acl.set_entries(entries);
                        Ok(())
                    }
                    ("owner", AttrValue::User(owner)) => {
                        acl.set_owner(owner);
                        Ok(())
                    }
                    (field, value) => Err(illegal_field(view, field, &value)),
                }
            }
            ViewKind::Owner => match (field, value) {
                ("owner", AttrValue::User(owner)) => self.set_owner(owner),
                (field, value) => Err(illegal_field(view, field, &value)),
            },
            ViewKind::User => {
                let user = Self::require_mut(view, &mut self.user)?;
                match value {
                    AttrValue::Bytes(bytes) => {
                        user.write(field, &bytes);
                        Ok(())
                    }
                    value => Err(illegal_field(view, field, &value)),
                }
            }
            // Basic writes (timestamps) are handled by the entry, which owns
            // that state.
            ViewKind::Basic => Err(illegal_field(view, field, &value)),
        }
    }
}

fn illegal_field(view: ViewKind, field: &str, value: &AttrValue) -> FsError {
    FsError::IllegalArgument(format!(
        "cannot write {:?} to attribute '{}:{}'",
        value,
        view.name(),
        field
    ))
}

fn basic_field(field: &str, basic: &BasicAttributes) -> Option<AttrValue> {
    match field {
        "size" => Some(AttrValue::Size(basic.size)),
        "creation_time" => Some(AttrValue::Time(basic.creation_time)),
        "last_access_time" => Some(AttrValue::Time(basic.last_access_time)),
        "last_modified_time" => Some(AttrValue::Time(basic.last_modified_time)),
        "is_regular_file" => Some(AttrValue::Bool(basic.is_regular_file)),
        "is_directory" => Some(AttrValue::Bool(basic.is_directory)),
        "is_symbolic_link" => Some(AttrValue::Bool(basic.is_symbolic_link)),
        "is_other" => Some(AttrValue::Bool(basic.is_other())),
        "file_key" => Some(AttrValue::Size(basic.file_key)),
        _ => None,
    }
}

pub(crate) fn acl_perm(mode: AccessMode) -> AclPerm {
    match mode {
        AccessMode::Read => AclPerm::Read,
        AccessMode::Write => AclPerm::Write,
        AccessMode::Execute => AclPerm::Execute,
    }
}
