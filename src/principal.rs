/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::RefCell;
use std::fmt::Display;

use crate::error::{FsError, FsResult};

/// A named user, bound to one filesystem instance.
///
/// Two principals are equal iff they carry the same name and belong to the
/// same filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserPrincipal {
    name: String,
    fs_id: u64,
}

/// A named group, bound to one filesystem instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupPrincipal {
    name: String,
    fs_id: u64,
}

impl UserPrincipal {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl GroupPrincipal {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for UserPrincipal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl Display for GroupPrincipal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Either kind of principal, as referenced by ACL entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    User(UserPrincipal),
    Group(GroupPrincipal),
}

impl From<UserPrincipal> for Principal {
    fn from(value: UserPrincipal) -> Self {
        Principal::User(value)
    }
}

impl From<GroupPrincipal> for Principal {
    fn from(value: GroupPrincipal) -> Self {
        Principal::Group(value)
    }
}

thread_local! {
    static OVERRIDES: RefCell<Vec<(UserPrincipal, GroupPrincipal)>> = const { RefCell::new(Vec::new()) };
}

/// Registry of the user and group names one filesystem knows about.
#[derive(Debug)]
pub struct PrincipalService {
    fs_id: u64,
    users: Vec<String>,
    groups: Vec<String>,
    default_user: String,
    default_group: String,
}

impl PrincipalService {
    pub(crate) fn new(
        fs_id: u64,
        users: Vec<String>,
        groups: Vec<String>,
        default_user: String,
        default_group: String,
    ) -> Self {
        PrincipalService {
            fs_id,
            users,
            groups,
            default_user,
            default_group,
        }
    }

    /// Resolves a registered user name to a principal.
    pub fn lookup_user(&self, name: &str) -> FsResult<UserPrincipal> {
        if !self.users.iter().any(|user| user == name) {
            return Err(FsError::NotFound(name.to_owned()));
        }
        Ok(UserPrincipal {
            name: name.to_owned(),
            fs_id: self.fs_id,
        })
    }

    /// Resolves a registered group name to a principal.
    pub fn lookup_group(&self, name: &str) -> FsResult<GroupPrincipal> {
        if !self.groups.iter().any(|group| group == name) {
            return Err(FsError::NotFound(name.to_owned()));
        }
        Ok(GroupPrincipal {
            name: name.to_owned(),
            fs_id: self.fs_id,
        })
    }

    pub fn default_user(&self) -> UserPrincipal {
        UserPrincipal {
            name: self.default_user.clone(),
            fs_id: self.fs_id,
        }
    }

    pub fn default_group(&self) -> GroupPrincipal {
        GroupPrincipal {
            name: self.default_group.clone(),
            fs_id: self.fs_id,
        }
    }

    /// The principal pair access checks run against on this thread: the top
    /// of the override stack, or the filesystem defaults when empty.
    pub fn current(&self) -> (UserPrincipal, GroupPrincipal) {
        OVERRIDES.with(|stack| {
            stack
                .borrow()
                .last()
                .cloned()
                .unwrap_or_else(|| (self.default_user(), self.default_group()))
        })
    }

    /// Overrides the current principals for the lifetime of the returned
    /// guard. Overrides nest; dropping the guard restores the previous top.
    pub fn push_current(&self, user: UserPrincipal, group: GroupPrincipal) -> PrincipalGuard {
        let depth = OVERRIDES.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push((user, group));
            stack.len()
        });
        PrincipalGuard { depth }
    }
}

/// Scope guard for a principal override; popping happens on drop, on every
/// exit path.
#[derive(Debug)]
pub struct PrincipalGuard {
    depth: usize,
}

impl Drop for PrincipalGuard {
    fn drop(&mut self) {
        OVERRIDES.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.truncate(self.depth - 1);
        });
    }
}
