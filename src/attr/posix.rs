/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use crate::error::{FsError, FsResult};
use crate::flags::AccessMode;
use crate::principal::{GroupPrincipal, UserPrincipal};

use super::AccessContext;

/// POSIX view: owner, group and a 9-bit permission mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosixAttrs {
    owner: UserPrincipal,
    group: GroupPrincipal,
    mode: u32,
}

impl PosixAttrs {
    pub(crate) fn new(owner: UserPrincipal, group: GroupPrincipal, mode: u32) -> Self {
        PosixAttrs {
            owner,
            group,
            mode: mode & 0o777,
        }
    }

    pub fn owner(&self) -> &UserPrincipal {
        &self.owner
    }

    pub fn group(&self) -> &GroupPrincipal {
        &self.group
    }

    pub fn permissions(&self) -> u32 {
        self.mode
    }

    pub(crate) fn set_owner(&mut self, owner: UserPrincipal) {
        self.owner = owner;
    }

    pub(crate) fn set_group(&mut self, group: GroupPrincipal) {
        self.group = group;
    }

    pub(crate) fn set_permissions(&mut self, mode: u32) -> FsResult<()> {
        if mode & !0o777 != 0 {
            return Err(FsError::IllegalArgument(format!(
                "permission mask {:o} has bits outside the 9-bit mask",
                mode
            )));
        }
        self.mode = mode;
        Ok(())
    }

    /// Checks the class bits matching the current principal: owner bits when
    /// the user owns the entry, group bits when the group matches, other
    /// bits otherwise.
    pub(crate) fn check_access(
        &self,
        ctx: &AccessContext,
        modes: &[AccessMode],
        path: &str,
    ) -> FsResult<()> {
        let shift = if ctx.user == self.owner {
            6
        } else if ctx.group == self.group {
            3
        } else {
            0
        };
        for mode in modes {
            let bit: u32 = match mode {
                AccessMode::Read => 0o4,
                AccessMode::Write => 0o2,
                AccessMode::Execute => 0o1,
            };
            if self.mode >> shift & bit == 0 {
                return Err(FsError::AccessDenied(path.to_owned()));
            }
        }
        Ok(())
    }
}
