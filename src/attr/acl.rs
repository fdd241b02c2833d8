/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use crate::error::{FsError, FsResult};
use crate::principal::{Principal, UserPrincipal};

use super::AccessContext;

/// Whether an ACL entry grants or refuses its permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclKind {
    Allow,
    Deny,
}

/// Permissions an ACL entry can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclPerm {
    Read,
    Write,
    Execute,
    ReadAcl,
    WriteAcl,
}

/// `(principal, permissions, type)` triple; order within the list matters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    pub kind: AclKind,
    pub principal: Principal,
    pub permissions: Vec<AclPerm>,
}

impl AclEntry {
    pub fn allow(principal: impl Into<Principal>, permissions: Vec<AclPerm>) -> Self {
        AclEntry {
            kind: AclKind::Allow,
            principal: principal.into(),
            permissions,
        }
    }

    pub fn deny(principal: impl Into<Principal>, permissions: Vec<AclPerm>) -> Self {
        AclEntry {
            kind: AclKind::Deny,
            principal: principal.into(),
            permissions,
        }
    }

    fn matches(&self, ctx: &AccessContext) -> bool {
        match &self.principal {
            Principal::User(user) => *user == ctx.user,
            Principal::Group(group) => *group == ctx.group,
        }
    }
}

/// ACL view: an owner and an ordered entry list scanned first-match-wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclAttrs {
    owner: UserPrincipal,
    entries: Vec<AclEntry>,
}

impl AclAttrs {
    pub(crate) fn new(owner: UserPrincipal) -> Self {
        AclAttrs {
            owner,
            entries: Vec::new(),
        }
    }

    pub fn owner(&self) -> &UserPrincipal {
        &self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: UserPrincipal) {
        self.owner = owner;
    }

    pub fn entries(&self) -> &[AclEntry] {
        &self.entries
    }

    pub(crate) fn set_entries(&mut self, entries: Vec<AclEntry>) {
        self.entries = entries;
    }

    /// Scans the list in order. The first DENY naming any requested
    /// permission for a matching principal refuses; the first ALLOW covering
    /// all of them grants. A list with no verdict abstains (grants).
    pub(crate) fn check(
        &self,
        ctx: &AccessContext,
        requested: &[AclPerm],
        path: &str,
    ) -> FsResult<()> {
        for entry in &self.entries {
            if !entry.matches(ctx) {
                continue;
            }
            match entry.kind {
                AclKind::Deny => {
                    if requested.iter().any(|perm| entry.permissions.contains(perm)) {
                        return Err(FsError::AccessDenied(path.to_owned()));
                    }
                }
                AclKind::Allow => {
                    if requested.iter().all(|perm| entry.permissions.contains(perm)) {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::PrincipalService;

    fn service() -> PrincipalService {
        PrincipalService::new(
            1,
            vec!["user".to_owned(), "other".to_owned()],
            vec!["group".to_owned()],
            "user".to_owned(),
            "group".to_owned(),
        )
    }

    fn context(service: &PrincipalService) -> AccessContext {
        let (user, group) = service.current();
        AccessContext { user, group }
    }

    #[test]
    fn test_first_match_wins() {
        let principals = service();
        let me = principals.default_user();
        let mut acl = AclAttrs::new(me.clone());
        acl.set_entries(vec![
            AclEntry::deny(me.clone(), vec![AclPerm::Write]),
            AclEntry::allow(me.clone(), vec![AclPerm::Write, AclPerm::Read]),
        ]);
        let ctx = context(&principals);
        assert_eq!(
            Err(FsError::AccessDenied("/f".to_owned())),
            acl.check(&ctx, &[AclPerm::Write], "/f")
        );
        // Reversing the order flips the verdict.
        acl.set_entries(vec![
            AclEntry::allow(me.clone(), vec![AclPerm::Write, AclPerm::Read]),
            AclEntry::deny(me, vec![AclPerm::Write]),
        ]);
        acl.check(&ctx, &[AclPerm::Write], "/f").unwrap();
    }

    #[test]
    fn test_non_matching_principal_is_skipped() {
        let principals = service();
        let stranger = principals.lookup_user("other").unwrap();
        let mut acl = AclAttrs::new(principals.default_user());
        acl.set_entries(vec![AclEntry::deny(stranger, vec![AclPerm::Read])]);
        acl.check(&context(&principals), &[AclPerm::Read], "/f").unwrap();
    }

    #[test]
    fn test_group_entry_matches_current_group() {
        let principals = service();
        let group = principals.default_group();
        let mut acl = AclAttrs::new(principals.default_user());
        acl.set_entries(vec![AclEntry::deny(group, vec![AclPerm::Execute])]);
        assert_eq!(
            Err(FsError::AccessDenied("/f".to_owned())),
            acl.check(&context(&principals), &[AclPerm::Execute], "/f")
        );
    }

    #[test]
    fn test_empty_list_abstains() {
        let principals = service();
        let acl = AclAttrs::new(principals.default_user());
        acl.check(&context(&principals), &[AclPerm::Write], "/f").unwrap();
    }
}
