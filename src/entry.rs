use crate::util::{check_pointer, check_return, AutoPtr};
use crate::Qualifier::*;
use crate::{ACL_EXECUTE, ACL_READ, ACL_WRITE};
use acl_sys::{
    acl_entry_t, acl_get_permset, acl_get_qualifier, acl_get_tag_type, acl_permset_t, ACL_GROUP,
    ACL_GROUP_OBJ, ACL_MASK, ACL_OTHER, ACL_UNDEFINED_TAG, ACL_USER, ACL_USER_OBJ,
};
use std::fmt;
use std::ptr::null_mut;

/// The subject of a permission grant.
///
/// Variant order is the canonical order of entries in an ACL (the one `getfacl` prints, except
/// that `Other` comes before the named entries), which makes sorted entry lists comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Qualifier {
    /// Unrecognized/corrupt entries
    Undefined,
    /// Permissions for owner of the file
    UserObj,
    /// Permissions for owning group of the file
    GroupObj,
    /// Permissions for everyone else not covered by the ACL
    Other,
    /// Permissions for user with UID `u32` value
    User(u32),
    /// Permissions for group with GID `u32` value
    Group(u32),
    /// Caps the effective rights of `GroupObj`, `User` and `Group` entries
    Mask,
}

impl Qualifier {
    pub(crate) fn tag_type(&self) -> i32 {
        match self {
            Undefined => ACL_UNDEFINED_TAG,
            UserObj => ACL_USER_OBJ,
            GroupObj => ACL_GROUP_OBJ,
            User(_) => ACL_USER,
            Group(_) => ACL_GROUP,
            Mask => ACL_MASK,
            Other => ACL_OTHER,
        }
    }
    pub(crate) fn uid(&self) -> Option<u32> {
        match self {
            User(uid) | Group(uid) => Some(*uid),
            _ => None,
        }
    }
    /// Entries whose permissions are capped by the mask, i.e. the "group class".
    pub fn is_group_class(&self) -> bool {
        matches!(self, GroupObj | User(_) | Group(_) | Mask)
    }
    /// Named entries (`u:1000:...`, `g:5000:...`) turn a minimal ACL into an extended one.
    pub fn is_named(&self) -> bool {
        matches!(self, User(_) | Group(_))
    }
    /// Convert C type acl_entry_t to Rust Qualifier
    pub(crate) fn from_entry(entry: acl_entry_t) -> Qualifier {
        let mut tag_type = 0;
        let ret = unsafe { acl_get_tag_type(entry, &mut tag_type) };
        check_return(ret, "acl_get_tag_type");
        match tag_type {
            ACL_UNDEFINED_TAG => Undefined,
            ACL_USER_OBJ => UserObj,
            ACL_GROUP_OBJ => GroupObj,
            ACL_USER => User(Qualifier::get_entry_uid(entry)),
            ACL_GROUP => Group(Qualifier::get_entry_uid(entry)),
            ACL_MASK => Mask,
            ACL_OTHER => Other,
            _ => {
                panic!("Unexpected tag type {}", tag_type);
            }
        }
    }
    /// Helper function for from_entry()
    fn get_entry_uid(entry: acl_entry_t) -> u32 {
        unsafe {
            let uid = AutoPtr(acl_get_qualifier(entry) as *mut u32);
            check_pointer(uid.0, "acl_get_qualifier");
            *uid.0
        }
    }
}

/// Short form used in ACL text: `u::`, `u:1000:`, `g::`, `g:5000:`, `m::`, `o::`.
impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Undefined => write!(f, "?::"),
            UserObj => write!(f, "u::"),
            GroupObj => write!(f, "g::"),
            Other => write!(f, "o::"),
            User(uid) => write!(f, "u:{}:", uid),
            Group(gid) => write!(f, "g:{}:", gid),
            Mask => write!(f, "m::"),
        }
    }
}

/// Returned from [`PosixACL::entries()`](crate::PosixACL::entries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub struct ACLEntry {
    pub qual: Qualifier,
    pub perm: u32,
}

impl ACLEntry {
    pub fn new(qual: Qualifier, perm: u32) -> ACLEntry {
        ACLEntry { qual, perm }
    }

    /// Convert C type acl_entry_t to Rust ACLEntry
    pub(crate) fn from_entry(entry: acl_entry_t) -> ACLEntry {
        let perm;
        let mut permset: acl_permset_t = null_mut();
        unsafe {
            let ret = acl_get_permset(entry, &mut permset);
            check_return(ret, "acl_get_permset");
            perm = *(permset as *const u32);
        }
        ACLEntry {
            qual: Qualifier::from_entry(entry),
            perm,
        }
    }
}

impl fmt::Display for ACLEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.qual, perm_to_text(self.perm))
    }
}

/// `rwx`-style rendering of `ACL_` permission bits.
pub fn perm_to_text(perm: u32) -> String {
    [
        if perm & ACL_READ != 0 { 'r' } else { '-' },
        if perm & ACL_WRITE != 0 { 'w' } else { '-' },
        if perm & ACL_EXECUTE != 0 { 'x' } else { '-' },
    ]
    .iter()
    .collect()
}

/// Canonical short text of an entry list: sorted, comma-separated, numeric ids.
///
/// ```
/// use licorn_compliance::{entries_to_text, ACLEntry, Qualifier::*, ACL_RWX};
/// let text = entries_to_text(&[ACLEntry::new(Mask, ACL_RWX), ACLEntry::new(UserObj, ACL_RWX)]);
/// assert_eq!(text, "u::rwx,m::rwx");
/// ```
pub fn entries_to_text(entries: &[ACLEntry]) -> String {
    let mut sorted = entries.to_vec();
    sorted.sort();
    sorted
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ACL_RWX;

    #[test]
    fn canonical_order() {
        let mut quals = vec![Mask, Group(5000), Other, User(0), GroupObj, UserObj];
        quals.sort();
        assert_eq!(quals, [UserObj, GroupObj, Other, User(0), Group(5000), Mask]);
    }

    #[test]
    fn entry_text() {
        assert_eq!(ACLEntry::new(Group(5000), ACL_RWX).to_string(), "g:5000:rwx");
        assert_eq!(ACLEntry::new(Other, 0).to_string(), "o::---");
        assert_eq!(ACLEntry::new(UserObj, ACL_READ | ACL_WRITE).to_string(), "u::rw-");
    }

    #[test]
    fn group_class() {
        assert!(GroupObj.is_group_class());
        assert!(Mask.is_group_class());
        assert!(!UserObj.is_group_class());
        assert!(!Other.is_group_class());
        assert!(User(1).is_named() && Group(1).is_named());
    }
}
