//! Read-only views of the user and group databases.
//!
//! [`SystemIdentities`] asks NSS on every lookup and backs the command line tool.
//! [`IdentitySnapshot`] is an in-memory table for tests and embedders that already hold one.
//! The descriptor builder maps names in rules to numeric ids through either, the repairers only
//! need names for messages. Nothing in this crate ever modifies a database.

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::{io, mem, ptr};
use tracing::debug;

/// The owner of a checked tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    User { uid: u32, gid: u32, name: String },
    Group { gid: u32, name: String },
}

impl Identity {
    pub fn name(&self) -> &str {
        match self {
            Identity::User { name, .. } | Identity::Group { name, .. } => name,
        }
    }

    /// Primary gid of a user, gid of a group.
    pub fn gid(&self) -> u32 {
        match self {
            Identity::User { gid, .. } | Identity::Group { gid, .. } => *gid,
        }
    }

    pub fn uid(&self) -> Option<u32> {
        match self {
            Identity::User { uid, .. } => Some(*uid),
            Identity::Group { .. } => None,
        }
    }
}

/// `resolve(name_or_id) -> Identity`, split by kind because ACL qualifiers say which one they mean.
pub trait IdentityResolver {
    fn resolve_user(&self, name_or_id: &str) -> Option<Identity>;

    fn resolve_group(&self, name_or_id: &str) -> Option<Identity>;

    fn user_name(&self, uid: u32) -> Option<String>;

    fn group_name(&self, gid: u32) -> Option<String>;

    /// `resolve_group()`, as an error when missing.
    fn require_group(&self, name_or_id: &str) -> Result<u32> {
        self.resolve_group(name_or_id)
            .map(|group| group.gid())
            .ok_or_else(|| Error::UnknownIdentity {
                kind: "group",
                name: name_or_id.to_string(),
            })
    }

    /// `resolve_user()`, as an error when missing.
    fn require_user(&self, name_or_id: &str) -> Result<u32> {
        self.resolve_user(name_or_id)
            .and_then(|user| user.uid())
            .ok_or_else(|| Error::UnknownIdentity {
                kind: "user",
                name: name_or_id.to_string(),
            })
    }

    /// Login, or the number itself when the uid has no entry.
    fn display_user(&self, uid: u32) -> String {
        self.user_name(uid).unwrap_or_else(|| uid.to_string())
    }

    /// Group name, or the number itself when the gid has no entry.
    fn display_group(&self, gid: u32) -> String {
        self.group_name(gid).unwrap_or_else(|| gid.to_string())
    }
}

/// In-memory user and group tables.
///
/// Numeric strings always resolve, even without a table entry: libacl happily stores ACL entries
/// for ids nobody owns, and so do we.
#[derive(Debug, Clone, Default)]
pub struct IdentitySnapshot {
    users: BTreeMap<u32, (String, u32)>,
    groups: BTreeMap<u32, String>,
}

impl IdentitySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `passwd(5)` and `group(5)` formatted text. Malformed lines are ignored, the way
    /// `getpwent(3)` skips them.
    pub fn parse(passwd: &str, group: &str) -> Self {
        let mut snapshot = Self::new();
        for fields in records(passwd) {
            if let (Some(name), Some(uid), Some(gid)) = (
                fields.first(),
                fields.get(2).and_then(|f| f.parse().ok()),
                fields.get(3).and_then(|f| f.parse().ok()),
            ) {
                snapshot = snapshot.with_user(name, uid, gid);
            }
        }
        for fields in records(group) {
            if let (Some(name), Some(gid)) =
                (fields.first(), fields.get(2).and_then(|f| f.parse().ok()))
            {
                snapshot = snapshot.with_group(name, gid);
            }
        }
        snapshot
    }

    #[must_use]
    pub fn with_user(mut self, name: &str, uid: u32, gid: u32) -> Self {
        self.users.insert(uid, (name.to_string(), gid));
        self
    }

    #[must_use]
    pub fn with_group(mut self, name: &str, gid: u32) -> Self {
        self.groups.insert(gid, name.to_string());
        self
    }
}

fn records(text: &str) -> impl Iterator<Item = Vec<&str>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.split(':').collect::<Vec<_>>())
}

impl IdentityResolver for IdentitySnapshot {
    fn resolve_user(&self, name_or_id: &str) -> Option<Identity> {
        if let Ok(uid) = name_or_id.parse::<u32>() {
            let (name, gid) = self
                .users
                .get(&uid)
                .cloned()
                .unwrap_or_else(|| (name_or_id.to_string(), uid));
            return Some(Identity::User { uid, gid, name });
        }
        self.users
            .iter()
            .find(|(_, (name, _))| name == name_or_id)
            .map(|(uid, (name, gid))| Identity::User {
                uid: *uid,
                gid: *gid,
                name: name.clone(),
            })
    }

    fn resolve_group(&self, name_or_id: &str) -> Option<Identity> {
        if let Ok(gid) = name_or_id.parse::<u32>() {
            let name = self
                .groups
                .get(&gid)
                .cloned()
                .unwrap_or_else(|| name_or_id.to_string());
            return Some(Identity::Group { gid, name });
        }
        self.groups
            .iter()
            .find(|(_, name)| name.as_str() == name_or_id)
            .map(|(gid, name)| Identity::Group {
                gid: *gid,
                name: name.clone(),
            })
    }

    fn user_name(&self, uid: u32) -> Option<String> {
        self.users.get(&uid).map(|(name, _)| name.clone())
    }

    fn group_name(&self, gid: u32) -> Option<String> {
        self.groups.get(&gid).cloned()
    }
}

/// The databases configured in `nsswitch.conf`, local files, LDAP or SSSD alike.
///
/// Like the snapshot, numeric strings resolve even when no entry exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentities;

const INITIAL_BUFFER: usize = 1024;
const MAX_BUFFER: usize = 1 << 20;

/// Run one reentrant `get{pw,gr}*_r()` call, growing its string buffer on `ERANGE`.
fn lookup<T, R>(
    mut call: impl FnMut(&mut T, &mut [libc::c_char], &mut *mut T) -> libc::c_int,
    read: impl FnOnce(&T) -> R,
) -> Option<R> {
    let mut buf: Vec<libc::c_char> = vec![0; INITIAL_BUFFER];
    loop {
        // Only instantiated with `passwd` and `group`, which are plain C structs.
        let mut record: T = unsafe { mem::zeroed() };
        let mut found: *mut T = ptr::null_mut();
        match call(&mut record, buf.as_mut_slice(), &mut found) {
            0 if found.is_null() => return None,
            0 => return Some(read(&record)),
            libc::ERANGE if buf.len() < MAX_BUFFER => {
                let len = buf.len() * 2;
                buf.resize(len, 0);
            }
            errno => {
                debug!("Identity lookup failed: {}", io::Error::from_raw_os_error(errno));
                return None;
            }
        }
    }
}

fn c_text(text: *const libc::c_char) -> String {
    if text.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned()
}

fn user_of(pwd: &libc::passwd) -> Identity {
    Identity::User {
        uid: pwd.pw_uid,
        gid: pwd.pw_gid,
        name: c_text(pwd.pw_name),
    }
}

fn group_of(grp: &libc::group) -> Identity {
    Identity::Group {
        gid: grp.gr_gid,
        name: c_text(grp.gr_name),
    }
}

fn user_by_uid(uid: u32) -> Option<Identity> {
    lookup(
        |pwd: &mut libc::passwd, buf: &mut [libc::c_char], found: &mut *mut libc::passwd| unsafe {
            libc::getpwuid_r(uid, pwd, buf.as_mut_ptr(), buf.len(), found)
        },
        user_of,
    )
}

fn user_by_name(name: &str) -> Option<Identity> {
    let name = CString::new(name).ok()?;
    lookup(
        |pwd: &mut libc::passwd, buf: &mut [libc::c_char], found: &mut *mut libc::passwd| unsafe {
            libc::getpwnam_r(name.as_ptr(), pwd, buf.as_mut_ptr(), buf.len(), found)
        },
        user_of,
    )
}

fn group_by_gid(gid: u32) -> Option<Identity> {
    lookup(
        |grp: &mut libc::group, buf: &mut [libc::c_char], found: &mut *mut libc::group| unsafe {
            libc::getgrgid_r(gid, grp, buf.as_mut_ptr(), buf.len(), found)
        },
        group_of,
    )
}

fn group_by_name(name: &str) -> Option<Identity> {
    let name = CString::new(name).ok()?;
    lookup(
        |grp: &mut libc::group, buf: &mut [libc::c_char], found: &mut *mut libc::group| unsafe {
            libc::getgrnam_r(name.as_ptr(), grp, buf.as_mut_ptr(), buf.len(), found)
        },
        group_of,
    )
}

impl IdentityResolver for SystemIdentities {
    fn resolve_user(&self, name_or_id: &str) -> Option<Identity> {
        match name_or_id.parse::<u32>() {
            Ok(uid) => Some(user_by_uid(uid).unwrap_or_else(|| Identity::User {
                uid,
                gid: uid,
                name: name_or_id.to_string(),
            })),
            Err(_) => user_by_name(name_or_id),
        }
    }

    fn resolve_group(&self, name_or_id: &str) -> Option<Identity> {
        match name_or_id.parse::<u32>() {
            Ok(gid) => Some(group_by_gid(gid).unwrap_or_else(|| Identity::Group {
                gid,
                name: name_or_id.to_string(),
            })),
            Err(_) => group_by_name(name_or_id),
        }
    }

    fn user_name(&self, uid: u32) -> Option<String> {
        user_by_uid(uid).map(|user| user.name().to_string())
    }

    fn group_name(&self, gid: u32) -> Option<String> {
        group_by_gid(gid).map(|group| group.name().to_string())
    }
}
