use crate::error::{ACLError, FLAG_DELETE, FLAG_WRITE};
use crate::iter::RawACLIterator;
use crate::util::{check_pointer, check_return, path_to_cstring, AutoPtr};
use crate::Qualifier::*;
use crate::{entries_to_text, ACLEntry, Qualifier, ACL_RWX};
use acl_sys::{
    acl_add_perm, acl_calc_mask, acl_clear_perms, acl_create_entry, acl_delete_def_file,
    acl_delete_entry, acl_entry_t, acl_get_file, acl_get_permset, acl_init, acl_permset_t,
    acl_set_file, acl_set_permset, acl_set_qualifier, acl_set_tag_type, acl_t, acl_to_text,
    acl_type_t, acl_valid, ACL_TYPE_ACCESS, ACL_TYPE_DEFAULT,
};
use libc::ssize_t;
use std::fmt;
use std::os::raw::c_void;
use std::path::Path;
use std::ptr::null_mut;
use std::slice::from_raw_parts;

/// The ACL of a file.
///
/// Implements a "mapping-like" interface where key is the `Qualifier` enum and value is `u32`
/// containing permission bits.
/// Using methods `get(qual) -> perms`, `set(qual, perms)`, `remove(qual)`.
#[allow(clippy::upper_case_acronyms)]
pub struct PosixACL {
    pub(crate) acl: acl_t,
}

/// Compact numeric form, e.g. `PosixACL("u::rw-,g::r--,o::---")`.
impl fmt::Debug for PosixACL {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_tuple("PosixACL")
            .field(&self.compact_text())
            .finish()
    }
}

impl Drop for PosixACL {
    fn drop(&mut self) {
        AutoPtr(self.acl);
    }
}

/// Two ACLs are equal when they hold the same entries, whatever order libacl keeps them in.
impl PartialEq for PosixACL {
    fn eq(&self, other: &Self) -> bool {
        self.entries_sorted() == other.entries_sorted()
    }
}

impl PosixACL {
    /// Convert a file mode ("chmod" number) into a "minimal" ACL.
    /// Note that modes are usually expressed in octal, e.g. `PosixACL::new(0o644)`
    ///
    /// Input bits higher than 9 (e.g. SUID flag, etc) are ignored.
    ///
    /// ```
    /// use licorn_compliance::PosixACL;
    /// assert_eq!(PosixACL::new(0o751).compact_text(), "u::rwx,g::r-x,o::--x");
    /// ```
    #[must_use]
    pub fn new(file_mode: u32) -> PosixACL {
        let mut acl = PosixACL::empty();
        acl.set(UserObj, (file_mode >> 6) & ACL_RWX);
        acl.set(GroupObj, (file_mode >> 3) & ACL_RWX);
        acl.set(Other, file_mode & ACL_RWX);
        acl
    }

    /// Create an empty ACL. NB! Empty ACLs are NOT considered valid.
    #[must_use]
    pub fn empty() -> PosixACL {
        PosixACL::with_capacity(6)
    }

    /// Create an empty ACL with capacity. NB! Empty ACLs are NOT considered valid.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> PosixACL {
        let acl = unsafe { acl_init(capacity as i32) };
        check_pointer(acl, "acl_init");
        PosixACL { acl }
    }

    /// Build an ACL holding exactly `entries`. Nothing is validated nor recomputed.
    #[must_use]
    pub fn from_entries(entries: &[ACLEntry]) -> PosixACL {
        let mut acl = PosixACL::with_capacity(entries.len());
        for entry in entries {
            acl.set(entry.qual, entry.perm);
        }
        acl
    }

    /// Read a path's access ACL. Symlinks are followed by libacl, callers must not pass them.
    ///
    /// It is NOT an error if the path has no ACL; the minimal ACL mirroring its mode is returned.
    ///
    /// # Errors
    /// * `ACLError::IoError`: Filesystem errors (file not found, permission denied, `ENOTSUP`).
    pub fn read_acl<P: AsRef<Path>>(path: P) -> Result<PosixACL, ACLError> {
        Self::read_acl_flags(path.as_ref(), ACL_TYPE_ACCESS)
    }

    /// Read a directory's default ACL, the one inherited by newly created entries.
    /// An empty ACL is returned if none is set. Fails on non-directories.
    ///
    /// # Errors
    /// * `ACLError::IoError`: Filesystem errors (file not found, permission denied, `ENOTSUP`).
    pub fn read_default_acl<P: AsRef<Path>>(path: P) -> Result<PosixACL, ACLError> {
        Self::read_acl_flags(path.as_ref(), ACL_TYPE_DEFAULT)
    }

    fn read_acl_flags(path: &Path, flags: acl_type_t) -> Result<PosixACL, ACLError> {
        let c_path = path_to_cstring(path).map_err(|err| ACLError::io(err, flags))?;
        let acl: acl_t = unsafe { acl_get_file(c_path.as_ptr(), flags) };
        if acl.is_null() {
            Err(ACLError::last_os_error(flags))
        } else {
            Ok(PosixACL { acl })
        }
    }

    /// Re-calculate the mask, validate and write this ACL to a path's access ACL.
    ///
    /// # Errors
    /// * `ACLError::IoError`: Filesystem errors (file not found, permission denied, etc).
    /// * `ACLError::ValidationError`: The ACL failed validation.
    pub fn write_acl<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ACLError> {
        self.fix_mask();
        self.write_acl_flags(path.as_ref(), ACL_TYPE_ACCESS)
    }

    /// Same as [`PosixACL::write_acl()`], for a directory's default ACL.
    ///
    /// # Errors
    /// See [`PosixACL::write_acl()`].
    pub fn write_default_acl<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ACLError> {
        self.fix_mask();
        self.write_acl_flags(path.as_ref(), ACL_TYPE_DEFAULT)
    }

    /// Validate and write this ACL as is. A policy spelling out its own `Mask` entry keeps it,
    /// unlike [`PosixACL::write_acl()`] which would recompute it from the group class.
    ///
    /// # Errors
    /// See [`PosixACL::write_acl()`].
    pub fn write_exact_acl<P: AsRef<Path>>(&self, path: P, default: bool) -> Result<(), ACLError> {
        let flags = if default {
            ACL_TYPE_DEFAULT
        } else {
            ACL_TYPE_ACCESS
        };
        self.write_acl_flags(path.as_ref(), flags)
    }

    fn write_acl_flags(&self, path: &Path, flags: acl_type_t) -> Result<(), ACLError> {
        let c_path = path_to_cstring(path).map_err(|err| ACLError::io(err, FLAG_WRITE | flags))?;
        self.validate()?;
        let ret = unsafe { acl_set_file(c_path.as_ptr(), flags, self.acl) };
        if ret == 0 {
            Ok(())
        } else {
            Err(ACLError::last_os_error(FLAG_WRITE | flags))
        }
    }

    /// Remove the default ACL of a directory. Succeeds if there was none.
    ///
    /// # Errors
    /// * `ACLError::IoError`: Filesystem errors.
    pub fn delete_default_acl<P: AsRef<Path>>(path: P) -> Result<(), ACLError> {
        let flags = FLAG_DELETE | ACL_TYPE_DEFAULT;
        let c_path = path_to_cstring(path.as_ref()).map_err(|err| ACLError::io(err, flags))?;
        let ret = unsafe { acl_delete_def_file(c_path.as_ptr()) };
        if ret == 0 {
            Ok(())
        } else {
            Err(ACLError::last_os_error(flags))
        }
    }

    /// Iterator of `acl_entry_t`, unsafe
    pub(crate) unsafe fn raw_iter(&self) -> RawACLIterator<'_> {
        RawACLIterator::new(self)
    }

    /// Get all `ACLEntry` items. The POSIX ACL C API does not allow multiple parallel iterators so we
    /// return a materialized vector just to be safe.
    pub fn entries(&self) -> Vec<ACLEntry> {
        unsafe { self.raw_iter() }
            .map(ACLEntry::from_entry)
            .collect()
    }

    /// Entries in canonical `Qualifier` order.
    pub fn entries_sorted(&self) -> Vec<ACLEntry> {
        let mut entries = self.entries();
        entries.sort();
        entries
    }

    /// An ACL is "extended" when it carries more than the three mode-mirroring entries.
    #[must_use]
    pub fn is_extended(&self) -> bool {
        self.entries()
            .iter()
            .any(|entry| entry.qual == Mask || entry.qual.is_named())
    }

    /// Get the current `perm` value of `qual`, if any.
    #[must_use]
    pub fn get(&self, qual: Qualifier) -> Option<u32> {
        let entry = self.raw_get_entry(&qual)?;
        Some(ACLEntry::from_entry(entry).perm)
    }

    /// Set the permission of `qual` to `perm`. If this `qual` already exists, it is updated,
    /// otherwise a new one is added.
    ///
    /// `perm` must be a combination of the `ACL_` constants, combined by binary OR.
    pub fn set(&mut self, qual: Qualifier, perm: u32) {
        let entry = match self.raw_get_entry(&qual) {
            Some(v) => v,
            None => self.raw_add_entry(&qual),
        };

        Self::raw_set_permset(entry, perm);
    }

    /// Remove entry with matching `qual`. If found, returns the matching `perm`, otherwise `None`
    pub fn remove(&mut self, qual: Qualifier) -> Option<u32> {
        let entry = self.raw_get_entry(&qual)?;
        let wrapped = ACLEntry::from_entry(entry);

        unsafe {
            check_return(acl_delete_entry(self.acl, entry), "acl_delete_entry");
        }

        Some(wrapped.perm)
    }

    fn raw_set_permset(entry: acl_entry_t, perm: u32) {
        unsafe {
            let mut permset: acl_permset_t = null_mut();
            check_return(acl_get_permset(entry, &mut permset), "acl_get_permset");
            check_return(acl_clear_perms(permset), "acl_clear_perms");
            check_return(acl_add_perm(permset, perm), "acl_add_perm");
            check_return(acl_set_permset(entry, permset), "acl_set_permset");
        }
    }

    fn raw_get_entry(&self, qual: &Qualifier) -> Option<acl_entry_t> {
        unsafe { self.raw_iter() }.find(|&entry| Qualifier::from_entry(entry) == *qual)
    }

    fn raw_add_entry(&mut self, qual: &Qualifier) -> acl_entry_t {
        let mut entry: acl_entry_t = null_mut();
        unsafe {
            check_return(
                acl_create_entry(&mut self.acl, &mut entry),
                "acl_create_entry",
            );
            check_return(acl_set_tag_type(entry, qual.tag_type()), "acl_set_tag_type");
            if let Some(uid) = qual.uid() {
                check_return(
                    acl_set_qualifier(entry, &uid as *const u32 as *const c_void),
                    "acl_set_qualifier",
                );
            }
        }
        entry
    }

    /// Re-calculate the `Qualifier::Mask` entry as the union of the group class.
    pub fn fix_mask(&mut self) {
        unsafe {
            check_return(acl_calc_mask(&mut self.acl), "acl_calc_mask");
        }
    }

    /// Return the platform's textual representation of the ACL, one entry per line.
    ///
    /// UID/GID are resolved to names by the platform, so the output depends on the host's user
    /// database. Use [`PosixACL::compact_text()`] for comparisons and log messages.
    #[must_use]
    pub fn as_text(&self) -> String {
        let mut len: ssize_t = 0;
        let txt = AutoPtr(unsafe { acl_to_text(self.acl, &mut len) });
        check_pointer(txt.0, "acl_to_text");
        let chars = unsafe { from_raw_parts(txt.0 as *const u8, len as usize) };

        String::from_utf8_lossy(chars).into_owned()
    }

    /// Canonical short text, numeric ids: `u::rwx,g::---,o::---,g:5000:rwx,m::rwx`.
    #[must_use]
    pub fn compact_text(&self) -> String {
        entries_to_text(&self.entries())
    }

    /// Call the platform's validation function (`acl_valid()`).
    ///
    /// An ACL is rejected when one of `UserObj`, `GroupObj`, `Other` is missing, when it has
    /// named entries but no `Mask`, or when a qualifier appears twice.
    ///
    /// # Errors
    /// * `ACLError::ValidationError`: The ACL failed validation.
    pub fn validate(&self) -> Result<(), ACLError> {
        let ret = unsafe { acl_valid(self.acl) };
        if ret == 0 {
            Ok(())
        } else {
            Err(ACLError::ValidationError(self.compact_text()))
        }
    }
}
