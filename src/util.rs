//! This file is for small helpers & utilities that aren't exported by the library.
use acl_sys::acl_free;
use std::ffi::CString;
use std::fs::Metadata;
use std::io;
use std::os::raw::c_void;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Owner execute bit of `st_mode`.
pub(crate) const S_IXUSR: u32 = 0o100;
/// Group execute bit of `st_mode`.
pub(crate) const S_IXGRP: u32 = 0o010;
/// Permission bits, including setuid/setgid/sticky.
pub(crate) const MODE_MASK: u32 = 0o7777;

/// NB! Unix-only. Paths coming from the filesystem never contain NUL bytes, but the ones typed
/// into a descriptor could.
pub(crate) fn path_to_cstring(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))
}

/// Safe wrapper around C pointers to automatically free when going out of scope.
pub(crate) struct AutoPtr<T>(pub(crate) *mut T);

impl<T> Drop for AutoPtr<T> {
    fn drop(&mut self) {
        let ret = unsafe { acl_free(self.0 as *mut c_void) };
        check_return(ret, "acl_free");
    }
}

pub(crate) fn check_return(ret: i32, func: &str) {
    if ret != 0 {
        panic!("Error in {}: {}", func, io::Error::last_os_error());
    }
}

pub(crate) fn check_pointer<T: ?Sized>(ret: *const T, func: &str) {
    if ret.is_null() {
        panic!("Error in {}: {}", func, io::Error::last_os_error());
    }
}

/// `(owner_exec, group_exec)` bits of an `lstat()` result.
pub(crate) fn exec_bits(meta: &Metadata) -> (bool, bool) {
    let mode = meta.mode();
    (mode & S_IXUSR != 0, mode & S_IXGRP != 0)
}

/// `ls -l` style rendering of the 12 permission bits, e.g. `rwxr-s---`.
pub(crate) fn mode_to_text(mode: u32) -> String {
    let bit = |mask: u32, c: char| if mode & mask != 0 { c } else { '-' };
    let exec = |x: u32, special: u32, set: char, unset: char| {
        match (mode & x != 0, mode & special != 0) {
            (true, true) => set,
            (false, true) => unset,
            (true, false) => 'x',
            (false, false) => '-',
        }
    };
    [
        bit(0o400, 'r'),
        bit(0o200, 'w'),
        exec(0o100, 0o4000, 's', 'S'),
        bit(0o040, 'r'),
        bit(0o020, 'w'),
        exec(0o010, 0o2000, 's', 'S'),
        bit(0o004, 'r'),
        bit(0o002, 'w'),
        exec(0o001, 0o1000, 't', 'T'),
    ]
    .iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_text() {
        assert_eq!(mode_to_text(0o644), "rw-r--r--");
        assert_eq!(mode_to_text(0o2770), "rwxrws---");
        assert_eq!(mode_to_text(0o1777), "rwxrwxrwt");
        assert_eq!(mode_to_text(0o4600), "rwS------");
    }

    #[test]
    fn nul_path_is_rejected() {
        let path = Path::new(std::ffi::OsStr::from_bytes(b"a\0b"));
        assert_eq!(
            path_to_cstring(path).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }
}
