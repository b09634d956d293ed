use crate::util::check_return;
use crate::PosixACL;
use acl_sys::{acl_entry_t, acl_get_entry, ACL_FIRST_ENTRY, ACL_NEXT_ENTRY};
use std::ptr::null_mut;

/// Walks the raw entries of one `acl_t`.
///
/// libacl keeps the cursor inside the ACL object itself, so two of these over the same ACL
/// interfere with each other (see `src/tests.rs`). Always materialize before iterating again.
#[allow(clippy::upper_case_acronyms)]
pub(crate) struct RawACLIterator<'a> {
    acl: &'a PosixACL,
    next: i32,
}

impl<'a> RawACLIterator<'a> {
    pub(crate) fn new(acl: &'a PosixACL) -> RawACLIterator<'a> {
        RawACLIterator {
            acl,
            next: ACL_FIRST_ENTRY,
        }
    }
}

impl<'a> Iterator for RawACLIterator<'a> {
    type Item = acl_entry_t;

    fn next(&mut self) -> Option<Self::Item> {
        let mut entry: acl_entry_t = null_mut();
        // The returned entry is owned by the ACL itself, no need to free it.
        let ret = unsafe { acl_get_entry(self.acl.acl, self.next, &mut entry) };
        match ret {
            0 => None,
            1 => {
                self.next = ACL_NEXT_ENTRY;
                Some(entry)
            }
            _ => {
                check_return(ret, "acl_get_entry");
                None
            }
        }
    }
}
