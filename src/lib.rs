//! licorn-compliance checks shared directory trees against their declared policy and repairs
//! what drifted: owner and group, POSIX modes, access and default ACLs.
//!
//! A tree's policy is a list of [`Descriptor`]s, built by [`DescriptorBuilder`] from the
//! customization [`Rule`]s found in rule files. A [`RepairSession`] walks them lazily and yields
//! one [`RepairEvent`] per mutated path.
//!
//! The ACL layer ([`PosixACL`]) wraps the operating system's libacl and can be used on its own:
//!
//! ```
//! use licorn_compliance::{PosixACL, Qualifier, ACL_READ};
//! let mut acl = PosixACL::new(0o640);
//! acl.set(Qualifier::Group(5000), ACL_READ);
//! acl.fix_mask();
//! assert_eq!(acl.compact_text(), "u::rw-,g::r--,o::---,g:5000:r--,m::r--");
//! ```

mod acl;
pub mod compare;
pub mod config;
pub mod descriptor;
mod entry;
mod error;
pub mod identity;
mod iter;
pub mod macros;
pub mod ownership;
pub mod policy;
pub mod prompt;
pub mod repair;
pub mod rules;
pub mod session;
mod util;
pub mod walk;

/// Read permission
pub const ACL_READ: u32 = acl_sys::ACL_READ;
/// Write permission
pub const ACL_WRITE: u32 = acl_sys::ACL_WRITE;
/// Execute permission
pub const ACL_EXECUTE: u32 = acl_sys::ACL_EXECUTE;
/// All possible permissions
pub const ACL_RWX: u32 = ACL_READ | ACL_WRITE | ACL_EXECUTE;

// Re-export public structs
pub use acl::PosixACL;
pub use entry::{entries_to_text, perm_to_text, ACLEntry, Qualifier};
pub use error::{ACLError, Error, ErrorKind, Result};

pub use compare::{check_path, PathCheck, PathChecker};
pub use config::{MacroTable, Settings};
pub use descriptor::{Descriptor, DescriptorBuilder, Position, Slot};
pub use identity::{Identity, IdentityResolver, IdentitySnapshot, SystemIdentities};
pub use ownership::{check_ownership, OwnershipCheck};
pub use policy::{AclTemplate, PolicyClass, SlotPolicy};
pub use prompt::{Ask, Batch, Terminal};
pub use repair::{RepairContext, RepairEvent, RepairKind};
pub use rules::{compile, load_rule_file, AclPolicy, Rule, Scope};
pub use session::{RepairSession, SessionOptions};
pub use walk::{walk, WalkOptions};
