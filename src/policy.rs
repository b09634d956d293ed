//! Target permission state: ACL templates with unresolved executable-bit macros, plain modes,
//! and the compatibility lattice between a root entry and its contents.

use crate::Qualifier::*;
use crate::{entries_to_text, ACLEntry, PosixACL, Qualifier};
use crate::{ACL_EXECUTE, ACL_READ, ACL_WRITE};
use std::fmt;

/// Placeholders for executable bits, resolved against each file's own mode at repair time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecMacro {
    /// `@UE`: owner `x` of a content file.
    OwnerExec,
    /// `@GE`: group `x` of a content file.
    GroupExec,
    /// `@RUE`: owner `x` of a root entry which is a plain file.
    RootOwnerExec,
    /// `@RGE`: group `x` of a root entry which is a plain file.
    RootGroupExec,
}

impl ExecMacro {
    pub fn token(self) -> &'static str {
        match self {
            ExecMacro::OwnerExec => "@UE",
            ExecMacro::GroupExec => "@GE",
            ExecMacro::RootOwnerExec => "@RUE",
            ExecMacro::RootGroupExec => "@RGE",
        }
    }

    pub fn from_token(token: &str) -> Option<ExecMacro> {
        match token {
            "@UE" => Some(ExecMacro::OwnerExec),
            "@GE" => Some(ExecMacro::GroupExec),
            "@RUE" => Some(ExecMacro::RootOwnerExec),
            "@RGE" => Some(ExecMacro::RootGroupExec),
            _ => None,
        }
    }

    fn resolve(self, owner_exec: bool, group_exec: bool) -> bool {
        match self {
            ExecMacro::OwnerExec | ExecMacro::RootOwnerExec => owner_exec,
            ExecMacro::GroupExec | ExecMacro::RootGroupExec => group_exec,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecBit {
    Clear,
    Set,
    Macro(ExecMacro),
}

/// One `rwx` field of an ACL template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PermTemplate {
    pub read: bool,
    pub write: bool,
    pub exec: ExecBit,
}

impl PermTemplate {
    pub fn fixed(perm: u32) -> PermTemplate {
        PermTemplate {
            read: perm & ACL_READ != 0,
            write: perm & ACL_WRITE != 0,
            exec: if perm & ACL_EXECUTE != 0 {
                ExecBit::Set
            } else {
                ExecBit::Clear
            },
        }
    }

    /// Parse a macro-free (except executable macros) permission field: `rw-`, `r-@GE`...
    pub fn parse(text: &str) -> Option<PermTemplate> {
        let tokens = perm_tokens(text)?;
        if tokens.len() != 3 {
            return None;
        }
        let read = match tokens[0] {
            "r" => true,
            "-" => false,
            _ => return None,
        };
        let write = match tokens[1] {
            "w" => true,
            "-" => false,
            _ => return None,
        };
        let exec = match tokens[2] {
            "x" => ExecBit::Set,
            "-" => ExecBit::Clear,
            token => ExecBit::Macro(ExecMacro::from_token(token)?),
        };
        Some(PermTemplate { read, write, exec })
    }

    /// Concrete `ACL_` bits for a file whose owner/group exec bits are given.
    pub fn resolve(&self, owner_exec: bool, group_exec: bool) -> u32 {
        let exec = match self.exec {
            ExecBit::Set => true,
            ExecBit::Clear => false,
            ExecBit::Macro(m) => m.resolve(owner_exec, group_exec),
        };
        (if self.read { ACL_READ } else { 0 })
            | (if self.write { ACL_WRITE } else { 0 })
            | (if exec { ACL_EXECUTE } else { 0 })
    }

    /// Whether `self` grants at least what `other` grants, whatever the exec bits turn out to be.
    pub fn covers(&self, other: &PermTemplate) -> bool {
        let exec_ok = match (self.exec, other.exec) {
            (_, ExecBit::Clear) | (ExecBit::Set, _) => true,
            (ExecBit::Macro(a), ExecBit::Macro(b)) => a == b,
            _ => false,
        };
        (self.read || !other.read) && (self.write || !other.write) && exec_ok
    }

    fn union(&self, other: &PermTemplate) -> PermTemplate {
        let exec = match (self.exec, other.exec) {
            (ExecBit::Set, _) | (_, ExecBit::Set) => ExecBit::Set,
            (ExecBit::Macro(m), _) | (_, ExecBit::Macro(m)) => ExecBit::Macro(m),
            _ => ExecBit::Clear,
        };
        PermTemplate {
            read: self.read || other.read,
            write: self.write || other.write,
            exec,
        }
    }
}

impl fmt::Display for PermTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let exec = match self.exec {
            ExecBit::Set => "x",
            ExecBit::Clear => "-",
            ExecBit::Macro(m) => m.token(),
        };
        write!(
            f,
            "{}{}{}",
            if self.read { 'r' } else { '-' },
            if self.write { 'w' } else { '-' },
            exec
        )
    }
}

/// Split a permission field into single characters and `@NAME` macro tokens.
pub(crate) fn perm_tokens(text: &str) -> Option<Vec<&str>> {
    let mut tokens = Vec::with_capacity(3);
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        let len = if c == '@' {
            1 + rest[1..]
                .find(|c: char| !c.is_ascii_uppercase())
                .unwrap_or(rest.len() - 1)
        } else {
            c.len_utf8()
        };
        if len == 1 && c == '@' {
            return None;
        }
        tokens.push(&rest[..len]);
        rest = &rest[len..];
    }
    Some(tokens)
}

/// An ACL whose qualifiers are numeric and whose exec bits may be macros.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclTemplate {
    entries: Vec<(Qualifier, PermTemplate)>,
}

impl AclTemplate {
    /// Entries are kept in canonical order; a qualifier given twice keeps the last value.
    pub fn new(entries: impl IntoIterator<Item = (Qualifier, PermTemplate)>) -> AclTemplate {
        let mut template = AclTemplate {
            entries: Vec::new(),
        };
        for (qual, perm) in entries {
            template.set(qual, perm);
        }
        template
    }

    pub fn entries(&self) -> &[(Qualifier, PermTemplate)] {
        &self.entries
    }

    pub fn get(&self, qual: Qualifier) -> Option<&PermTemplate> {
        self.entries.iter().find(|(q, _)| *q == qual).map(|(_, p)| p)
    }

    fn set(&mut self, qual: Qualifier, perm: PermTemplate) {
        match self.entries.binary_search_by(|(q, _)| q.cmp(&qual)) {
            Ok(index) => self.entries[index].1 = perm,
            Err(index) => self.entries.insert(index, (qual, perm)),
        }
    }

    /// Add the entries of `extra` that are not in `self`, widening the ones present in both.
    pub fn merged_with(&self, extra: &AclTemplate) -> AclTemplate {
        let mut merged = self.clone();
        for (qual, perm) in &extra.entries {
            let perm = match merged.get(*qual) {
                Some(existing) => existing.union(perm),
                None => *perm,
            };
            merged.set(*qual, perm);
        }
        merged
    }

    /// The first entry of `baseline` that `self` lacks or grants less than, if any.
    pub fn weakens(&self, baseline: &AclTemplate) -> Option<(Qualifier, PermTemplate)> {
        baseline
            .entries
            .iter()
            .find(|(qual, perm)| !self.get(*qual).map_or(false, |mine| mine.covers(perm)))
            .copied()
    }

    /// The concrete ACL for a file whose owner/group exec bits are given.
    pub fn resolve(&self, owner_exec: bool, group_exec: bool) -> Vec<ACLEntry> {
        self.entries
            .iter()
            .map(|(qual, perm)| ACLEntry::new(*qual, perm.resolve(owner_exec, group_exec)))
            .collect()
    }

    /// Derive the template of files from the one of directories: owner `x` becomes `@UE`,
    /// group class `x` becomes `@GE`, `other` loses `x`. `root` picks `@RUE`/`@RGE` instead.
    pub fn for_files(&self, root: bool) -> AclTemplate {
        let (owner, group) = if root {
            (ExecMacro::RootOwnerExec, ExecMacro::RootGroupExec)
        } else {
            (ExecMacro::OwnerExec, ExecMacro::GroupExec)
        };
        AclTemplate::new(self.entries.iter().map(|(qual, perm)| {
            let exec = match (qual, perm.exec) {
                (_, ExecBit::Clear) => ExecBit::Clear,
                (Other, _) => ExecBit::Clear,
                (UserObj, _) => ExecBit::Macro(owner),
                (_, _) => ExecBit::Macro(group),
            };
            (*qual, PermTemplate { exec, ..*perm })
        }))
    }

    /// Plain mode equivalent, used when the filesystem refuses ACLs.
    pub fn fallback_mode(&self, owner_exec: bool, group_exec: bool) -> u32 {
        let perm = |qual| {
            self.get(qual)
                .map_or(0, |p| p.resolve(owner_exec, group_exec))
        };
        (perm(UserObj) << 6) | (perm(GroupObj) << 3) | perm(Other)
    }

    /// Run every instantiation of the exec macros through libacl's `acl_valid()`.
    ///
    /// # Errors
    /// Returns the text of the first instantiation libacl rejects.
    pub fn validate(&self) -> Result<(), String> {
        for (owner_exec, group_exec) in [(false, false), (true, true)] {
            let entries = self.resolve(owner_exec, group_exec);
            if PosixACL::from_entries(&entries).validate().is_err() {
                return Err(entries_to_text(&entries));
            }
        }
        Ok(())
    }
}

impl fmt::Display for AclTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .entries
            .iter()
            .map(|(qual, perm)| format!("{}{}", qual, perm))
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&text)
    }
}

/// Position of a policy in the root/content compatibility lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyClass {
    /// `NOACL`/`POSIXONLY`: plain modes, anything may live below.
    NoAcl,
    /// Custom ACLs: plain-mode content would silently drop the ACL guarantees.
    Acl,
    /// `RESTRICTED`/`PRIVATE`: only restricted content.
    Restricted,
}

impl PolicyClass {
    pub fn name(self) -> &'static str {
        match self {
            PolicyClass::NoAcl => "NOACL",
            PolicyClass::Acl => "ACL",
            PolicyClass::Restricted => "RESTRICTED",
        }
    }

    pub fn accepts(self, content: PolicyClass) -> bool {
        match self {
            PolicyClass::NoAcl => true,
            PolicyClass::Acl => content != PolicyClass::NoAcl,
            PolicyClass::Restricted => content == PolicyClass::Restricted,
        }
    }
}

/// Fixed modes of the keyword policies.
pub const NOACL_DIR_MODE: u32 = 0o755;
pub const NOACL_FILE_MODE: u32 = 0o644;
pub const RESTRICTED_DIR_MODE: u32 = 0o700;
pub const RESTRICTED_FILE_MODE: u32 = 0o600;

/// What one descriptor slot wants: a plain mode or an ACL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotPolicy {
    Mode(u32),
    Acl(AclTemplate),
}

impl SlotPolicy {
    pub fn is_acl(&self) -> bool {
        matches!(self, SlotPolicy::Acl(_))
    }
}

impl fmt::Display for SlotPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotPolicy::Mode(mode) => write!(f, "{:04o}", mode),
            SlotPolicy::Acl(template) => write!(f, "{}", template),
        }
    }
}

/// Human readable `rwx` of a whole resolved entry list, for messages.
pub fn describe(entries: &[ACLEntry]) -> String {
    if entries.is_empty() {
        "none".to_string()
    } else {
        entries_to_text(entries)
    }
}
