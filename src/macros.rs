//! Substitution of configuration values into rule text.
//!
//! Rule files may name `@ADMIN` instead of the actual administrators group, `@GROUP` instead of
//! the group owning the tree... The set of tokens is closed: anything else starting with `@` is a
//! syntax error. Executable-bit macros are not ours to expand, they go through untouched and are
//! resolved per file at repair time.

use crate::config::MacroTable;
use crate::policy::ExecMacro;
use crate::{Error, Result};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@[A-Z]*").unwrap());

/// The tokens a rule may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Macro {
    /// `@ADMIN`: the administrators group.
    Admin,
    /// `@ACL`: the group owning ACL'd trees.
    Acl,
    /// `@GROUP`: the group owning the checked tree.
    Group,
    /// `@GUEST`: guest group of the tree's group.
    Guest,
    /// `@RESP`: responsible group of the tree's group.
    Responsible,
    /// `@GW`: `w` in permissive groups, `-` otherwise.
    GroupWrite,
    /// `@MASK`: the whole mask permission field.
    Mask,
    Exec(ExecMacro),
}

impl Macro {
    pub fn from_token(token: &str) -> Option<Macro> {
        Some(match token {
            "@ADMIN" => Macro::Admin,
            "@ACL" => Macro::Acl,
            "@GROUP" => Macro::Group,
            "@GUEST" => Macro::Guest,
            "@RESP" => Macro::Responsible,
            "@GW" => Macro::GroupWrite,
            "@MASK" => Macro::Mask,
            other => Macro::Exec(ExecMacro::from_token(other)?),
        })
    }

    /// Whether the macro names a group, i.e. may appear in a qualifier field.
    pub fn is_qualifier(self) -> bool {
        matches!(
            self,
            Macro::Admin | Macro::Acl | Macro::Group | Macro::Guest | Macro::Responsible
        )
    }
}

/// `@NAME` tokens of `text`, with their byte offset.
pub(crate) fn tokens(text: &str) -> impl Iterator<Item = (usize, &str)> {
    TOKEN.find_iter(text).map(|m| (m.start(), m.as_str()))
}

pub(crate) const KNOWN_MACROS: &str =
    "@ADMIN, @ACL, @GROUP, @GUEST, @RESP, @GW, @MASK, @UE, @GE, @RUE or @RGE";

/// Values of the macros for one tree.
#[derive(Debug, Clone, Copy)]
pub struct MacroContext<'a> {
    table: &'a MacroTable,
    group: Option<&'a str>,
    permissive: bool,
}

impl<'a> MacroContext<'a> {
    /// Context of a user tree: group macros are unavailable.
    pub fn new(table: &'a MacroTable) -> Self {
        MacroContext {
            table,
            group: None,
            permissive: false,
        }
    }

    /// Context of the shared tree of `group`.
    pub fn for_group(table: &'a MacroTable, group: &'a str, permissive: bool) -> Self {
        MacroContext {
            table,
            group: Some(group),
            permissive,
        }
    }

    pub fn table(&self) -> &'a MacroTable {
        self.table
    }

    /// Replacement text of `m`, `None` for the macros resolved later (executable bits) or
    /// unavailable in this context.
    pub fn value(&self, m: Macro) -> Option<String> {
        match m {
            Macro::Admin => Some(self.table.admin_group.clone()),
            Macro::Acl => Some(self.table.acl_group.clone()),
            Macro::Mask => Some(self.table.mask.clone()),
            Macro::GroupWrite => Some(if self.permissive { "w" } else { "-" }.to_string()),
            Macro::Group => self.group.map(str::to_string),
            Macro::Guest => self
                .group
                .map(|g| format!("{}{}", self.table.guest_prefix, g)),
            Macro::Responsible => self
                .group
                .map(|g| format!("{}{}", self.table.responsible_prefix, g)),
            Macro::Exec(_) => None,
        }
    }

    /// Expand every configuration macro of `text`. `file` and `line` locate errors.
    ///
    /// # Errors
    /// * `Error::Syntax`: unknown token, or a group macro in a user tree.
    pub fn expand(&self, text: &str, file: &Path, line: usize) -> Result<String> {
        let mut expanded = String::with_capacity(text.len());
        let mut last = 0;
        for (start, token) in tokens(text) {
            expanded.push_str(&text[last..start]);
            last = start + token.len();
            let m = Macro::from_token(token)
                .ok_or_else(|| Error::syntax(file, line, token, KNOWN_MACROS))?;
            match (m, self.value(m)) {
                (Macro::Exec(_), _) => expanded.push_str(token),
                (_, Some(value)) => expanded.push_str(&value),
                (_, None) => {
                    return Err(Error::syntax(
                        file,
                        line,
                        token,
                        "a macro available outside of group trees",
                    ))
                }
            }
        }
        expanded.push_str(&text[last..]);
        Ok(expanded)
    }
}
