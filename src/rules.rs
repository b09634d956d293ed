//! Compiler of customization rules.
//!
//! A rule file holds one rule per line: a directory relative to the checked tree, a TAB, and
//! either a policy keyword or a list of ACL triples:
//!
//! ```text
//! # comments and blank lines are skipped
//! ~            RESTRICTED
//! public_html  g:www-data:r-x,g:@ADMIN:rwx
//! ```
//!
//! Compiling only validates the grammar. Macros stay in the rule text until the descriptor
//! builder knows what they stand for.

use crate::config::MacroTable;
use crate::macros::{self, Macro, KNOWN_MACROS};
use crate::policy::{perm_tokens, ExecMacro};
use crate::{Error, ErrorKind, Result};
use regex::Regex;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

static UNSAFE_DIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/|^(~|\$HOME)[^/]*/|(^|/)\.\.(/|$)").unwrap());

const GRAMMAR: &str = "NOACL, POSIXONLY, RESTRICTED, PRIVATE or subject:qualifier:perm[,...]";

/// Where a rule comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Shipped by the administrator, applies to every object of a kind.
    SystemDefault,
    /// Found in an object's own home, written by its owner.
    PerObject,
}

/// What a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum RuleTarget {
    /// `~`: the whole tree, minus other rules' directories.
    Default,
    /// A directory relative to the tree root.
    Dir(PathBuf),
}

impl fmt::Display for RuleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleTarget::Default => f.write_str("~"),
            RuleTarget::Dir(dir) => write!(f, "{}", dir.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    User,
    Group,
    Mask,
    Other,
}

impl Subject {
    fn parse(text: &str) -> Option<Subject> {
        match text {
            "u" | "user" => Some(Subject::User),
            "g" | "group" => Some(Subject::Group),
            "m" | "mask" => Some(Subject::Mask),
            "o" | "other" => Some(Subject::Other),
            _ => None,
        }
    }
}

/// One `subject:qualifier:perm` element, still holding its macros. An empty qualifier means the
/// owner (for `u`) or the owning group (for `g`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclTriple {
    pub subject: Subject,
    pub qualifier: String,
    pub perm: String,
}

/// A non-empty list of ACL triples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclExpr(Vec<AclTriple>);

impl AclExpr {
    pub fn triples(&self) -> &[AclTriple] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclPolicy {
    NoAcl,
    PosixOnly,
    Restricted,
    Private,
    Custom(AclExpr),
}

impl AclPolicy {
    fn keyword(text: &str) -> Option<AclPolicy> {
        match text.to_ascii_uppercase().as_str() {
            "NOACL" => Some(AclPolicy::NoAcl),
            "POSIXONLY" => Some(AclPolicy::PosixOnly),
            "RESTRICTED" | "RESTRICT" => Some(AclPolicy::Restricted),
            "PRIVATE" => Some(AclPolicy::Private),
            _ => None,
        }
    }
}

/// A compiled rule line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub file: PathBuf,
    pub line: usize,
    pub scope: Scope,
    pub target: RuleTarget,
    pub policy: AclPolicy,
}

impl Rule {
    pub fn is_default(&self) -> bool {
        self.target == RuleTarget::Default
    }
}

/// Compile one rule line.
///
/// `macros` is only consulted for the administrators group name, which per-object rules may not
/// use as their sole named subject.
///
/// # Errors
/// * `Error::Syntax`: the first offending token, with the grammar expected at that point.
pub fn compile(
    text: &str,
    file: &Path,
    line: usize,
    scope: Scope,
    macros: &MacroTable,
) -> Result<Rule> {
    let text = text.trim();
    let (dir, expr) = match text.split_once(char::is_whitespace) {
        Some((dir, expr)) if !expr.trim().is_empty() => (dir, expr.trim()),
        _ => return Err(Error::syntax(file, line, text, "<directory><TAB><acl>")),
    };
    let target = compile_target(dir, file, line)?;
    let policy = match AclPolicy::keyword(expr) {
        Some(keyword) => keyword,
        None => AclPolicy::Custom(compile_expr(expr, file, line, scope, macros)?),
    };
    Ok(Rule {
        file: file.to_path_buf(),
        line,
        scope,
        target,
        policy,
    })
}

fn compile_target(dir: &str, file: &Path, line: usize) -> Result<RuleTarget> {
    if dir == "~" || dir == "$HOME" {
        return Ok(RuleTarget::Default);
    }
    if UNSAFE_DIR.is_match(dir) {
        return Err(Error::syntax(
            file,
            line,
            dir,
            "a directory inside the checked tree",
        ));
    }
    let relative: PathBuf = Path::new(dir)
        .components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect();
    if relative.as_os_str().is_empty() {
        return Ok(RuleTarget::Default);
    }
    Ok(RuleTarget::Dir(relative))
}

fn compile_expr(
    expr: &str,
    file: &Path,
    line: usize,
    scope: Scope,
    macros: &MacroTable,
) -> Result<AclExpr> {
    let mut triples = Vec::new();
    for item in expr.split(',').map(str::trim) {
        if item.is_empty() {
            return Err(Error::syntax(file, line, expr, GRAMMAR));
        }
        triples.push(compile_triple(item, file, line)?);
    }

    if scope == Scope::PerObject {
        if let Some(other) = triples
            .iter()
            .find(|t| t.subject == Subject::Other && grants_write(&t.perm))
        {
            return Err(Error::syntax(
                file,
                line,
                format!("o::{}", other.perm),
                "no write permission for other",
            ));
        }
        let named: Vec<&AclTriple> = triples
            .iter()
            .filter(|t| matches!(t.subject, Subject::User | Subject::Group))
            .filter(|t| !t.qualifier.is_empty())
            .collect();
        let is_admin = |t: &&AclTriple| {
            t.subject == Subject::Group
                && (t.qualifier == "@ADMIN" || t.qualifier == macros.admin_group)
        };
        if !named.is_empty() && named.iter().all(is_admin) {
            return Err(Error::syntax(
                file,
                line,
                &named[0].qualifier,
                "a named subject besides the administrators group",
            ));
        }
    }
    Ok(AclExpr(triples))
}

fn grants_write(perm: &str) -> bool {
    perm == "@MASK" || perm_tokens(perm).map_or(false, |t| t.get(1).map_or(false, |w| *w != "-"))
}

fn compile_triple(item: &str, file: &Path, line: usize) -> Result<AclTriple> {
    let fields: Vec<&str> = item.split(':').collect();
    let subject = fields
        .first()
        .and_then(|s| Subject::parse(s))
        .ok_or_else(|| Error::syntax(file, line, fields[0], "u, g, m or o"))?;
    let (qualifier, perm) = match (subject, fields.as_slice()) {
        (Subject::Mask | Subject::Other, [_, perm]) => ("", *perm),
        (_, [_, qualifier, perm]) => (*qualifier, *perm),
        _ => return Err(Error::syntax(file, line, item, "subject:qualifier:perm")),
    };
    if matches!(subject, Subject::Mask | Subject::Other) && !qualifier.is_empty() {
        return Err(Error::syntax(file, line, qualifier, "an empty qualifier"));
    }
    check_qualifier(qualifier, file, line)?;
    check_perm(perm, file, line)?;
    Ok(AclTriple {
        subject,
        qualifier: qualifier.to_string(),
        perm: perm.to_string(),
    })
}

fn check_qualifier(qualifier: &str, file: &Path, line: usize) -> Result<()> {
    let mut plain = qualifier.to_string();
    for (_, token) in macros::tokens(qualifier) {
        match Macro::from_token(token) {
            Some(m) if m.is_qualifier() => plain = plain.replacen(token, "", 1),
            _ => {
                return Err(Error::syntax(
                    file,
                    line,
                    token,
                    "@ADMIN, @ACL, @GROUP, @GUEST or @RESP",
                ))
            }
        }
    }
    match plain
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        Some(c) => Err(Error::syntax(file, line, c.to_string(), "a user or group name")),
        None => Ok(()),
    }
}

fn check_perm(perm: &str, file: &Path, line: usize) -> Result<()> {
    if perm == "@MASK" {
        return Ok(());
    }
    let tokens = perm_tokens(perm).ok_or_else(|| Error::syntax(file, line, perm, KNOWN_MACROS))?;
    if tokens.len() != 3 {
        return Err(Error::syntax(file, line, perm, "three permission positions, or @MASK"));
    }
    let read_ok = matches!(tokens[0], "r" | "-");
    let write_ok = matches!(tokens[1], "w" | "-" | "@GW");
    let exec_ok = matches!(tokens[2], "x" | "-") || ExecMacro::from_token(tokens[2]).is_some();
    let (token, expected) = if !read_ok {
        (tokens[0], "r or -")
    } else if !write_ok {
        (tokens[1], "w, - or @GW")
    } else if !exec_ok {
        (tokens[2], "x, -, @UE, @GE, @RUE or @RGE")
    } else {
        return Ok(());
    };
    Err(Error::syntax(file, line, token, expected))
}

/// Compile every rule of a file. A missing file holds no rules.
///
/// # Errors
/// * `Error::Syntax`: the first malformed line, loading stops there.
/// * `Error::Permission`, `Error::Io`: unreadable file.
pub fn load_rule_file(path: &Path, scope: Scope, macros: &MacroTable) -> Result<Vec<Rule>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            let err = Error::io(path, err);
            if err.kind() == ErrorKind::NotFound {
                debug!("No rule file at {}", path.display());
                return Ok(Vec::new());
            }
            return Err(err);
        }
    };
    let mut rules = Vec::new();
    for (index, text) in content.lines().enumerate() {
        let text = text.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        rules.push(compile(text, path, index + 1, scope, macros)?);
    }
    debug!("Loaded {} rule(s) from {}", rules.len(), path.display());
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::io::Write;

    fn object(text: &str) -> Result<Rule> {
        compile(
            text,
            Path::new("check.conf"),
            1,
            Scope::PerObject,
            &MacroTable::default(),
        )
    }

    #[rstest]
    #[case("~\tNOACL", RuleTarget::Default, AclPolicy::NoAcl)]
    #[case("$HOME\tposixonly", RuleTarget::Default, AclPolicy::PosixOnly)]
    #[case("Private   restrict", RuleTarget::Dir("Private".into()), AclPolicy::Restricted)]
    #[case("./a/b/\tPRIVATE", RuleTarget::Dir("a/b".into()), AclPolicy::Private)]
    fn keywords(#[case] text: &str, #[case] target: RuleTarget, #[case] policy: AclPolicy) {
        let rule = object(text).unwrap();
        assert_eq!(rule.target, target);
        assert_eq!(rule.policy, policy);
    }

    #[test]
    fn triples() {
        let rule =
            object("public_html\tu::rwx,g:www-data:r-x,g:@ADMIN:rw@GE,o:---,m:@MASK").unwrap();
        let AclPolicy::Custom(expr) = rule.policy else {
            panic!("expected a custom policy");
        };
        assert_eq!(expr.triples().len(), 5);
        assert_eq!(
            expr.triples()[2],
            AclTriple {
                subject: Subject::Group,
                qualifier: "@ADMIN".into(),
                perm: "rw@GE".into()
            }
        );
        assert_eq!(expr.triples()[3].subject, Subject::Other);
    }

    #[rstest]
    #[case("/etc\tNOACL", "/etc")]
    #[case("~/x\tNOACL", "~/x")]
    #[case("~alice/x\tNOACL", "~alice/x")]
    #[case("~root/.ssh\tNOACL", "~root/.ssh")]
    #[case("$HOME/x\tNOACL", "$HOME/x")]
    #[case("$HOMEDIR/x\tNOACL", "$HOMEDIR/x")]
    #[case("a/../../b\tNOACL", "a/../../b")]
    #[case("..\tNOACL", "..")]
    #[case("dir\tg:x:rwxx", "rwxx")]
    #[case("dir\tq:x:rwx", "q")]
    #[case("dir\tg:x:rWx", "W")]
    #[case("dir\tu:bad name:rwx", " ")]
    #[case("dir\tg:@NOPE:rwx", "@NOPE")]
    #[case("dir\to::rw-", "o::rw-")]
    #[case("dir\to:r@GW-", "o::r@GW-")]
    #[case("dir\tg:@ADMIN:rwx", "@ADMIN")]
    #[case("dir\tg:admins:rwx,u::rwx", "admins")]
    #[case("dir", "dir")]
    #[case("dir\tu::rwx,,o::---", "u::rwx,,o::---")]
    #[case("dir\tu::rwx,", "u::rwx,")]
    fn rejections(#[case] text: &str, #[case] token: &str) {
        match object(text).unwrap_err() {
            Error::Syntax { token: found, line, .. } => {
                assert_eq!(found, token);
                assert_eq!(line, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn system_rules_may_grant_admin_only() {
        let rule = compile(
            "~\tg:@ADMIN:rwx,o::rw-",
            Path::new("groups.default.conf"),
            3,
            Scope::SystemDefault,
            &MacroTable::default(),
        );
        assert!(rule.is_ok());
    }

    #[test]
    fn rule_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment\n\n~\tRESTRICTED\nshared\tg:devs:rwx").unwrap();
        let rules = load_rule_file(file.path(), Scope::PerObject, &MacroTable::default()).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].line, 3);
        assert!(rules[0].is_default());
        assert_eq!(rules[1].line, 4);
        assert_eq!(rules[1].target, RuleTarget::Dir("shared".into()));
    }

    #[test]
    fn rule_file_stops_at_first_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "~\tNOACL\nbad\tg:x\nworse\t??").unwrap();
        let err =
            load_rule_file(file.path(), Scope::PerObject, &MacroTable::default()).unwrap_err();
        match err {
            Error::Syntax { line, file: path, .. } => {
                assert_eq!(line, 2);
                assert_eq!(path, file.path());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_rule_file() {
        let rules = load_rule_file(
            Path::new("/nonexistent/check.conf"),
            Scope::SystemDefault,
            &MacroTable::default(),
        )
        .unwrap();
        assert!(rules.is_empty());
    }
}
