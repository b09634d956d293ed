//! Descriptors: the target state of one subtree, and how they are built from rules.

use crate::config::MacroTable;
use crate::error::ACLError;
use crate::identity::{Identity, IdentityResolver};
use crate::macros::MacroContext;
use crate::policy::{
    AclTemplate, ExecBit, PermTemplate, PolicyClass, SlotPolicy, NOACL_DIR_MODE, NOACL_FILE_MODE,
    RESTRICTED_DIR_MODE, RESTRICTED_FILE_MODE,
};
use crate::rules::{AclExpr, AclPolicy, Rule, RuleTarget, Scope, Subject};
use crate::Qualifier::*;
use crate::{Error, Qualifier, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Policy of one class of entries: the root of a tree, or everything below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Expected group owner, `None` to accept any.
    pub gid: Option<u32>,
    pub class: PolicyClass,
    pub dirs: SlotPolicy,
    pub files: SlotPolicy,
}

impl Slot {
    /// A plain mode slot.
    pub fn mode(gid: Option<u32>, class: PolicyClass, dirs: u32, files: u32) -> Slot {
        Slot {
            gid,
            class,
            dirs: SlotPolicy::Mode(dirs),
            files: SlotPolicy::Mode(files),
        }
    }

    /// An ACL slot. `files` is usually `dirs.for_files()`.
    pub fn acl(gid: Option<u32>, dirs: AclTemplate, files: AclTemplate) -> Slot {
        Slot {
            gid,
            class: PolicyClass::Acl,
            dirs: SlotPolicy::Acl(dirs),
            files: SlotPolicy::Acl(files),
        }
    }

    fn validate(&self, path: &Path) -> Result<()> {
        for policy in [&self.dirs, &self.files] {
            if let SlotPolicy::Acl(template) = policy {
                template.validate().map_err(|text| Error::Acl {
                    path: path.to_path_buf(),
                    source: ACLError::ValidationError(text),
                })?;
            }
        }
        Ok(())
    }
}

/// Which slot of a descriptor a path falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Root,
    Content,
}

/// Everything the repairers need to know about one path.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub access: &'a SlotPolicy,
    /// Default ACL, directories of ACL slots only.
    pub default: Option<&'a AclTemplate>,
}

/// Target state of one subtree. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    /// For messages: the owner's name, or the rule directory.
    pub name: String,
    pub path: PathBuf,
    /// Owner of content entries, `None` to accept any.
    pub uid: Option<u32>,
    /// Owner of the root entry when it differs from `uid`.
    pub root_uid: Option<u32>,
    pub root: Slot,
    pub content: Slot,
    /// Paths relative to `path`, neither checked nor entered.
    pub exclude: BTreeSet<PathBuf>,
    /// The descriptor of the whole tree, the others carve pieces out of it.
    pub implicit_default: bool,
    /// Whether a missing root may be created.
    pub mandatory: bool,
}

impl Descriptor {
    /// Assemble a descriptor from its slots, enforcing the compatibility lattice and validating
    /// every ACL template.
    ///
    /// # Errors
    /// * `Error::IncompatiblePolicy`: `content` is not allowed under `root`.
    /// * `Error::Acl`: a template fails `acl_valid()`.
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        uid: Option<u32>,
        root: Slot,
        content: Slot,
    ) -> Result<Descriptor> {
        let descriptor = Descriptor {
            name: name.into(),
            path: path.into(),
            uid,
            root_uid: None,
            root,
            content,
            exclude: BTreeSet::new(),
            implicit_default: false,
            mandatory: false,
        };
        descriptor.check_nesting(descriptor.root.class)?;
        descriptor.root.validate(&descriptor.path)?;
        descriptor.content.validate(&descriptor.path)?;
        Ok(descriptor)
    }

    #[must_use]
    pub fn with_root_uid(mut self, uid: Option<u32>) -> Self {
        self.root_uid = uid;
        self
    }

    #[must_use]
    pub fn with_exclusions<P: Into<PathBuf>>(mut self, paths: impl IntoIterator<Item = P>) -> Self {
        self.exclude.extend(paths.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn mandatory(mut self, mandatory: bool) -> Self {
        self.mandatory = mandatory;
        self
    }

    /// Whether this descriptor's slots may live below a root of class `parent`.
    fn check_nesting(&self, parent: PolicyClass) -> Result<()> {
        for class in [self.root.class, self.content.class] {
            if !parent.accepts(class) {
                return Err(Error::IncompatiblePolicy {
                    path: self.path.clone(),
                    root: parent.name(),
                    content: class.name(),
                });
            }
        }
        Ok(())
    }

    pub fn target(&self, position: Position, is_dir: bool) -> Target<'_> {
        let (slot, uid) = match position {
            Position::Root => (&self.root, self.root_uid.or(self.uid)),
            Position::Content => (&self.content, self.uid),
        };
        let access = if is_dir { &slot.dirs } else { &slot.files };
        let default = match (is_dir, access, &self.content.dirs) {
            (true, SlotPolicy::Acl(_), SlotPolicy::Acl(inherited)) => Some(inherited),
            (true, SlotPolicy::Acl(own), _) => Some(own),
            _ => None,
        };
        Target {
            uid,
            gid: slot.gid,
            access,
            default,
        }
    }
}

/// Builds the descriptors of one user home or one group shared directory.
pub struct DescriptorBuilder<'a> {
    owner: &'a Identity,
    home: PathBuf,
    macros: &'a MacroTable,
    ids: &'a dyn IdentityResolver,
    permissive: bool,
}

impl<'a> DescriptorBuilder<'a> {
    pub fn new(
        owner: &'a Identity,
        home: impl Into<PathBuf>,
        macros: &'a MacroTable,
        ids: &'a dyn IdentityResolver,
    ) -> Self {
        DescriptorBuilder {
            owner,
            home: home.into(),
            macros,
            ids,
            permissive: false,
        }
    }

    /// Members of a permissive group may modify each other's files.
    #[must_use]
    pub fn permissive(mut self, permissive: bool) -> Self {
        self.permissive = permissive;
        self
    }

    fn context(&self) -> MacroContext<'a> {
        match self.owner {
            Identity::Group { name, .. } => {
                MacroContext::for_group(self.macros, name, self.permissive)
            }
            Identity::User { .. } => MacroContext::new(self.macros),
        }
    }

    fn mask(&self) -> Result<PermTemplate> {
        PermTemplate::parse(&self.macros.mask).ok_or_else(|| Error::Config {
            path: PathBuf::new(),
            message: format!("invalid mask `{}`", self.macros.mask),
        })
    }

    /// The ACL every custom rule starts from, `(root, content)` directory templates.
    ///
    /// # Errors
    /// * `Error::UnknownIdentity`: the administrators group (or one of the tree group's guest
    ///   and responsible groups) does not exist.
    pub fn baseline(&self) -> Result<(AclTemplate, AclTemplate)> {
        let fixed = PermTemplate::fixed;
        let mut common = vec![
            (UserObj, fixed(crate::ACL_RWX)),
            (GroupObj, fixed(0)),
            (Other, fixed(0)),
            (Group(self.ids.require_group(&self.macros.admin_group)?), fixed(crate::ACL_RWX)),
            (Mask, self.mask()?),
        ];
        match self.owner {
            Identity::Group { gid, name } => {
                let guest = format!("{}{}", self.macros.guest_prefix, name);
                let responsible = format!("{}{}", self.macros.responsible_prefix, name);
                common.push((
                    Group(self.ids.require_group(&guest)?),
                    fixed(crate::ACL_READ | crate::ACL_EXECUTE),
                ));
                common.push((Group(self.ids.require_group(&responsible)?), fixed(crate::ACL_RWX)));
                let members = if self.permissive {
                    crate::ACL_RWX
                } else {
                    crate::ACL_READ | crate::ACL_EXECUTE
                };
                let root = AclTemplate::new(
                    common
                        .iter()
                        .copied()
                        .chain([(Group(*gid), fixed(crate::ACL_RWX))]),
                );
                let content =
                    AclTemplate::new(common.into_iter().chain([(Group(*gid), fixed(members))]));
                Ok((root, content))
            }
            Identity::User { .. } => {
                let template = AclTemplate::new(common);
                Ok((template.clone(), template))
            }
        }
    }

    /// Resolve the triples of a custom rule into a template of directories.
    ///
    /// A per-object rule naming only the administrators group is refused, whether it names it
    /// or gives its gid.
    fn custom_template(&self, expr: &AclExpr, rule: &Rule) -> Result<AclTemplate> {
        let ctx = self.context();
        let mut entries = Vec::with_capacity(expr.triples().len());
        let mut named = Vec::new();
        for triple in expr.triples() {
            let name = ctx.expand(&triple.qualifier, &rule.file, rule.line)?;
            let qual = match (triple.subject, name.as_str()) {
                (Subject::User, "") => UserObj,
                (Subject::Group, "") => GroupObj,
                (Subject::User, name) => User(self.ids.require_user(name)?),
                (Subject::Group, name) => Group(self.ids.require_group(name)?),
                (Subject::Mask, _) => Mask,
                (Subject::Other, _) => Other,
            };
            if matches!(qual, User(_) | Group(_)) {
                named.push((qual, triple.qualifier.as_str()));
            }
            let text = ctx.expand(&triple.perm, &rule.file, rule.line)?;
            let mut perm = PermTemplate::parse(&text)
                .ok_or_else(|| Error::syntax(&rule.file, rule.line, &text, "rwx permissions"))?;
            // Directories are traversed, not run.
            if let ExecBit::Macro(_) = perm.exec {
                perm.exec = ExecBit::Set;
            }
            entries.push((qual, perm));
        }
        if rule.scope == Scope::PerObject && !named.is_empty() {
            let admin = Group(self.ids.require_group(&self.macros.admin_group)?);
            if named.iter().all(|(qual, _)| *qual == admin) {
                return Err(Error::syntax(
                    &rule.file,
                    rule.line,
                    named[0].1,
                    "a named subject besides the administrators group",
                ));
            }
        }
        Ok(AclTemplate::new(entries))
    }

    fn ids_for(&self, class: PolicyClass) -> Result<(Option<u32>, Option<u32>, Option<u32>)> {
        // (content uid, root uid, gid)
        let (uid, root_uid) = match self.owner {
            Identity::User { uid, .. } => (Some(*uid), None),
            Identity::Group { .. } => (None, Some(0)),
        };
        let gid = if class == PolicyClass::Acl {
            self.ids.require_group(&self.macros.acl_group)?
        } else {
            self.owner.gid()
        };
        Ok((uid, root_uid, Some(gid)))
    }

    /// Build the descriptor of `rule`'s directory, or of the whole tree without a rule.
    ///
    /// # Errors
    /// * `Error::Syntax`: the rule weakens the baseline, or uses a macro wrongly.
    /// * `Error::UnknownIdentity`: a name of the rule does not exist.
    /// * `Error::Acl`: the resulting ACL is rejected by libacl.
    pub fn build(&self, rule: Option<&Rule>) -> Result<Descriptor> {
        let (path, name) = match rule.map(|r| &r.target) {
            Some(RuleTarget::Dir(dir)) => (self.home.join(dir), dir.display().to_string()),
            _ => (self.home.clone(), self.owner.name().to_string()),
        };
        let (root, content) = match rule {
            None => {
                let (root, content) = self.baseline()?;
                self.acl_slots(root, content)?
            }
            Some(rule) => match &rule.policy {
                AclPolicy::NoAcl | AclPolicy::PosixOnly => {
                    let (_, _, gid) = self.ids_for(PolicyClass::NoAcl)?;
                    let slot = Slot::mode(gid, PolicyClass::NoAcl, NOACL_DIR_MODE, NOACL_FILE_MODE);
                    (slot.clone(), slot)
                }
                AclPolicy::Restricted | AclPolicy::Private => {
                    let (_, _, gid) = self.ids_for(PolicyClass::Restricted)?;
                    let slot = Slot::mode(
                        gid,
                        PolicyClass::Restricted,
                        RESTRICTED_DIR_MODE,
                        RESTRICTED_FILE_MODE,
                    );
                    (slot.clone(), slot)
                }
                AclPolicy::Custom(expr) => {
                    let (root, content) = self.baseline()?;
                    let custom = self.custom_template(expr, rule)?;
                    let overlap = AclTemplate::new(
                        content
                            .entries()
                            .iter()
                            .copied()
                            .filter(|(qual, _)| custom.get(*qual).is_some()),
                    );
                    if let Some((qual, perm)) = custom.weakens(&overlap) {
                        return Err(Error::syntax(
                            &rule.file,
                            rule.line,
                            entry_text(qual, custom.get(qual)),
                            format!("at least {}{}", qual, perm),
                        ));
                    }
                    self.acl_slots(root.merged_with(&custom), content.merged_with(&custom))?
                }
            },
        };
        let class = root.class;
        let (uid, root_uid, _) = self.ids_for(class)?;
        let descriptor = Descriptor::new(name, path, uid, root, content)?.with_root_uid(root_uid);
        debug!(
            "Built descriptor {} for {}: root {}, content {}",
            descriptor.name,
            descriptor.path.display(),
            descriptor.root.dirs,
            descriptor.content.dirs
        );
        Ok(descriptor)
    }

    fn acl_slots(&self, root: AclTemplate, content: AclTemplate) -> Result<(Slot, Slot)> {
        let (_, _, gid) = self.ids_for(PolicyClass::Acl)?;
        let root_files = root.for_files(true);
        let content_files = content.for_files(false);
        Ok((Slot::acl(gid, root, root_files), Slot::acl(gid, content, content_files)))
    }

    /// Build `rule`'s descriptor and check it may live below `parent`.
    ///
    /// # Errors
    /// Those of [`DescriptorBuilder::build()`], plus `Error::IncompatiblePolicy`.
    pub fn build_nested(&self, rule: &Rule, parent: &Descriptor) -> Result<Descriptor> {
        let child = self.build(Some(rule))?;
        child.check_nesting(parent.root.class)?;
        Ok(child)
    }

    /// The ordered descriptor list of the tree: the default one first, then one per applicable
    /// rule, sorted by path.
    ///
    /// # Errors
    /// The first error building any of them.
    pub fn assemble(&self, system: &[Rule], object: &[Rule]) -> Result<Vec<Descriptor>> {
        let default_rule = object
            .iter()
            .find(|r| r.is_default())
            .or_else(|| system.iter().find(|r| r.is_default()));

        let mut special: Vec<&Rule> = Vec::new();
        for rule in system.iter().filter(|r| !r.is_default()) {
            if self.target_exists(rule) {
                special.push(rule);
            }
        }
        for rule in object.iter().filter(|r| !r.is_default()) {
            if let Some(winner) = special.iter().find(|s| s.target == rule.target) {
                warn!(
                    "Ignored rule for {} ({}:{}), overridden by {} rule ({}:{})",
                    rule.target,
                    rule.file.display(),
                    rule.line,
                    if winner.scope == Scope::SystemDefault { "system" } else { "another" },
                    winner.file.display(),
                    winner.line
                );
            } else if self.target_exists(rule) {
                special.push(rule);
            }
        }
        special.sort_by(|a, b| a.target.cmp(&b.target));

        let dirs: Vec<&Path> = special
            .iter()
            .filter_map(|r| match &r.target {
                RuleTarget::Dir(dir) => Some(dir.as_path()),
                RuleTarget::Default => None,
            })
            .collect();

        let default = self
            .build(default_rule)?
            .with_exclusions(dirs.iter().copied())
            .mandatory(true);
        let default = Descriptor {
            implicit_default: true,
            ..default
        };

        let mut descriptors = vec![default];
        for (rule, dir) in special.iter().zip(&dirs) {
            let parent = enclosing(&descriptors, &dirs, dir).unwrap_or(&descriptors[0]);
            let nested: Vec<&Path> = dirs
                .iter()
                .filter(|other| *other != dir)
                .filter_map(|other| other.strip_prefix(dir).ok())
                .collect();
            let descriptor = self.build_nested(rule, parent)?.with_exclusions(nested);
            descriptors.push(descriptor);
        }
        Ok(descriptors)
    }

    fn target_exists(&self, rule: &Rule) -> bool {
        let RuleTarget::Dir(dir) = &rule.target else {
            return true;
        };
        let path = self.home.join(dir);
        let exists = path.symlink_metadata().is_ok();
        if !exists {
            debug!(
                "Skipped rule {}:{}, {} does not exist",
                rule.file.display(),
                rule.line,
                path.display()
            );
        }
        exists
    }
}

/// Deepest descriptor among the already built ones whose directory holds `dir`.
/// `descriptors[i + 1]` is the one of `dirs[i]`.
fn enclosing<'d>(
    descriptors: &'d [Descriptor],
    dirs: &[&Path],
    dir: &Path,
) -> Option<&'d Descriptor> {
    dirs.iter()
        .enumerate()
        .take(descriptors.len() - 1)
        .filter(|(_, other)| **other != dir && dir.starts_with(other))
        .max_by_key(|(_, other)| other.components().count())
        .map(|(index, _)| &descriptors[index + 1])
}

fn entry_text(qual: Qualifier, perm: Option<&PermTemplate>) -> String {
    match perm {
        Some(perm) => format!("{}{}", qual, perm),
        None => qual.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentitySnapshot;
    use crate::rules::compile;
    use crate::ErrorKind;
    use pretty_assertions::assert_eq;

    fn ids() -> IdentitySnapshot {
        IdentitySnapshot::new()
            .with_group("admins", 900)
            .with_group("acl", 901)
            .with_group("devs", 5000)
            .with_group("gst-devs", 5001)
            .with_group("rsp-devs", 5002)
            .with_group("www-data", 33)
            .with_user("alice", 1000, 1000)
    }

    fn rule(text: &str) -> Rule {
        compile(
            text,
            Path::new("check.conf"),
            1,
            Scope::PerObject,
            &MacroTable::default(),
        )
        .unwrap()
    }

    fn devs() -> Identity {
        Identity::Group {
            gid: 5000,
            name: "devs".into(),
        }
    }

    #[test]
    fn group_baseline() {
        let (ids, macros, owner) = (ids(), MacroTable::default(), devs());
        let builder = DescriptorBuilder::new(&owner, "/srv/devs", &macros, &ids);
        let descriptor = builder.build(None).unwrap();
        assert_eq!(descriptor.root_uid, Some(0));
        assert_eq!(descriptor.uid, None);
        assert_eq!(descriptor.root.gid, Some(901));
        assert_eq!(
            descriptor.root.dirs.to_string(),
            "u::rwx,g::---,o::---,g:900:rwx,g:5000:rwx,g:5001:r-x,g:5002:rwx,m::rwx"
        );
        assert_eq!(
            descriptor.content.dirs.to_string(),
            "u::rwx,g::---,o::---,g:900:rwx,g:5000:r-x,g:5001:r-x,g:5002:rwx,m::rwx"
        );
        assert_eq!(
            descriptor.content.files.to_string(),
            "u::rw@UE,g::---,o::---,g:900:rw@GE,g:5000:r-@GE,g:5001:r-@GE,g:5002:rw@GE,m::rw@GE"
        );

        let permissive = DescriptorBuilder::new(&owner, "/srv/devs", &macros, &ids)
            .permissive(true)
            .build(None)
            .unwrap();
        assert_eq!(
            permissive.content.dirs.to_string(),
            "u::rwx,g::---,o::---,g:900:rwx,g:5000:rwx,g:5001:r-x,g:5002:rwx,m::rwx"
        );
    }

    #[test]
    fn keyword_modes() {
        let (ids, macros) = (ids(), MacroTable::default());
        let owner = Identity::User {
            uid: 1000,
            gid: 1000,
            name: "alice".into(),
        };
        let builder = DescriptorBuilder::new(&owner, "/home/alice", &macros, &ids);
        let d = builder.build(Some(&rule("~\tRESTRICTED"))).unwrap();
        assert_eq!(d.uid, Some(1000));
        assert_eq!(d.root.gid, Some(1000));
        assert_eq!(d.root.dirs, SlotPolicy::Mode(0o700));
        assert_eq!(d.content.files, SlotPolicy::Mode(0o600));
        let d = builder.build(Some(&rule("~\tNOACL"))).unwrap();
        assert_eq!(d.content.dirs, SlotPolicy::Mode(0o755));
        assert_eq!(d.content.files, SlotPolicy::Mode(0o644));
    }

    #[test]
    fn custom_rule_merges_with_baseline() {
        let (ids, macros, owner) = (ids(), MacroTable::default(), devs());
        let builder = DescriptorBuilder::new(&owner, "/srv/devs", &macros, &ids);
        let d = builder
            .build(Some(&rule("public_html\tg:www-data:r-x,g:@GROUP:rw@GE")))
            .unwrap();
        assert_eq!(d.path, PathBuf::from("/srv/devs/public_html"));
        assert_eq!(
            d.content.dirs.to_string(),
            "u::rwx,g::---,o::---,g:33:r-x,g:900:rwx,g:5000:rwx,g:5001:r-x,g:5002:rwx,m::rwx"
        );
        assert_eq!(
            d.content.files.to_string(),
            "u::rw@UE,g::---,o::---,g:33:r-@GE,g:900:rw@GE,g:5000:rw@GE,g:5001:r-@GE,g:5002:rw@GE,m::rw@GE"
        );
    }

    #[test]
    fn weakening_the_baseline_fails() {
        let (ids, macros, owner) = (ids(), MacroTable::default(), devs());
        let builder = DescriptorBuilder::new(&owner, "/srv/devs", &macros, &ids);
        let err = builder
            .build(Some(&rule("shared\tg:admins:r--,g:devs:rwx")))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
        assert!(err.to_string().contains("g:900:r--"), "{}", err);
    }

    #[test]
    fn admin_gid_alone_is_refused() {
        let (ids, macros, owner) = (ids(), MacroTable::default(), devs());
        let builder = DescriptorBuilder::new(&owner, "/srv/devs", &macros, &ids);
        match builder.build(Some(&rule("shared\tu::rwx,g:900:rwx"))).unwrap_err() {
            Error::Syntax { token, .. } => assert_eq!(token, "900"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(builder.build(Some(&rule("shared\tg:900:rwx,g:33:r-x"))).is_ok());
    }

    #[test]
    fn unknown_names_fail() {
        let (ids, macros, owner) = (ids(), MacroTable::default(), devs());
        let builder = DescriptorBuilder::new(&owner, "/srv/devs", &macros, &ids);
        let err = builder.build(Some(&rule("x\tg:nobody-here:rwx"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownIdentity);
    }

    #[test]
    fn restricted_root_rejects_other_content() {
        let restricted = Slot::mode(Some(1), PolicyClass::Restricted, 0o700, 0o600);
        let noacl = Slot::mode(Some(1), PolicyClass::NoAcl, 0o755, 0o644);
        let err = Descriptor::new("x", "/x", Some(1), restricted.clone(), noacl).unwrap_err();
        assert!(matches!(
            err,
            Error::IncompatiblePolicy {
                root: "RESTRICTED",
                content: "NOACL",
                ..
            }
        ));

        let (ids, macros, owner) = (ids(), MacroTable::default(), devs());
        let builder = DescriptorBuilder::new(&owner, "/srv/devs", &macros, &ids);
        let parent = builder.build(Some(&rule("~\tPRIVATE"))).unwrap();
        let err = builder
            .build_nested(&rule("shared\tg:www-data:r-x"), &parent)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
        assert!(builder
            .build_nested(&rule("shared\tRESTRICTED"), &parent)
            .is_ok());
    }

    #[test]
    fn acl_root_rejects_plain_content() {
        let (ids, macros, owner) = (ids(), MacroTable::default(), devs());
        let builder = DescriptorBuilder::new(&owner, "/srv/devs", &macros, &ids);
        let parent = builder.build(None).unwrap();
        assert!(builder.build_nested(&rule("a\tNOACL"), &parent).is_err());
        assert!(builder.build_nested(&rule("a\tRESTRICTED"), &parent).is_ok());
    }

    #[test]
    fn default_acl_of_root_is_content_template() {
        let (ids, macros, owner) = (ids(), MacroTable::default(), devs());
        let d = DescriptorBuilder::new(&owner, "/srv/devs", &macros, &ids)
            .build(None)
            .unwrap();
        let root = d.target(Position::Root, true);
        assert_eq!(root.uid, Some(0));
        assert_eq!(root.default.map(ToString::to_string), Some(d.content.dirs.to_string()));
        let file = d.target(Position::Content, false);
        assert_eq!(file.uid, None);
        assert!(file.default.is_none());
        let root_file = d.target(Position::Root, false);
        assert!(root_file.access.to_string().contains("@RUE"));
    }

    #[test]
    fn assemble_orders_and_excludes() {
        let home = tempfile::tempdir().unwrap();
        for dir in ["public_html", "public_html/cgi", "shared", "private"] {
            std::fs::create_dir(home.path().join(dir)).unwrap();
        }
        let (ids, macros, owner) = (ids(), MacroTable::default(), devs());
        let builder = DescriptorBuilder::new(&owner, home.path(), &macros, &ids);
        let sys = |text: &str, line: usize| {
            compile(text, Path::new("sys"), line, Scope::SystemDefault, &macros).unwrap()
        };
        let system = vec![
            sys("~\tg:www-data:--x", 1),
            sys("public_html\tg:www-data:r-x", 2),
            sys("missing\tg:www-data:r-x", 3),
        ];
        let object = vec![
            rule("public_html\tg:devs:rwx"),
            rule("public_html/cgi\tg:www-data:r-x,g:devs:rwx"),
            rule("shared\tg:devs:rwx"),
            rule("gone\tg:devs:rwx"),
        ];
        let descriptors = builder.assemble(&system, &object).unwrap();
        let names: Vec<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["devs", "public_html", "public_html/cgi", "shared"]);
        assert!(descriptors[0].implicit_default && descriptors[0].mandatory);
        let expected: BTreeSet<PathBuf> = ["public_html", "public_html/cgi", "shared"]
            .iter()
            .map(PathBuf::from)
            .collect();
        assert_eq!(descriptors[0].exclude, expected);
        assert_eq!(
            descriptors[1].exclude,
            [PathBuf::from("cgi")].into_iter().collect::<BTreeSet<_>>()
        );
        // The system rule wins, www-data keeps r-x without devs' extra rwx
        let public = descriptors[1].content.dirs.to_string();
        assert!(public.contains("g:33:r-x") && public.contains("g:5000:r-x"), "{}", public);
    }

    #[test]
    fn object_default_overrides_system_default() {
        let home = tempfile::tempdir().unwrap();
        let (ids, macros, owner) = (ids(), MacroTable::default(), devs());
        let builder = DescriptorBuilder::new(&owner, home.path(), &macros, &ids);
        let system =
            vec![compile("~\tNOACL", Path::new("sys"), 1, Scope::SystemDefault, &macros).unwrap()];
        let descriptors = builder.assemble(&system, &[rule("~\tRESTRICTED")]).unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].root.class, PolicyClass::Restricted);
        let descriptors = builder.assemble(&system, &[]).unwrap();
        assert_eq!(descriptors[0].root.class, PolicyClass::NoAcl);
    }
}
