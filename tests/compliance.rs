//! Repair engine tests on scratch trees. They run unprivileged: the invoking user stands in for
//! root, named ACL entries use ids nobody owns.

use licorn_compliance::policy::PermTemplate;
use licorn_compliance::Qualifier::{self, *};
use licorn_compliance::{
    check_ownership, check_path, walk, AclTemplate, Batch, Descriptor, ErrorKind,
    IdentitySnapshot, PolicyClass, Position, PosixACL, RepairContext, RepairEvent, RepairKind,
    RepairSession, SessionOptions, Slot, WalkOptions,
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::cell::RefCell;
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::{tempdir, TempDir};

fn template(entries: &[(Qualifier, &str)]) -> AclTemplate {
    AclTemplate::new(
        entries
            .iter()
            .map(|(qual, perm)| (*qual, PermTemplate::parse(perm).unwrap())),
    )
}

fn set_mode(path: &Path, mode: u32) {
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
}

fn mode_of(path: &Path) -> u32 {
    path.symlink_metadata().unwrap().mode() & 0o7777
}

fn batch_options() -> SessionOptions {
    SessionOptions {
        batch: true,
        ..SessionOptions::default()
    }
}

/// `g/`, world writable, holding an executable script and a document.
fn shared_tree() -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let root = dir.path().join("g");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("run.sh"), "#!/bin/sh\n").unwrap();
    fs::write(root.join("doc.txt"), "").unwrap();
    set_mode(&root, 0o777);
    set_mode(&root.join("run.sh"), 0o755);
    set_mode(&root.join("doc.txt"), 0o644);
    (dir, root)
}

fn shared_descriptor(root: &Path) -> Descriptor {
    let meta = root.symlink_metadata().unwrap();
    let dirs = template(&[
        (UserObj, "rwx"),
        (GroupObj, "---"),
        (Other, "---"),
        (Group(5000), "rwx"),
        (Mask, "rwx"),
    ]);
    let files = template(&[
        (UserObj, "rw@UE"),
        (GroupObj, "---"),
        (Other, "---"),
        (Group(5000), "rw@GE"),
        (Mask, "rw@GE"),
    ]);
    let slot = Slot::acl(Some(meta.gid()), dirs, files);
    Descriptor::new("g", root, None, slot.clone(), slot)
        .unwrap()
        .with_root_uid(Some(meta.uid()))
}

#[test]
fn shared_tree_end_to_end() {
    let (_dir, root) = shared_tree();
    let ids = IdentitySnapshot::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);

    let mut session = RepairSession::new(
        vec![shared_descriptor(&root)],
        batch_options(),
        Box::new(Batch),
        &ids,
    )
    .with_listener(Box::new(move |event: &RepairEvent| {
        log.borrow_mut().push(event.clone())
    }));
    let events: Vec<RepairEvent> = session.by_ref().map(Result::unwrap).collect();
    assert!(session.is_complete());
    assert_eq!(*seen.borrow(), events);
    assert_eq!(
        events,
        [
            RepairEvent::new(&root, RepairKind::AccessAcl),
            RepairEvent::new(&root, RepairKind::DefaultAcl),
            RepairEvent::new(root.join("doc.txt"), RepairKind::AccessAcl),
            RepairEvent::new(root.join("run.sh"), RepairKind::AccessAcl),
        ]
    );

    let access = PosixACL::read_acl(&root).unwrap().compact_text();
    assert_eq!(access, "u::rwx,g::---,o::---,g:5000:rwx,m::rwx");
    let default = PosixACL::read_default_acl(&root).unwrap().compact_text();
    assert_eq!(default, access);
    assert_eq!(
        PosixACL::read_acl(root.join("run.sh")).unwrap().compact_text(),
        "u::rwx,g::---,o::---,g:5000:rwx,m::rwx"
    );
    assert_eq!(
        PosixACL::read_acl(root.join("doc.txt")).unwrap().compact_text(),
        "u::rw-,g::---,o::---,g:5000:rw-,m::rw-"
    );

    // Already compliant: nothing left to do
    let again = RepairSession::new(
        vec![shared_descriptor(&root)],
        batch_options(),
        Box::new(Batch),
        &ids,
    );
    assert_eq!(again.count(), 0);
}

/// Files created later inherit the default ACL, and still comply with the file template.
#[test]
fn inherited_entries_comply() {
    let (_dir, root) = shared_tree();
    let ids = IdentitySnapshot::new();
    let descriptors = vec![shared_descriptor(&root)];
    RepairSession::new(descriptors.clone(), batch_options(), Box::new(Batch), &ids)
        .for_each(|event| drop(event.unwrap()));

    fs::create_dir(root.join("new")).unwrap();
    let session = RepairSession::new(descriptors, batch_options(), Box::new(Batch), &ids);
    let events: Vec<RepairEvent> = session.map(Result::unwrap).collect();
    assert!(events.is_empty());
}

#[rstest]
#[case(0o700, 0o744)]
#[case(0o766, 0o744)]
#[case(0o600, 0o644)]
#[case(0o644, 0o644)]
fn exec_bit_is_preserved(#[case] before: u32, #[case] after: u32) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tool");
    fs::write(&path, "").unwrap();
    set_mode(&path, before);

    let slot = Slot::mode(None, PolicyClass::NoAcl, 0o755, 0o644);
    let descriptor = Descriptor::new("t", dir.path(), None, slot.clone(), slot).unwrap();
    let ids = IdentitySnapshot::new();
    let mut ctx = RepairContext::new(true, None, Box::new(Batch), &ids);
    let events: Vec<RepairEvent> = check_path(
        &path,
        descriptor.target(Position::Content, false),
        &mut ctx,
    )
    .map(Result::unwrap)
    .collect();

    assert_eq!(mode_of(&path), after);
    assert_eq!(events.len(), usize::from(before != after));
}

#[test]
fn ownership_accept_anything() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("f");
    fs::write(&path, "").unwrap();
    let before = path.symlink_metadata().unwrap();

    let ids = IdentitySnapshot::new();
    let mut ctx = RepairContext::new(true, None, Box::new(Batch), &ids);
    assert_eq!(check_ownership(&path, None, None, &mut ctx).count(), 0);

    let after = path.symlink_metadata().unwrap();
    assert_eq!(
        (after.uid(), after.gid(), after.ctime(), after.ctime_nsec()),
        (before.uid(), before.gid(), before.ctime(), before.ctime_nsec())
    );
    assert_eq!(ctx.touched(), 0);
}

#[rstest]
#[case(PolicyClass::NoAcl)]
#[case(PolicyClass::Acl)]
fn restricted_root_rejects_open_content(#[case] content: PolicyClass) {
    let root = Slot::mode(None, PolicyClass::Restricted, 0o700, 0o600);
    let content = match content {
        PolicyClass::Acl => {
            let dirs = template(&[(UserObj, "rwx"), (GroupObj, "r-x"), (Other, "---")]);
            Slot::acl(None, dirs.clone(), dirs.for_files(false))
        }
        class => Slot::mode(None, class, 0o755, 0o644),
    };
    let err = Descriptor::new("private", "/home/alice", None, root, content).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);

    let root = Slot::mode(None, PolicyClass::Restricted, 0o700, 0o600);
    assert!(Descriptor::new("private", "/home/alice", None, root.clone(), root).is_ok());
}

#[test]
fn walk_skips_excluded_subtree() {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("a/b/c")).unwrap();
    fs::create_dir(dir.path().join("a/d")).unwrap();
    fs::write(dir.path().join("a/b/c/f"), "").unwrap();
    fs::write(dir.path().join("a/e"), "").unwrap();

    let options = WalkOptions {
        exclude: [PathBuf::from("a/b")].into_iter().collect(),
        ..WalkOptions::default()
    };
    let paths: Vec<PathBuf> = walk(dir.path(), options)
        .unwrap()
        .map(|item| item.unwrap().0)
        .collect();
    assert_eq!(
        paths,
        [
            dir.path().to_path_buf(),
            dir.path().join("a"),
            dir.path().join("a/d"),
            dir.path().join("a/e"),
        ]
    );
}

/// Refusing every repair leaves the tree as it was.
#[test]
fn interactive_refusal() {
    let (_dir, root) = shared_tree();
    let ids = IdentitySnapshot::new();
    let options = SessionOptions::default();
    let mut session = RepairSession::new(
        vec![shared_descriptor(&root)],
        options,
        Box::new(|_: &str, _: Option<bool>| false),
        &ids,
    );
    assert_eq!(session.by_ref().count(), 0);
    assert!(!session.is_complete());
    assert_eq!(mode_of(&root), 0o777);
    assert!(!PosixACL::read_acl(&root).unwrap().is_extended());
}
