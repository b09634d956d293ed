//! The repair session: every descriptor of a tree, every path below them.

use crate::compare::PathCheck;
use crate::config::WalkSettings;
use crate::descriptor::{Descriptor, Position};
use crate::identity::IdentityResolver;
use crate::prompt::{Ask, Batch};
use crate::repair::{Listener, Recovery, RepairContext, RepairEvent, RepairKind};
use crate::walk::{walk, EntryType, WalkOptions, Walker};
use crate::{Error, ErrorKind, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Repair without asking.
    pub batch: bool,
    /// Answer handed to the asker with every question.
    pub auto_answer: Option<bool>,
    /// Log every descriptor at `info` level, and a summary at the end.
    pub full_display: bool,
    pub walk: WalkSettings,
}

enum State {
    /// Between descriptors.
    Idle,
    /// Checking one path; `descend` walks the descriptor's contents afterwards.
    Path {
        index: usize,
        position: Position,
        is_dir: bool,
        descend: bool,
        check: PathCheck,
    },
    Content {
        index: usize,
        walker: Walker,
        current: Option<(PathCheck, bool)>,
    },
    Finished,
}

/// Lazy sequence of the repairs of a list of descriptors.
///
/// Nothing is touched until the session is pulled; dropping it stops everything. An `Err` item
/// ends the session.
///
/// Events are yielded once their change has been applied. A listener set with
/// [`RepairSession::with_listener()`] hears about each one earlier, before the syscall runs.
pub struct RepairSession<'a> {
    descriptors: Vec<Descriptor>,
    order: Vec<usize>,
    cursor: usize,
    ctx: RepairContext<'a>,
    options: SessionOptions,
    state: State,
    failed: bool,
}

impl<'a> RepairSession<'a> {
    /// Descriptors flagged `implicit_default` are checked first, the others in the given order.
    pub fn new(
        descriptors: Vec<Descriptor>,
        options: SessionOptions,
        asker: Box<dyn Ask + 'a>,
        ids: &'a dyn IdentityResolver,
    ) -> Self {
        let (defaults, others): (Vec<usize>, Vec<usize>) =
            (0..descriptors.len()).partition(|&i| descriptors[i].implicit_default);
        let order = defaults.into_iter().chain(others).collect();
        RepairSession {
            descriptors,
            order,
            cursor: 0,
            ctx: RepairContext::new(options.batch, options.auto_answer, asker, ids),
            options,
            state: State::Idle,
            failed: false,
        }
    }

    /// Check the single `path` against the descriptor covering it, in batch mode.
    ///
    /// # Errors
    /// * `Error::BadArgument`: no descriptor covers `path`.
    /// * `Error::Permission`, `Error::Io`: `path` cannot be `lstat()`'ed.
    pub fn for_path(
        path: impl Into<PathBuf>,
        descriptors: &[Descriptor],
        ids: &'a dyn IdentityResolver,
    ) -> Result<Self> {
        let path = path.into();
        let descriptor = covering(descriptors, &path).ok_or_else(|| {
            Error::BadArgument(format!("{} is not covered by any descriptor", path.display()))
        })?;
        let options = SessionOptions {
            batch: true,
            ..SessionOptions::default()
        };
        let mut session =
            RepairSession::new(vec![descriptor.clone()], options, Box::new(Batch), ids);
        session.order.clear();
        session.state = match path.symlink_metadata() {
            Ok(meta) => State::Path {
                index: 0,
                position: if path == descriptor.path {
                    Position::Root
                } else {
                    Position::Content
                },
                is_dir: meta.is_dir(),
                descend: false,
                check: PathCheck::new(path),
            },
            Err(err) => match Error::io(&path, err) {
                err if err.kind() == ErrorKind::NotFound => State::Finished,
                err => return Err(err),
            },
        };
        Ok(session)
    }

    /// Run `listener` with each event right before its syscall. The iterator yields the same
    /// event after the syscall succeeded.
    #[must_use]
    pub fn with_listener(mut self, listener: Listener<'a>) -> Self {
        self.ctx.set_listener(listener);
        self
    }

    /// Whether every repair needed so far was applied.
    pub fn is_complete(&self) -> bool {
        self.ctx.is_complete() && !self.failed
    }

    /// Distinct paths mutated so far.
    pub fn touched(&self) -> usize {
        self.ctx.touched()
    }

    fn finish(&mut self) {
        if !matches!(self.state, State::Finished) && self.options.full_display {
            info!(
                "Check finished, {} path(s) modified{}",
                self.ctx.touched(),
                if self.is_complete() {
                    ""
                } else {
                    ", some repairs were refused or skipped"
                }
            );
        }
        self.state = State::Finished;
    }

    fn fail(&mut self, err: Error) -> Option<Result<RepairEvent>> {
        self.failed = true;
        self.finish();
        Some(Err(err))
    }

    /// Look at the root of the next descriptor. A missing mandatory root gets created.
    fn begin(&mut self, index: usize) -> Result<Option<RepairEvent>> {
        let descriptor = &self.descriptors[index];
        let path = descriptor.path.clone();
        if self.options.full_display {
            info!("Checking {} ({})", descriptor.name, path.display());
        } else {
            debug!("Checking {} ({})", descriptor.name, path.display());
        }
        let (event, is_dir) = match path.symlink_metadata() {
            Ok(meta) => (None, meta.is_dir()),
            Err(err) => {
                let err = Error::io(&path, err);
                if err.kind() != ErrorKind::NotFound {
                    return Err(err);
                }
                if !descriptor.mandatory {
                    warn!("{} does not exist, skipped", path.display());
                    return Ok(None);
                }
                let message = format!("{} does not exist. Create it?", path.display());
                if !self.ctx.approve(&message) {
                    warn!("{} left missing", path.display());
                    return Ok(None);
                }
                let event = self.ctx.apply(RepairEvent::new(&path, RepairKind::Created), |path| {
                    fs::create_dir_all(path).map_err(|err| Error::io(path, err))
                })?;
                info!("Created directory {}", path.display());
                (Some(event), true)
            }
        };
        self.state = State::Path {
            index,
            position: Position::Root,
            is_dir,
            descend: is_dir,
            check: PathCheck::new(path),
        };
        Ok(event)
    }

    fn content_walker(&self, index: usize) -> Result<Walker> {
        let descriptor = &self.descriptors[index];
        let options = WalkOptions {
            min_depth: 1,
            exclude: descriptor.exclude.clone(),
            ..WalkOptions::from_settings(&self.options.walk)
        };
        walk(&descriptor.path, options)
    }
}

impl Iterator for RepairSession<'_> {
    type Item = Result<RepairEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.state {
                State::Finished => return None,
                State::Idle => {
                    let Some(&index) = self.order.get(self.cursor) else {
                        self.finish();
                        return None;
                    };
                    self.cursor += 1;
                    match self.begin(index) {
                        Ok(Some(event)) => return Some(Ok(event)),
                        Ok(None) => {}
                        Err(err) => match self.ctx.recover(err) {
                            Recovery::Abort(err) => return self.fail(err),
                            _ => self.state = State::Idle,
                        },
                    }
                }
                State::Path {
                    index,
                    position,
                    is_dir,
                    descend,
                    check,
                } => {
                    let target = self.descriptors[*index].target(*position, *is_dir);
                    match check.step(&target, &mut self.ctx) {
                        Some(Ok(event)) => return Some(Ok(event)),
                        Some(Err(err)) => return self.fail(err),
                        None if *descend => {
                            let index = *index;
                            match self.content_walker(index) {
                                Ok(walker) => {
                                    self.state = State::Content {
                                        index,
                                        walker,
                                        current: None,
                                    }
                                }
                                Err(err) => return self.fail(err),
                            }
                        }
                        None => self.state = State::Idle,
                    }
                }
                State::Content {
                    index,
                    walker,
                    current,
                } => {
                    if let Some((check, is_dir)) = current {
                        let target = self.descriptors[*index].target(Position::Content, *is_dir);
                        match check.step(&target, &mut self.ctx) {
                            Some(Ok(event)) => return Some(Ok(event)),
                            Some(Err(err)) => return self.fail(err),
                            None => *current = None,
                        }
                        continue;
                    }
                    match walker.next() {
                        Some(Ok((path, entry_type))) => {
                            *current = Some((PathCheck::new(path), entry_type == EntryType::Dir));
                        }
                        Some(Err(err)) => {
                            if let Recovery::Abort(err) = self.ctx.recover(err) {
                                return self.fail(err);
                            }
                        }
                        None => self.state = State::Idle,
                    }
                }
            }
        }
    }
}

/// The descriptor in charge of `path`: the deepest one holding it without excluding it.
fn covering<'d>(descriptors: &'d [Descriptor], path: &Path) -> Option<&'d Descriptor> {
    descriptors
        .iter()
        .filter(|d| match path.strip_prefix(&d.path) {
            Ok(relative) => !d.exclude.iter().any(|excluded| relative.starts_with(excluded)),
            Err(_) => false,
        })
        .max_by_key(|d| d.path.components().count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Slot;
    use crate::identity::IdentitySnapshot;
    use crate::policy::PolicyClass;
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    fn plain(path: &Path, dirs: u32, files: u32) -> Descriptor {
        let slot = Slot::mode(None, PolicyClass::NoAcl, dirs, files);
        Descriptor::new("t", path, None, slot.clone(), slot).unwrap()
    }

    fn set_mode(path: &Path, mode: u32) {
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }

    fn mode_of(path: &Path) -> u32 {
        path.symlink_metadata().unwrap().mode() & 0o7777
    }

    #[test]
    fn root_then_content() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("tree");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("sub/f"), "").unwrap();
        set_mode(&root, 0o700);
        set_mode(&root.join("sub"), 0o777);
        set_mode(&root.join("sub/f"), 0o600);

        let ids = IdentitySnapshot::new();
        let options = SessionOptions {
            batch: true,
            ..SessionOptions::default()
        };
        let mut session =
            RepairSession::new(vec![plain(&root, 0o755, 0o644)], options, Box::new(Batch), &ids);
        let paths: Vec<PathBuf> = session.by_ref().map(|e| e.unwrap().path).collect();
        assert_eq!(paths, [root.clone(), root.join("sub"), root.join("sub/f")]);
        assert!(session.is_complete());
        assert_eq!(session.touched(), 3);
        assert_eq!(mode_of(&root.join("sub")), 0o755);
    }

    #[test]
    fn implicit_default_comes_first() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (dir.path().join("a"), dir.path().join("b"));
        fs::create_dir(&a).unwrap();
        fs::create_dir(&b).unwrap();
        set_mode(&a, 0o777);
        set_mode(&b, 0o777);
        let first = plain(&a, 0o755, 0o644);
        let default = Descriptor {
            implicit_default: true,
            ..plain(&b, 0o755, 0o644)
        };
        let ids = IdentitySnapshot::new();
        let options = SessionOptions {
            batch: true,
            ..SessionOptions::default()
        };
        let session = RepairSession::new(vec![first, default], options, Box::new(Batch), &ids);
        let paths: Vec<PathBuf> = session.map(|e| e.unwrap().path).collect();
        assert_eq!(paths, [b, a]);
    }

    #[test]
    fn missing_mandatory_root_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home");
        let ids = IdentitySnapshot::new();
        let options = SessionOptions {
            batch: true,
            ..SessionOptions::default()
        };
        let descriptors = vec![plain(&home, 0o755, 0o644).mandatory(true)];
        let kinds: Vec<RepairKind> = RepairSession::new(descriptors, options, Box::new(Batch), &ids)
            .map(|e| e.unwrap().kind)
            .collect();
        assert_eq!(kinds.first(), Some(&RepairKind::Created));
        assert!(home.is_dir());

        let missing = dir.path().join("optional");
        let descriptors = vec![plain(&missing, 0o755, 0o644)];
        let session =
            RepairSession::new(descriptors, SessionOptions::default(), Box::new(Batch), &ids);
        assert_eq!(session.count(), 0);
        assert!(!missing.exists());
    }

    #[test]
    fn dropping_the_session_stops_repairs() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c"] {
            fs::write(dir.path().join(name), "").unwrap();
            set_mode(&dir.path().join(name), 0o666);
        }
        set_mode(dir.path(), 0o755);
        let ids = IdentitySnapshot::new();
        let options = SessionOptions {
            batch: true,
            ..SessionOptions::default()
        };
        let mut session = RepairSession::new(
            vec![plain(dir.path(), 0o755, 0o644)],
            options,
            Box::new(Batch),
            &ids,
        );
        let first = session.next().unwrap().unwrap();
        assert_eq!(first.path, dir.path().join("a"));
        drop(session);
        assert_eq!(mode_of(&dir.path().join("a")), 0o644);
        assert_eq!(mode_of(&dir.path().join("b")), 0o666);
    }

    #[test]
    fn single_path_check() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("public_html");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("index.html"), "").unwrap();
        fs::write(dir.path().join("notes"), "").unwrap();
        set_mode(&sub.join("index.html"), 0o600);
        set_mode(&dir.path().join("notes"), 0o666);

        let default = plain(dir.path(), 0o700, 0o600).with_exclusions(["public_html"]);
        let public = plain(&sub, 0o755, 0o644);
        let ids = IdentitySnapshot::new();

        let target = sub.join("index.html");
        let descriptors = [default.clone(), public.clone()];
        let events: Vec<_> = RepairSession::for_path(&target, &descriptors, &ids)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(events, [RepairEvent::new(&target, RepairKind::Mode)]);
        assert_eq!(mode_of(&target), 0o644);

        let notes = dir.path().join("notes");
        RepairSession::for_path(&notes, &[default.clone(), public], &ids)
            .unwrap()
            .for_each(drop);
        assert_eq!(mode_of(&notes), 0o600);

        let outside = RepairSession::for_path("/etc/passwd", &[default], &ids);
        assert_eq!(outside.err().map(|e| e.kind()), Some(ErrorKind::BadArgument));
    }

    #[test]
    fn events_are_yielded_after_the_change() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc");
        fs::write(&file, "").unwrap();
        set_mode(&file, 0o666);
        set_mode(dir.path(), 0o755);
        let ids = IdentitySnapshot::new();
        let options = SessionOptions {
            batch: true,
            ..SessionOptions::default()
        };
        let heard = std::rc::Rc::new(std::cell::Cell::new(0));
        let mode_heard = std::rc::Rc::clone(&heard);
        let mut session = RepairSession::new(
            vec![plain(dir.path(), 0o755, 0o644)],
            options,
            Box::new(Batch),
            &ids,
        )
        .with_listener(Box::new(move |event: &RepairEvent| {
            mode_heard.set(mode_of(&event.path))
        }));
        let event = session.next().unwrap().unwrap();
        assert_eq!(event, RepairEvent::new(&file, RepairKind::Mode));
        assert_eq!(heard.get(), 0o666);
        assert_eq!(mode_of(&file), 0o644);
        assert!(session.next().is_none());
    }

    #[test]
    fn ownership_denied_aborts() {
        if unsafe { libc::geteuid() } == 0 {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), "").unwrap();
        let other = dir.path().symlink_metadata().unwrap().uid() + 1;
        let slot = Slot::mode(None, PolicyClass::NoAcl, 0o755, 0o644);
        let descriptor = Descriptor::new("t", dir.path(), Some(other), slot.clone(), slot).unwrap();
        let ids = IdentitySnapshot::new();
        let options = SessionOptions {
            batch: true,
            ..SessionOptions::default()
        };
        let mut session = RepairSession::new(vec![descriptor], options, Box::new(Batch), &ids);
        let err = session.next().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
        assert!(session.next().is_none());
        assert!(!session.is_complete());
        assert_eq!(session.touched(), 0);
    }
}
