//! Check of one path against one descriptor slot.
//!
//! A [`PathCheck`] goes through ownership, then the access ACL or mode, then (directories only)
//! the default ACL. Each stage `lstat()`s the path again, so that a stage sees what the previous
//! one did, and produces at most one repair.

use crate::descriptor::Target;
use crate::ownership::repair_ownership;
use crate::policy::{describe, SlotPolicy};
use crate::repair::{Recovery, RepairContext, RepairEvent, RepairKind};
use crate::util::{exec_bits, mode_to_text, MODE_MASK, S_IXGRP, S_IXUSR};
use crate::{entries_to_text, ACLEntry, Error, PosixACL, Result};
use std::fs::{self, Metadata, Permissions};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Ownership,
    Access,
    Default,
    Done,
}

impl Stage {
    fn next(self) -> Stage {
        match self {
            Stage::Ownership => Stage::Access,
            Stage::Access => Stage::Default,
            Stage::Default | Stage::Done => Stage::Done,
        }
    }
}

/// Progress of the check of one path.
#[derive(Debug)]
pub struct PathCheck {
    path: PathBuf,
    stage: Stage,
}

impl PathCheck {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        PathCheck {
            path: path.into(),
            stage: Stage::Ownership,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Run stages until one repairs something. `None` once the path is fully checked (or
    /// skipped); an error means the session must stop.
    pub fn step(
        &mut self,
        target: &Target<'_>,
        ctx: &mut RepairContext<'_>,
    ) -> Option<Result<RepairEvent>> {
        loop {
            let outcome = match self.stage {
                Stage::Done => return None,
                Stage::Ownership => repair_ownership(&self.path, target.uid, target.gid, ctx),
                Stage::Access => self.check_access(target, ctx),
                Stage::Default => self.check_default(target, ctx),
            };
            match outcome {
                Ok(Some(event)) => {
                    // Removing an ACL leaves the mode to check
                    if !(self.stage == Stage::Access && event.kind == RepairKind::AclRemoved) {
                        self.stage = self.stage.next();
                    }
                    return Some(Ok(event));
                }
                Ok(None) => self.stage = self.stage.next(),
                Err(err) => match ctx.recover(err) {
                    Recovery::Downgraded => continue,
                    Recovery::SkipPath => {
                        trace!("Skipped {}", self.path.display());
                        self.stage = Stage::Done;
                        return None;
                    }
                    Recovery::Abort(err) => {
                        self.stage = Stage::Done;
                        return Some(Err(err));
                    }
                },
            }
        }
    }

    fn lstat(&self) -> Result<Metadata> {
        self.path
            .symlink_metadata()
            .map_err(|err| Error::io(&self.path, err))
    }

    fn check_access(
        &self,
        target: &Target<'_>,
        ctx: &mut RepairContext<'_>,
    ) -> Result<Option<RepairEvent>> {
        let meta = self.lstat()?;
        if meta.file_type().is_symlink() {
            return Ok(None);
        }
        let (owner_exec, group_exec) = exec_bits(&meta);
        match target.access {
            SlotPolicy::Acl(template) if ctx.acl_supported() => {
                self.repair_acl(template.resolve(owner_exec, group_exec), false, ctx)
            }
            SlotPolicy::Acl(template) => {
                self.repair_mode(template.fallback_mode(owner_exec, group_exec), &meta, ctx)
            }
            SlotPolicy::Mode(mode) => {
                let kept_exec = meta.mode() & (S_IXUSR | S_IXGRP);
                self.repair_mode(mode | kept_exec, &meta, ctx)
            }
        }
    }

    fn check_default(
        &self,
        target: &Target<'_>,
        ctx: &mut RepairContext<'_>,
    ) -> Result<Option<RepairEvent>> {
        if !ctx.acl_supported() {
            return Ok(None);
        }
        let meta = self.lstat()?;
        if !meta.is_dir() {
            return Ok(None);
        }
        match (target.access, target.default) {
            (SlotPolicy::Acl(_), Some(template)) => {
                let (owner_exec, group_exec) = exec_bits(&meta);
                self.repair_acl(template.resolve(owner_exec, group_exec), true, ctx)
            }
            _ => self.remove_default_acl(ctx),
        }
    }

    fn repair_acl(
        &self,
        mut wanted: Vec<ACLEntry>,
        default: bool,
        ctx: &mut RepairContext<'_>,
    ) -> Result<Option<RepairEvent>> {
        let path = &self.path;
        let current = if default {
            PosixACL::read_default_acl(path)
        } else {
            PosixACL::read_acl(path)
        }
        .map_err(|err| Error::from_acl(path, err))?;
        wanted.sort();
        let current = current.entries_sorted();
        if current == wanted {
            trace!("{} ACL is compliant", path.display());
            return Ok(None);
        }

        let kind = if default {
            RepairKind::DefaultAcl
        } else {
            RepairKind::AccessAcl
        };
        let (before, after) = (describe(&current), entries_to_text(&wanted));
        let message = format!(
            "Invalid {} on {}: {}, should be {}. Repair?",
            kind,
            path.display(),
            before,
            after
        );
        if !ctx.approve(&message) {
            warn!("Left {} of {} as {}", kind, path.display(), before);
            return Ok(None);
        }
        let acl = PosixACL::from_entries(&wanted);
        let event = ctx.apply(RepairEvent::new(path, kind), |path| {
            acl.write_exact_acl(path, default)
                .map_err(|err| Error::from_acl(path, err))
        })?;
        info!("Changed {} of {} from {} to {}", kind, path.display(), before, after);
        Ok(Some(event))
    }

    fn repair_mode(
        &self,
        wanted: u32,
        meta: &Metadata,
        ctx: &mut RepairContext<'_>,
    ) -> Result<Option<RepairEvent>> {
        let path = &self.path;
        if ctx.acl_supported() {
            let current = PosixACL::read_acl(path).map_err(|err| Error::from_acl(path, err))?;
            if current.is_extended() {
                let message = format!(
                    "{} carries an ACL ({}), should have mode {}. Remove it?",
                    path.display(),
                    current.compact_text(),
                    mode_to_text(wanted)
                );
                if !ctx.approve(&message) {
                    warn!("Left ACL of {} in place", path.display());
                    return Ok(None);
                }
                let minimal = PosixACL::new(wanted);
                let event = ctx.apply(RepairEvent::new(path, RepairKind::AclRemoved), |path| {
                    minimal
                        .write_exact_acl(path, false)
                        .map_err(|err| Error::from_acl(path, err))
                })?;
                info!("Removed ACL {} of {}", current.compact_text(), path.display());
                return Ok(Some(event));
            }
        }

        let current = meta.mode() & MODE_MASK;
        if current == wanted {
            trace!("{} mode is compliant", path.display());
            return Ok(None);
        }
        let message = format!(
            "Invalid mode on {}: {}, should be {}. Repair?",
            path.display(),
            mode_to_text(current),
            mode_to_text(wanted)
        );
        if !ctx.approve(&message) {
            warn!("Left mode of {} as {:04o}", path.display(), current);
            return Ok(None);
        }
        let event = ctx.apply(RepairEvent::new(path, RepairKind::Mode), |path| {
            fs::set_permissions(path, Permissions::from_mode(wanted))
                .map_err(|err| Error::io(path, err))
        })?;
        info!(
            "Changed mode of {} from {:04o} to {:04o}",
            path.display(),
            current,
            wanted
        );
        Ok(Some(event))
    }

    /// A plain-mode directory inherits nothing.
    fn remove_default_acl(&self, ctx: &mut RepairContext<'_>) -> Result<Option<RepairEvent>> {
        let path = &self.path;
        let current = PosixACL::read_default_acl(path).map_err(|err| Error::from_acl(path, err))?;
        if current.entries().is_empty() {
            return Ok(None);
        }
        let message = format!(
            "{} carries a default ACL ({}), should have none. Remove it?",
            path.display(),
            current.compact_text()
        );
        if !ctx.approve(&message) {
            warn!("Left default ACL of {} in place", path.display());
            return Ok(None);
        }
        let event = ctx.apply(RepairEvent::new(path, RepairKind::AclRemoved), |path| {
            PosixACL::delete_default_acl(path).map_err(|err| Error::from_acl(path, err))
        })?;
        info!("Removed default ACL of {}", path.display());
        Ok(Some(event))
    }
}

/// Lazy check of one path, see [`check_path()`].
pub struct PathChecker<'c, 'a> {
    check: PathCheck,
    target: Target<'c>,
    ctx: &'c mut RepairContext<'a>,
}

/// Check `path` against `target`, repairing what differs as the iterator is pulled.
pub fn check_path<'c, 'a>(
    path: impl Into<PathBuf>,
    target: Target<'c>,
    ctx: &'c mut RepairContext<'a>,
) -> PathChecker<'c, 'a> {
    PathChecker {
        check: PathCheck::new(path),
        target,
        ctx,
    }
}

impl Iterator for PathChecker<'_, '_> {
    type Item = Result<RepairEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.check.step(&self.target, self.ctx)
    }
}
