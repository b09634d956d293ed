//! Owner and group compliance.

use crate::repair::{RepairContext, RepairEvent, RepairKind};
use crate::{Error, ErrorKind, Result};
use std::os::unix::fs::{lchown, MetadataExt};
use std::path::{Path, PathBuf};
use tracing::{info, trace, warn};

/// One `lchown()` if the link's own uid or gid differ from the wanted ones. `None` accepts any.
pub(crate) fn repair_ownership(
    path: &Path,
    uid: Option<u32>,
    gid: Option<u32>,
    ctx: &mut RepairContext<'_>,
) -> Result<Option<RepairEvent>> {
    if uid.is_none() && gid.is_none() {
        return Ok(None);
    }
    let meta = path.symlink_metadata().map_err(|err| Error::io(path, err))?;
    let new_uid = uid.filter(|&uid| uid != meta.uid());
    let new_gid = gid.filter(|&gid| gid != meta.gid());
    if new_uid.is_none() && new_gid.is_none() {
        trace!("{} ownership is compliant", path.display());
        return Ok(None);
    }

    let ids = ctx.ids();
    let current = format!(
        "{}:{}",
        ids.display_user(meta.uid()),
        ids.display_group(meta.gid())
    );
    let wanted = format!(
        "{}:{}",
        ids.display_user(new_uid.unwrap_or(meta.uid())),
        ids.display_group(new_gid.unwrap_or(meta.gid()))
    );
    let message = format!(
        "Invalid owner for {}: {}, should be {}. Repair?",
        path.display(),
        current,
        wanted
    );
    if !ctx.approve(&message) {
        warn!("Left owner of {} as {}", path.display(), current);
        return Ok(None);
    }
    let event = ctx.apply(RepairEvent::new(path, RepairKind::Ownership), |path| {
        lchown(path, new_uid, new_gid).map_err(|err| Error::io(path, err))
    })?;
    info!("Changed owner of {} from {} to {}", path.display(), current, wanted);
    Ok(Some(event))
}

/// Lazy ownership check of one path, see [`check_ownership()`].
pub struct OwnershipCheck<'c, 'a> {
    path: PathBuf,
    uid: Option<u32>,
    gid: Option<u32>,
    ctx: &'c mut RepairContext<'a>,
    done: bool,
}

/// Check that `path` itself (never a symlink's target) belongs to `uid:gid` and repair it if it
/// does not. Nothing happens until the iterator is pulled.
pub fn check_ownership<'c, 'a>(
    path: impl Into<PathBuf>,
    uid: Option<u32>,
    gid: Option<u32>,
    ctx: &'c mut RepairContext<'a>,
) -> OwnershipCheck<'c, 'a> {
    OwnershipCheck {
        path: path.into(),
        uid,
        gid,
        ctx,
        done: false,
    }
}

impl Iterator for OwnershipCheck<'_, '_> {
    type Item = Result<RepairEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.done = true;
        match repair_ownership(&self.path, self.uid, self.gid, self.ctx) {
            Ok(event) => event.map(Ok),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentitySnapshot;
    use crate::prompt::Batch;
    use std::os::unix::fs::symlink;

    #[test]
    fn accept_anything_never_touches() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, "").unwrap();
        let ids = IdentitySnapshot::new();
        let mut ctx = RepairContext::new(true, None, Box::new(Batch), &ids);
        assert_eq!(check_ownership(&file, None, None, &mut ctx).count(), 0);
        assert_eq!(ctx.touched(), 0);
    }

    #[test]
    fn compliant_owner() {
        let dir = tempfile::tempdir().unwrap();
        let meta = dir.path().symlink_metadata().unwrap();
        let ids = IdentitySnapshot::new();
        let mut ctx = RepairContext::new(true, None, Box::new(Batch), &ids);
        let events: Vec<_> =
            check_ownership(dir.path(), Some(meta.uid()), Some(meta.gid()), &mut ctx).collect();
        assert!(events.is_empty());
    }

    #[test]
    fn link_itself_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("dangling");
        symlink("/nonexistent/target", &link).unwrap();
        let meta = link.symlink_metadata().unwrap();
        let ids = IdentitySnapshot::new();
        let mut ctx = RepairContext::new(true, None, Box::new(Batch), &ids);
        assert_eq!(
            check_ownership(&link, Some(meta.uid()), None, &mut ctx).count(),
            0
        );
    }

    #[test]
    fn refused_repair() {
        let dir = tempfile::tempdir().unwrap();
        let meta = dir.path().symlink_metadata().unwrap();
        let ids = IdentitySnapshot::new();
        let mut ctx = RepairContext::new(
            false,
            None,
            Box::new(|_: &str, _: Option<bool>| false),
            &ids,
        );
        let events: Vec<_> =
            check_ownership(dir.path(), Some(meta.uid() + 1), None, &mut ctx).collect();
        assert!(events.is_empty());
        assert!(!ctx.is_complete());
        assert_eq!(dir.path().symlink_metadata().unwrap().uid(), meta.uid());
    }

    #[test]
    fn vanished_path() {
        let ids = IdentitySnapshot::new();
        let mut ctx = RepairContext::new(true, None, Box::new(Batch), &ids);
        assert_eq!(
            check_ownership("/nonexistent/path", Some(0), Some(0), &mut ctx).count(),
            0
        );
    }
}
