//! State shared by the repairers of one session: how to ask, what was done, what is known about
//! the filesystem.

use crate::identity::IdentityResolver;
use crate::prompt::Ask;
use crate::{Error, ErrorKind, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepairKind {
    /// A missing mandatory directory was created.
    Created,
    Ownership,
    Mode,
    /// An extended ACL was removed from a plain-mode entry.
    AclRemoved,
    AccessAcl,
    DefaultAcl,
}

impl fmt::Display for RepairKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RepairKind::Created => "created",
            RepairKind::Ownership => "ownership",
            RepairKind::Mode => "mode",
            RepairKind::AclRemoved => "ACL removed",
            RepairKind::AccessAcl => "ACL",
            RepairKind::DefaultAcl => "default ACL",
        })
    }
}

/// A path about to be mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepairEvent {
    pub path: PathBuf,
    pub kind: RepairKind,
}

impl RepairEvent {
    pub fn new(path: impl Into<PathBuf>, kind: RepairKind) -> Self {
        RepairEvent {
            path: path.into(),
            kind,
        }
    }
}

/// Callback run with each event right before the mutating syscall.
pub type Listener<'a> = Box<dyn FnMut(&RepairEvent) + 'a>;

/// What to do once a repairer hit an error.
pub(crate) enum Recovery {
    /// Forget about this path, go on with the next one.
    SkipPath,
    /// Retry the current step without ACLs.
    Downgraded,
    /// Stop the session, the error is handed to the caller.
    Abort(Error),
}

pub struct RepairContext<'a> {
    batch: bool,
    auto_answer: Option<bool>,
    asker: Box<dyn Ask + 'a>,
    listener: Option<Listener<'a>>,
    ids: &'a dyn IdentityResolver,
    acl_supported: bool,
    complete: bool,
    touched: BTreeSet<PathBuf>,
}

impl<'a> RepairContext<'a> {
    /// In `batch` mode every repair is applied without consulting `asker`.
    pub fn new(
        batch: bool,
        auto_answer: Option<bool>,
        asker: Box<dyn Ask + 'a>,
        ids: &'a dyn IdentityResolver,
    ) -> Self {
        RepairContext {
            batch,
            auto_answer,
            asker,
            listener: None,
            ids,
            acl_supported: true,
            complete: true,
            touched: BTreeSet::new(),
        }
    }

    pub fn set_listener(&mut self, listener: Listener<'a>) {
        self.listener = Some(listener);
    }

    pub fn ids(&self) -> &'a dyn IdentityResolver {
        self.ids
    }

    pub fn is_batch(&self) -> bool {
        self.batch
    }

    pub fn acl_supported(&self) -> bool {
        self.acl_supported
    }

    /// Whether every repair asked for was applied so far.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Distinct paths mutated so far.
    pub fn touched(&self) -> usize {
        self.touched.len()
    }

    /// Ask for a repair. A refusal marks the session incomplete.
    pub(crate) fn approve(&mut self, message: &str) -> bool {
        let approved = self.batch || self.asker.ask_for_repair(message, self.auto_answer);
        if !approved {
            self.complete = false;
        }
        approved
    }

    /// Announce `event`, then run the syscall doing it.
    pub(crate) fn apply<F>(&mut self, event: RepairEvent, syscall: F) -> Result<RepairEvent>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        if let Some(listener) = self.listener.as_mut() {
            listener(&event);
        }
        syscall(&event.path)?;
        self.touched.insert(event.path.clone());
        Ok(event)
    }

    /// Decide how the session goes on after `err`.
    pub(crate) fn recover(&mut self, err: Error) -> Recovery {
        match err.kind() {
            ErrorKind::NotFound => Recovery::SkipPath,
            ErrorKind::Unsupported if self.acl_supported => {
                warn!("{}, checking plain modes only from now on", err);
                self.acl_supported = false;
                Recovery::Downgraded
            }
            ErrorKind::Unsupported => Recovery::SkipPath,
            ErrorKind::Permission | ErrorKind::Syntax => Recovery::Abort(err),
            _ => {
                if self.batch
                    || self
                        .asker
                        .ask_for_repair(&format!("{}. Continue anyway?", err), self.auto_answer)
                {
                    warn!("Skipped: {}", err);
                    self.complete = false;
                    Recovery::SkipPath
                } else {
                    Recovery::Abort(err)
                }
            }
        }
    }
}
