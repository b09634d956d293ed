//! Breadth-first enumeration of a tree.
//!
//! The walker reads one level completely before going down to the next one, so it only ever
//! holds the directories of a single level in memory. Entries are `lstat()`'ed, never followed
//! unless asked to.

use crate::config::WalkSettings;
use crate::{Error, ErrorKind, Result};
use std::collections::{BTreeSet, VecDeque};
use std::fs::{self, FileType};
use std::mem;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Deepest level a walk may reach.
pub const MAX_DEPTH: usize = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    Dir,
    File,
    Symlink,
    /// Sockets, FIFOs, devices.
    Other,
}

impl EntryType {
    pub fn of(file_type: FileType) -> EntryType {
        if file_type.is_symlink() {
            EntryType::Symlink
        } else if file_type.is_dir() {
            EntryType::Dir
        } else if file_type.is_file() {
            EntryType::File
        } else {
            EntryType::Other
        }
    }
}

/// Which entry types a walk yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeFilter {
    pub dirs: bool,
    pub files: bool,
    pub symlinks: bool,
    pub others: bool,
}

impl TypeFilter {
    pub const ALL: TypeFilter = TypeFilter {
        dirs: true,
        files: true,
        symlinks: true,
        others: true,
    };
    pub const DIRS: TypeFilter = TypeFilter {
        dirs: true,
        files: false,
        symlinks: false,
        others: false,
    };
    pub const FILES: TypeFilter = TypeFilter {
        dirs: false,
        files: true,
        symlinks: false,
        others: false,
    };

    pub fn allows(&self, entry_type: EntryType) -> bool {
        match entry_type {
            EntryType::Dir => self.dirs,
            EntryType::File => self.files,
            EntryType::Symlink => self.symlinks,
            EntryType::Other => self.others,
        }
    }
}

/// Directories and regular files.
impl Default for TypeFilter {
    fn default() -> Self {
        TypeFilter {
            dirs: true,
            files: true,
            symlinks: false,
            others: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkOptions {
    pub types: TypeFilter,
    /// The root is at depth 0, its entries at depth 1.
    pub min_depth: usize,
    pub max_depth: usize,
    /// Paths relative to the root, neither yielded nor entered.
    pub exclude: BTreeSet<PathBuf>,
    pub follow_links: bool,
    pub follow_mounts: bool,
    /// Entry names whose "permission denied" is silently ignored.
    pub virtual_paths: Vec<String>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        WalkOptions::from_settings(&WalkSettings::default())
    }
}

impl WalkOptions {
    pub fn from_settings(settings: &WalkSettings) -> Self {
        WalkOptions {
            types: TypeFilter::default(),
            min_depth: 0,
            max_depth: settings.max_depth,
            exclude: BTreeSet::new(),
            follow_links: settings.follow_links,
            follow_mounts: settings.follow_mounts,
            virtual_paths: settings.virtual_paths.clone(),
        }
    }

    fn is_virtual(&self, path: &Path) -> bool {
        let name = path.as_os_str().to_string_lossy();
        self.virtual_paths.iter().any(|v| name.ends_with(v.as_str()))
    }
}

struct PendingDir {
    path: PathBuf,
    depth: usize,
    dev: u64,
}

/// Lazy iterator of `(path, type)`. See [`walk()`].
pub struct Walker {
    root: PathBuf,
    options: WalkOptions,
    root_pending: bool,
    ready: VecDeque<Result<(PathBuf, EntryType)>>,
    level: VecDeque<PendingDir>,
    next_level: Vec<PendingDir>,
}

/// Enumerate `root` and its descendants, breadth first.
///
/// Entries that vanish while walking are skipped. Other errors are yielded and the walk goes on
/// with the next entry.
///
/// # Errors
/// * `Error::BadArgument`: `min_depth > max_depth`, or `max_depth` beyond [`MAX_DEPTH`].
pub fn walk(root: impl Into<PathBuf>, options: WalkOptions) -> Result<Walker> {
    if options.min_depth > options.max_depth {
        return Err(Error::BadArgument(format!(
            "min_depth {} is greater than max_depth {}",
            options.min_depth, options.max_depth
        )));
    }
    if options.max_depth > MAX_DEPTH {
        return Err(Error::BadArgument(format!(
            "max_depth {} exceeds {}",
            options.max_depth, MAX_DEPTH
        )));
    }
    let root = root.into();
    debug!(
        "Walking {} (depth {}..={}, {} exclusion(s))",
        root.display(),
        options.min_depth,
        options.max_depth,
        options.exclude.len()
    );
    Ok(Walker {
        root,
        options,
        root_pending: true,
        ready: VecDeque::new(),
        level: VecDeque::new(),
        next_level: Vec::new(),
    })
}

impl Walker {
    /// Route an error: benign ones are logged and dropped, the others queued for the caller.
    fn failed(&mut self, path: &Path, err: std::io::Error) {
        let err = Error::io(path, err);
        match err.kind() {
            ErrorKind::NotFound => warn!("{} vanished while walking, skipped", path.display()),
            ErrorKind::Permission if self.options.is_virtual(path) => {
                debug!("Skipped virtual path {}", path.display())
            }
            _ => self.ready.push_back(Err(err)),
        }
    }

    fn visit(&mut self, path: PathBuf, depth: usize, parent_dev: Option<u64>) {
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(err) => return self.failed(&path, err),
        };
        let entry_type = EntryType::of(meta.file_type());
        trace!("{} {:?} at depth {}", path.display(), entry_type, depth);

        let descend_into = match entry_type {
            EntryType::Dir => Some(meta.dev()),
            EntryType::Symlink if self.options.follow_links => fs::metadata(&path)
                .ok()
                .filter(|target| target.is_dir())
                .map(|target| target.dev()),
            _ => None,
        };
        if let Some(dev) = descend_into {
            let crosses_mount = parent_dev.map_or(false, |parent| parent != dev);
            if depth < self.options.max_depth && (self.options.follow_mounts || !crosses_mount) {
                self.next_level.push(PendingDir {
                    path: path.clone(),
                    depth,
                    dev,
                });
            } else if crosses_mount {
                debug!("Not crossing mount point {}", path.display());
            }
        }
        if depth >= self.options.min_depth && self.options.types.allows(entry_type) {
            self.ready.push_back(Ok((path, entry_type)));
        }
    }

    fn read_level_dir(&mut self, dir: PendingDir) {
        let entries = match fs::read_dir(&dir.path) {
            Ok(entries) => entries,
            Err(err) => return self.failed(&dir.path, err),
        };
        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) => paths.push(entry.path()),
                Err(err) => self.failed(&dir.path, err),
            }
        }
        paths.sort();
        for path in paths {
            let excluded = path
                .strip_prefix(&self.root)
                .map_or(false, |relative| self.options.exclude.contains(relative));
            if excluded {
                trace!("Excluded {}", path.display());
                continue;
            }
            self.visit(path, dir.depth + 1, Some(dir.dev));
        }
    }
}

impl Iterator for Walker {
    type Item = Result<(PathBuf, EntryType)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(item);
            }
            if self.root_pending {
                self.root_pending = false;
                let root = self.root.clone();
                self.visit(root, 0, None);
            } else if let Some(dir) = self.level.pop_front() {
                self.read_level_dir(dir);
            } else if !self.next_level.is_empty() {
                self.level = mem::take(&mut self.next_level).into();
            } else {
                return None;
            }
        }
    }
}
