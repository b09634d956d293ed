use crate::error::ACLError::{IoError, ValidationError};
use acl_sys::{ACL_TYPE_ACCESS, ACL_TYPE_DEFAULT};
use std::path::{Path, PathBuf};
use std::{fmt, io};

/// Use a bit flag to track whether error was caused by read or write
pub(crate) const FLAG_WRITE: u32 = 0x4000_0000;
/// Same, for `acl_delete_def_file()`
pub(crate) const FLAG_DELETE: u32 = 0x2000_0000;

/// Error type from the low-level ACL operations.
#[derive(Debug)]
#[allow(clippy::upper_case_acronyms)]
pub enum ACLError {
    /// Error reading, writing or deleting an ACL
    IoError { err: io::Error, flags: u32 },
    /// ACL is not valid and cannot be written. The compact text of the offending ACL is
    /// attached, libacl does not tell which entry is wrong.
    ValidationError(String),
}

impl std::error::Error for ACLError {}

impl fmt::Display for ACLError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IoError { flags, err } => write!(
                f,
                "Error {} {}: {}",
                op_display(*flags),
                type_display(*flags),
                err
            ),
            ValidationError(text) => write!(f, "ACL failed validation: {}", text),
        }
    }
}

impl ACLError {
    pub(crate) fn last_os_error(flags: u32) -> ACLError {
        IoError {
            err: io::Error::last_os_error(),
            flags,
        }
    }

    pub(crate) fn io(err: io::Error, flags: u32) -> ACLError {
        IoError { err, flags }
    }

    /// Get a general category of error. `ValidationError` gets returned as `InvalidData`.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            ValidationError(_) => io::ErrorKind::InvalidData,
            IoError { ref err, .. } => err.kind(),
        }
    }

    /// Raw OS error code when the error comes from a syscall.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            ValidationError(_) => None,
            IoError { ref err, .. } => err.raw_os_error(),
        }
    }

    /// The filesystem does not implement POSIX ACLs (mounted without `acl`, FAT, some FUSE...).
    pub fn is_unsupported(&self) -> bool {
        let code = self.raw_os_error();
        code == Some(libc::ENOTSUP)
            || code == Some(libc::EOPNOTSUPP)
            || self.kind() == io::ErrorKind::Unsupported
    }
}

/// `acl_type_t` string representation for error messages
pub(crate) fn op_display(flags: u32) -> &'static str {
    if flags & FLAG_DELETE != 0 {
        "deleting"
    } else if flags & FLAG_WRITE != 0 {
        "writing"
    } else {
        "reading"
    }
}

/// `acl_type_t` string representation for error messages
pub(crate) fn type_display(flags: u32) -> &'static str {
    let flags = flags & !(FLAG_WRITE | FLAG_DELETE);
    match flags {
        ACL_TYPE_ACCESS => "ACL",
        ACL_TYPE_DEFAULT => "default ACL",
        _ => panic!("Invalid flags"),
    }
}

/// Result type of every compliance operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of [`Error`], driving how a repair session recovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed rule or inconsistent policy. Fatal for that rule file or descriptor.
    Syntax,
    /// Insufficient privilege. Fatal for the whole session.
    Permission,
    /// The entry vanished. Only that path is skipped.
    NotFound,
    /// ACLs are not supported by the filesystem. ACL checks downgrade to plain modes.
    Unsupported,
    /// Anything else coming from the filesystem.
    GenericIo,
    /// Caller passed inconsistent arguments.
    BadArgument,
    /// Settings could not be loaded.
    Config,
    /// A user or group name does not exist in the identity snapshot.
    UnknownIdentity,
}

/// Errors of the compliance engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{}:{line}: unexpected `{token}`, expected {expected}", .file.display())]
    Syntax {
        file: PathBuf,
        line: usize,
        token: String,
        expected: String,
    },

    #[error("{}: incompatible policy, {root} root cannot hold {content} content", .path.display())]
    IncompatiblePolicy {
        path: PathBuf,
        root: &'static str,
        content: &'static str,
    },

    #[error("insufficient permissions on {}: {source}", .path.display())]
    Permission {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} does not exist", .path.display())]
    NotFound { path: PathBuf },

    #[error("ACLs are not supported on {}", .path.display())]
    Unsupported { path: PathBuf },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid ACL for {}: {source}", .path.display())]
    Acl {
        path: PathBuf,
        #[source]
        source: ACLError,
    },

    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("failed to load settings from {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },

    #[error("unknown {kind} `{name}`")]
    UnknownIdentity { kind: &'static str, name: String },
}

impl Error {
    /// Classify an `io::Error` raised while working on `path`.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound => Error::NotFound { path },
            io::ErrorKind::PermissionDenied => Error::Permission { path, source },
            io::ErrorKind::Unsupported => Error::Unsupported { path },
            _ => match source.raw_os_error() {
                Some(libc::EPERM) => Error::Permission { path, source },
                Some(code) if code == libc::ENOTSUP || code == libc::EOPNOTSUPP => {
                    Error::Unsupported { path }
                }
                _ => Error::Io { path, source },
            },
        }
    }

    /// Classify an error from the ACL layer.
    pub fn from_acl(path: &Path, err: ACLError) -> Self {
        if err.is_unsupported() {
            return Error::Unsupported { path: path.into() };
        }
        match err {
            IoError { err, .. } => Error::io(path, err),
            err @ ValidationError(_) => Error::Acl {
                path: path.into(),
                source: err,
            },
        }
    }

    pub(crate) fn syntax(
        file: &Path,
        line: usize,
        token: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Error::Syntax {
            file: file.into(),
            line,
            token: token.into(),
            expected: expected.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Syntax { .. } | Error::IncompatiblePolicy { .. } | Error::Acl { .. } => {
                ErrorKind::Syntax
            }
            Error::Permission { .. } => ErrorKind::Permission,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Unsupported { .. } => ErrorKind::Unsupported,
            Error::Io { .. } => ErrorKind::GenericIo,
            Error::BadArgument(_) => ErrorKind::BadArgument,
            Error::Config { .. } => ErrorKind::Config,
            Error::UnknownIdentity { .. } => ErrorKind::UnknownIdentity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_classification() {
        let path = Path::new("/srv/g");
        let err = Error::io(path, io::Error::from_raw_os_error(libc::ENOENT));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = Error::io(path, io::Error::from_raw_os_error(libc::EACCES));
        assert_eq!(err.kind(), ErrorKind::Permission);
        let err = Error::io(path, io::Error::from_raw_os_error(libc::EPERM));
        assert_eq!(err.kind(), ErrorKind::Permission);
        let err = Error::io(path, io::Error::from_raw_os_error(libc::EOPNOTSUPP));
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        let err = Error::io(path, io::Error::from_raw_os_error(libc::EIO));
        assert_eq!(err.kind(), ErrorKind::GenericIo);
    }

    #[test]
    fn acl_error_display() {
        let err = ACLError::io(
            io::Error::from_raw_os_error(libc::ENOENT),
            FLAG_WRITE | ACL_TYPE_DEFAULT,
        );
        assert_eq!(
            err.to_string(),
            "Error writing default ACL: No such file or directory (os error 2)"
        );
        let err = ACLError::io(
            io::Error::from_raw_os_error(libc::ENOTSUP),
            FLAG_DELETE | ACL_TYPE_DEFAULT,
        );
        assert!(err.is_unsupported());
        assert!(err.to_string().starts_with("Error deleting default ACL"));
    }

    #[test]
    fn syntax_display() {
        let err = Error::syntax(Path::new("check.conf"), 3, "o::rw-", "no write for other");
        assert_eq!(
            err.to_string(),
            "check.conf:3: unexpected `o::rw-`, expected no write for other"
        );
        assert_eq!(err.kind(), ErrorKind::Syntax);
    }
}
