//! Settings of the compliance engine, read from a TOML file.
//!
//! ```toml
//! [macros]
//! admin_group = "admins"
//! guest_prefix = "gst-"
//!
//! [rules]
//! system_dir = "/etc/licorn/check.d"
//!
//! [walk]
//! follow_mounts = false
//! ```

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Values the macro interpreter substitutes into rule text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MacroTable {
    /// Group that always keeps read-write access to every checked tree.
    pub admin_group: String,
    /// Group owning ACL'd trees, so that the group owner never leaks permissions.
    pub acl_group: String,
    /// Mask of directory ACLs. Files get the same without `x`, plus `@GE`.
    pub mask: String,
    pub guest_prefix: String,
    pub responsible_prefix: String,
}

impl Default for MacroTable {
    fn default() -> Self {
        Self {
            admin_group: "admins".to_string(),
            acl_group: "acl".to_string(),
            mask: "rwx".to_string(),
            guest_prefix: "gst-".to_string(),
            responsible_prefix: "rsp-".to_string(),
        }
    }
}

/// Where rule files live.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuleSettings {
    pub system_dir: PathBuf,
    /// System rules applied to every user home, relative to `system_dir`.
    pub users_default: PathBuf,
    /// System rules applied to every group shared directory, relative to `system_dir`.
    pub groups_default: PathBuf,
    /// Per-object customization file, relative to the object's home.
    pub object_file: PathBuf,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            system_dir: PathBuf::from("/etc/licorn/check.d"),
            users_default: PathBuf::from("users.default.conf"),
            groups_default: PathBuf::from("groups.default.conf"),
            object_file: PathBuf::from(".licorn/check.conf"),
        }
    }
}

impl RuleSettings {
    pub fn users_default_path(&self) -> PathBuf {
        self.system_dir.join(&self.users_default)
    }

    pub fn groups_default_path(&self) -> PathBuf {
        self.system_dir.join(&self.groups_default)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WalkSettings {
    pub max_depth: usize,
    pub follow_links: bool,
    pub follow_mounts: bool,
    /// Entry names whose "permission denied" is expected (FUSE mounts of desktop sessions).
    pub virtual_paths: Vec<String>,
}

impl Default for WalkSettings {
    fn default() -> Self {
        Self {
            max_depth: crate::walk::MAX_DEPTH,
            follow_links: false,
            follow_mounts: true,
            virtual_paths: vec![".gvfs".to_string()],
        }
    }
}

/// Everything the engine reads from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub macros: MacroTable,
    pub rules: RuleSettings,
    pub walk: WalkSettings,
}

impl Settings {
    /// Load settings from a TOML file. Missing keys take their default value.
    ///
    /// # Errors
    /// * `Error::Config`: unreadable file or invalid TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| Error::Config {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::from_toml_str(&content).map_err(|err| match err {
            Error::Config { message, .. } => Error::Config {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// # Errors
    /// * `Error::Config`: invalid TOML, with an empty path.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|err| Error::Config {
            path: PathBuf::new(),
            message: err.to_string(),
        })
    }
}
