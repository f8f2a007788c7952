//! File access for state persistence
//!
//! Everything platform specific about creating, flushing and committing
//! state files sits behind [`PersistenceBackend`], so the save and recover
//! algorithms never branch on the platform themselves.

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

/// Owner read/write only
pub const OWNER_ONLY_MODE: u32 = 0o600;

/// Storage primitives used by the savers and loaders
pub trait PersistenceBackend: Send + Sync + std::fmt::Debug {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Create (or truncate) a staging file for writing, owner-only
    fn create_temp(&self, path: &Path) -> io::Result<File>;

    /// Open a file for in-place writing without truncation, creating it if absent
    fn open_in_place(&self, path: &Path) -> io::Result<File> {
        owner_only_options()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
    }

    /// Push written data to stable storage
    fn flush(&self, file: &File) -> io::Result<()> {
        file.sync_all()
    }

    /// Atomically replace `to` with `from`
    fn commit_rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Restore owner-only permissions on an existing file
    ///
    /// A missing file is not an error.
    fn secure_permissions(&self, path: &Path) -> io::Result<()>;
}

/// Selects a backend from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Standard,
    Hardened,
}

impl BackendKind {
    pub fn into_backend(self) -> Arc<dyn PersistenceBackend> {
        match self {
            BackendKind::Standard => Arc::new(StandardBackend),
            BackendKind::Hardened => Arc::new(HardenedBackend),
        }
    }
}

fn owner_only_options() -> OpenOptions {
    #[allow(unused_mut)]
    let mut options = OpenOptions::new();
    #[cfg(unix)]
    options.mode(OWNER_ONLY_MODE);
    options
}

/// Plain POSIX semantics: 0600 on create, fsync, rename
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardBackend;

impl PersistenceBackend for StandardBackend {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn create_temp(&self, path: &Path) -> io::Result<File> {
        owner_only_options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
    }

    fn commit_rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn secure_permissions(&self, _path: &Path) -> io::Result<()> {
        // Creation mode already restricts access
        Ok(())
    }
}

/// Re-applies permissions around every write and makes renames durable
///
/// For hosts where permissions can be lost (unclean shutdown, foreign
/// tools touching the private directory) and where a rename is not
/// durable until the directory itself is flushed.
#[derive(Debug, Default, Clone, Copy)]
pub struct HardenedBackend;

impl PersistenceBackend for HardenedBackend {
    fn name(&self) -> &'static str {
        "hardened"
    }

    fn create_temp(&self, path: &Path) -> io::Result<File> {
        self.secure_permissions(path)?;
        let file = owner_only_options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        set_owner_only(path)?;
        Ok(file)
    }

    fn open_in_place(&self, path: &Path) -> io::Result<File> {
        self.secure_permissions(path)?;
        let file = owner_only_options()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        set_owner_only(path)?;
        Ok(file)
    }

    fn flush(&self, file: &File) -> io::Result<()> {
        file.sync_all()
    }

    fn commit_rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.secure_permissions(to)?;
        fs::rename(from, to)?;
        if let Some(parent) = to.parent() {
            sync_directory(parent)?;
        }
        Ok(())
    }

    fn secure_permissions(&self, path: &Path) -> io::Result<()> {
        match set_owner_only(path) {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(OWNER_ONLY_MODE))
}

#[cfg(not(unix))]
fn set_owner_only(path: &Path) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(false);
    fs::set_permissions(path, perms)
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> io::Result<()> {
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    File::open(dir)?.sync_all()?;
    debug!("Synced directory {:?}", dir);
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> io::Result<()> {
    // Directory handles cannot be flushed here; the rename is already write-through
    Ok(())
}
