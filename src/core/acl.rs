//! ACL side-store
//!
//! Every ACL-typed attribute is persisted on its own, outside the main state
//! file, as the plain text its codec produces (typically `alice,bob@host`).
//! The file is named after the attribute and committed with the same
//! staging-file-then-rename discipline as a full save.

use crate::attribute::{AttrType, Attribute, AttributeDef, EncodeReason, SetMode};
use crate::backend::PersistenceBackend;
use crate::config::staging_path;
use crate::error::{Result, StateError};
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Reads and writes ACL side-files in one directory
#[derive(Debug, Clone)]
pub struct AclStore {
    dir: PathBuf,
    backend: Arc<dyn PersistenceBackend>,
    restore_modified_on_failure: bool,
}

impl AclStore {
    pub fn new<P: Into<PathBuf>>(dir: P, backend: Arc<dyn PersistenceBackend>) -> Self {
        AclStore {
            dir: dir.into(),
            backend,
            restore_modified_on_failure: true,
        }
    }

    /// Whether a failed save puts the modified flag back
    ///
    /// With `false` the flag records the attempt rather than the commit,
    /// so a failed save is not retried by the next full save.
    pub fn restore_modified_on_failure(mut self, restore: bool) -> Self {
        self.restore_modified_on_failure = restore;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Canonical side-file for an attribute
    pub fn file_path(&self, def: &AttributeDef) -> PathBuf {
        self.dir.join(def.name())
    }

    /// Persist one ACL attribute if it changed since the last save
    ///
    /// An unset attribute removes its side-file, which is how "no ACL" is
    /// represented on disk.
    pub fn save(&self, attr: &mut Attribute, def: &AttributeDef) -> Result<()> {
        if !attr.is_modified() {
            return Ok(());
        }

        attr.clear_modified();
        let result = self.write(attr, def);
        if result.is_err() && self.restore_modified_on_failure {
            attr.mark_modified();
        }
        result
    }

    fn write(&self, attr: &Attribute, def: &AttributeDef) -> Result<()> {
        let canonical = self.file_path(def);

        if !attr.is_set() {
            return match fs::remove_file(&canonical) {
                Ok(()) => {
                    debug!("Removed ACL file {:?}", canonical);
                    Ok(())
                }
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => {
                    error!("Unable to remove ACL file {:?}: {}", canonical, e);
                    Err(StateError::write(&canonical, e))
                }
            };
        }

        let mut entries = Vec::new();
        def.codec()
            .encode(attr, def.name(), EncodeReason::Save, &mut entries)
            .map_err(|e| {
                error!("Unable to encode ACL {}: {}", def.name(), e);
                e
            })?;

        // No trailing terminator is persisted
        let text = entries
            .first()
            .map(|entry| entry.value.trim_end_matches('\0'))
            .unwrap_or("");

        let staging = staging_path(&canonical);
        let mut file = self.backend.create_temp(&staging).map_err(|e| {
            error!("Unable to open ACL file {:?}: {}", staging, e);
            StateError::open(&staging, e)
        })?;

        let written = file
            .write_all(text.as_bytes())
            .and_then(|()| self.backend.flush(&file));
        drop(file);
        if let Err(e) = written {
            error!("Write of ACL file {:?} failed: {}", staging, e);
            let _ = fs::remove_file(&staging);
            return Err(StateError::write(&staging, e));
        }

        self.backend
            .commit_rename(&staging, &canonical)
            .map_err(|e| {
                error!("Unable to rename {:?} to {:?}: {}", staging, canonical, e);
                StateError::CommitRenameFailed {
                    from: staging.clone(),
                    to: canonical.clone(),
                    source: e,
                }
            })?;

        debug!("Saved ACL {} ({} bytes)", def.name(), text.len());
        Ok(())
    }

    /// Merge an ACL attribute's saved value into `attr`
    ///
    /// A missing or empty file means no ACL was ever saved and leaves `attr`
    /// untouched. Read, decode and set failures are logged and swallowed so
    /// the remaining attributes still recover. Returns whether a value was
    /// applied.
    pub fn recover(&self, attr: &mut Attribute, def: &AttributeDef) -> bool {
        let path = self.file_path(def);

        if let Err(e) = self.backend.secure_permissions(&path) {
            warn!("Unable to secure ACL file {:?}: {}", path, e);
        }

        let mut file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return false,
            Err(e) => {
                error!("Unable to open ACL file {:?}: {}", path, e);
                return false;
            }
        };

        let mut buf = Vec::new();
        if let Err(e) = file.read_to_end(&mut buf) {
            error!("Unable to read ACL file {:?}: {}", path, e);
            return false;
        }
        if buf.is_empty() {
            return false;
        }

        let text = match String::from_utf8(buf) {
            Ok(text) => text,
            Err(e) => {
                error!("ACL file {:?} is not valid UTF-8: {}", path, e);
                return false;
            }
        };

        let codec = def.codec();
        let mut scratch = Attribute::cleared(def.kind());
        let applied = match codec.decode(&mut scratch, def.name(), None, text.trim_end_matches('\0')) {
            Err(e) => {
                error!("Decode of ACL {} failed: {}", def.name(), e);
                false
            }
            Ok(()) => match codec.set(attr, &scratch, SetMode::Set) {
                Err(e) => {
                    error!("Set of ACL {} failed: {}", def.name(), e);
                    false
                }
                Ok(()) => true,
            },
        };
        codec.free(&mut scratch);

        if applied {
            debug!("Recovered ACL {} from {:?}", def.name(), path);
        }
        applied
    }
}

/// Whether a slot is persisted through the side-store
pub fn is_acl(def: &AttributeDef) -> bool {
    def.kind() == AttrType::Acl
}
