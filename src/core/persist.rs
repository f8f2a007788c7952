//! Full-save and recovery machinery shared by the server and scheduler
//!
//! A full save writes everything to `<path>.new`, flushes it and renames it
//! over `<path>`. The rename is the only commit point: a crash before it
//! leaves the previous file intact, a crash after it leaves the new one.

use crate::attribute::{AttrType, AttributeSet, EncodeReason};
use crate::backend::PersistenceBackend;
use crate::config::staging_path;
use crate::entry::{AttrEntry, EntryReader, EntryWriter};
use crate::error::{Result, StateError};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Save flavour requested by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Rewrite only the quick state block, in place
    Quick,
    /// Rewrite header and attributes through a staging file
    Full,
}

/// Result of a save that got as far as the commit step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// New content is canonical
    Committed,
    /// Content was written and flushed but the rename failed; it sits at
    /// `staging` and the canonical file still holds the previous state
    Staged { staging: PathBuf },
}

impl SaveOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, SaveOutcome::Committed)
    }
}

/// Which slots a full save writes to the main file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AclPlacement {
    /// ACL slots live in side-files and are skipped
    SideFiles,
    /// ACL slots are encoded inline like any other slot
    Inline,
}

fn write_err(path: &Path) -> impl Fn(StateError) -> StateError + '_ {
    move |e| match e {
        StateError::Io(source) => StateError::write(path, source),
        other => other,
    }
}

/// Write `header` and the saveable attributes to `canonical` via its staging file
pub(crate) fn write_state_file(
    backend: &dyn PersistenceBackend,
    canonical: &Path,
    header: Option<&[u8]>,
    attrs: &AttributeSet,
    acls: AclPlacement,
) -> Result<SaveOutcome> {
    let staging = staging_path(canonical);

    // Encode first: a codec failure must not leave a half-written staging file behind
    let mut entries: Vec<AttrEntry> = Vec::new();
    for (def, attr) in attrs.iter() {
        if !attr.is_set() || attr.is_default() {
            continue;
        }
        if acls == AclPlacement::SideFiles && def.kind() == AttrType::Acl {
            continue;
        }
        def.codec()
            .encode(attr, def.name(), EncodeReason::Save, &mut entries)
            .map_err(|e| {
                error!("Encoding {} for {:?} failed: {}", def.name(), canonical, e);
                e
            })?;
    }

    let file = backend.create_temp(&staging).map_err(|e| {
        error!("Unable to open {:?}: {}", staging, e);
        StateError::open(&staging, e)
    })?;

    let written = stream_entries(backend, file, header, &entries).map_err(write_err(&staging));

    let count = match written {
        Ok(count) => count,
        Err(e) => {
            error!("Write of {:?} failed: {}", staging, e);
            return Err(e);
        }
    };

    debug!(
        "Staged {} attribute entries in {:?} via {} backend",
        count,
        staging,
        backend.name()
    );

    match backend.commit_rename(&staging, canonical) {
        Ok(()) => {
            debug!("Committed {:?}", canonical);
            Ok(SaveOutcome::Committed)
        }
        Err(e) => {
            let e = StateError::CommitRenameFailed {
                from: staging.clone(),
                to: canonical.to_path_buf(),
                source: e,
            };
            error!("{}; new state left in {:?}", e, staging);
            Ok(SaveOutcome::Staged { staging })
        }
    }
}

fn stream_entries(
    backend: &dyn PersistenceBackend,
    file: File,
    header: Option<&[u8]>,
    entries: &[AttrEntry],
) -> Result<usize> {
    let mut writer = EntryWriter::new(file);
    if let Some(header) = header {
        writer.write_struct(header)?;
    }
    for entry in entries {
        writer.write_entry(entry)?;
    }
    let count = writer.entries();
    let file = writer.finish()?;
    backend.flush(&file)?;
    Ok(count)
}

/// Decode the entry stream into `attrs`, slot by slot in schema order
///
/// Each slot that has entries is first freed, so a recovered value
/// replaces the default instead of merging with it. Entries for names the
/// schema does not know are skipped. Returns the number of slots recovered.
pub(crate) fn recover_attributes<R: Read>(
    reader: R,
    path: &Path,
    attrs: &mut AttributeSet,
) -> Result<usize> {
    let entries = EntryReader::new(reader, path).read_all()?;

    let mut per_slot: Vec<Vec<AttrEntry>> = vec![Vec::new(); attrs.len()];
    for entry in entries {
        match attrs.schema().position(&entry.name) {
            Some(index) => per_slot[index].push(entry),
            None => warn!(
                "Skipping unknown attribute {} recovered from {:?}",
                entry.name, path
            ),
        }
    }

    let mut recovered = 0;
    for (index, slot_entries) in per_slot.iter().enumerate() {
        if slot_entries.is_empty() {
            continue;
        }
        let Some((def, attr)) = attrs.slot_mut(index) else {
            continue;
        };
        let codec = def.codec();
        codec.free(attr);
        for entry in slot_entries {
            codec
                .decode(attr, def.name(), entry.resource.as_deref(), &entry.value)
                .map_err(|e| {
                    error!("Decode of {} from {:?} failed: {}", def.name(), path, e);
                    match e {
                        StateError::AttributeDecodeFailed { .. } => e,
                        other => StateError::decode(def.name(), other.to_string()),
                    }
                })?;
        }
        attr.clear_modified();
        recovered += 1;
    }

    Ok(recovered)
}
