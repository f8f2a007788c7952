//! Scheduler state object
//!
//! The scheduler file holds only the entry stream: no quick state block,
//! and ACL slots are written inline instead of to side-files.

use crate::attribute::{AttributeSet, Schema};
use crate::backend::PersistenceBackend;
use crate::error::{Result, StateError};
use crate::persist::{self, AclPlacement, SaveMode, SaveOutcome};
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// A scheduler's persistent state
#[derive(Debug, Clone)]
pub struct Scheduler {
    name: String,
    attrs: AttributeSet,
}

impl Scheduler {
    /// Allocate a scheduler with every attribute at its default
    pub fn alloc(name: &str, schema: Schema) -> Self {
        debug!("Allocated scheduler {}", name);
        Scheduler {
            name: name.to_string(),
            attrs: AttributeSet::new(schema),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &AttributeSet {
        &self.attrs
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeSet {
        &mut self.attrs
    }

    /// Allocate a scheduler and populate it from its state file
    pub fn recover(
        name: &str,
        schema: Schema,
        path: &Path,
        backend: &dyn PersistenceBackend,
    ) -> Result<Self> {
        let mut sched = Scheduler::alloc(name, schema);
        sched.load_state(path, backend)?;
        Ok(sched)
    }

    /// Replace this scheduler's attributes with the ones saved at `path`
    ///
    /// A scheduler that was never saved has no file; that leaves every
    /// attribute at its default rather than failing. On error the current
    /// attributes are kept.
    pub fn load_state(&mut self, path: &Path, backend: &dyn PersistenceBackend) -> Result<()> {
        if let Err(e) = backend.secure_permissions(path) {
            warn!("Unable to secure {:?}: {}", path, e);
        }

        let mut attrs = AttributeSet::new(self.attrs.schema().clone());
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(
                    "No saved state for scheduler {} at {:?}, using defaults",
                    self.name, path
                );
                self.attrs = attrs;
                return Ok(());
            }
            Err(e) => {
                error!("Unable to open scheduler database {:?}: {}", path, e);
                return Err(StateError::open(path, e));
            }
        };

        let recovered = persist::recover_attributes(BufReader::new(file), path, &mut attrs)
            .map_err(|e| {
                error!("Error recovering scheduler attributes from {:?}: {}", path, e);
                e
            })?;

        info!(
            "Recovered scheduler {} from {:?}: {} attributes",
            self.name, path, recovered
        );
        self.attrs = attrs;
        Ok(())
    }

    /// Write every saveable attribute to `path`
    ///
    /// Only full saves exist for the scheduler.
    pub fn save(
        &self,
        mode: SaveMode,
        path: &Path,
        backend: &dyn PersistenceBackend,
    ) -> Result<SaveOutcome> {
        if mode == SaveMode::Quick {
            return Err(StateError::QuickSaveUnsupported(format!(
                "scheduler {}",
                self.name
            )));
        }

        let outcome =
            persist::write_state_file(backend, path, None, &self.attrs, AclPlacement::Inline)?;
        debug!("Full save of scheduler {} to {:?}: {:?}", self.name, path, outcome);
        Ok(outcome)
    }
}
