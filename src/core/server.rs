//! Server state object: recovery, full save and quick save
//!
//! The server database is the quick state block followed by the entry
//! stream. ACL attributes are not in it; they are saved to and recovered
//! from the [`AclStore`] after the main file.

use crate::acl::{is_acl, AclStore};
use crate::attribute::{ActionReason, AttributeSet, Schema};
use crate::backend::PersistenceBackend;
use crate::entry::read_full;
use crate::error::{Result, StateError};
use crate::header::{QuickStateBlock, QSB_SIZE};
use crate::persist::{self, AclPlacement, SaveMode, SaveOutcome};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// The server's persistent state
#[derive(Debug, Clone)]
pub struct Server {
    name: String,

    /// Quick state block, saved verbatim
    pub qs: QuickStateBlock,

    attrs: AttributeSet,
}

impl Server {
    /// A server with a fresh quick state block and default attributes
    pub fn new(name: &str, schema: Schema) -> Self {
        Server {
            name: name.to_string(),
            qs: QuickStateBlock::new(),
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

    /// Rebuild the server from its database and ACL side-files
    ///
    /// A missing or unreadable database, a short quick state block and an
    /// attribute that fails to decode are all fatal; there is no sensible
    /// default server. ACL side-file problems are logged and skipped.
    pub fn recover(
        name: &str,
        schema: Schema,
        path: &Path,
        backend: &dyn PersistenceBackend,
        acls: &AclStore,
    ) -> Result<Self> {
        if let Err(e) = backend.secure_permissions(path) {
            warn!("Unable to secure {:?}: {}", path, e);
        }

        let file = File::open(path).map_err(|e| {
            error!("Unable to open server database {:?}: {}", path, e);
            StateError::open(path, e)
        })?;
        let mut reader = BufReader::new(file);

        let mut raw = [0u8; QSB_SIZE];
        let got = read_full(&mut reader, &mut raw).map_err(|e| {
            error!("Read of {:?} failed: {}", path, e);
            StateError::Io(e)
        })?;
        if got != QSB_SIZE {
            error!("Short read of {:?}: {} of {} bytes", path, got, QSB_SIZE);
            return Err(StateError::CorruptOrTruncated {
                path: path.to_path_buf(),
                expected: QSB_SIZE,
                actual: got,
            });
        }
        let qs = QuickStateBlock::from_bytes(&raw).map_err(|e| {
            error!("Quick state block of {:?} rejected: {}", path, e);
            e
        })?;

        let mut attrs = AttributeSet::new(schema);
        let recovered = persist::recover_attributes(reader, path, &mut attrs).map_err(|e| {
            error!("Error recovering server attributes from {:?}: {}", path, e);
            e
        })?;

        let mut server = Server {
            name: name.to_string(),
            qs,
            attrs,
        };
        let acl_count = server.recover_acls(acls);

        info!(
            "Recovered server {} from {:?}: {} attributes, {} ACLs",
            server.name, path, recovered, acl_count
        );
        Ok(server)
    }

    fn recover_acls(&mut self, acls: &AclStore) -> usize {
        let owner = self.name.as_str();
        let mut count = 0;
        for (def, attr) in self.attrs.iter_mut() {
            if !is_acl(def) {
                continue;
            }
            if acls.recover(attr, def) {
                count += 1;
            }
            attr.clear_modified();
            if let Some(action) = def.action() {
                if let Err(e) = action(attr, owner, ActionReason::Recover) {
                    warn!("Recover action for {} failed: {}", def.name(), e);
                }
            }
        }
        count
    }

    /// Save in the requested mode
    pub fn save(
        &mut self,
        mode: SaveMode,
        path: &Path,
        backend: &dyn PersistenceBackend,
        acls: &AclStore,
    ) -> Result<SaveOutcome> {
        match mode {
            SaveMode::Quick => self.save_quick(path, backend).map(|()| SaveOutcome::Committed),
            SaveMode::Full => self.save_full(path, backend, acls),
        }
    }

    /// Write the quick state block and all saveable attributes
    ///
    /// Stamps the save time, writes `<path>.new` and renames it over `path`.
    /// A failed rename is logged and reported as [`SaveOutcome::Staged`]
    /// rather than as an error. Modified ACLs are saved to their side-files
    /// once the main file is committed.
    pub fn save_full(
        &mut self,
        path: &Path,
        backend: &dyn PersistenceBackend,
        acls: &AclStore,
    ) -> Result<SaveOutcome> {
        self.qs.stamp_save_time();
        let header = self.qs.to_bytes();

        let outcome = persist::write_state_file(
            backend,
            path,
            Some(&header[..]),
            &self.attrs,
            AclPlacement::SideFiles,
        )?;

        if outcome.is_committed() {
            for (def, attr) in self.attrs.iter_mut() {
                if is_acl(def) {
                    if let Err(e) = acls.save(attr, def) {
                        error!("Save of ACL {} failed: {}", def.name(), e);
                    }
                }
            }
        }

        debug!("Full save of server {} to {:?}: {:?}", self.name, path, outcome);
        Ok(outcome)
    }

    /// Rewrite only the quick state block at the start of `path`
    ///
    /// The attribute region after the block is left untouched.
    pub fn save_quick(&self, path: &Path, backend: &dyn PersistenceBackend) -> Result<()> {
        let mut file = backend.open_in_place(path).map_err(|e| {
            error!("Unable to open server database {:?}: {}", path, e);
            StateError::open(path, e)
        })?;

        // write_all retries interrupted writes
        file.write_all(&self.qs.to_bytes())
            .and_then(|()| backend.flush(&file))
            .map_err(|e| {
                error!("Quick save of {:?} failed: {}", path, e);
                StateError::write(path, e)
            })?;

        debug!("Quick save of server {} to {:?}", self.name, path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttrValue, Attribute, AttributeDef};
    use crate::backend::StandardBackend;
    use crate::codec;
    use crate::header::ServerRunState;
    use crate::schema;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        db: std::path::PathBuf,
        acls: AclStore,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let acl_dir = dir.path().join("svracl");
        fs::create_dir(&acl_dir).unwrap();
        Fixture {
            db: dir.path().join("serverdb"),
            acls: AclStore::new(acl_dir, Arc::new(StandardBackend)),
            _dir: dir,
        }
    }

    #[test]
    fn test_full_save_and_recover() {
        let fx = fixture();
        let mut server = Server::new("svr", schema::server().unwrap());
        server.qs.state = ServerRunState::Active;
        server.qs.next_job_id = 77;
        server
            .attributes_mut()
            .set_value("max_jobs", AttrValue::Long(100))
            .unwrap();
        server
            .attributes_mut()
            .set_value("acl_users", AttrValue::Acl(vec!["alice".into()]))
            .unwrap();

        let outcome = server.save_full(&fx.db, &StandardBackend, &fx.acls).unwrap();
        assert!(outcome.is_committed());
        assert!(server.qs.save_time > 0);
        assert!(!server.attributes().get("acl_users").unwrap().is_modified());

        let back =
            Server::recover("svr", schema::server().unwrap(), &fx.db, &StandardBackend, &fx.acls).unwrap();
        assert_eq!(back.qs, server.qs);
        assert_eq!(
            back.attributes().get("max_jobs").unwrap().value(),
            &AttrValue::Long(100)
        );
        assert_eq!(
            back.attributes().get("acl_users").unwrap().value(),
            &AttrValue::Acl(vec!["alice".into()])
        );
    }

    #[test]
    fn test_missing_database_is_fatal() {
        let fx = fixture();
        let result = Server::recover("svr", schema::server().unwrap(), &fx.db, &StandardBackend, &fx.acls);
        assert!(matches!(result, Err(StateError::OpenFailed { .. })));
    }

    #[test]
    fn test_short_header_is_fatal() {
        let fx = fixture();
        fs::write(&fx.db, &QuickStateBlock::new().to_bytes()[..40]).unwrap();
        let result = Server::recover("svr", schema::server().unwrap(), &fx.db, &StandardBackend, &fx.acls);
        assert!(matches!(
            result,
            Err(StateError::CorruptOrTruncated { expected: QSB_SIZE, actual: 40, .. })
        ));
    }

    #[test]
    fn test_quick_save_on_fresh_path() {
        let fx = fixture();
        let mut server = Server::new("svr", schema::server().unwrap());
        server.qs.num_jobs = 3;
        server.save_quick(&fx.db, &StandardBackend).unwrap();
        assert_eq!(fs::read(&fx.db).unwrap().len(), QSB_SIZE);

        let back =
            Server::recover("svr", schema::server().unwrap(), &fx.db, &StandardBackend, &fx.acls).unwrap();
        assert_eq!(back.qs.num_jobs, 3);
        let fresh = Server::new("x", schema::server().unwrap());
        assert_eq!(back.attributes().count_set(), fresh.attributes().count_set());
    }

    #[test]
    fn test_save_mode_dispatch() {
        let fx = fixture();
        let mut server = Server::new("svr", schema::server().unwrap());
        assert!(server
            .save(SaveMode::Full, &fx.db, &StandardBackend, &fx.acls)
            .unwrap()
            .is_committed());
        assert!(server
            .save(SaveMode::Quick, &fx.db, &StandardBackend, &fx.acls)
            .unwrap()
            .is_committed());
    }

    static RECOVER_CALLS: AtomicUsize = AtomicUsize::new(0);
    static SAW_RECOVERED_VALUE: AtomicUsize = AtomicUsize::new(0);

    fn record(attr: &mut Attribute, owner: &str, reason: ActionReason) -> Result<()> {
        assert_eq!(owner, "svr");
        if reason == ActionReason::Recover {
            RECOVER_CALLS.fetch_add(1, Ordering::SeqCst);
            if attr.value() == &AttrValue::Acl(vec!["alice".into()]) && !attr.is_modified() {
                SAW_RECOVERED_VALUE.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn refuse(_attr: &mut Attribute, _owner: &str, _reason: ActionReason) -> Result<()> {
        Err(StateError::Config("refused".to_string()))
    }

    fn acl_schema(action: crate::attribute::PostSetAction) -> Schema {
        Schema::new(vec![
            AttributeDef::new("max_jobs", codec::long()).unwrap(),
            AttributeDef::new("acl_users", codec::acl())
                .unwrap()
                .with_action(action),
            AttributeDef::new("managers", codec::acl())
                .unwrap()
                .with_action(action),
        ])
        .unwrap()
    }

    #[test]
    fn test_recover_runs_acl_actions_after_side_files() {
        let fx = fixture();
        let mut server = Server::new("svr", acl_schema(record));
        server
            .attributes_mut()
            .set_value("acl_users", AttrValue::Acl(vec!["alice".into()]))
            .unwrap();
        server.save_full(&fx.db, &StandardBackend, &fx.acls).unwrap();
        assert_eq!(RECOVER_CALLS.load(Ordering::SeqCst), 0);

        let back =
            Server::recover("svr", acl_schema(record), &fx.db, &StandardBackend, &fx.acls).unwrap();

        // One call per ACL slot, set or not; acl_users already holds the file's value
        assert_eq!(RECOVER_CALLS.load(Ordering::SeqCst), 2);
        assert_eq!(SAW_RECOVERED_VALUE.load(Ordering::SeqCst), 1);
        assert!(!back.attributes().get("managers").unwrap().is_set());
    }

    #[test]
    fn test_failing_recover_action_is_not_fatal() {
        let fx = fixture();
        let mut server = Server::new("svr", acl_schema(refuse));
        server
            .attributes_mut()
            .set_value("max_jobs", AttrValue::Long(12))
            .unwrap();
        server
            .attributes_mut()
            .set_value("acl_users", AttrValue::Acl(vec!["da ve".into()]))
            .unwrap();
        server.save_full(&fx.db, &StandardBackend, &fx.acls).unwrap();

        let back =
            Server::recover("svr", acl_schema(refuse), &fx.db, &StandardBackend, &fx.acls).unwrap();
        assert_eq!(
            back.attributes().get("max_jobs").unwrap().value(),
            &AttrValue::Long(12)
        );
        assert_eq!(
            back.attributes().get("acl_users").unwrap().value(),
            &AttrValue::Acl(vec!["da ve".into()])
        );
    }
}
