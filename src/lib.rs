//! # svrdb - Server State Persistence
//!
//! `svrdb` saves and recovers the durable state of a cluster job scheduler's
//! server and scheduler objects:
//!
//! - **Quick saves** rewrite only the fixed-size quick state block, in place
//! - **Full saves** write the block and every explicitly set attribute to a
//!   staging file, flush it and atomically rename it over the canonical file
//! - **ACL side-files** hold each access control list as plain text,
//!   committed with the same staging discipline
//! - **Recovery** validates the block, decodes attributes in schema order and
//!   merges ACLs back in
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use svrdb::{AttrValue, SaveMode, StateStore, StoreConfig, Result};
//!
//! # fn main() -> Result<()> {
//! let mut store = StateStore::open(StoreConfig::with_home("/var/spool/pbs"))?;
//!
//! let mut server = store.recover_server("svr")?;
//! server
//!     .attributes_mut()
//!     .set_value("max_jobs", AttrValue::Long(100))?;
//!
//! // Header only, cheap enough for every job submission
//! store.save_server(&mut server, SaveMode::Quick)?;
//!
//! // Everything, atomically
//! store.save_server(&mut server, SaveMode::Full)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Layout
//!
//! ```rust,no_run
//! use svrdb::{BackendKind, StateStoreBuilder, Result};
//!
//! # fn main() -> Result<()> {
//! let mut store = StateStoreBuilder::new()
//!     .home("/srv/pbs")
//!     .backend(BackendKind::Hardened)
//!     .build()?;
//!
//! let sched = store.recover_scheduler("default")?;
//! # Ok(())
//! # }
//! ```

pub mod core;

// Short crate:: paths for the core modules
#[allow(unused_imports)]
pub(crate) use crate::core::{
    acl, attribute, backend, codec, config, entry, error, header, persist, scheduler, schema,
    server, validation,
};

pub use crate::core::{
    acl::AclStore,
    attribute::{
        ActionReason, AttrFlags, AttrType, AttrValue, Attribute, AttributeCodec, AttributeDef,
        AttributeSet, EncodeReason, PostSetAction, Schema, SetMode,
    },
    backend::{BackendKind, HardenedBackend, PersistenceBackend, StandardBackend},
    config::StoreConfig,
    entry::AttrEntry,
    error::{Result, StateError},
    header::{QuickStateBlock, ServerRunState, QSB_SIZE},
    persist::{SaveMode, SaveOutcome},
    scheduler::Scheduler,
    server::Server,
    validation::AttributeName,
};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// High-level access to one server's private state directory
///
/// Ties a [`StoreConfig`] layout to a [`PersistenceBackend`] and an
/// [`AclStore`], so callers deal in state objects rather than paths.
///
/// # Examples
///
/// ```rust,no_run
/// use svrdb::{StateStore, StoreConfig, SaveMode};
///
/// # fn main() -> svrdb::Result<()> {
/// let mut store = StateStore::open(StoreConfig::load("/etc/svrdb.toml")?)?;
/// let mut server = store.recover_server("svr")?;
/// let outcome = store.save_server(&mut server, SaveMode::Full)?;
/// if !outcome.is_committed() {
///     eprintln!("state staged but not committed: {:?}", outcome);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StateStore {
    config: StoreConfig,
    backend: Arc<dyn PersistenceBackend>,
    acl: AclStore,
    last_recovered: Option<PathBuf>,
}

impl StateStore {
    /// Open a store using the backend named in `config`
    ///
    /// Creates the private and ACL directories when they are missing.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let backend = config.backend.into_backend();
        Self::open_with_backend(config, backend)
    }

    /// Open a store with an explicit backend
    pub fn open_with_backend(
        config: StoreConfig,
        backend: Arc<dyn PersistenceBackend>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            "Opening state store at {:?} ({} backend)",
            config.priv_path(),
            backend.name()
        );

        for dir in [config.priv_path(), config.acl_path()] {
            if !dir.is_dir() {
                fs::create_dir_all(&dir).map_err(|e| StateError::open(&dir, e))?;
                debug!("Created {:?}", dir);
            }
        }

        let acl = AclStore::new(config.acl_path(), Arc::clone(&backend))
            .restore_modified_on_failure(config.restore_modified_on_failure);

        Ok(StateStore {
            config,
            backend,
            acl,
            last_recovered: None,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn PersistenceBackend {
        self.backend.as_ref()
    }

    pub fn acl_store(&self) -> &AclStore {
        &self.acl
    }

    /// The state file the most recent recovery read (or tried to read)
    pub fn last_recovered(&self) -> Option<&Path> {
        self.last_recovered.as_deref()
    }

    /// Recover the server with the standard schema
    pub fn recover_server(&mut self, name: &str) -> Result<Server> {
        self.recover_server_with(name, schema::server()?)
    }

    /// Recover the server with a caller-supplied schema
    pub fn recover_server_with(&mut self, name: &str, schema: Schema) -> Result<Server> {
        let path = self.config.server_db_path();
        self.last_recovered = Some(path.clone());
        Server::recover(name, schema, &path, self.backend.as_ref(), &self.acl)
    }

    /// Save the server quickly (header only) or fully
    pub fn save_server(&self, server: &mut Server, mode: SaveMode) -> Result<SaveOutcome> {
        server.save(
            mode,
            &self.config.server_db_path(),
            self.backend.as_ref(),
            &self.acl,
        )
    }

    /// A scheduler at its defaults, using the standard schema
    pub fn alloc_scheduler(&self, name: &str) -> Result<Scheduler> {
        Ok(Scheduler::alloc(name, schema::scheduler()?))
    }

    /// Recover the scheduler with the standard schema
    ///
    /// A scheduler that was never saved comes back at its defaults.
    pub fn recover_scheduler(&mut self, name: &str) -> Result<Scheduler> {
        self.recover_scheduler_with(name, schema::scheduler()?)
    }

    pub fn recover_scheduler_with(&mut self, name: &str, schema: Schema) -> Result<Scheduler> {
        let path = self.config.sched_db_path();
        self.last_recovered = Some(path.clone());
        Scheduler::recover(name, schema, &path, self.backend.as_ref())
    }

    /// Populate an allocated scheduler from its state file
    pub fn load_scheduler(&mut self, sched: &mut Scheduler) -> Result<()> {
        let path = self.config.sched_db_path();
        self.last_recovered = Some(path.clone());
        sched.load_state(&path, self.backend.as_ref())
    }

    /// Save the scheduler; only [`SaveMode::Full`] is supported
    pub fn save_scheduler(&self, sched: &Scheduler, mode: SaveMode) -> Result<SaveOutcome> {
        sched.save(mode, &self.config.sched_db_path(), self.backend.as_ref())
    }
}

/// Builder for customizing a [`StateStore`]
///
/// # Examples
///
/// ```rust,no_run
/// use svrdb::{BackendKind, StateStoreBuilder};
///
/// # fn main() -> svrdb::Result<()> {
/// let store = StateStoreBuilder::new()
///     .home("/var/spool/pbs")
///     .backend(BackendKind::Hardened)
///     .restore_modified_on_failure(false)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct StateStoreBuilder {
    config: StoreConfig,
    backend: Option<Arc<dyn PersistenceBackend>>,
}

impl StateStoreBuilder {
    /// Start from the default configuration
    pub fn new() -> Self {
        StateStoreBuilder::default()
    }

    /// Start from an existing configuration
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the private root directory
    pub fn home<P: Into<PathBuf>>(mut self, home: P) -> Self {
        self.config.home = home.into();
        self
    }

    /// Select one of the built-in backends
    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.config.backend = kind;
        self.backend = None;
        self
    }

    /// Use a custom backend, overriding the configured kind
    pub fn with_backend(mut self, backend: Arc<dyn PersistenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn restore_modified_on_failure(mut self, restore: bool) -> Self {
        self.config.restore_modified_on_failure = restore;
        self
    }

    /// Build the store, creating its directories if needed
    pub fn build(self) -> Result<StateStore> {
        let backend = match self.backend {
            Some(backend) => backend,
            None => self.config.backend.into_backend(),
        };
        StateStore::open_with_backend(self.config, backend)
    }
}
