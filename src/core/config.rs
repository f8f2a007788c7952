//! Store configuration
//!
//! Paths are laid out under a private root:
//!
//! ```text
//! <home>/<priv_dir>/<server_db>          canonical server state
//! <home>/<priv_dir>/<server_db>.new      full-save staging file
//! <home>/<priv_dir>/<sched_db>           canonical scheduler state
//! <home>/<priv_dir>/<acl_dir>/<name>     one ACL side-file per attribute
//! ```

use crate::backend::BackendKind;
use crate::error::{Result, StateError};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Suffix of every staging file
pub const STAGING_SUFFIX: &str = ".new";

/// Persistence configuration
///
/// # Examples
///
/// ```
/// use svrdb::StoreConfig;
///
/// let config = StoreConfig::from_toml_str(r#"
///     home = "/var/spool/pbs"
///     backend = "hardened"
/// "#).unwrap();
///
/// assert_eq!(
///     config.server_db_path(),
///     std::path::Path::new("/var/spool/pbs/server_priv/serverdb")
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Private root directory
    pub home: PathBuf,

    /// Server private directory, relative to `home`
    pub priv_dir: String,

    /// Server state file name
    pub server_db: String,

    /// Scheduler state file name
    pub sched_db: String,

    /// ACL side-file directory, relative to `priv_dir`
    pub acl_dir: String,

    /// File access strategy
    pub backend: BackendKind,

    /// Put an ACL's modified flag back when its save fails, so the next
    /// full save retries it
    pub restore_modified_on_failure: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            home: PathBuf::from("/var/spool/pbs"),
            priv_dir: "server_priv".to_string(),
            server_db: "serverdb".to_string(),
            sched_db: "scheddb".to_string(),
            acl_dir: "svracl".to_string(),
            backend: BackendKind::Standard,
            restore_modified_on_failure: true,
        }
    }
}

impl StoreConfig {
    /// Default layout under `home`
    pub fn with_home<P: Into<PathBuf>>(home: P) -> Self {
        StoreConfig {
            home: home.into(),
            ..Default::default()
        }
    }

    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: StoreConfig =
            toml::from_str(text).map_err(|e| StateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| StateError::open(path.as_ref(), e))?;
        Self::from_toml_str(&text)
    }

    /// File names must be single path components
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("server_db", &self.server_db),
            ("sched_db", &self.sched_db),
            ("acl_dir", &self.acl_dir),
        ] {
            if value.is_empty() || value.contains('/') || value.contains('\\') || value == ".." {
                return Err(StateError::Config(format!(
                    "{} must be a plain file name, got {:?}",
                    key, value
                )));
            }
        }
        if self.server_db == self.sched_db {
            return Err(StateError::Config(
                "server_db and sched_db must differ".to_string(),
            ));
        }
        Ok(())
    }

    pub fn priv_path(&self) -> PathBuf {
        self.home.join(&self.priv_dir)
    }

    pub fn server_db_path(&self) -> PathBuf {
        self.priv_path().join(&self.server_db)
    }

    pub fn server_db_staging_path(&self) -> PathBuf {
        staging_path(&self.server_db_path())
    }

    pub fn sched_db_path(&self) -> PathBuf {
        self.priv_path().join(&self.sched_db)
    }

    pub fn sched_db_staging_path(&self) -> PathBuf {
        staging_path(&self.sched_db_path())
    }

    /// Directory holding the ACL side-files
    pub fn acl_path(&self) -> PathBuf {
        self.priv_path().join(&self.acl_dir)
    }

    /// Side-file of the ACL attribute `name`
    pub fn acl_file_path(&self, name: &str) -> PathBuf {
        self.acl_path().join(name)
    }

    pub fn acl_staging_path(&self, name: &str) -> PathBuf {
        staging_path(&self.acl_file_path(name))
    }
}

/// Staging path for a canonical file: the same path with ".new" appended
pub fn staging_path(canonical: &Path) -> PathBuf {
    let mut name: OsString = canonical.as_os_str().to_owned();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = StoreConfig::with_home("/tmp/home");
        assert_eq!(
            config.server_db_path(),
            PathBuf::from("/tmp/home/server_priv/serverdb")
        );
        assert_eq!(
            config.sched_db_path(),
            PathBuf::from("/tmp/home/server_priv/scheddb")
        );
        assert_eq!(
            config.acl_path(),
            PathBuf::from("/tmp/home/server_priv/svracl")
        );
        assert!(config.restore_modified_on_failure);
        assert_eq!(
            config.server_db_staging_path(),
            PathBuf::from("/tmp/home/server_priv/serverdb.new")
        );
        assert_eq!(
            config.acl_staging_path("acl_users"),
            PathBuf::from("/tmp/home/server_priv/svracl/acl_users.new")
        );
    }

    #[test]
    fn test_staging_path() {
        assert_eq!(
            staging_path(Path::new("/a/server_priv/serverdb")),
            PathBuf::from("/a/server_priv/serverdb.new")
        );
        assert_eq!(
            staging_path(Path::new("svracl/acl_users")),
            PathBuf::from("svracl/acl_users.new")
        );
    }

    #[test]
    fn test_toml_overrides() {
        let config = StoreConfig::from_toml_str(
            r#"
            home = "/srv/pbs"
            acl_dir = "acls"
            backend = "hardened"
            restore_modified_on_failure = false
            "#,
        )
        .unwrap();
        assert_eq!(config.home, PathBuf::from("/srv/pbs"));
        assert_eq!(config.acl_dir, "acls");
        assert_eq!(config.backend, BackendKind::Hardened);
        assert!(!config.restore_modified_on_failure);
        assert_eq!(config.server_db, "serverdb");
    }

    #[test]
    fn test_rejects_nested_names() {
        assert!(StoreConfig::from_toml_str("server_db = \"../serverdb\"").is_err());
        assert!(StoreConfig::from_toml_str("sched_db = \"serverdb\"").is_err());
        assert!(StoreConfig::from_toml_str("backend = \"fancy\"").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            StoreConfig::load("/definitely/not/here.toml"),
            Err(StateError::OpenFailed { .. })
        ));
    }
}
