//! Validation for attribute names
//!
//! Attribute names are written into the entry stream and double as the file
//! name of an ACL side-file, so they must be safe to use as a single path
//! component on every platform.

use crate::error::{Result, StateError};
use regex::Regex;
use std::sync::OnceLock;

/// Validated attribute name
///
/// # Rules
/// - ASCII letters, digits, underscore and dot only
/// - Must start with a letter
/// - Length: 1-64 characters
///
/// # Examples
///
/// ```
/// use svrdb::AttributeName;
///
/// let name = AttributeName::new("acl_users").unwrap();
/// assert_eq!(name.as_str(), "acl_users");
///
/// assert!(AttributeName::new("../etc/passwd").is_err());
/// assert!(AttributeName::new("_hidden").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeName(String);

impl AttributeName {
    /// Pattern for valid attribute names
    const PATTERN: &'static str = r"^[A-Za-z][A-Za-z0-9_.]*$";

    /// Maximum length
    pub const MAX_LENGTH: usize = 64;

    /// Create a new validated name
    ///
    /// # Errors
    ///
    /// Returns `InvalidAttributeName` if the name doesn't meet validation rules.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(AttributeName(name))
    }

    fn validate(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(StateError::InvalidAttributeName(
                "name cannot be empty".to_string(),
            ));
        }

        if name.len() > Self::MAX_LENGTH {
            return Err(StateError::InvalidAttributeName(format!(
                "{} (max {} characters)",
                name,
                Self::MAX_LENGTH
            )));
        }

        if !pattern()?.is_match(name) {
            return Err(StateError::InvalidAttributeName(name.to_string()));
        }

        // "a..b" is harmless as a component but confusing next to ".new" staging names
        if name.contains("..") {
            return Err(StateError::InvalidAttributeName(name.to_string()));
        }

        Ok(())
    }

    /// Get the name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AttributeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AttributeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(re) = PATTERN.get() {
        return Ok(re);
    }
    let re = Regex::new(AttributeName::PATTERN).map_err(|e| StateError::Config(e.to_string()))?;
    Ok(PATTERN.get_or_init(|| re))
}
