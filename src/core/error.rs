use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Unable to open {path:?}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Short read of {path:?}: expected {expected} bytes, got {actual}")]
    CorruptOrTruncated {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid magic number in quick state block")]
    InvalidMagic,

    #[error("Unsupported state format version: {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("Quick state block size mismatch: file says {found}, expected {expected}")]
    HeaderSizeMismatch { found: u32, expected: u32 },

    #[error("Quick state block checksum verification failed")]
    ChecksumMismatch,

    #[error("Unknown server run state {0} in quick state block")]
    UnknownServerState(u32),

    #[error("Write to {path:?} failed: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Decode of attribute {name} failed: {reason}")]
    AttributeDecodeFailed { name: String, reason: String },

    #[error("Encode of attribute {name} failed: {reason}")]
    AttributeEncodeFailed { name: String, reason: String },

    #[error("Rename of {from:?} to {to:?} failed: {source}")]
    CommitRenameFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Quick save is not supported for {0}")]
    QuickSaveUnsupported(String),

    #[error("Invalid attribute name: {0} (must be usable as a file name)")]
    InvalidAttributeName(String),

    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StateError {
    pub(crate) fn decode(name: &str, reason: impl Into<String>) -> Self {
        StateError::AttributeDecodeFailed {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn encode(name: &str, reason: impl Into<String>) -> Self {
        StateError::AttributeEncodeFailed {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StateError::WriteFailed {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StateError::OpenFailed {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StateError>;
