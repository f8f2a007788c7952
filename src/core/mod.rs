//! Server state persistence
//!
//! - [`error`] - Error types for save and recovery
//! - [`header`] - Quick state block, the fixed binary header of the server file
//! - [`attribute`] - Attribute slots, flags, definitions and the codec trait
//! - [`codec`] - Built-in codecs per attribute type
//! - [`entry`] - Linear attribute entries and the entry stream
//! - [`backend`] - File access strategies
//! - [`config`] - Store layout and options
//! - [`schema`] - Standard server and scheduler schemas
//! - [`persist`] - Full save and recovery shared by all state objects
//! - [`acl`] - ACL side-files
//! - [`server`] - Server recovery, full save and quick save
//! - [`scheduler`] - Scheduler allocation, save and recovery

pub mod acl;
pub mod attribute;
pub mod backend;
pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod header;
pub mod persist;
pub mod scheduler;
pub mod schema;
pub mod server;
pub mod validation;
