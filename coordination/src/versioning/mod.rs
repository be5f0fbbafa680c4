//! Versioning Module: immutable, named document snapshots
//!
//! Every stage output is registered here under a unique name with its
//! producing agent, optional parent, content hash, and metadata. The store
//! gives the pipeline stable identities to route on and the change tracker
//! stable inputs to diff.
//!
//! # Usage
//!
//! ```rust,ignore
//! use coordination::versioning::VersionStore;
//!
//! let store = VersionStore::open("./artifacts")?;
//! store.create(&files, "v1_content_edited", "content_review", Some("original"), metadata)?;
//! let lineage = store.lineage("v1_content_edited")?;
//! ```

pub mod error;
pub mod store;
pub mod types;

pub use error::{VersionError, VersionResult};
pub use store::{content_hash, SharedVersionStore, VersionStore};
pub use types::{VersionHistoryExport, VersionManifest, VersionRecord, VersionStats};
