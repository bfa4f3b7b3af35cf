//! # RookDB Storage Core
//!
//! RookDB is an embedded paginated graph/document database engine. This
//! crate implements the engine's storage core: the atomic, persistent
//! storage-configuration store and the primitives it is layered on.
//!
//! The configuration store keeps the per-database catalog (schema record
//! identifiers, locale and date/time defaults, cluster descriptors,
//! secondary-index engine descriptors, arbitrary user properties, and
//! tuning constants) on disk so that every restart recovers the same view
//! and every update is either fully visible or not visible at all.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │     Typed facade (StorageConfig)     │
//! ├──────────────────────────────────────┤
//! │  Value codecs │ Pipe-delimited snap  │
//! ├──────────────────────────────────────┤
//! │   Keyed transactional map (store)    │
//! ├───────────────────┬──────────────────┤
//! │  Key index (.bd)  │ Record cluster   │
//! │  + header (.nd)   │ (.cd) + (.cm)    │
//! ├───────────────────┴──────────────────┤
//! │     Atomic-operation manager         │
//! └──────────────────────────────────────┘
//! ```
//!
//! Every mutation of the store runs inside a single atomic-operation scope
//! spanning the key index and the record cluster; a failure anywhere in
//! the scope rolls both structures back to their prior state. Readers
//! bypass the scope and synchronize through a readers/writer lock only.
//!
//! ## File Layout
//!
//! ```text
//! database_dir/
//! ├── config.bd   # key index entries
//! ├── config.nd   # key index header (magic, version, checksum)
//! ├── config.cd   # record cluster payloads
//! └── config.cm   # record cluster header (magic, version, checksum)
//! ```
//!
//! ## Module Overview
//!
//! - [`config`]: the configuration store: codecs, keyed map, typed
//!   facade, lifecycle, and the legacy pipe-delimited snapshot
//! - [`index`]: ordered persistent key → record-reference index
//! - [`cluster`]: positional variable-length record store
//! - [`atomic`]: atomic-operation scopes with undo-based rollback
//! - [`settings`]: typed key/value context and the global key catalog

#[macro_use]
mod macros;

pub mod atomic;
pub mod cluster;
pub mod config;
pub mod index;
pub mod settings;

mod snapshot;

pub use config::{
    ClusterConfig, ClusterStatus, ConfigUpdateListener, DateFormatter, IndexEngineData, KeyType,
    Locale, PaginatedClusterConfig, StorageConfig, CURRENT_BINARY_FORMAT_VERSION, CURRENT_VERSION,
    DEFAULT_CHARSET,
};
pub use index::RecordRef;
