//! Local application index and icon cache.
//!
//! This crate discovers installed application bundles and preference panes,
//! caches their display metadata and icons, and answers which application
//! should represent a given file type:
//! - Bundle discovery under a fixed set of roots
//! - `Info.plist` parsing and one-time OS timestamp queries
//! - Icon conversion into a raster icon cache
//! - JSON persistence with display-name deduplication
//! - Editor/viewer association resolution

pub mod config;
pub mod error;
pub mod extract;
pub mod generation;
pub mod icon;
pub mod indexer;
pub mod manager;
pub mod manifest;
pub mod platform;
pub mod resolver;
pub mod scanner;
pub mod store;
pub mod types;

// Re-export main types
pub use config::{AppIndexConfig, ScanRoot};
pub use error::{AppIndexError, Result};
pub use indexer::{Indexer, PassReport};
pub use manager::{AppIndex, AppIndexStatus};
pub use platform::{default_platform, Platform, SharedPlatform};
pub use resolver::{type_identifier_for_path, AssociationIndex};
pub use store::{CacheStore, StoreLoad};
pub use types::{AppRecord, BundleKind, BundleTimestamps, DiscoveredBundle};
