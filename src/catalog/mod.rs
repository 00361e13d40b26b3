//! Image catalog
//!
//! This module contains:
//! - `filename.rs` - Timestamp and prefix conventions of stored photographs
//! - `record.rs` - Records, catalogs and sync counters
//! - `sync.rs` - Building a catalog from an object store listing

pub mod filename;
pub mod record;
pub mod sync;

/// Root namespace of all unit folders in the object store
pub const IMAGES_ROOT: &str = "images/";

pub use filename::{classify, has_image_extension, parse_timestamp, ClassificationRules};
pub use record::{Catalog, ImageKey, ImageKind, ImageRecord, SyncStats, UnitId};
pub use sync::{build_catalog, list_units};
