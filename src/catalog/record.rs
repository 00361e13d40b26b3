//! Shared data structures for the image catalog
//!
//! These structs represent the data model that flows between
//! the object store listing and the aggregation / presentation layers.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Identifier of one growing unit (e.g. "3" or "unit-a")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace prefix of this unit in the object store: `images/<id>/`
    pub fn prefix(&self) -> String {
        format!("{}{}/", super::IMAGES_ROOT, self.0)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path-like identifier of a stored photograph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageKey(String);

impl ImageKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filename component (everything after the last `/`)
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Original photograph or its annotated counterpart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    Original,
    Processed,
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageKind::Original => f.write_str("original"),
            ImageKind::Processed => f.write_str("processed"),
        }
    }
}

/// A single photograph in a unit's catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Full object key (e.g. "images/3/img_2024-01-01_08-00-00.jpg")
    pub key: ImageKey,
    /// Unit the photograph belongs to
    pub unit: UnitId,
    /// Capture time parsed from the filename
    pub captured_at: NaiveDateTime,
    pub kind: ImageKind,
}

/// Counters describing what a synchronization pass dropped and why
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Keys returned by the listing, across all pages
    pub listed: usize,
    /// Keys without a png/jpg/jpeg extension
    pub unsupported_extension: usize,
    /// Image keys matching neither the original nor the processed prefix
    pub unclassified: usize,
    /// Image keys without a parseable timestamp
    pub unparseable: usize,
    /// Second original/processed for an already seen timestamp
    pub duplicates: usize,
}

impl SyncStats {
    /// Number of listed keys that ended up excluded
    pub fn excluded(&self) -> usize {
        self.unsupported_extension + self.unclassified + self.unparseable + self.duplicates
    }
}

/// Time-ordered set of image records for one unit, newest first.
///
/// Built once per synchronization and never updated in place; a later sync
/// produces a fresh catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    unit: UnitId,
    records: Vec<ImageRecord>,
    stats: SyncStats,
}

impl Catalog {
    /// Build a catalog, sorting records by capture time (descending).
    ///
    /// Records sharing a timestamp list the original before the processed
    /// image so the order is fully deterministic.
    pub fn new(unit: UnitId, mut records: Vec<ImageRecord>, stats: SyncStats) -> Self {
        records.sort_by(|a, b| {
            b.captured_at
                .cmp(&a.captured_at)
                .then_with(|| a.kind.cmp(&b.kind))
        });
        Self { unit, records, stats }
    }

    pub fn unit(&self) -> &UnitId {
        &self.unit
    }

    /// All records, newest first
    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Original images, oldest first (the order growth series are built in)
    pub fn originals_ascending(&self) -> impl Iterator<Item = &ImageRecord> {
        self.records
            .iter()
            .rev()
            .filter(|record| record.kind == ImageKind::Original)
    }

    /// Look up the record of a given kind captured at an exact time
    pub fn find(&self, captured_at: NaiveDateTime, kind: ImageKind) -> Option<&ImageRecord> {
        self.records
            .iter()
            .find(|record| record.captured_at == captured_at && record.kind == kind)
    }
}
