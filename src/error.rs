//! Error types shared across the crate.
//!
//! Listing failures surface as [`CatalogUnavailable`] so callers can tell
//! "no images" apart from "could not ask". Per-image faults during
//! aggregation never leave the aggregator; they are recorded as
//! [`SkipReason`]s instead.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::catalog::UnitId;

/// Anything that can go wrong while talking to an object store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store answered {status} for {url}")]
    Status { status: u16, url: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed listing response: {0}")]
    Xml(#[from] quick_xml::de::DeError),

    #[error("invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("presigned URL expired")]
    Expired,

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("store misconfigured: {0}")]
    Config(String),

    /// Failure injected by a test double
    #[error("injected failure: {0}")]
    Injected(String),
}

/// The remote listing for a unit could not be obtained.
///
/// Distinct from an empty [`Catalog`](crate::catalog::Catalog): an empty
/// catalog means the listing succeeded and nothing qualified.
#[derive(Debug, Error)]
#[error("catalog for unit '{unit}' unavailable: {source}")]
pub struct CatalogUnavailable {
    pub unit: UnitId,
    #[source]
    pub source: StoreError,
}

/// Why a single record was left out of a growth series
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No fetch URL could be issued for the key
    Presign(String),
    /// Download failed or timed out
    Fetch(String),
    /// Bytes were fetched but are not a decodable image
    Decode(String),
    /// The worker measuring the record failed (e.g. panicked)
    Task(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Presign(msg) => write!(f, "presign failed: {}", msg),
            SkipReason::Fetch(msg) => write!(f, "fetch failed: {}", msg),
            SkipReason::Decode(msg) => write!(f, "decode failed: {}", msg),
            SkipReason::Task(msg) => write!(f, "worker failed: {}", msg),
        }
    }
}

/// Errors from on-demand segmentation of a single stored image
#[derive(Debug, Error)]
pub enum SegmentFailure {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("segmentation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing S3 credentials (set them in the config or via AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY)")]
    MissingCredentials,

    #[error("could not open store: {0}")]
    Store(String),
}

/// Chart rendering errors
#[derive(Debug, Error)]
pub enum ChartError {
    #[error("growth series is empty, nothing to plot")]
    EmptySeries,

    #[error("chart drawing failed: {0}")]
    Drawing(String),
}
