//! Canopy growth monitoring
//!
//! This crate contains:
//! - `catalog` - Timestamped photograph catalogs built from object store listings
//! - `store` - Object store backends (S3, local directory, in-memory)
//! - `color` - sRGB to CIE L*a*b* conversion
//! - `segment` - Vegetation segmentation (a* plane, Otsu, morphology, contours)
//! - `growth` - Green-area time series and trend charts
//! - `presentation` - Date/time selection and original/processed pairing
//! - `config` - JSON configuration
//! - `error` - Error types

pub mod catalog;
pub mod color;
pub mod config;
pub mod error;
pub mod growth;
pub mod presentation;
pub mod segment;
pub mod store;

pub use catalog::{build_catalog, list_units, Catalog, ImageKind, ImageRecord, UnitId};
pub use config::Config;
pub use growth::{aggregate_growth, GreenAreaMeasurement, GrowthSeries};
pub use segment::{segment, SegmentationParams, SegmentationResult};
pub use store::{AnyStore, ObjectStore};
