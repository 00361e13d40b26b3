//! Growth aggregation
//!
//! Runs the segmentation over every original photograph of a catalog and
//! assembles the green pixel counts into a time series, oldest first.
//! Individual photographs are allowed to fail: they are reported as skipped
//! and the rest of the batch carries on.

pub mod chart;

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::catalog::{Catalog, ImageKey, ImageRecord, UnitId};
use crate::error::SkipReason;
use crate::segment::{self, SegmentationParams};
use crate::store::ObjectStore;

pub use chart::{render_growth_chart, render_growth_svg, ChartStyle};

/// How aggregation talks to the store
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AggregateOptions {
    /// Photographs fetched and segmented at the same time (1 = sequential)
    pub concurrency: usize,
    /// Give up on a single download after this many seconds
    pub fetch_timeout_secs: u64,
    /// Lifetime of the presigned URL issued per photograph
    pub url_expiry_secs: u64,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            fetch_timeout_secs: 30,
            url_expiry_secs: 3600,
        }
    }
}

impl AggregateOptions {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn url_expiry(&self) -> Duration {
        Duration::from_secs(self.url_expiry_secs.max(1))
    }
}

/// Green coverage of one photograph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GreenAreaMeasurement {
    pub captured_at: NaiveDateTime,
    pub green_pixel_count: u64,
}

/// A photograph left out of the series
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub key: ImageKey,
    pub captured_at: NaiveDateTime,
    pub reason: SkipReason,
}

/// Growth series of one unit, oldest first, with the gaps it has
#[derive(Debug, Clone, PartialEq)]
pub struct GrowthSeries {
    pub unit: UnitId,
    pub measurements: Vec<GreenAreaMeasurement>,
    pub skipped: Vec<SkippedRecord>,
}

impl GrowthSeries {
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// `captured_at,green_pixel_count` lines with a header
    pub fn to_csv(&self) -> String {
        let mut csv = String::from("captured_at,green_pixel_count\n");
        for m in &self.measurements {
            let _ = writeln!(
                csv,
                "{},{}",
                m.captured_at.format("%Y-%m-%d %H:%M:%S"),
                m.green_pixel_count
            );
        }
        csv
    }

    pub fn write_csv(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.to_csv())
    }
}

/// Build the growth series of a catalog.
///
/// Every original record is presigned, fetched (with a timeout), decoded and
/// segmented. Failures are collected in [`GrowthSeries::skipped`]; they never
/// abort the batch. Up to `options.concurrency` records are in flight at once,
/// and the result is sorted by capture time regardless of completion order.
pub async fn aggregate_growth<S>(
    store: Arc<S>,
    catalog: &Catalog,
    options: &AggregateOptions,
    params: &SegmentationParams,
) -> GrowthSeries
where
    S: ObjectStore + 'static,
{
    let originals: Vec<ImageRecord> = catalog.originals_ascending().cloned().collect();
    tracing::info!(
        "🌱 Measuring {} original image(s) of unit {} ({} at a time)",
        originals.len(),
        catalog.unit(),
        options.concurrency.max(1)
    );

    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for record in originals {
        let store = Arc::clone(&store);
        let semaphore = Arc::clone(&semaphore);
        let params = params.clone();
        let expiry = options.url_expiry();
        let timeout = options.fetch_timeout();

        tasks.spawn(async move {
            let outcome = match semaphore.acquire_owned().await {
                Ok(_permit) => {
                    // A panicking backend must not take the record with it
                    let job = record.clone();
                    let measured = tokio::spawn(async move {
                        measure(store.as_ref(), &job, expiry, timeout, &params).await
                    });
                    match measured.await {
                        Ok(outcome) => outcome,
                        Err(e) => Err(SkipReason::Task(e.to_string())),
                    }
                }
                Err(_) => Err(SkipReason::Fetch("worker pool closed".to_string())),
            };
            (record, outcome)
        });
    }

    let mut measurements = Vec::new();
    let mut skipped = Vec::new();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((record, Ok(green_pixel_count))) => {
                tracing::debug!("📏 {}: {} green pixels", record.key, green_pixel_count);
                measurements.push(GreenAreaMeasurement {
                    captured_at: record.captured_at,
                    green_pixel_count,
                });
            }
            Ok((record, Err(reason))) => {
                tracing::warn!("⚠️  Skipping {}: {}", record.key, reason);
                skipped.push(SkippedRecord {
                    key: record.key,
                    captured_at: record.captured_at,
                    reason,
                });
            }
            Err(e) => {
                tracing::warn!("⚠️  Aggregation task failed: {}", e);
            }
        }
    }

    measurements.sort_by_key(|m| m.captured_at);
    skipped.sort_by(|a, b| a.captured_at.cmp(&b.captured_at).then_with(|| a.key.cmp(&b.key)));

    tracing::info!(
        "✅ Growth series for unit {}: {} point(s), {} skipped",
        catalog.unit(),
        measurements.len(),
        skipped.len()
    );

    GrowthSeries {
        unit: catalog.unit().clone(),
        measurements,
        skipped,
    }
}

/// Presign, fetch, decode and segment one record
async fn measure<S: ObjectStore>(
    store: &S,
    record: &ImageRecord,
    expiry: Duration,
    timeout: Duration,
    params: &SegmentationParams,
) -> Result<u64, SkipReason> {
    let url = store
        .presign(record.key.as_str(), expiry)
        .map_err(|e| SkipReason::Presign(e.to_string()))?;

    let bytes = match tokio::time::timeout(timeout, store.fetch(&url)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => return Err(SkipReason::Fetch(e.to_string())),
        Err(_) => return Err(SkipReason::Fetch(format!("timed out after {:?}", timeout))),
    };

    // Decoding and segmentation are CPU-bound
    let params = params.clone();
    tokio::task::spawn_blocking(move || {
        segment::segment_bytes(&bytes, &params).map(|result| result.green_pixel_count)
    })
    .await
    .map_err(|e| SkipReason::Decode(format!("segmentation task failed: {}", e)))?
    .map_err(|e| SkipReason::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{build_catalog, ClassificationRules};
    use crate::store::MemoryStore;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    /// PNG of a soil background with one leaf square of the given side
    fn leaf_png(side: u32) -> Vec<u8> {
        let mut image = RgbImage::from_pixel(100, 100, Rgb([120, 110, 100]));
        for y in 10..10 + side {
            for x in 10..10 + side {
                image.put_pixel(x, y, Rgb([50, 150, 40]));
            }
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    async fn catalog_of(store: &MemoryStore) -> Catalog {
        build_catalog(store, &UnitId::new("1"), &ClassificationRules::default())
            .await
            .unwrap()
    }

    /// Memory store whose fetch stalls on one key and panics on another
    struct UnrulyStore {
        inner: MemoryStore,
        stalled_key: &'static str,
        panicking_key: &'static str,
    }

    impl ObjectStore for UnrulyStore {
        async fn list_page(
            &self,
            prefix: &str,
            delimiter: Option<&str>,
            continuation: Option<&str>,
        ) -> Result<crate::store::ListPage, crate::error::StoreError> {
            self.inner.list_page(prefix, delimiter, continuation).await
        }

        fn presign(
            &self,
            key: &str,
            expiry: Duration,
        ) -> Result<crate::store::PresignedUrl, crate::error::StoreError> {
            self.inner.presign(key, expiry)
        }

        async fn fetch(
            &self,
            url: &crate::store::PresignedUrl,
        ) -> Result<Vec<u8>, crate::error::StoreError> {
            if url.as_str().contains(self.stalled_key) {
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
            if url.as_str().contains(self.panicking_key) {
                panic!("backend blew up");
            }
            self.inner.fetch(url).await
        }
    }

    fn unruly_store() -> UnrulyStore {
        UnrulyStore {
            inner: MemoryStore::default()
                .with_object("images/1/img_2024-01-01_08-00-00.png", leaf_png(30))
                .with_object("images/1/img_2024-01-02_08-00-00.png", leaf_png(30))
                .with_object("images/1/img_2024-01-03_08-00-00.png", leaf_png(40))
                .with_object("images/1/img_2024-01-04_08-00-00.png", leaf_png(50)),
            stalled_key: "img_2024-01-02",
            panicking_key: "img_2024-01-03",
        }
    }

    #[tokio::test]
    async fn test_series_is_ascending() {
        let store = MemoryStore::default()
            .with_object("images/1/img_2024-01-03_08-00-00.png", leaf_png(50))
            .with_object("images/1/img_2024-01-01_08-00-00.png", leaf_png(30))
            .with_object("images/1/img_2024-01-02_08-00-00.png", leaf_png(40))
            .with_object("images/1/img_dst_2024-01-02_08-00-00.png", leaf_png(80));
        let catalog = catalog_of(&store).await;

        let series = aggregate_growth(
            Arc::new(store),
            &catalog,
            &AggregateOptions::default(),
            &SegmentationParams::default(),
        )
        .await;

        let counts: Vec<u64> = series.measurements.iter().map(|m| m.green_pixel_count).collect();
        assert_eq!(counts, vec![900, 1600, 2500]);
        assert!(series
            .measurements
            .windows(2)
            .all(|pair| pair[0].captured_at < pair[1].captured_at));
        assert!(series.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_unfetchable_and_undecodable_are_skipped() {
        let store = MemoryStore::default()
            .with_object("images/1/img_2024-01-01_08-00-00.png", leaf_png(30))
            .with_object("images/1/img_2024-01-02_08-00-00.png", leaf_png(30))
            .with_object("images/1/img_2024-01-03_08-00-00.png", b"garbage".to_vec())
            .with_object("images/1/img_2024-01-04_08-00-00.png", leaf_png(30))
            .with_failing_key("images/1/img_2024-01-02_08-00-00.png");
        let catalog = catalog_of(&store).await;

        let series = aggregate_growth(
            Arc::new(store),
            &catalog,
            &AggregateOptions {
                concurrency: 2,
                ..AggregateOptions::default()
            },
            &SegmentationParams::default(),
        )
        .await;

        // N = 4 originals, K = 2 failures
        assert_eq!(series.len(), 2);
        let days: Vec<String> = series
            .measurements
            .iter()
            .map(|m| m.captured_at.format("%d").to_string())
            .collect();
        assert_eq!(days, vec!["01", "04"]);

        assert_eq!(series.skipped.len(), 2);
        assert!(matches!(series.skipped[0].reason, SkipReason::Fetch(_)));
        assert!(matches!(series.skipped[1].reason, SkipReason::Decode(_)));
        assert_eq!(
            series.skipped[0].key.as_str(),
            "images/1/img_2024-01-02_08-00-00.png"
        );
    }

    #[tokio::test]
    async fn test_slow_fetch_times_out_and_batch_continues() {
        let store = unruly_store();
        let catalog = catalog_of(&store.inner).await;

        let series = aggregate_growth(
            Arc::new(store),
            &catalog,
            &AggregateOptions {
                fetch_timeout_secs: 1,
                ..AggregateOptions::default()
            },
            &SegmentationParams::default(),
        )
        .await;

        let counts: Vec<u64> = series.measurements.iter().map(|m| m.green_pixel_count).collect();
        assert_eq!(counts, vec![900, 2500]);

        let stalled = series
            .skipped
            .iter()
            .find(|s| s.key.as_str() == "images/1/img_2024-01-02_08-00-00.png")
            .unwrap();
        match &stalled.reason {
            SkipReason::Fetch(msg) => assert!(msg.contains("timed out")),
            other => panic!("unexpected reason {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panicking_fetch_is_reported_as_skipped() {
        let store = unruly_store();
        let catalog = catalog_of(&store.inner).await;

        let series = aggregate_growth(
            Arc::new(store),
            &catalog,
            &AggregateOptions {
                concurrency: 1,
                fetch_timeout_secs: 1,
                ..AggregateOptions::default()
            },
            &SegmentationParams::default(),
        )
        .await;

        // Every original is accounted for: N = 4, K = 2
        assert_eq!(series.len() + series.skipped.len(), 4);
        assert_eq!(series.len(), 2);
        assert_eq!(
            series.skipped[1].key.as_str(),
            "images/1/img_2024-01-03_08-00-00.png"
        );
        assert!(matches!(series.skipped[1].reason, SkipReason::Task(_)));
        assert!(series.skipped[1].reason.to_string().starts_with("worker failed"));
    }

    #[tokio::test]
    async fn test_sequential_matches_parallel() {
        let store = Arc::new(
            MemoryStore::default()
                .with_object("images/1/img_2024-01-01_08-00-00.png", leaf_png(25))
                .with_object("images/1/img_2024-01-02_08-00-00.png", leaf_png(35))
                .with_object("images/1/img_2024-01-03_08-00-00.png", leaf_png(45)),
        );
        let catalog = catalog_of(&store).await;
        let params = SegmentationParams::default();

        let sequential = aggregate_growth(
            Arc::clone(&store),
            &catalog,
            &AggregateOptions {
                concurrency: 1,
                ..AggregateOptions::default()
            },
            &params,
        )
        .await;
        let parallel = aggregate_growth(
            store,
            &catalog,
            &AggregateOptions {
                concurrency: 8,
                ..AggregateOptions::default()
            },
            &params,
        )
        .await;

        assert_eq!(sequential.measurements, parallel.measurements);
    }

    #[tokio::test]
    async fn test_empty_catalog_gives_empty_series() {
        let store = MemoryStore::default();
        let catalog = catalog_of(&store).await;
        let series = aggregate_growth(
            Arc::new(store),
            &catalog,
            &AggregateOptions::default(),
            &SegmentationParams::default(),
        )
        .await;
        assert!(series.is_empty());
        assert!(series.skipped.is_empty());
        assert_eq!(series.to_csv(), "captured_at,green_pixel_count\n");
    }

    #[test]
    fn test_csv_format() {
        let captured_at = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let series = GrowthSeries {
            unit: UnitId::new("1"),
            measurements: vec![GreenAreaMeasurement {
                captured_at,
                green_pixel_count: 42,
            }],
            skipped: Vec::new(),
        };
        assert_eq!(
            series.to_csv(),
            "captured_at,green_pixel_count\n2024-01-01 08:00:00,42\n"
        );
    }
}
