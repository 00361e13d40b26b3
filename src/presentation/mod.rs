//! Viewer-facing queries over a catalog
//!
//! A viewer picks a unit, then a day, then a capture time, and is shown the
//! original/processed pair taken at that instant. The selection lives in a
//! [`SessionContext`] value owned by the caller; the functions here are
//! stateless lookups on top of an immutable [`Catalog`].

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, ImageKind, ImageRecord, UnitId};
use crate::error::{SegmentFailure, StoreError};
use crate::segment::{self, SegmentationParams, SegmentationResult};
use crate::store::{ObjectStore, PresignedUrl};

/// Current selection of one viewer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub unit: Option<UnitId>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch unit; a different unit invalidates the date and time
    pub fn select_unit(&mut self, unit: UnitId) {
        if self.unit.as_ref() != Some(&unit) {
            self.date = None;
            self.time = None;
        }
        self.unit = Some(unit);
    }

    /// Switch day; a different day invalidates the time
    pub fn select_date(&mut self, date: NaiveDate) {
        if self.date != Some(date) {
            self.time = None;
        }
        self.date = Some(date);
    }

    pub fn select_time(&mut self, time: NaiveTime) {
        self.time = Some(time);
    }

    /// Snap the selection onto what the catalog actually offers.
    ///
    /// A missing or stale date falls back to the newest day, a missing or
    /// stale time to the latest capture of the selected day. Both end up
    /// `None` for an empty catalog.
    pub fn reconcile(&mut self, catalog: &Catalog) {
        let dates = available_dates(catalog);
        self.date = match self.date {
            Some(date) if dates.contains(&date) => Some(date),
            _ => dates.first().copied(),
        };

        self.time = match self.date {
            Some(date) => {
                let times = available_times(catalog, date);
                match self.time {
                    Some(time) if times.contains(&time) => Some(time),
                    _ => times.first().copied(),
                }
            }
            None => None,
        };
    }

    /// Selected instant, when both day and time are set
    pub fn instant(&self) -> Option<NaiveDateTime> {
        Some(self.date?.and_time(self.time?))
    }
}

/// Records captured at one instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePair {
    pub original: Option<ImageRecord>,
    pub processed: Option<ImageRecord>,
}

impl ImagePair {
    pub fn is_complete(&self) -> bool {
        self.original.is_some() && self.processed.is_some()
    }
}

/// An [`ImagePair`] with a fetch URL for each present side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPair {
    pub original: Option<(ImageRecord, PresignedUrl)>,
    pub processed: Option<(ImageRecord, PresignedUrl)>,
}

/// Days with at least one record, newest first
pub fn available_dates(catalog: &Catalog) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = catalog
        .records()
        .iter()
        .map(|record| record.captured_at.date())
        .collect();
    // Catalog order is already descending, so duplicates are adjacent
    dates.dedup();
    dates
}

/// Records captured on `date`, newest first
pub fn records_on(catalog: &Catalog, date: NaiveDate) -> Vec<&ImageRecord> {
    catalog
        .records()
        .iter()
        .filter(|record| record.captured_at.date() == date)
        .collect()
}

/// Capture times on `date`, latest first
pub fn available_times(catalog: &Catalog, date: NaiveDate) -> Vec<NaiveTime> {
    let mut times: Vec<NaiveTime> = records_on(catalog, date)
        .into_iter()
        .map(|record| record.captured_at.time())
        .collect();
    times.dedup();
    times
}

/// Original and processed records taken at `date` + `time`
pub fn find_pair(catalog: &Catalog, date: NaiveDate, time: NaiveTime) -> Option<ImagePair> {
    let instant = date.and_time(time);
    let original = catalog.find(instant, ImageKind::Original).cloned();
    let processed = catalog.find(instant, ImageKind::Processed).cloned();

    if original.is_none() && processed.is_none() {
        return None;
    }
    Some(ImagePair {
        original,
        processed,
    })
}

/// Issue fetch URLs for both sides of a pair
pub fn resolve_pair<S: ObjectStore>(
    store: &S,
    pair: &ImagePair,
    expiry: Duration,
) -> Result<ResolvedPair, StoreError> {
    let sign = |record: &Option<ImageRecord>| -> Result<_, StoreError> {
        match record {
            Some(record) => {
                let url = store.presign(record.key.as_str(), expiry)?;
                Ok(Some((record.clone(), url)))
            }
            None => Ok(None),
        }
    };

    Ok(ResolvedPair {
        original: sign(&pair.original)?,
        processed: sign(&pair.processed)?,
    })
}

/// Fetch and segment the original of a pair for side-by-side display.
///
/// `Ok(None)` when the pair only has a processed image.
pub async fn segment_original<S: ObjectStore>(
    store: &S,
    pair: &ImagePair,
    params: &SegmentationParams,
    expiry: Duration,
    timeout: Duration,
) -> Result<Option<SegmentationResult>, SegmentFailure> {
    let Some(original) = &pair.original else {
        return Ok(None);
    };

    let url = store.presign(original.key.as_str(), expiry)?;
    let bytes = tokio::time::timeout(timeout, store.fetch(&url))
        .await
        .map_err(|_| SegmentFailure::Timeout(timeout))??;

    let params = params.clone();
    let result =
        tokio::task::spawn_blocking(move || segment::segment_bytes(&bytes, &params)).await??;

    tracing::info!(
        "🔍 Segmented {}: {} green pixels",
        original.key,
        result.green_pixel_count
    );
    Ok(Some(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{build_catalog, ClassificationRules};
    use crate::store::MemoryStore;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    const EXPIRY: Duration = Duration::from_secs(3600);
    const TIMEOUT: Duration = Duration::from_secs(5);

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn time(hour: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, 0, 0).unwrap()
    }

    fn leaf_png() -> Vec<u8> {
        let mut image = RgbImage::from_pixel(60, 60, Rgb([120, 110, 100]));
        for y in 10..40 {
            for x in 10..40 {
                image.put_pixel(x, y, Rgb([50, 150, 40]));
            }
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn scenario_store() -> MemoryStore {
        MemoryStore::default()
            .with_object("images/1/img_001_2024-01-01_08-00-00.jpg", leaf_png())
            .with_object("images/1/img_dst_001_2024-01-01_08-00-00.jpg", vec![0])
            .with_object("images/1/notes.txt", vec![0])
    }

    async fn catalog_of(store: &MemoryStore) -> Catalog {
        build_catalog(store, &UnitId::new("1"), &ClassificationRules::default())
            .await
            .unwrap()
    }

    async fn multi_day_catalog() -> Catalog {
        let store = MemoryStore::default()
            .with_object("images/1/img_2024-01-01_08-00-00.jpg", vec![0])
            .with_object("images/1/img_2024-01-01_14-00-00.jpg", vec![0])
            .with_object("images/1/img_dst_2024-01-01_14-00-00.jpg", vec![0])
            .with_object("images/1/img_2024-01-03_09-00-00.jpg", vec![0]);
        catalog_of(&store).await
    }

    #[tokio::test]
    async fn test_pair_lookup_end_to_end() {
        let store = scenario_store();
        let catalog = catalog_of(&store).await;

        let pair = find_pair(&catalog, date(1), time(8)).unwrap();
        assert!(pair.is_complete());
        assert_eq!(
            pair.original.as_ref().unwrap().key.as_str(),
            "images/1/img_001_2024-01-01_08-00-00.jpg"
        );
        assert_eq!(
            pair.processed.as_ref().unwrap().key.as_str(),
            "images/1/img_dst_001_2024-01-01_08-00-00.jpg"
        );

        assert!(find_pair(&catalog, date(1), time(9)).is_none());
    }

    #[tokio::test]
    async fn test_dates_and_times() {
        let catalog = multi_day_catalog().await;

        assert_eq!(available_dates(&catalog), vec![date(3), date(1)]);
        assert_eq!(available_times(&catalog, date(1)), vec![time(14), time(8)]);
        assert_eq!(records_on(&catalog, date(1)).len(), 3);
        assert!(records_on(&catalog, date(2)).is_empty());
    }

    #[tokio::test]
    async fn test_single_sided_pair() {
        let catalog = multi_day_catalog().await;
        let pair = find_pair(&catalog, date(3), time(9)).unwrap();
        assert!(pair.original.is_some());
        assert!(pair.processed.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_falls_back_to_newest() {
        let catalog = multi_day_catalog().await;

        let mut session = SessionContext::new();
        session.select_unit(UnitId::new("1"));
        session.reconcile(&catalog);
        assert_eq!(session.date, Some(date(3)));
        assert_eq!(session.time, Some(time(9)));

        // Stale time on a valid day snaps to that day's latest capture
        session.select_date(date(1));
        session.select_time(time(23));
        session.reconcile(&catalog);
        assert_eq!(session.date, Some(date(1)));
        assert_eq!(session.time, Some(time(14)));

        // A valid selection is kept
        session.select_time(time(8));
        session.reconcile(&catalog);
        assert_eq!(session.instant(), Some(date(1).and_time(time(8))));
    }

    #[tokio::test]
    async fn test_reconcile_empty_catalog() {
        let catalog = catalog_of(&MemoryStore::default()).await;
        let mut session = SessionContext {
            unit: Some(UnitId::new("1")),
            date: Some(date(1)),
            time: Some(time(8)),
        };
        session.reconcile(&catalog);
        assert_eq!(session.date, None);
        assert_eq!(session.time, None);
        assert_eq!(session.instant(), None);
    }

    #[test]
    fn test_selection_changes_clear_dependents() {
        let mut session = SessionContext::new();
        session.select_unit(UnitId::new("1"));
        session.select_date(date(1));
        session.select_time(time(8));

        session.select_date(date(1));
        assert_eq!(session.time, Some(time(8)));

        session.select_date(date(2));
        assert_eq!(session.time, None);

        session.select_time(time(8));
        session.select_unit(UnitId::new("2"));
        assert_eq!(session.date, None);
        assert_eq!(session.time, None);
    }

    #[tokio::test]
    async fn test_resolve_and_segment_original() {
        let store = scenario_store();
        let catalog = catalog_of(&store).await;
        let pair = find_pair(&catalog, date(1), time(8)).unwrap();

        let resolved = resolve_pair(&store, &pair, EXPIRY).unwrap();
        let (_, url) = resolved.original.unwrap();
        assert!(url.as_str().contains("img_001_2024-01-01_08-00-00.jpg"));
        assert!(resolved.processed.is_some());

        let result = segment_original(&store, &pair, &SegmentationParams::default(), EXPIRY, TIMEOUT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.green_pixel_count, 900);
    }

    #[tokio::test]
    async fn test_segment_original_failures() {
        let store = scenario_store().with_failing_key("images/1/img_001_2024-01-01_08-00-00.jpg");
        let catalog = catalog_of(&store).await;
        let pair = find_pair(&catalog, date(1), time(8)).unwrap();
        let params = SegmentationParams::default();

        let err = segment_original(&store, &pair, &params, EXPIRY, TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, SegmentFailure::Store(_)));

        let processed_only = ImagePair {
            original: None,
            processed: pair.processed.clone(),
        };
        let none = segment_original(&store, &processed_only, &params, EXPIRY, TIMEOUT)
            .await
            .unwrap();
        assert!(none.is_none());
    }
}
