//! Catalog synchronization
//!
//! Lists a unit's namespace, keeps the photographs whose names follow the
//! capture convention and turns them into a [`Catalog`]. Every call rebuilds
//! the catalog from the store; nothing is cached between calls.

use std::collections::HashSet;

use chrono::NaiveDateTime;

use super::filename::{classify, has_image_extension, parse_timestamp, ClassificationRules};
use super::record::{Catalog, ImageKey, ImageKind, ImageRecord, SyncStats, UnitId};
use super::IMAGES_ROOT;
use crate::error::CatalogUnavailable;
use crate::store::{list_all, ObjectStore};

/// Build the catalog of one unit.
///
/// Fails only when the listing itself fails. A unit without any qualifying
/// photograph yields an empty catalog.
pub async fn build_catalog<S: ObjectStore>(
    store: &S,
    unit: &UnitId,
    rules: &ClassificationRules,
) -> Result<Catalog, CatalogUnavailable> {
    let prefix = unit.prefix();
    tracing::info!("🔄 Synchronizing catalog for unit {} ({})", unit, prefix);

    // Step 1: complete listing, all pages
    let listing = list_all(store, &prefix, None)
        .await
        .map_err(|source| CatalogUnavailable {
            unit: unit.clone(),
            source,
        })?;

    let mut stats = SyncStats {
        listed: listing.entries.len(),
        ..SyncStats::default()
    };
    let mut seen: HashSet<(NaiveDateTime, ImageKind)> = HashSet::new();
    let mut records = Vec::new();

    for entry in listing.entries {
        let key = ImageKey::new(entry.key);

        // Step 2: extension allow-list
        if !has_image_extension(key.as_str()) {
            tracing::debug!("⏭️  {}: not an image", key);
            stats.unsupported_extension += 1;
            continue;
        }

        // Step 3: original or processed
        let Some(kind) = classify(key.file_name(), rules) else {
            tracing::debug!("⏭️  {}: unknown filename prefix", key);
            stats.unclassified += 1;
            continue;
        };

        // Step 4: capture time
        let Some(captured_at) = parse_timestamp(key.file_name()) else {
            tracing::debug!("⏭️  {}: no timestamp in filename", key);
            stats.unparseable += 1;
            continue;
        };

        // Step 5: one original and one processed per timestamp, first wins
        if !seen.insert((captured_at, kind)) {
            tracing::debug!("⏭️  {}: duplicate {} for {}", key, kind, captured_at);
            stats.duplicates += 1;
            continue;
        }

        records.push(ImageRecord {
            key,
            unit: unit.clone(),
            captured_at,
            kind,
        });
    }

    // Step 6: newest first
    let catalog = Catalog::new(unit.clone(), records, stats);

    tracing::info!(
        "✅ Unit {}: {} record(s) from {} key(s) in {} page(s), {} excluded",
        unit,
        catalog.len(),
        stats.listed,
        listing.pages,
        stats.excluded()
    );

    Ok(catalog)
}

/// Units present in the store: the folders directly under `images/`, sorted
pub async fn list_units<S: ObjectStore>(store: &S) -> Result<Vec<UnitId>, CatalogUnavailable> {
    let listing = list_all(store, IMAGES_ROOT, Some("/"))
        .await
        .map_err(|source| CatalogUnavailable {
            unit: UnitId::new(""),
            source,
        })?;

    let mut units: Vec<UnitId> = listing
        .common_prefixes
        .iter()
        .filter_map(|prefix| {
            let id = prefix.strip_prefix(IMAGES_ROOT)?.trim_end_matches('/');
            (!id.is_empty()).then(|| UnitId::new(id))
        })
        .collect();
    units.sort();
    units.dedup();

    tracing::info!("📂 Found {} unit(s)", units.len());
    Ok(units)
}
