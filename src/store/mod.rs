//! Object store access
//!
//! The catalog and the aggregator only need three things from remote storage:
//! a paginated listing, a short-lived fetch URL per object, and a way to
//! download through such a URL. [`ObjectStore`] is that seam.
//!
//! Backends:
//! - `s3.rs` - S3-compatible HTTP API with SigV4 presigned URLs
//! - `local.rs` - a directory tree on disk
//! - `memory.rs` - in-memory objects with injectable failures

pub mod local;
pub mod memory;
pub mod s3;

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::StoreError;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use s3::S3Store;

/// One object returned by a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<String>,
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub entries: Vec<ObjectEntry>,
    /// Prefixes rolled up by the delimiter (e.g. `images/3/`)
    pub common_prefixes: Vec<String>,
    /// Continuation token for the next page, `None` on the last page
    pub next: Option<String>,
}

/// Time-limited capability to read one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUrl {
    url: String,
    expires_at: DateTime<Utc>,
}

impl PresignedUrl {
    pub fn new(url: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            expires_at,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl std::fmt::Display for PresignedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

/// Remote storage as seen by the catalog and the aggregator
pub trait ObjectStore: Send + Sync {
    /// List one page of keys under `prefix`.
    ///
    /// With a `delimiter`, keys containing it after the prefix are rolled up
    /// into `common_prefixes` instead of being returned as entries.
    fn list_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<&str>,
    ) -> impl Future<Output = Result<ListPage, StoreError>> + Send;

    /// Issue a fetch URL for `key` valid for at least `expiry`
    fn presign(&self, key: &str, expiry: Duration) -> Result<PresignedUrl, StoreError>;

    /// Download the object behind a presigned URL
    fn fetch(&self, url: &PresignedUrl) -> impl Future<Output = Result<Vec<u8>, StoreError>> + Send;
}

/// Everything under a prefix, across all pages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub entries: Vec<ObjectEntry>,
    pub common_prefixes: Vec<String>,
    pub pages: usize,
}

/// Follow continuation tokens until the listing is exhausted.
pub async fn list_all<S: ObjectStore>(
    store: &S,
    prefix: &str,
    delimiter: Option<&str>,
) -> Result<Listing, StoreError> {
    let mut listing = Listing::default();
    let mut token: Option<String> = None;

    loop {
        let page = store.list_page(prefix, delimiter, token.as_deref()).await?;
        listing.pages += 1;
        listing.entries.extend(page.entries);
        listing.common_prefixes.extend(page.common_prefixes);

        match page.next {
            Some(next) if token.as_deref() == Some(next.as_str()) => {
                return Err(StoreError::Config(format!(
                    "listing of '{}' returned the same continuation token twice",
                    prefix
                )));
            }
            Some(next) => token = Some(next),
            None => break,
        }
    }

    tracing::debug!(
        "📄 Listed '{}': {} objects, {} prefixes in {} page(s)",
        prefix,
        listing.entries.len(),
        listing.common_prefixes.len(),
        listing.pages
    );

    Ok(listing)
}

/// A listing item before paging: either an object or a rolled-up prefix
#[derive(Debug, Clone)]
pub(crate) enum ListItem {
    Object(ObjectEntry),
    Prefix(String),
}

impl ListItem {
    fn sort_key(&self) -> &str {
        match self {
            ListItem::Object(entry) => &entry.key,
            ListItem::Prefix(prefix) => prefix,
        }
    }
}

/// Shape a flat, prefix-filtered set of objects into one page.
///
/// Used by the backends that hold their objects locally. The continuation
/// token is the index of the first item of the next page.
pub(crate) fn page_of(
    objects: Vec<ObjectEntry>,
    prefix: &str,
    delimiter: Option<&str>,
    continuation: Option<&str>,
    page_size: usize,
) -> Result<ListPage, StoreError> {
    let mut items: Vec<ListItem> = Vec::new();
    let mut seen_prefixes = std::collections::BTreeSet::new();

    for entry in objects {
        if !entry.key.starts_with(prefix) {
            continue;
        }
        let rest = &entry.key[prefix.len()..];
        match delimiter.and_then(|d| rest.find(d).map(|idx| idx + d.len())) {
            Some(end) => {
                let rolled = format!("{}{}", prefix, &rest[..end]);
                if seen_prefixes.insert(rolled.clone()) {
                    items.push(ListItem::Prefix(rolled));
                }
            }
            None => items.push(ListItem::Object(entry)),
        }
    }
    items.sort_by(|a, b| a.sort_key().cmp(b.sort_key()));

    let start = match continuation {
        Some(token) => token
            .parse::<usize>()
            .map_err(|_| StoreError::Config(format!("bad continuation token '{}'", token)))?,
        None => 0,
    };
    let page_size = page_size.max(1);
    let end = (start + page_size).min(items.len());

    let mut page = ListPage::default();
    for item in items.iter().take(end).skip(start) {
        match item {
            ListItem::Object(entry) => page.entries.push(entry.clone()),
            ListItem::Prefix(prefix) => page.common_prefixes.push(prefix.clone()),
        }
    }
    if end < items.len() {
        page.next = Some(end.to_string());
    }

    Ok(page)
}

/// Any configured backend, so callers can pick one at runtime
#[derive(Debug)]
pub enum AnyStore {
    S3(S3Store),
    Local(LocalStore),
    Memory(MemoryStore),
}

impl ObjectStore for AnyStore {
    async fn list_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        match self {
            AnyStore::S3(store) => store.list_page(prefix, delimiter, continuation).await,
            AnyStore::Local(store) => store.list_page(prefix, delimiter, continuation).await,
            AnyStore::Memory(store) => store.list_page(prefix, delimiter, continuation).await,
        }
    }

    fn presign(&self, key: &str, expiry: Duration) -> Result<PresignedUrl, StoreError> {
        match self {
            AnyStore::S3(store) => store.presign(key, expiry),
            AnyStore::Local(store) => store.presign(key, expiry),
            AnyStore::Memory(store) => store.presign(key, expiry),
        }
    }

    async fn fetch(&self, url: &PresignedUrl) -> Result<Vec<u8>, StoreError> {
        match self {
            AnyStore::S3(store) => store.fetch(url).await,
            AnyStore::Local(store) => store.fetch(url).await,
            AnyStore::Memory(store) => store.fetch(url).await,
        }
    }
}
