//! In-memory object store
//!
//! Holds objects in a map and serves them with the same paging and presigning
//! contract as the real backends. Listing and per-key fetch failures can be
//! injected, which is what the catalog and aggregation tests rely on.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

use super::{page_of, ListPage, ObjectEntry, ObjectStore, PresignedUrl};
use crate::error::StoreError;

const SCHEME: &str = "memory://";

/// Objects kept in process memory
#[derive(Debug)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    page_size: usize,
    listing_failure: Option<String>,
    failing_keys: HashSet<String>,
    list_calls: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl MemoryStore {
    /// Empty store returning at most `page_size` items per listing page
    pub fn new(page_size: usize) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            page_size: page_size.max(1),
            listing_failure: None,
            failing_keys: HashSet::new(),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Add (or replace) an object
    pub fn insert(&self, key: impl Into<String>, bytes: Vec<u8>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(key.into(), bytes);
        }
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with_object(self, key: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(key, bytes);
        self
    }

    /// Make every listing call fail with `message`
    pub fn with_listing_failure(mut self, message: impl Into<String>) -> Self {
        self.listing_failure = Some(message.into());
        self
    }

    /// Make fetches of `key` fail
    pub fn with_failing_key(mut self, key: impl Into<String>) -> Self {
        self.failing_keys.insert(key.into());
        self
    }

    /// How many `list_page` calls have been served
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Vec<ObjectEntry> {
        match self.objects.lock() {
            Ok(objects) => objects
                .iter()
                .map(|(key, bytes)| ObjectEntry {
                    key: key.clone(),
                    size: bytes.len() as u64,
                    last_modified: None,
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl ObjectStore for MemoryStore {
    async fn list_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = &self.listing_failure {
            return Err(StoreError::Injected(message.clone()));
        }

        page_of(self.snapshot(), prefix, delimiter, continuation, self.page_size)
    }

    fn presign(&self, key: &str, expiry: Duration) -> Result<PresignedUrl, StoreError> {
        let expiry = chrono::Duration::from_std(expiry)
            .map_err(|_| StoreError::Config(format!("expiry {:?} out of range", expiry)))?;
        let expires_at = Utc::now() + expiry;
        Ok(PresignedUrl::new(
            format!("{}{}?expires={}", SCHEME, key, expires_at.timestamp()),
            expires_at,
        ))
    }

    async fn fetch(&self, url: &PresignedUrl) -> Result<Vec<u8>, StoreError> {
        let rest = url
            .as_str()
            .strip_prefix(SCHEME)
            .ok_or_else(|| StoreError::InvalidUrl(url.to_string()))?;
        let key = rest.split_once('?').map(|(key, _)| key).unwrap_or(rest);

        if url.expires_at() < Utc::now() {
            return Err(StoreError::Expired);
        }
        if self.failing_keys.contains(key) {
            return Err(StoreError::Injected(format!("fetch of {} refused", key)));
        }

        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(key).cloned())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::list_all;

    #[tokio::test]
    async fn test_round_trip_through_presigned_url() {
        let store = MemoryStore::default().with_object("images/1/img.jpg", vec![1, 2, 3]);
        let url = store
            .presign("images/1/img.jpg", Duration::from_secs(60))
            .unwrap();
        assert!(url.as_str().starts_with("memory://images/1/img.jpg?expires="));
        assert_eq!(store.fetch(&url).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::default()
            .with_object("a.jpg", vec![0])
            .with_failing_key("a.jpg")
            .with_listing_failure("access denied");

        assert!(matches!(
            list_all(&store, "", None).await,
            Err(StoreError::Injected(_))
        ));

        let url = store.presign("a.jpg", Duration::from_secs(60)).unwrap();
        assert!(matches!(store.fetch(&url).await, Err(StoreError::Injected(_))));
    }

    #[tokio::test]
    async fn test_missing_object() {
        let store = MemoryStore::default();
        let url = store.presign("nope.jpg", Duration::from_secs(60)).unwrap();
        assert!(matches!(store.fetch(&url).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_all_counts_pages() {
        let store = MemoryStore::new(2);
        for i in 0..5 {
            store.insert(format!("k/{}", i), vec![]);
        }
        let listing = list_all(&store, "k/", None).await.unwrap();
        assert_eq!(listing.entries.len(), 5);
        assert_eq!(listing.pages, 3);
        assert_eq!(store.list_calls(), 3);
    }
}
