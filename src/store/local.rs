//! Directory tree used as an object store
//!
//! Keys are `/`-separated paths relative to the root directory, so a mirror
//! of the bucket (`<root>/images/<unit>/img_...jpg`) can be processed offline.
//! Fetch URLs are `file://` URLs carrying an `expires` query parameter.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::{page_of, ListPage, ObjectEntry, ObjectStore, PresignedUrl};
use crate::error::StoreError;

/// Settings for [`LocalStore`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    /// Directory that plays the role of the bucket
    pub root: PathBuf,
    /// Items per listing page
    pub page_size: usize,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            page_size: 1000,
        }
    }
}

/// Object store backed by a local directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    page_size: usize,
}

impl LocalStore {
    pub fn new(settings: &LocalSettings) -> Self {
        Self {
            root: settings.root.clone(),
            page_size: settings.page_size.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Collect the regular files whose key starts with `prefix`.
    ///
    /// Only the directory named by the prefix (up to its last `/`) is walked,
    /// so listing one unit does not touch the rest of the tree.
    fn scan(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StoreError> {
        if !self.root.is_dir() {
            return Err(StoreError::NotFound(format!(
                "store root {}",
                self.root.display()
            )));
        }

        let directory = prefix.rfind('/').map(|i| &prefix[..=i]).unwrap_or("");
        let start = self.path_for(directory)?;
        if !start.is_dir() {
            return Ok(Vec::new());
        }

        let mut objects = Vec::new();
        for entry in WalkDir::new(&start)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = match entry.path().strip_prefix(&self.root) {
                Ok(relative) => relative,
                Err(_) => continue,
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if !key.starts_with(prefix) {
                continue;
            }

            let metadata = entry.metadata().ok();
            let last_modified = metadata
                .as_ref()
                .and_then(|m| m.modified().ok())
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339());

            objects.push(ObjectEntry {
                key,
                size: metadata.map(|m| m.len()).unwrap_or(0),
                last_modified,
            });
        }

        Ok(objects)
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.split('/').any(|part| part == "..") {
            return Err(StoreError::InvalidUrl(key.to_string()));
        }
        let mut path = self.root.clone();
        path.extend(key.split('/').filter(|part| !part.is_empty()));
        Ok(path)
    }
}

impl ObjectStore for LocalStore {
    async fn list_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let store = self.clone();
        let owned_prefix = prefix.to_string();
        // Directory walks block, keep them off the async workers
        let objects = tokio::task::spawn_blocking(move || store.scan(&owned_prefix))
            .await
            .map_err(|e| StoreError::Config(format!("listing task failed: {}", e)))??;

        page_of(objects, prefix, delimiter, continuation, self.page_size)
    }

    fn presign(&self, key: &str, expiry: Duration) -> Result<PresignedUrl, StoreError> {
        let path = self.path_for(key)?;
        let absolute = if path.is_absolute() {
            path
        } else {
            std::env::current_dir()?.join(path)
        };

        let mut url = Url::from_file_path(&absolute)
            .map_err(|_| StoreError::InvalidUrl(absolute.display().to_string()))?;

        let expiry = chrono::Duration::from_std(expiry)
            .map_err(|_| StoreError::Config(format!("expiry {:?} out of range", expiry)))?;
        let expires_at = Utc::now() + expiry;
        url.query_pairs_mut()
            .append_pair("expires", &expires_at.timestamp().to_string());

        Ok(PresignedUrl::new(url.to_string(), expires_at))
    }

    async fn fetch(&self, url: &PresignedUrl) -> Result<Vec<u8>, StoreError> {
        let parsed =
            Url::parse(url.as_str()).map_err(|_| StoreError::InvalidUrl(url.to_string()))?;

        let expires = parsed
            .query_pairs()
            .find(|(name, _)| name == "expires")
            .and_then(|(_, value)| value.parse::<i64>().ok())
            .ok_or_else(|| StoreError::InvalidUrl(url.to_string()))?;
        if expires < Utc::now().timestamp() {
            return Err(StoreError::Expired);
        }

        let path = parsed
            .to_file_path()
            .map_err(|_| StoreError::InvalidUrl(url.to_string()))?;

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}
