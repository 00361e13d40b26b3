//! Configuration
//!
//! One JSON file with a section per concern. Every field has a default, so
//! a partial file (or none at all) is valid. The file is looked up at
//! `--config <path>` or `<config dir>/canopy-monitor/config.json`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::ClassificationRules;
use crate::error::ConfigError;
use crate::growth::AggregateOptions;
use crate::segment::SegmentationParams;
use crate::store::local::LocalSettings;
use crate::store::s3::{Credentials, S3Settings};
use crate::store::{AnyStore, LocalStore, S3Store};

const APP_DIR: &str = "canopy-monitor";
const CONFIG_FILE: &str = "config.json";

/// Which object store backend to talk to
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    S3,
    Local,
}

/// Object store section
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: Backend,
    pub s3: S3Settings,
    pub local: LocalSettings,
}

/// Complete application configuration
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub segmentation: SegmentationParams,
    pub aggregation: AggregateOptions,
    pub classification: ClassificationRules,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretty JSON, as written to the config file
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Default config file location
    pub fn get_config_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir().or_else(dirs::home_dir)?;
        path.push(APP_DIR);
        path.push(CONFIG_FILE);
        Some(path)
    }

    /// Load from an explicit path (must exist) or from the default location
    /// (may be missing, giving the defaults).
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::read(path),
            None => match Self::get_config_path() {
                Some(path) if path.is_file() => Self::read(&path),
                _ => {
                    tracing::debug!("⚙️  No config file, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json(&json)?;
        tracing::info!("⚙️  Loaded config from {}", path.display());
        Ok(config)
    }

    /// Write the config as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source: std::io::Error| ConfigError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        std::fs::write(path, self.to_json()?).map_err(io_error)
    }

    /// S3 settings with empty fields filled from the process environment
    pub fn s3_settings(&self) -> S3Settings {
        resolve_s3_settings(&self.store.s3, |name| std::env::var(name).ok())
    }

    /// Open the configured backend
    pub fn open_store(&self) -> Result<AnyStore, ConfigError> {
        match self.store.backend {
            Backend::Local => {
                tracing::info!("💾 Using local store at {}", self.store.local.root.display());
                Ok(AnyStore::Local(LocalStore::new(&self.store.local)))
            }
            Backend::S3 => {
                let settings = self.s3_settings();
                let credentials = credentials_from(&settings)?;
                let store = S3Store::new(&settings, credentials)
                    .map_err(|e| ConfigError::Store(e.to_string()))?;
                tracing::info!("☁️  Using S3 bucket '{}'", settings.bucket);
                Ok(AnyStore::S3(store))
            }
        }
    }
}

/// Fill credentials and region the config leaves empty from `env`
fn resolve_s3_settings(
    settings: &S3Settings,
    env: impl Fn(&str) -> Option<String>,
) -> S3Settings {
    let mut resolved = settings.clone();
    let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());

    if non_empty(resolved.access_key_id.clone()).is_none() {
        resolved.access_key_id = non_empty(env("AWS_ACCESS_KEY_ID"));
    }
    if non_empty(resolved.secret_access_key.clone()).is_none() {
        resolved.secret_access_key = non_empty(env("AWS_SECRET_ACCESS_KEY"));
    }
    if resolved.session_token.is_none() {
        resolved.session_token = non_empty(env("AWS_SESSION_TOKEN"));
    }
    if resolved.region.is_empty() {
        resolved.region = non_empty(env("AWS_REGION"))
            .or_else(|| non_empty(env("AWS_DEFAULT_REGION")))
            .unwrap_or_default();
    }
    resolved
}

fn credentials_from(settings: &S3Settings) -> Result<Credentials, ConfigError> {
    match (&settings.access_key_id, &settings.secret_access_key) {
        (Some(access_key_id), Some(secret_access_key)) => Ok(Credentials {
            access_key_id: access_key_id.clone(),
            secret_access_key: secret_access_key.clone(),
            session_token: settings.session_token.clone(),
        }),
        _ => Err(ConfigError::MissingCredentials),
    }
}
