//! Filename conventions of the capture pipeline
//!
//! Cameras upload photographs as `img<...>_YYYY-MM-DD_HH-MM-SS.<ext>` and the
//! annotation step writes `img_dst<...>` next to them. Everything the catalog
//! knows about an object comes from its key.

use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::record::ImageKind;

/// Supported image extensions (compared case-insensitively)
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

const PROCESSED_PREFIX: &str = "img_dst";
const ORIGINAL_PREFIX: &str = "img";
const STRICT_ORIGINAL_PREFIX: &str = "img_";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

fn timestamp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2}").expect("timestamp pattern is valid")
    })
}

/// Extract the capture time embedded anywhere in a key.
///
/// Returns `None` when the key has no `YYYY-MM-DD_HH-MM-SS` substring or the
/// substring is not a real date/time (e.g. `2024-13-01_00-00-00`).
pub fn parse_timestamp(key: &str) -> Option<NaiveDateTime> {
    let found = timestamp_pattern().find(key)?;
    NaiveDateTime::parse_from_str(found.as_str(), TIMESTAMP_FORMAT).ok()
}

/// Whether the key ends in one of [`IMAGE_EXTENSIONS`]
pub fn has_image_extension(key: &str) -> bool {
    let file_name = key.rsplit('/').next().unwrap_or(key);
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => IMAGE_EXTENSIONS
            .iter()
            .any(|allowed| ext.eq_ignore_ascii_case(allowed)),
        _ => false,
    }
}

/// Rules for deciding which filenames are originals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationRules {
    /// Require `img_` rather than just `img` for originals, so names like
    /// `imgsomething.jpg` are excluded
    pub strict_original_prefix: bool,
}

/// Classify a filename (not a full key) by its prefix.
///
/// `img_dst*` is processed, `img*` is original, anything else is `None`.
pub fn classify(file_name: &str, rules: &ClassificationRules) -> Option<ImageKind> {
    if file_name.starts_with(PROCESSED_PREFIX) {
        return Some(ImageKind::Processed);
    }

    let original_prefix = if rules.strict_original_prefix {
        STRICT_ORIGINAL_PREFIX
    } else {
        ORIGINAL_PREFIX
    };

    if file_name.starts_with(original_prefix) {
        Some(ImageKind::Original)
    } else {
        None
    }
}
