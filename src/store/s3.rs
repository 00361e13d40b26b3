//! S3-compatible object store
//!
//! Talks to the bucket over plain HTTPS:
//! - `ListObjectsV2` for listings (XML, paginated with continuation tokens)
//! - AWS Signature V4 query-string presigning for object URLs
//!
//! List requests are signed the same way as object URLs, so no request
//! headers besides `Host` take part in signing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{ListPage, ObjectEntry, ObjectStore, PresignedUrl};
use crate::error::StoreError;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Listing requests are signed with this lifetime
const LIST_SIGNATURE_TTL: Duration = Duration::from_secs(300);

const DEFAULT_REGION: &str = "us-east-1";

/// SigV4 caps presigned URLs at seven days
const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 3600);

/// Connection settings for [`S3Store`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Settings {
    /// Service endpoint without the bucket (e.g. "https://s3.amazonaws.com")
    pub endpoint: String,
    pub bucket: String,
    /// Falls back to `AWS_REGION` / `AWS_DEFAULT_REGION`, then us-east-1
    pub region: String,
    /// Falls back to `AWS_ACCESS_KEY_ID` when empty
    pub access_key_id: Option<String>,
    /// Falls back to `AWS_SECRET_ACCESS_KEY` when empty
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// `https://endpoint/bucket/key` instead of `https://bucket.endpoint/key`
    pub path_style: bool,
    /// Timeout for every HTTP request, in seconds
    pub request_timeout_secs: u64,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            endpoint: "https://s3.amazonaws.com".to_string(),
            bucket: String::new(),
            region: String::new(),
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            path_style: false,
            request_timeout_secs: 30,
        }
    }
}

/// Static credentials used for signing
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Object store speaking the S3 REST API
#[derive(Debug, Clone)]
pub struct S3Store {
    client: reqwest::Client,
    scheme: String,
    /// Host (and port) requests are sent to, bucket included when virtual-hosted
    host: String,
    bucket: String,
    region: String,
    path_style: bool,
    credentials: Credentials,
    timeout: Duration,
}

impl S3Store {
    pub fn new(settings: &S3Settings, credentials: Credentials) -> Result<Self, StoreError> {
        if settings.bucket.is_empty() {
            return Err(StoreError::Config("bucket name is empty".to_string()));
        }

        let endpoint = Url::parse(&settings.endpoint)
            .map_err(|_| StoreError::InvalidUrl(settings.endpoint.clone()))?;
        let endpoint_host = endpoint
            .host_str()
            .ok_or_else(|| StoreError::InvalidUrl(settings.endpoint.clone()))?;
        let endpoint_host = match endpoint.port() {
            Some(port) => format!("{}:{}", endpoint_host, port),
            None => endpoint_host.to_string(),
        };

        let host = if settings.path_style {
            endpoint_host
        } else {
            format!("{}.{}", settings.bucket, endpoint_host)
        };

        let timeout = Duration::from_secs(settings.request_timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .user_agent(concat!("canopy-monitor/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            scheme: endpoint.scheme().to_string(),
            host,
            bucket: settings.bucket.clone(),
            region: if settings.region.is_empty() {
                DEFAULT_REGION.to_string()
            } else {
                settings.region.clone()
            },
            path_style: settings.path_style,
            credentials,
            timeout,
        })
    }

    /// Request path of an object key (or of the bucket when `key` is empty)
    fn canonical_uri(&self, key: &str) -> String {
        let encoded_key = uri_encode(key, false);
        if self.path_style {
            if key.is_empty() {
                format!("/{}", self.bucket)
            } else {
                format!("/{}/{}", self.bucket, encoded_key)
            }
        } else {
            format!("/{}", encoded_key)
        }
    }

    /// Build a SigV4 query-string signed URL.
    ///
    /// # Arguments
    /// * `key` - Object key, empty for bucket-level requests such as listings
    /// * `params` - Extra query parameters (unencoded)
    /// * `expiry` - Validity of the signature
    /// * `now` - Signing time
    fn sign_url(
        &self,
        key: &str,
        params: &[(&str, String)],
        expiry: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        if expiry > MAX_PRESIGN_EXPIRY || expiry.as_secs() == 0 {
            return Err(StoreError::Config(format!(
                "presign expiry must be between 1s and 7 days, got {:?}",
                expiry
            )));
        }

        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let scope = format!("{}/{}/{}/aws4_request", date_stamp, self.region, SERVICE);

        let mut query: Vec<(String, String)> = params
            .iter()
            .map(|(name, value)| (uri_encode(name, true), uri_encode(value, true)))
            .collect();
        let mut push = |name: &str, value: &str| {
            query.push((uri_encode(name, true), uri_encode(value, true)));
        };
        push("X-Amz-Algorithm", ALGORITHM);
        push(
            "X-Amz-Credential",
            &format!("{}/{}", self.credentials.access_key_id, scope),
        );
        push("X-Amz-Date", &amz_date);
        push("X-Amz-Expires", &expiry.as_secs().to_string());
        if let Some(token) = &self.credentials.session_token {
            push("X-Amz-Security-Token", token);
        }
        push("X-Amz-SignedHeaders", "host");
        query.sort();

        let canonical_query = query
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("&");

        let canonical_uri = self.canonical_uri(key);
        let canonical_request = format!(
            "GET\n{}\n{}\nhost:{}\n\nhost\n{}",
            canonical_uri, canonical_query, self.host, UNSIGNED_PAYLOAD
        );

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signing_key = derive_signing_key(
            &self.credentials.secret_access_key,
            &date_stamp,
            &self.region,
        );
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        Ok(format!(
            "{}://{}{}?{}&X-Amz-Signature={}",
            self.scheme, self.host, canonical_uri, canonical_query, signature
        ))
    }

    fn map_send_error(&self, err: reqwest::Error) -> StoreError {
        if err.is_timeout() {
            StoreError::Timeout(self.timeout)
        } else {
            StoreError::Http(err)
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, StoreError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(strip_query(url)));
        }
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                url: strip_query(url),
            });
        }
        Ok(response)
    }
}

impl ObjectStore for S3Store {
    async fn list_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let mut params = vec![("list-type", "2".to_string()), ("prefix", prefix.to_string())];
        if let Some(delimiter) = delimiter {
            params.push(("delimiter", delimiter.to_string()));
        }
        if let Some(token) = continuation {
            params.push(("continuation-token", token.to_string()));
        }

        let url = self.sign_url("", &params, LIST_SIGNATURE_TTL, Utc::now())?;
        let body = self
            .get(&url)
            .await?
            .text()
            .await
            .map_err(|e| self.map_send_error(e))?;

        parse_list_response(&body)
    }

    fn presign(&self, key: &str, expiry: Duration) -> Result<PresignedUrl, StoreError> {
        let now = Utc::now();
        let url = self.sign_url(key, &[], expiry, now)?;
        let expires_at = now
            + chrono::Duration::from_std(expiry)
                .map_err(|_| StoreError::Config(format!("expiry {:?} out of range", expiry)))?;
        Ok(PresignedUrl::new(url, expires_at))
    }

    async fn fetch(&self, url: &PresignedUrl) -> Result<Vec<u8>, StoreError> {
        if url.expires_at() < Utc::now() {
            return Err(StoreError::Expired);
        }
        let bytes = self
            .get(url.as_str())
            .await?
            .bytes()
            .await
            .map_err(|e| self.map_send_error(e))?;
        Ok(bytes.to_vec())
    }
}

/// `ListBucketResult` document returned by `ListObjectsV2`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ListedObject>,
    #[serde(default)]
    common_prefixes: Vec<ListedPrefix>,
    #[serde(default)]
    is_truncated: bool,
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedObject {
    key: String,
    #[serde(default)]
    size: u64,
    last_modified: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedPrefix {
    prefix: String,
}

fn parse_list_response(xml: &str) -> Result<ListPage, StoreError> {
    let result: ListBucketResult = quick_xml::de::from_str(xml)?;

    let next = match (result.is_truncated, result.next_continuation_token) {
        (true, Some(token)) => Some(token),
        (true, None) => {
            return Err(StoreError::Config(
                "truncated listing without a continuation token".to_string(),
            ))
        }
        (false, _) => None,
    };

    Ok(ListPage {
        entries: result
            .contents
            .into_iter()
            .map(|object| ObjectEntry {
                key: object.key,
                size: object.size,
                last_modified: object.last_modified,
            })
            .collect(),
        common_prefixes: result.common_prefixes.into_iter().map(|p| p.prefix).collect(),
        next,
    })
}

/// RFC 3986 percent-encoding as SigV4 wants it: unreserved characters stay,
/// `/` stays only in paths.
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut encoded = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            b'/' if !encode_slash => encoded.push('/'),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn derive_signing_key(secret: &str, date_stamp: &str, region: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Drop the signature-bearing query string before a URL ends up in an error
fn strip_query(url: &str) -> String {
    url.split('?').next().unwrap_or(url).to_string()
}
