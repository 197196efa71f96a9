//! # Object Storage
//!
//! Minimal S3 client for MinIO and AWS. Requests are signed with SigV4
//! (see [`signing`]) and sent with `reqwest`.
//!
//! The bucket is provisioned lazily before the first call: `HEAD` the bucket,
//! create it on 404, fail hard on 403 and retry transport failures. A
//! successful provisioning is remembered; a failed one is attempted again on
//! the next call so a late MinIO does not wedge the process.

pub mod signing;

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use metrics::{counter, histogram};
use regex::Regex;
use reqwest::{Method, Response, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};
use url::Url;
use utoipa::ToSchema;

use crate::config::StorageConfig;
use signing::{EMPTY_PAYLOAD_SHA256, Signer, sha256_hex, uri_encode};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const DELETE_CONCURRENCY: usize = 8;

/// Errors surfaced by the storage client.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid storage endpoint: {url}")]
    InvalidEndpoint { url: String },

    #[error("Invalid file extension: {extension}")]
    InvalidExtension { extension: String },

    #[error("File size {size} bytes exceeds the maximum allowed size of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Access denied to bucket {bucket}; check the storage credentials")]
    AccessDenied { bucket: String },

    #[error("Failed to provision bucket {bucket} after {attempts} attempts: {reason}")]
    ProvisioningFailed {
        bucket: String,
        attempts: u32,
        reason: String,
    },

    #[error("Storage {operation} returned HTTP {status}: {body}")]
    UnexpectedStatus {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("Storage transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Result of a successful upload.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UploadedObject {
    pub bucket: String,
    pub key: String,
    pub url: String,
    pub content_type: String,
    pub public: bool,
    #[schema(value_type = String)]
    pub uploaded_at: DateTime<Utc>,
}

/// Entry returned by [`ObjectStorage::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: String,
    pub etag: String,
}

/// Headers of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: u64,
    pub content_type: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Outcome of a batch delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone)]
enum Addressing {
    /// `{endpoint}/{bucket}/{key}` (MinIO and other custom endpoints)
    PathStyle(Url),
    /// `https://{bucket}.s3.{region}.amazonaws.com/{key}`
    VirtualHosted,
}

/// S3-compatible object storage client bound to one bucket.
#[derive(Debug)]
pub struct ObjectStorage {
    http: reqwest::Client,
    config: StorageConfig,
    signer: Signer,
    addressing: Addressing,
    provisioned: OnceCell<()>,
}

impl ObjectStorage {
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let addressing = match config.endpoint_url.as_deref() {
            Some(endpoint) => {
                let mut url = Url::parse(endpoint).map_err(|_| StorageError::InvalidEndpoint {
                    url: endpoint.to_string(),
                })?;
                if !config.use_ssl && url.scheme() == "https" {
                    url.set_scheme("http")
                        .map_err(|_| StorageError::InvalidEndpoint {
                            url: endpoint.to_string(),
                        })?;
                }
                Addressing::PathStyle(url)
            }
            None => Addressing::VirtualHosted,
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            signer: Signer::new(
                &config.access_key_id,
                &config.secret_access_key,
                &config.region,
            ),
            config: config.clone(),
            addressing,
            provisioned: OnceCell::new(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket_name
    }

    fn base_url(&self, encoded_path: &str) -> Result<Url, StorageError> {
        let raw = match &self.addressing {
            Addressing::PathStyle(endpoint) => format!(
                "{}/{}{}",
                endpoint.as_str().trim_end_matches('/'),
                uri_encode(&self.config.bucket_name, false),
                encoded_path
            ),
            Addressing::VirtualHosted => format!(
                "https://{}.s3.{}.amazonaws.com{}",
                self.config.bucket_name,
                self.config.region,
                if encoded_path.is_empty() { "/" } else { encoded_path }
            ),
        };
        Url::parse(&raw).map_err(|_| StorageError::InvalidEndpoint { url: raw })
    }

    fn bucket_url(&self) -> Result<Url, StorageError> {
        self.base_url("")
    }

    fn object_request_url(&self, key: &str) -> Result<Url, StorageError> {
        self.base_url(&format!("/{}", uri_encode(key, true)))
    }

    /// Public (unsigned) URL of an object.
    pub fn object_url(&self, key: &str) -> String {
        match &self.addressing {
            Addressing::PathStyle(endpoint) => format!(
                "{}/{}/{}",
                endpoint.as_str().trim_end_matches('/'),
                self.config.bucket_name,
                key
            ),
            Addressing::VirtualHosted => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.config.bucket_name, self.config.region, key
            ),
        }
    }

    /// Checks the extension against the allow-list and returns it lowercased.
    pub fn validate_extension(&self, filename: &str) -> Result<String, StorageError> {
        let extension = file_extension(filename).unwrap_or_default();
        if extension.is_empty()
            || !self
                .config
                .allowed_extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
        {
            return Err(StorageError::InvalidExtension { extension });
        }
        Ok(extension)
    }

    pub fn validate_size(&self, size: u64) -> Result<(), StorageError> {
        let max = self.config.max_file_size_bytes();
        if size > max {
            return Err(StorageError::FileTooLarge { size, max });
        }
        Ok(())
    }

    /// Makes sure the bucket exists, provisioning it on first use.
    pub async fn ensure_bucket(&self) -> Result<(), StorageError> {
        self.provisioned
            .get_or_try_init(|| self.provision_bucket())
            .await?;
        Ok(())
    }

    async fn provision_bucket(&self) -> Result<(), StorageError> {
        let attempts = self.config.init_max_retries.max(1);
        let delay = Duration::from_secs(self.config.init_retry_delay_seconds);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.try_provision().await {
                Ok(()) => {
                    info!(bucket = %self.config.bucket_name, attempt, "Storage bucket ready");
                    return Ok(());
                }
                Err(err @ StorageError::AccessDenied { .. }) => {
                    error!(bucket = %self.config.bucket_name, error = %err, "Storage credentials rejected");
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        bucket = %self.config.bucket_name,
                        attempt,
                        attempts,
                        error = %err,
                        "Bucket provisioning attempt failed"
                    );
                    last_error = err.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(StorageError::ProvisioningFailed {
            bucket: self.config.bucket_name.clone(),
            attempts,
            reason: last_error,
        })
    }

    async fn try_provision(&self) -> Result<(), StorageError> {
        let url = self.bucket_url()?;
        let response = self
            .send(Method::HEAD, url.clone(), Vec::new(), Vec::new(), "head_bucket")
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => self.create_bucket(url).await,
            StatusCode::FORBIDDEN => Err(StorageError::AccessDenied {
                bucket: self.config.bucket_name.clone(),
            }),
            status => Err(StorageError::UnexpectedStatus {
                operation: "head_bucket",
                status: status.as_u16(),
                body: String::new(),
            }),
        }
    }

    async fn create_bucket(&self, url: Url) -> Result<(), StorageError> {
        let body = if self.config.region == "us-east-1" {
            Vec::new()
        } else {
            format!(
                "<CreateBucketConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
                 <LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
                self.config.region
            )
            .into_bytes()
        };

        let response = self
            .send(Method::PUT, url, Vec::new(), body, "create_bucket")
            .await?;
        let status = response.status();
        // 409 means the bucket already exists and is ours.
        if status.is_success() || status == StatusCode::CONFLICT {
            info!(bucket = %self.config.bucket_name, "Created storage bucket");
            return Ok(());
        }
        if status == StatusCode::FORBIDDEN {
            return Err(StorageError::AccessDenied {
                bucket: self.config.bucket_name.clone(),
            });
        }
        Err(unexpected("create_bucket", response).await)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        operation: &'static str,
    ) -> Result<Response, StorageError> {
        let payload_hash = if body.is_empty() {
            EMPTY_PAYLOAD_SHA256.to_string()
        } else {
            sha256_hex(&body)
        };
        let auth_headers =
            self.signer
                .sign_headers(method.as_str(), &url, &headers, &payload_hash, Utc::now());

        let mut request = self.http.request(method, url);
        for (name, value) in headers.into_iter().chain(auth_headers) {
            request = request.header(name, value);
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let started = Instant::now();
        let result = request.send().await;
        histogram!("storage_request_duration_ms", "operation" => operation)
            .record(started.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(response) => {
                counter!(
                    "storage_requests_total",
                    "operation" => operation,
                    "status" => response.status().as_u16().to_string()
                )
                .increment(1);
                debug!(operation, status = %response.status(), "Storage request completed");
                Ok(response)
            }
            Err(err) => {
                counter!("storage_requests_total", "operation" => operation, "status" => "error")
                    .increment(1);
                Err(StorageError::Transport(err))
            }
        }
    }

    /// Uploads `data` under `key`. The content type defaults to a guess from
    /// the key's extension.
    pub async fn upload(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<UploadedObject, StorageError> {
        self.ensure_bucket().await?;

        let content_type = content_type
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| guess_content_type(key).to_string());
        let mut headers = vec![("content-type".to_string(), content_type.clone())];
        if self.config.public_read {
            headers.push(("x-amz-acl".to_string(), "public-read".to_string()));
        }

        let response = self
            .send(Method::PUT, self.object_request_url(key)?, headers, data, "put_object")
            .await?;
        if !response.status().is_success() {
            return Err(unexpected("put_object", response).await);
        }

        Ok(UploadedObject {
            bucket: self.config.bucket_name.clone(),
            key: key.to_string(),
            url: self.object_url(key),
            content_type,
            public: self.config.public_read,
            uploaded_at: Utc::now(),
        })
    }

    pub async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.ensure_bucket().await?;
        let response = self
            .send(Method::GET, self.object_request_url(key)?, Vec::new(), Vec::new(), "get_object")
            .await?;
        match response.status() {
            status if status.is_success() => Ok(response.bytes().await?.to_vec()),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound {
                key: key.to_string(),
            }),
            _ => Err(unexpected("get_object", response).await),
        }
    }

    /// Deletes one object. Deleting a missing key succeeds, as in S3.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.ensure_bucket().await?;
        let response = self
            .send(
                Method::DELETE,
                self.object_request_url(key)?,
                Vec::new(),
                Vec::new(),
                "delete_object",
            )
            .await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(unexpected("delete_object", response).await)
    }

    /// Deletes many objects concurrently and reports which keys failed.
    pub async fn delete_many(&self, keys: &[String]) -> Result<DeleteOutcome, StorageError> {
        if keys.is_empty() {
            return Ok(DeleteOutcome::default());
        }
        self.ensure_bucket().await?;

        let results: Vec<(String, Result<(), StorageError>)> = stream::iter(keys.iter().cloned())
            .map(|key| async move {
                let result = self.delete(&key).await;
                (key, result)
            })
            .buffer_unordered(DELETE_CONCURRENCY)
            .collect()
            .await;

        let mut outcome = DeleteOutcome::default();
        for (key, result) in results {
            match result {
                Ok(()) => outcome.deleted.push(key),
                Err(err) => {
                    warn!(key = %key, error = %err, "Failed to delete object");
                    outcome.failed.push(key);
                }
            }
        }
        Ok(outcome)
    }

    /// Lists up to `max_keys` objects whose key starts with `prefix`.
    pub async fn list(
        &self,
        prefix: Option<&str>,
        max_keys: u32,
    ) -> Result<Vec<ObjectSummary>, StorageError> {
        self.ensure_bucket().await?;

        let mut url = self.bucket_url()?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("list-type", "2");
            query.append_pair("max-keys", &max_keys.to_string());
            if let Some(prefix) = prefix {
                query.append_pair("prefix", prefix);
            }
        }

        let response = self
            .send(Method::GET, url, Vec::new(), Vec::new(), "list_objects")
            .await?;
        if !response.status().is_success() {
            return Err(unexpected("list_objects", response).await);
        }
        let body = response.text().await?;
        Ok(parse_list_objects(&body))
    }

    /// `HEAD` on the object.
    pub async fn metadata(&self, key: &str) -> Result<ObjectMetadata, StorageError> {
        self.ensure_bucket().await?;
        let response = self
            .send(
                Method::HEAD,
                self.object_request_url(key)?,
                Vec::new(),
                Vec::new(),
                "head_object",
            )
            .await?;

        match response.status() {
            status if status.is_success() => {
                let header = |name: &str| {
                    response
                        .headers()
                        .get(name)
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_string)
                };
                Ok(ObjectMetadata {
                    key: key.to_string(),
                    size: header("content-length")
                        .and_then(|value| value.parse().ok())
                        .unwrap_or(0),
                    content_type: header("content-type")
                        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
                    etag: header("etag").map(|tag| tag.trim_matches('"').to_string()),
                    last_modified: header("last-modified"),
                })
            }
            StatusCode::NOT_FOUND => Err(StorageError::NotFound {
                key: key.to_string(),
            }),
            status => Err(StorageError::UnexpectedStatus {
                operation: "head_object",
                status: status.as_u16(),
                body: String::new(),
            }),
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self.metadata(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Server-side copy within the bucket.
    pub async fn copy(&self, source_key: &str, dest_key: &str) -> Result<(), StorageError> {
        self.ensure_bucket().await?;
        let copy_source = format!(
            "/{}/{}",
            self.config.bucket_name,
            uri_encode(source_key, true)
        );
        let response = self
            .send(
                Method::PUT,
                self.object_request_url(dest_key)?,
                vec![("x-amz-copy-source".to_string(), copy_source)],
                Vec::new(),
                "copy_object",
            )
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound {
                key: source_key.to_string(),
            }),
            _ => Err(unexpected("copy_object", response).await),
        }
    }

    /// Copy followed by delete of the source.
    pub async fn move_object(&self, source_key: &str, dest_key: &str) -> Result<(), StorageError> {
        self.copy(source_key, dest_key).await?;
        self.delete(source_key).await
    }

    /// Time-limited GET URL; `expires_secs` defaults to the configured expiry.
    pub fn presigned_get_url(&self, key: &str, expires_secs: Option<u64>) -> Result<String, StorageError> {
        let url = self.object_request_url(key)?;
        let expires = expires_secs.unwrap_or(self.config.presigned_url_expiration);
        Ok(self
            .signer
            .presign("GET", &url, expires, Utc::now())
            .to_string())
    }
}

async fn unexpected(operation: &'static str, response: Response) -> StorageError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StorageError::UnexpectedStatus {
        operation,
        status,
        body,
    }
}

/// Lowercased extension without the dot.
pub fn file_extension(filename: &str) -> Option<String> {
    let (stem, extension) = filename.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

pub fn guess_content_type(filename: &str) -> &'static str {
    match file_extension(filename).as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("tif" | "tiff") => "image/tiff",
        Some("ico") => "image/vnd.microsoft.icon",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("ppt") => "application/vnd.ms-powerpoint",
        Some("pptx") => {
            "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        }
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

static CONTENTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Contents>(.*?)</Contents>").expect("valid regex"));
static FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(Key|Size|LastModified|ETag)>(.*?)</(?:Key|Size|LastModified|ETag)>")
        .expect("valid regex")
});

fn xml_unescape(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Extracts the `<Contents>` entries of a ListObjectsV2 response.
fn parse_list_objects(body: &str) -> Vec<ObjectSummary> {
    CONTENTS_RE
        .captures_iter(body)
        .filter_map(|contents| {
            let mut summary = ObjectSummary {
                key: String::new(),
                size: 0,
                last_modified: String::new(),
                etag: String::new(),
            };
            for field in FIELD_RE.captures_iter(&contents[1]) {
                let value = xml_unescape(&field[2]);
                match &field[1] {
                    "Key" => summary.key = value,
                    "Size" => summary.size = value.parse().unwrap_or(0),
                    "LastModified" => summary.last_modified = value,
                    "ETag" => summary.etag = value.trim_matches('"').to_string(),
                    _ => {}
                }
            }
            (!summary.key.is_empty()).then_some(summary)
        })
        .collect()
}
