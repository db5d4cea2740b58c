//! Store and transfer configuration
//!
//! Loaded from a YAML file or from environment variables (with `.env` support).
//! Loading is lenient about missing credentials: `StoreClientFactory` is the
//! single place that rejects an incomplete `StoreConfig`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

/// Connection settings for one bucket of an S3-compatible store
#[derive(Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Endpoint root, e.g. `https://<account>.r2.cloudflarestorage.com`
    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub access_key: String,

    #[serde(default, skip_serializing)]
    pub secret_key: String,

    /// Signing region (`auto` for R2)
    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default)]
    pub bucket: String,

    /// Accept invalid TLS certificates (local test stores only)
    #[serde(default)]
    pub insecure_tls: bool,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new("", "", "", "")
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("insecure_tls", &self.insecure_tls)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl StoreConfig {
    pub fn new(
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: default_region(),
            bucket: bucket.into(),
            insecure_tls: false,
            request_timeout_secs: default_request_timeout(),
        }
    }

    /// Cloudflare R2: endpoint derived from the account ID, region `auto`
    pub fn r2(
        account_id: &str,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self::new(r2_endpoint(account_id), access_key, secret_key, bucket).with_region("auto")
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_insecure_tls(mut self, insecure: bool) -> Self {
        self.insecure_tls = insecure;
        self
    }

    /// Names of required fields that are empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.endpoint.trim().is_empty() {
            missing.push("endpoint");
        }
        if self.access_key.trim().is_empty() {
            missing.push("access_key");
        }
        if self.secret_key.trim().is_empty() {
            missing.push("secret_key");
        }
        if self.bucket.trim().is_empty() {
            missing.push("bucket");
        }
        missing
    }
}

fn r2_endpoint(account_id: &str) -> String {
    format!("https://{}.r2.cloudflarestorage.com", account_id)
}

/// Sizes and limits used by the transfer engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Part size for multipart uploads (bytes)
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Files strictly larger than this use multipart upload (bytes)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,

    /// Largest upload the ingress layer should accept (bytes)
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,

    /// Keys requested per ListObjectsV2 page
    #[serde(default = "default_list_page_size")]
    pub list_page_size: u32,

    /// Parts in flight at once; 1 uploads parts strictly in sequence
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_part_size() -> u64 {
    100 * MIB
}

fn default_multipart_threshold() -> u64 {
    100 * MIB
}

fn default_max_upload_size() -> u64 {
    5 * GIB
}

fn default_list_page_size() -> u32 {
    1000
}

fn default_concurrency() -> usize {
    1
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            part_size: default_part_size(),
            multipart_threshold: default_multipart_threshold(),
            max_upload_size: default_max_upload_size(),
            list_page_size: default_list_page_size(),
            concurrency: default_concurrency(),
        }
    }
}

impl TransferSettings {
    /// Whether an upload of `size` bytes is within the ingress limit
    pub fn accepts(&self, size: u64) -> bool {
        size <= self.max_upload_size
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub transfer: TransferSettings,
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    serde_yaml::from_str(&content).context("Failed to parse YAML configuration")
}

/// Load configuration from environment variables, reading `.env` first if present.
///
/// - `S3_ENDPOINT`, or `R2_ACCOUNT_ID` (endpoint derived, region `auto`)
/// - `AWS_ACCESS_KEY_ID` / `R2_ACCESS_KEY_ID`
/// - `AWS_SECRET_ACCESS_KEY` / `R2_SECRET_ACCESS_KEY`
/// - `S3_BUCKET` / `R2_BUCKET_NAME`
/// - `AWS_REGION` (optional)
/// - `S3XFER_PART_SIZE`, `S3XFER_MULTIPART_THRESHOLD`, `S3XFER_CONCURRENCY` (optional)
pub fn load_from_env() -> Result<Config> {
    let _ = dotenvy::dotenv();
    from_lookup(|name| std::env::var(name).ok())
}

/// Build a config from any variable lookup (the environment in production)
pub fn from_lookup<F>(lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let first = |names: &[&str]| {
        names
            .iter()
            .filter_map(|n| lookup(n))
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
    };

    let mut store = StoreConfig::default();

    if let Some(endpoint) = first(&["S3_ENDPOINT"]) {
        store.endpoint = endpoint;
    } else if let Some(account) = first(&["R2_ACCOUNT_ID"]) {
        store.endpoint = r2_endpoint(&account);
        store.region = "auto".to_string();
    }
    store.access_key = first(&["AWS_ACCESS_KEY_ID", "R2_ACCESS_KEY_ID"]).unwrap_or_default();
    store.secret_key = first(&["AWS_SECRET_ACCESS_KEY", "R2_SECRET_ACCESS_KEY"]).unwrap_or_default();
    store.bucket = first(&["S3_BUCKET", "R2_BUCKET_NAME"]).unwrap_or_default();
    if let Some(region) = first(&["AWS_REGION"]) {
        store.region = region;
    }

    let mut transfer = TransferSettings::default();
    if let Some(v) = first(&["S3XFER_PART_SIZE"]) {
        transfer.part_size = parse_size(&v).context("Invalid S3XFER_PART_SIZE")?;
    }
    if let Some(v) = first(&["S3XFER_MULTIPART_THRESHOLD"]) {
        transfer.multipart_threshold =
            parse_size(&v).context("Invalid S3XFER_MULTIPART_THRESHOLD")?;
    }
    if let Some(v) = first(&["S3XFER_CONCURRENCY"]) {
        transfer.concurrency = v.parse().context("Invalid S3XFER_CONCURRENCY")?;
    }

    Ok(Config { store, transfer })
}

/// Load from a YAML file when a path is given, otherwise from the environment
pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    match config_path {
        Some(path) => load_from_yaml(path),
        None => load_from_env(),
    }
}

/// Parse a byte size such as `1048576`, `64K`, `100M`, `100MiB` or `5G`
pub fn parse_size(input: &str) -> Result<u64> {
    let s = input.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);
    if digits.is_empty() {
        anyhow::bail!("size {:?} has no digits", input);
    }
    let value: u64 = digits
        .parse()
        .with_context(|| format!("size {:?} is out of range", input))?;

    let multiplier = match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => MIB,
        "G" | "GB" | "GIB" => GIB,
        "T" | "TB" | "TIB" => 1024 * GIB,
        other => anyhow::bail!("unknown size suffix {:?}", other),
    };

    value
        .checked_mul(multiplier)
        .with_context(|| format!("size {:?} is out of range", input))
}
