//! AWS Signature Version 4 for S3 requests
//!
//! Two forms are produced:
//! - header signing (`Authorization` header) for every request the client sends
//! - query-string signing for presigned GET URLs handed to third parties
//!
//! The derived signing key only changes with the date, so it is cached per day.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Mutex;

type HmacSha256 = Hmac<Sha256>;

static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// SHA256 of the empty payload
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";

/// Longest expiry S3 accepts for a presigned URL (7 days)
pub const MAX_PRESIGN_EXPIRY_SECS: u64 = 604_800;

/// AWS Signature Version 4 signer
pub struct S3SignerV4 {
    access_key: String,
    region: String,
    /// "AWS4" + secret key
    aws4_key: Vec<u8>,
    /// (date_stamp, derived key)
    cached_signing_key: Mutex<Option<(String, [u8; 32])>>,
}

impl std::fmt::Debug for S3SignerV4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3SignerV4")
            .field("access_key", &self.access_key)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3SignerV4 {
    pub fn new(access_key: String, secret_key: &str, region: String) -> Self {
        Self {
            access_key,
            region,
            aws4_key: format!("AWS4{}", secret_key).into_bytes(),
            cached_signing_key: Mutex::new(None),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Sign with the SHA256 of `payload` (use for small bodies such as XML)
    pub fn sign(
        &self,
        method: &str,
        url: &str,
        headers: BTreeMap<String, String>,
        payload: &[u8],
    ) -> BTreeMap<String, String> {
        let hash = if payload.is_empty() {
            EMPTY_SHA256.to_string()
        } else {
            hex::encode(Sha256::digest(payload))
        };
        self.sign_at(method, url, headers, &hash, Utc::now())
    }

    /// Sign with `UNSIGNED-PAYLOAD`, skipping a SHA256 pass over object bodies
    pub fn sign_unsigned_payload(
        &self,
        method: &str,
        url: &str,
        headers: BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        self.sign_at(method, url, headers, UNSIGNED_PAYLOAD, Utc::now())
    }

    /// Header signing at a fixed instant. Header names must be lowercase.
    pub fn sign_at(
        &self,
        method: &str,
        url: &str,
        mut headers: BTreeMap<String, String>,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, String> {
        let (host, path, query) = split_url(url);
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();

        headers.insert("host".to_string(), host.to_string());
        headers.insert("x-amz-date".to_string(), amz_date.clone());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.to_string());

        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
        let mut canonical_headers = String::with_capacity(headers.len() * 64);
        for (k, v) in &headers {
            canonical_headers.push_str(k);
            canonical_headers.push(':');
            canonical_headers.push_str(v.trim());
            canonical_headers.push('\n');
        }

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method,
            path,
            canonical_query(query),
            canonical_headers,
            signed_headers,
            payload_hash
        );
        tracing::trace!(%canonical_request, "sigv4 canonical request");

        let scope = self.scope(&date_stamp);
        let signature = self.signature(&date_stamp, &amz_date, &scope, &canonical_request);

        headers.insert(
            "authorization".to_string(),
            format!(
                "{} Credential={}/{}, SignedHeaders={}, Signature={}",
                ALGORITHM, self.access_key, scope, signed_headers, signature
            ),
        );
        headers
    }

    /// Presign a URL with query-string authentication at a fixed instant.
    ///
    /// Only `host` is signed and the payload is `UNSIGNED-PAYLOAD`, so the
    /// URL works from any HTTP client until it expires.
    pub fn presign_at(&self, method: &str, url: &str, expires_secs: u64, now: DateTime<Utc>) -> String {
        let (host, path, query) = split_url(url);
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let scope = self.scope(&date_stamp);

        let mut auth_params = format!(
            "X-Amz-Algorithm={}&X-Amz-Credential={}&X-Amz-Date={}&X-Amz-Expires={}&X-Amz-SignedHeaders=host",
            ALGORITHM,
            uri_encode(&format!("{}/{}", self.access_key, scope), true),
            amz_date,
            expires_secs
        );
        if !query.is_empty() {
            auth_params.push('&');
            auth_params.push_str(query);
        }
        let canonical_query = canonical_query(&auth_params);

        let canonical_request = format!(
            "{}\n{}\n{}\nhost:{}\n\nhost\n{}",
            method, path, canonical_query, host, UNSIGNED_PAYLOAD
        );
        let signature = self.signature(&date_stamp, &amz_date, &scope, &canonical_request);

        let base = url.split('?').next().unwrap_or(url);
        format!("{}?{}&X-Amz-Signature={}", base, canonical_query, signature)
    }

    fn scope(&self, date_stamp: &str) -> String {
        format!("{}/{}/{}/aws4_request", date_stamp, self.region, SERVICE)
    }

    fn signature(&self, date_stamp: &str, amz_date: &str, scope: &str, canonical_request: &str) -> String {
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );
        let key = self.signing_key(date_stamp);
        hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()))
    }

    fn signing_key(&self, date_stamp: &str) -> [u8; 32] {
        let mut cache = self
            .cached_signing_key
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match cache.as_ref() {
            Some((date, key)) if date == date_stamp => *key,
            _ => {
                let k_date = hmac_sha256(&self.aws4_key, date_stamp.as_bytes());
                let k_region = hmac_sha256(&k_date, self.region.as_bytes());
                let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
                let key = hmac_sha256(&k_service, b"aws4_request");
                *cache = Some((date_stamp.to_string(), key));
                key
            }
        }
    }
}

fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(msg);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Split a URL into (host, path, query) slices, dropping default ports from the host
fn split_url(url: &str) -> (&str, &str, &str) {
    let (is_https, rest) = match url.strip_prefix("https://") {
        Some(rest) => (true, rest),
        None => (false, url.strip_prefix("http://").unwrap_or(url)),
    };

    let (authority, path_and_query) = match rest.find('/') {
        Some(pos) => (&rest[..pos], &rest[pos..]),
        None => match rest.find('?') {
            Some(pos) => (&rest[..pos], &rest[pos..]),
            None => (rest, ""),
        },
    };

    let (path, query) = match path_and_query.find('?') {
        Some(pos) => (&path_and_query[..pos], &path_and_query[pos + 1..]),
        None => (path_and_query, ""),
    };
    let path = if path.is_empty() { "/" } else { path };

    let host = if is_https {
        authority.strip_suffix(":443").unwrap_or(authority)
    } else {
        authority.strip_suffix(":80").unwrap_or(authority)
    };

    (host, path, query)
}

/// Canonical query string: every name and value decoded, RFC 3986 re-encoded,
/// valueless params normalized to `name=`, sorted by name then value.
fn canonical_query(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }

    let mut params: Vec<(String, String)> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let k = urlencoding::decode(k).unwrap_or_else(|_| k.into());
            let v = urlencoding::decode(v).unwrap_or_else(|_| v.into());
            (uri_encode(&k, true), uri_encode(&v, true))
        })
        .collect();
    params.sort();

    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// RFC 3986 percent-encoding; `/` is kept when `encode_slash` is false
pub fn uri_encode(s: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(s.len() + 16);
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            b'/' if !encode_slash => out.push('/'),
            _ => {
                out.push('%');
                out.push(HEX_UPPER[(byte >> 4) as usize] as char);
                out.push(HEX_UPPER[(byte & 0xf) as usize] as char);
            }
        }
    }
    out
}
