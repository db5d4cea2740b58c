//! HTTP implementation of the store port
//!
//! - hyper 1 legacy client, HTTP/1.1, native-tls
//! - path-style URLs: `{endpoint}/{bucket}/{key}`
//! - UNSIGNED-PAYLOAD for object and part bodies, with Content-MD5 so the
//!   store still verifies every byte it receives
//! - one attempt per request; retry policy belongs to the caller

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use chrono::Utc;
use http_body_util::{BodyExt, Full};
use hyper::header::HeaderMap;
use hyper::{Method, Request, StatusCode};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::sync::Arc;
use std::time::Duration;

use crate::config::StoreConfig;
use crate::s3::signer::{uri_encode, S3SignerV4};
use crate::s3::store::{ObjectStore, Result, S3Error};
use crate::s3::types::{
    CompleteMultipartUploadResponse, CompletedPart, CreateMultipartUploadResponse,
    ListObjectsPage, PutObjectResponse, UploadPartResponse,
};
use crate::s3::xml;

/// How the request body is represented in the signature
#[derive(Clone, Copy)]
enum Payload {
    /// SHA256 of the body (empty and small XML bodies)
    Hashed,
    /// `UNSIGNED-PAYLOAD` (object data)
    Unsigned,
}

struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

/// S3 client bound to one endpoint and bucket.
///
/// Clone is cheap: the connection pool and signer are shared.
#[derive(Clone)]
pub struct S3Client {
    client: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    signer: Arc<S3SignerV4>,
    endpoint: String,
    bucket: String,
    timeout: Duration,
}

impl std::fmt::Debug for S3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Client")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("signer", &self.signer)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl S3Client {
    /// Build a client from a validated `StoreConfig`
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(10)));
        http.set_keepalive(Some(Duration::from_secs(90)));

        let tls = if config.insecure_tls {
            tracing::warn!(endpoint = %config.endpoint, "TLS certificate verification is disabled");
            TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
        } else {
            TlsConnector::new()
        }
        .map_err(|e| S3Error::Tls(e.to_string()))?;

        let https = HttpsConnector::from((http, tls.into()));

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(64)
            .set_host(true)
            .build(https);

        Ok(Self {
            client,
            signer: Arc::new(S3SignerV4::new(
                config.access_key.clone(),
                &config.secret_key,
                config.region.clone(),
            )),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Percent-encode a key, keeping `/` so virtual folders stay readable
    fn encode_key(key: &str) -> Cow<'_, str> {
        let needs_encoding = key.bytes().any(|b| {
            !matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/')
        });
        if needs_encoding {
            Cow::Owned(uri_encode(key, false))
        } else {
            Cow::Borrowed(key)
        }
    }

    /// Full URL of an object
    pub fn object_url(&self, key: &str) -> String {
        let encoded = Self::encode_key(key);
        let mut url =
            String::with_capacity(self.endpoint.len() + self.bucket.len() + encoded.len() + 2);
        url.push_str(&self.endpoint);
        url.push('/');
        url.push_str(&self.bucket);
        url.push('/');
        url.push_str(&encoded);
        url
    }

    fn bucket_url(&self) -> String {
        format!("{}/{}", self.endpoint, self.bucket)
    }

    /// ListObjectsV2 URL; parameters are emitted in sorted order
    pub fn list_url(&self, prefix: Option<&str>, continuation_token: Option<&str>, max_keys: u32) -> String {
        let mut url = self.bucket_url();
        url.push_str("?");
        if let Some(token) = continuation_token {
            url.push_str("continuation-token=");
            url.push_str(&uri_encode(token, true));
            url.push('&');
        }
        url.push_str("list-type=2&max-keys=");
        let _ = write!(url, "{}", max_keys);
        if let Some(p) = prefix.filter(|p| !p.is_empty()) {
            url.push_str("&prefix=");
            url.push_str(&uri_encode(p, true));
        }
        url
    }

    fn upload_url(&self, key: &str, upload_id: &str, part_number: Option<u32>) -> String {
        let mut url = self.object_url(key);
        url.push('?');
        if let Some(n) = part_number {
            let _ = write!(url, "partNumber={}&", n);
        }
        url.push_str("uploadId=");
        url.push_str(&uri_encode(upload_id, true));
        url
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: BTreeMap<String, String>,
        body: Bytes,
        payload: Payload,
    ) -> Result<RawResponse> {
        let signed = match payload {
            Payload::Hashed => self.signer.sign(method.as_str(), url, headers, &body),
            Payload::Unsigned => self.signer.sign_unsigned_payload(method.as_str(), url, headers),
        };

        let mut req = Request::builder().method(method.clone()).uri(url);
        for (key, value) in signed.iter() {
            req = req.header(key, value);
        }
        let request = req.body(Full::new(body))?;

        let exchange = async {
            let response = self.client.request(request).await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .collect()
                .await
                .map_err(|e| S3Error::Request(format!("body error: {}", e)))?
                .to_bytes();
            Ok::<_, S3Error>(RawResponse {
                status,
                headers,
                body,
            })
        };

        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                S3Error::Request(format!("{} {} timed out after {:?}", method, url, self.timeout))
            })??;

        tracing::debug!(method = %method, url = %url, status = %response.status, "s3 request");
        Ok(response)
    }

    /// Turn a non-2xx response into an error. `key` is set for requests where a
    /// 404 means the object itself is absent.
    fn error_for(response: &RawResponse, key: Option<&str>) -> S3Error {
        let parsed = xml::parse_error(&response.body);
        if response.status == StatusCode::NOT_FOUND
            && parsed.code != "NoSuchBucket"
            && parsed.code != "NoSuchUpload"
        {
            if let Some(key) = key {
                return S3Error::NotFound {
                    key: key.to_string(),
                };
            }
        }
        let message = if parsed.message.is_empty() {
            String::from_utf8_lossy(&response.body).into_owned()
        } else {
            parsed.message
        };
        S3Error::S3Response {
            status: response.status,
            code: parsed.code,
            message,
        }
    }

    fn etag_of(headers: &HeaderMap) -> String {
        headers
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim_matches('"').to_string())
            .unwrap_or_default()
    }

    fn data_headers(data: &[u8]) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("content-length".to_string(), data.len().to_string());
        headers.insert(
            "content-md5".to_string(),
            base64::engine::general_purpose::STANDARD.encode(md5::compute(data).0),
        );
        headers
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(&self, key: &str, data: Bytes) -> Result<PutObjectResponse> {
        let url = self.object_url(key);
        let mut headers = Self::data_headers(&data);
        headers.insert("content-type".to_string(), "application/octet-stream".to_string());

        let response = self.send(Method::PUT, &url, headers, data, Payload::Unsigned).await?;
        if !response.status.is_success() {
            return Err(Self::error_for(&response, None));
        }

        Ok(PutObjectResponse {
            etag: Self::etag_of(&response.headers),
        })
    }

    async fn create_multipart_upload(&self, key: &str) -> Result<CreateMultipartUploadResponse> {
        let url = format!("{}?uploads", self.object_url(key));
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/octet-stream".to_string());

        let response = self
            .send(Method::POST, &url, headers, Bytes::new(), Payload::Hashed)
            .await?;
        if !response.status.is_success() {
            return Err(Self::error_for(&response, None));
        }

        xml::parse_create_multipart(&response.body)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<UploadPartResponse> {
        let url = self.upload_url(key, upload_id, Some(part_number));
        let headers = Self::data_headers(&data);

        let response = self.send(Method::PUT, &url, headers, data, Payload::Unsigned).await?;
        if !response.status.is_success() {
            return Err(Self::error_for(&response, None));
        }

        let etag = Self::etag_of(&response.headers);
        if etag.is_empty() {
            return Err(S3Error::InvalidResponse(format!(
                "UploadPart {} returned no ETag",
                part_number
            )));
        }
        Ok(UploadPartResponse::new(part_number, etag))
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompleteMultipartUploadResponse> {
        let url = self.upload_url(key, upload_id, None);
        let body = Bytes::from(xml::complete_multipart_body(parts));

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/xml".to_string());
        headers.insert("content-length".to_string(), body.len().to_string());

        let response = self.send(Method::POST, &url, headers, body, Payload::Hashed).await?;
        if !response.status.is_success() {
            return Err(Self::error_for(&response, None));
        }

        xml::parse_complete_multipart(&response.body)
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        let url = self.upload_url(key, upload_id, None);
        let response = self
            .send(Method::DELETE, &url, BTreeMap::new(), Bytes::new(), Payload::Hashed)
            .await?;
        if !response.status.is_success() {
            return Err(Self::error_for(&response, None));
        }
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Bytes> {
        let url = self.object_url(key);
        let response = self
            .send(Method::GET, &url, BTreeMap::new(), Bytes::new(), Payload::Hashed)
            .await?;
        if !response.status.is_success() {
            return Err(Self::error_for(&response, Some(key)));
        }
        Ok(response.body)
    }

    async fn list_objects_page(
        &self,
        prefix: Option<&str>,
        continuation_token: Option<&str>,
        max_keys: u32,
    ) -> Result<ListObjectsPage> {
        let url = self.list_url(prefix, continuation_token, max_keys);
        let response = self
            .send(Method::GET, &url, BTreeMap::new(), Bytes::new(), Payload::Hashed)
            .await?;
        if !response.status.is_success() {
            return Err(Self::error_for(&response, None));
        }
        xml::parse_list_page(&response.body)
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let url = self.object_url(key);
        let response = self
            .send(Method::DELETE, &url, BTreeMap::new(), Bytes::new(), Payload::Hashed)
            .await?;

        if response.status.is_success() {
            return Ok(());
        }
        match Self::error_for(&response, Some(key)) {
            S3Error::NotFound { .. } => Ok(()),
            err => Err(err),
        }
    }

    fn presign_get(&self, key: &str, expires: Duration) -> Result<String> {
        Ok(self
            .signer
            .presign_at("GET", &self.object_url(key), expires.as_secs(), Utc::now()))
    }
}
