//! Resume blob storage.
//!
//! Uploads go to any S3-compatible endpoint via a signed PUT, and the
//! returned URL is what the lifecycle record carries. Signing is AWS
//! Signature Version 4 built directly on the hmac/sha2 stack; the
//! surface we need is one request shape, not a whole SDK.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

use crate::config::S3Config;
use crate::error::GatehouseError;

type HmacSha256 = Hmac<Sha256>;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores the bytes and returns the URL to record.
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, GatehouseError>;
}

/// Object key for an uploaded resume: random prefix plus a sanitized
/// version of the submitted filename.
pub fn resume_key(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe = if safe.is_empty() { "resume".to_string() } else { safe };
    format!("resumes/{}-{}", Uuid::new_v4(), safe)
}

pub struct S3BlobStore {
    http: Client,
    config: S3Config,
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// SigV4 signing key: HMAC chain over date, region and service.
fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn sign(secret: &str, date: &str, region: &str, service: &str, string_to_sign: &str) -> String {
    let key = signing_key(secret, date, region, service);
    hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()))
}

impl S3BlobStore {
    pub fn new(config: S3Config) -> Self {
        let http = Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self { http, config }
    }

    fn host(&self) -> String {
        self.config
            .endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string()
    }

    fn object_url(&self, key: &str) -> String {
        let endpoint = self.config.endpoint.trim_end_matches('/');
        format!("{}/{}/{}", endpoint, self.config.bucket, key)
    }

    /// URL recorded on the application: the public base when one is
    /// configured, the endpoint URL otherwise.
    pub fn public_url(&self, key: &str) -> String {
        match &self.config.public_base {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
            None => self.object_url(key),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, GatehouseError> {
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let host = self.host();
        let payload_hash = sha256_hex(&bytes);
        let canonical_uri = format!("/{}/{}", self.config.bucket, key);

        let canonical_headers = format!(
            "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
            host, payload_hash, amz_date
        );
        let signed_headers = "host;x-amz-content-sha256;x-amz-date";
        let canonical_request = format!(
            "PUT\n{}\n\n{}\n{}\n{}",
            canonical_uri, canonical_headers, signed_headers, payload_hash
        );

        let scope = format!("{}/{}/s3/aws4_request", date, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );
        let signature = sign(
            &self.config.secret_key,
            &date,
            &self.config.region,
            "s3",
            &string_to_sign,
        );
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.config.access_key, scope, signed_headers, signature
        );

        let response = self
            .http
            .put(self.object_url(key))
            .header("Authorization", authorization)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", amz_date)
            .header("Content-Type", content_type)
            .body(bytes)
            .send()
            .await;
        let response = response.map_err(|e| GatehouseError::from_reqwest(e, "blob upload"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatehouseError::from_status(status, "blob upload", body));
        }
        Ok(self.public_url(key))
    }
}
