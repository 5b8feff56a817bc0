//! S3 对象存储（AWS Signature V4 签名的 PUT）

use super::BlobSink;
use crate::types::{ETLError, ETLResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";
pub const DEFAULT_REGION: &str = "us-east-1";

/// AWS 访问凭据（与 Lambda 运行环境注入的环境变量一致）
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// 读取 `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());
        Some(Self {
            access_key_id: get("AWS_ACCESS_KEY_ID")?,
            secret_access_key: get("AWS_SECRET_ACCESS_KEY")?,
            session_token: get("AWS_SESSION_TOKEN"),
        })
    }
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn hmac_sha256(key: &[u8], message: &str) -> ETLResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ETLError::SnapshotWrite(format!("signing key: {}", e)))?;
    mac.update(message.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// 对象键按路径段做 URI 编码，`/` 保留
pub fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// 一次待签名的请求；`headers` 的键为小写，全部参与签名
pub struct SigningRequest<'a> {
    pub method: &'a str,
    pub canonical_uri: &'a str,
    pub headers: &'a BTreeMap<String, String>,
    pub payload_hash: &'a str,
}

/// 生成 `Authorization` 头（无查询参数的请求）
pub fn authorization(
    request: &SigningRequest<'_>,
    credentials: &AwsCredentials,
    region: &str,
    now: DateTime<Utc>,
) -> ETLResult<String> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let canonical_headers: String = request
        .headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .collect();
    let signed_headers = request
        .headers
        .keys()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        request.method, request.canonical_uri, canonical_headers, signed_headers, request.payload_hash
    );

    let scope = format!("{}/{}/{}/aws4_request", date, region, SERVICE);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let k_date = hmac_sha256(format!("AWS4{}", credentials.secret_access_key).as_bytes(), &date)?;
    let k_region = hmac_sha256(&k_date, region)?;
    let k_service = hmac_sha256(&k_region, SERVICE)?;
    let k_signing = hmac_sha256(&k_service, "aws4_request")?;
    let signature = hex::encode(hmac_sha256(&k_signing, &string_to_sign)?);

    Ok(format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, credentials.access_key_id, scope, signed_headers, signature
    ))
}

/// 写入 `https://<bucket>.s3.<region>.amazonaws.com/<key>`
#[derive(Debug, Clone)]
pub struct S3BlobStore {
    client: reqwest::Client,
    bucket: String,
    region: String,
    credentials: AwsCredentials,
}

impl S3BlobStore {
    pub fn new(
        client: reqwest::Client,
        bucket: impl Into<String>,
        region: impl Into<String>,
        credentials: AwsCredentials,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            region: region.into(),
            credentials,
        }
    }

    pub fn host(&self) -> String {
        format!("{}.s3.{}.amazonaws.com", self.bucket, self.region)
    }

    /// 构建已签名的 PUT 请求
    pub fn build_request(
        &self,
        key: &str,
        bytes: Vec<u8>,
        now: DateTime<Utc>,
    ) -> ETLResult<reqwest::Request> {
        let host = self.host();
        let canonical_uri = format!("/{}", encode_key(key.trim_start_matches('/')));
        let payload_hash = sha256_hex(&bytes);

        let mut signed = BTreeMap::new();
        signed.insert("host".to_string(), host.clone());
        signed.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        signed.insert(
            "x-amz-date".to_string(),
            now.format("%Y%m%dT%H%M%SZ").to_string(),
        );
        if let Some(token) = &self.credentials.session_token {
            signed.insert("x-amz-security-token".to_string(), token.clone());
        }

        let auth = authorization(
            &SigningRequest {
                method: "PUT",
                canonical_uri: &canonical_uri,
                headers: &signed,
                payload_hash: &payload_hash,
            },
            &self.credentials,
            &self.region,
            now,
        )?;

        let mut headers = HeaderMap::new();
        for (name, value) in &signed {
            // host 由 reqwest 根据 URL 填写
            if name == "host" {
                continue;
            }
            headers.insert(header_name(name)?, header_value(value)?);
        }
        headers.insert(AUTHORIZATION, header_value(&auth)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        self.client
            .put(format!("https://{}{}", host, canonical_uri))
            .headers(headers)
            .body(bytes)
            .build()
            .map_err(|e| ETLError::SnapshotWrite(e.to_string()))
    }
}

fn header_name(name: &str) -> ETLResult<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| ETLError::SnapshotWrite(e.to_string()))
}

fn header_value(value: &str) -> ETLResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| ETLError::SnapshotWrite(e.to_string()))
}

#[async_trait]
impl BlobSink for S3BlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> ETLResult<()> {
        let request = self.build_request(key, bytes, Utc::now())?;
        let url = request.url().to_string();

        self.client
            .execute(request)
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| ETLError::SnapshotWrite(format!("{}: {}", url, e)))?;
        Ok(())
    }
}
