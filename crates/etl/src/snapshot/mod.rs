//! 批次快照写入对象存储

pub mod s3;

use crate::types::{Batch, ETLError, ETLResult, ScoredDocument};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use s3::{AwsCredentials, S3BlobStore};

/// 快照对象的默认前缀
pub const DEFAULT_PREFIX: &str = "raw-messages";

/// 快照文件名格式 `DD-MM-YYYY-HH:MM:SS.json`
const KEY_TIME_FORMAT: &str = "%d-%m-%Y-%H:%M:%S";

/// 对象存储接口
#[async_trait]
pub trait BlobSink: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> ETLResult<()>;
}

/// 快照中的单条记录，时间戳为 epoch 秒
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub text: String,
    pub sentiment_score: f64,
}

impl SnapshotRecord {
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        let secs = self.timestamp.floor();
        // 小数部分可能舍入到整 1e9 纳秒，按 Duration 相加以进位到下一秒
        let nanos = ((self.timestamp - secs) * 1e9).round() as i64;
        Utc.timestamp_opt(secs as i64, 0)
            .single()?
            .checked_add_signed(chrono::Duration::nanoseconds(nanos))
    }
}

impl From<&ScoredDocument> for SnapshotRecord {
    fn from(doc: &ScoredDocument) -> Self {
        Self {
            timestamp: doc.timestamp.timestamp() as f64
                + f64::from(doc.timestamp.timestamp_subsec_nanos()) / 1e9,
            author: doc.author.clone(),
            text: doc.text.clone(),
            sentiment_score: doc.sentiment_score,
        }
    }
}

/// `<prefix>/<DD-MM-YYYY-HH:MM:SS>.json`
pub fn snapshot_key(prefix: &str, created_at: DateTime<Utc>) -> String {
    let filename = format!("{}.json", created_at.format(KEY_TIME_FORMAT));
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        filename
    } else {
        format!("{}/{}", prefix, filename)
    }
}

pub fn serialize_batch(batch: &Batch) -> ETLResult<Vec<u8>> {
    let records: Vec<SnapshotRecord> = batch.documents.iter().map(SnapshotRecord::from).collect();
    Ok(serde_json::to_vec(&records)?)
}

pub fn deserialize_snapshot(bytes: &[u8]) -> ETLResult<Vec<SnapshotRecord>> {
    Ok(serde_json::from_slice(bytes)?)
}

/// 写入快照。失败只记录日志并返回 false，不影响本次运行。
pub async fn write_snapshot(batch: &Batch, destination: &dyn BlobSink, prefix: &str) -> bool {
    let key = snapshot_key(prefix, batch.created_at);

    let bytes = match serialize_batch(batch) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("Failed to serialize snapshot {}: {}", key, e);
            return false;
        }
    };

    match destination.put(&key, bytes).await {
        Ok(()) => {
            tracing::info!("Snapshot with {} records written to {}", batch.len(), key);
            true
        }
        Err(e) => {
            tracing::error!("Failed to write snapshot {}: {}", key, e);
            false
        }
    }
}

/// 写入本地目录 `<root>/<bucket>/<key>`
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    bucket: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(&self.bucket).join(key)
    }
}

#[async_trait]
impl BlobSink for LocalBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> ETLResult<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ETLError::SnapshotWrite(format!("{}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ETLError::SnapshotWrite(format!("{}: {}", path.display(), e)))
    }
}

/// 通过 HTTP PUT 写入 S3 兼容端点 `<endpoint>/<bucket>/<key>`
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
}

impl HttpBlobStore {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            bucket: bucket.into(),
        }
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint.trim_end_matches('/'), self.bucket, key)
    }
}

#[async_trait]
impl BlobSink for HttpBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> ETLResult<()> {
        let url = self.url_for(key);
        self.client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(bytes)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| ETLError::SnapshotWrite(format!("{}: {}", url, e)))?;
        Ok(())
    }
}
