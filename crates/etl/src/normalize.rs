//! 原始记录规范化
//!
//! 推特与 Guardian 的字段结构不同，统一映射为 [`CanonicalDocument`]。

use crate::types::{CanonicalDocument, MalformedRecordError, SourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 推特 API 的时间格式，例如 `Thu Sep 02 14:25:02 +0000 2021`
pub const TWITTER_TIME_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// 推特时间线条目（只保留用到的字段）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TweetRecord {
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub user: Option<TweetUser>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TweetUser {
    #[serde(default)]
    pub screen_name: Option<String>,
}

/// Guardian 搜索结果条目
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsRecord {
    #[serde(default)]
    pub web_publication_date: Option<String>,
    #[serde(default)]
    pub web_title: Option<String>,
}

/// 单次抓取得到的原始记录
#[derive(Debug, Clone)]
pub enum RawRecord {
    Tweet(TweetRecord),
    News(NewsRecord),
}

impl RawRecord {
    pub fn source_kind(&self) -> SourceKind {
        match self {
            RawRecord::Tweet(_) => SourceKind::Twitter,
            RawRecord::News(_) => SourceKind::Guardian,
        }
    }

    /// 解析记录的发布时间
    pub fn timestamp(&self) -> Result<DateTime<Utc>, MalformedRecordError> {
        match self {
            RawRecord::Tweet(tweet) => {
                let raw = tweet
                    .created_at
                    .as_deref()
                    .ok_or_else(|| MalformedRecordError::missing(SourceKind::Twitter, "created_at"))?;
                parse_twitter_time(raw)
            }
            RawRecord::News(post) => {
                let raw = post.web_publication_date.as_deref().ok_or_else(|| {
                    MalformedRecordError::missing(SourceKind::Guardian, "webPublicationDate")
                })?;
                parse_guardian_time(raw)
            }
        }
    }
}

pub fn parse_twitter_time(raw: &str) -> Result<DateTime<Utc>, MalformedRecordError> {
    DateTime::parse_from_str(raw.trim(), TWITTER_TIME_FORMAT)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            MalformedRecordError::new(
                SourceKind::Twitter,
                format!("bad created_at `{}`: {}", raw, e),
            )
        })
}

pub fn parse_guardian_time(raw: &str) -> Result<DateTime<Utc>, MalformedRecordError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            MalformedRecordError::new(
                SourceKind::Guardian,
                format!("bad webPublicationDate `{}`: {}", raw, e),
            )
        })
}

/// 规范化单条记录，得到未打分的文档
pub fn normalize(record: &RawRecord) -> Result<CanonicalDocument, MalformedRecordError> {
    let kind = record.source_kind();
    let timestamp = record.timestamp()?;

    let (author, text) = match record {
        RawRecord::Tweet(tweet) => {
            let author = tweet
                .user
                .as_ref()
                .and_then(|user| user.screen_name.clone())
                .ok_or_else(|| MalformedRecordError::missing(kind, "user.screen_name"))?;
            let text = tweet
                .text
                .clone()
                .ok_or_else(|| MalformedRecordError::missing(kind, "text"))?;
            (Some(author), text)
        }
        // news 没有作者字段，不做填充
        RawRecord::News(post) => {
            let text = post
                .web_title
                .clone()
                .ok_or_else(|| MalformedRecordError::missing(kind, "webTitle"))?;
            (None, text)
        }
    };

    if text.trim().is_empty() {
        return Err(MalformedRecordError::new(kind, "empty text"));
    }

    Ok(CanonicalDocument {
        timestamp,
        author,
        text,
    })
}

/// 批量规范化，返回成功的文档以及被丢弃的数量
pub fn normalize_all(records: &[RawRecord]) -> (Vec<CanonicalDocument>, usize) {
    let mut documents = Vec::with_capacity(records.len());
    let mut dropped = 0;

    for result in records.iter().map(normalize) {
        match result {
            Ok(document) => documents.push(document),
            Err(e) => {
                tracing::warn!("Dropping malformed record: {}", e);
                dropped += 1;
            }
        }
    }

    (documents, dropped)
}
