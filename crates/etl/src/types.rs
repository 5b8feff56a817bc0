//! 核心类型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type ETLResult<T> = Result<T, ETLError>;

#[derive(Debug, Error)]
pub enum ETLError {
    #[error("HTTP 请求失败: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("JSON 解析失败: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error(transparent)]
    MalformedRecord(#[from] MalformedRecordError),

    #[error("批次为空，拒绝写入")]
    EmptyBatch,

    #[error("数据库连接不可用")]
    NoConnection,

    #[error("事务失败，已回滚: {0}")]
    Transaction(String),

    #[error("快照写入失败: {0}")]
    SnapshotWrite(String),

    #[error("数据源错误: {0}")]
    Fetch(String),

    #[error("情感词典不可用: {0}")]
    LexiconUnavailable(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("其他错误: {0}")]
    Other(String),
}

impl From<sqlx::Error> for ETLError {
    fn from(value: sqlx::Error) -> Self {
        ETLError::Database(value.to_string())
    }
}

/// 单条原始记录无法规范化（缺字段或时间解析失败）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{source_kind} 记录格式错误: {reason}")]
pub struct MalformedRecordError {
    pub source_kind: SourceKind,
    pub reason: String,
}

impl MalformedRecordError {
    pub fn new(source_kind: SourceKind, reason: impl Into<String>) -> Self {
        Self {
            source_kind,
            reason: reason.into(),
        }
    }

    pub fn missing(source_kind: SourceKind, field: &str) -> Self {
        Self::new(source_kind, format!("missing field `{}`", field))
    }
}

/// 数据来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// 推特时间线
    Twitter,
    /// Guardian 新闻搜索
    Guardian,
}

impl SourceKind {
    /// 默认写入的分析表
    pub fn default_table(&self) -> &'static str {
        match self {
            SourceKind::Twitter => "tweets_analytics",
            SourceKind::Guardian => "guardian_posts_analytics",
        }
    }

    /// 该来源的表结构列（news 表没有 author 列）
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            SourceKind::Twitter => &["timestamp", "author", "text", "sentiment_score"],
            SourceKind::Guardian => &["timestamp", "text", "sentiment_score"],
        }
    }

    pub fn has_author(&self) -> bool {
        matches!(self, SourceKind::Twitter)
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Twitter => write!(f, "twitter"),
            SourceKind::Guardian => write!(f, "guardian"),
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = ETLError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "twitter" | "tweets" => Ok(SourceKind::Twitter),
            "guardian" | "news" => Ok(SourceKind::Guardian),
            other => Err(ETLError::Config(format!("unknown source `{}`", other))),
        }
    }
}

/// 规范化后的文档（尚未打分）
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalDocument {
    pub timestamp: DateTime<Utc>,
    /// 仅推特来源有作者
    pub author: Option<String>,
    pub text: String,
}

impl CanonicalDocument {
    /// 附加情感分数，生成新的值
    pub fn with_score(self, sentiment_score: f64) -> ScoredDocument {
        ScoredDocument {
            timestamp: self.timestamp,
            author: self.author,
            text: self.text,
            sentiment_score,
        }
    }
}

/// 已打分的文档，之后不再修改
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub timestamp: DateTime<Utc>,
    pub author: Option<String>,
    pub text: String,
    /// 情感分数 [-1.0, 1.0]
    pub sentiment_score: f64,
}

impl ScoredDocument {
    /// 按来源表结构生成一行的列值，顺序与 `SourceKind::columns` 一致
    pub fn column_values(&self, source: SourceKind) -> Vec<ColumnValue> {
        source
            .columns()
            .iter()
            .map(|column| match *column {
                "timestamp" => ColumnValue::Timestamp(self.timestamp),
                "author" => ColumnValue::NullableText(self.author.clone()),
                "text" => ColumnValue::Text(self.text.clone()),
                _ => ColumnValue::Float(self.sentiment_score),
            })
            .collect()
    }
}

/// 写入关系表的类型化列值
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Timestamp(DateTime<Utc>),
    Text(String),
    NullableText(Option<String>),
    Float(f64),
}

/// 单次运行内构建的批次
#[derive(Debug, Clone)]
pub struct Batch {
    /// 批次创建时间，用于快照文件名
    pub created_at: DateTime<Utc>,
    pub source: SourceKind,
    pub documents: Vec<ScoredDocument>,
}

impl Batch {
    pub fn new(source: SourceKind, created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            source,
            documents: Vec::new(),
        }
    }

    pub fn with_documents(
        source: SourceKind,
        created_at: DateTime<Utc>,
        documents: Vec<ScoredDocument>,
    ) -> Self {
        Self {
            created_at,
            source,
            documents,
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
