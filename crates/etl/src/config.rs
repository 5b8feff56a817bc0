//! 运行配置

use crate::sentiment::LexiconSource;
use crate::snapshot::s3::DEFAULT_REGION;
use crate::snapshot::{AwsCredentials, DEFAULT_PREFIX};
use crate::types::{ETLError, ETLResult, SourceKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 推特凭据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitterConfig {
    pub api_key: String,
    pub api_secret: String,
    /// 关注的账号
    pub screen_name: String,
}

/// Guardian 搜索参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianConfig {
    pub api_key: String,
    /// `q` 参数，默认为空
    pub query: String,
    pub page: u32,
    pub page_size: u32,
    /// `from-date`，格式 YYYY-MM-DD
    pub from_date: Option<String>,
}

impl GuardianConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            query: String::new(),
            page: 1,
            page_size: 10,
            from_date: None,
        }
    }
}

/// 快照写入位置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobTarget {
    /// 本地目录
    Local { root: PathBuf, bucket: String },
    /// S3 兼容的 HTTP 端点（无签名）
    Http { endpoint: String, bucket: String },
    /// AWS S3，请求使用 `ETLConfig::aws` 凭据签名
    S3 { bucket: String, region: String },
}

/// ETL 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ETLConfig {
    pub source: SourceKind,
    /// 只保留最近多少分钟内的记录
    pub max_age_minutes: i64,
    pub table_name: String,
    pub snapshot_prefix: String,
    pub blob: BlobTarget,
    pub database_url: String,
    /// 数据库连接超时（秒）
    pub connect_timeout_secs: u64,
    /// HTTP 请求超时（秒）
    pub request_timeout_secs: u64,
    pub twitter: Option<TwitterConfig>,
    pub guardian: Option<GuardianConfig>,
    pub aws: Option<AwsCredentials>,
    pub lexicon: LexiconSource,
}

impl ETLConfig {
    pub fn new(source: SourceKind) -> Self {
        Self {
            source,
            max_age_minutes: 5,
            table_name: source.default_table().to_string(),
            snapshot_prefix: DEFAULT_PREFIX.to_string(),
            blob: BlobTarget::Local {
                root: PathBuf::from("data/blobs"),
                bucket: "sentiment-etl".to_string(),
            },
            database_url: "sqlite:data/etl.db".to_string(),
            connect_timeout_secs: 1,
            request_timeout_secs: 30,
            twitter: None,
            guardian: None,
            aws: None,
            lexicon: LexiconSource::default(),
        }
    }

    /// 从环境变量（以及当前目录的 `.env`）读取配置
    pub fn from_env(source: SourceKind) -> ETLResult<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(ETLError::Config(format!(".env: {}", e)));
            }
        }
        Self::from_lookup(source, |key| std::env::var(key).ok())
    }

    /// 与 `from_env` 相同，但从给定的查找函数取值
    pub fn from_lookup<F>(source: SourceKind, lookup: F) -> ETLResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| ETLError::Config(format!("environment variable {} is not set", key)))
        };

        let mut config = Self::new(source);

        if let Some(minutes) = get("MAX_AGE_MINUTES") {
            config.max_age_minutes = minutes
                .parse()
                .map_err(|_| ETLError::Config(format!("MAX_AGE_MINUTES is not a number: {}", minutes)))?;
        }
        if let Some(table) = get("TABLE_NAME") {
            config.table_name = table;
        }

        // 未指定本地目录或自定义端点时写入 AWS S3
        let bucket = require("S3_BUCKET_NAME")?;
        config.blob = match (get("BLOB_ENDPOINT"), get("BLOB_DIR")) {
            (Some(endpoint), _) => BlobTarget::Http { endpoint, bucket },
            (None, Some(dir)) => BlobTarget::Local {
                root: PathBuf::from(dir),
                bucket,
            },
            (None, None) => {
                config.aws = Some(AwsCredentials::from_lookup(&get).ok_or_else(|| {
                    ETLError::Config(
                        "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY are required for S3".to_string(),
                    )
                })?);
                BlobTarget::S3 {
                    bucket,
                    region: get("AWS_REGION")
                        .or_else(|| get("AWS_DEFAULT_REGION"))
                        .unwrap_or_else(|| DEFAULT_REGION.to_string()),
                }
            }
        };

        config.database_url = match get("DATABASE_URL") {
            Some(url) => url,
            None => postgres_url(&require("DB_HOST")?, &require("DB_PASSWORD")?)?,
        };

        match source {
            SourceKind::Twitter => {
                config.twitter = Some(TwitterConfig {
                    api_key: require("TWITTER_API_KEY")?,
                    api_secret: require("TWITTER_API_SECRET")?,
                    screen_name: get("TWITTER_SCREEN_NAME").unwrap_or_else(|| "reuters".to_string()),
                });
            }
            SourceKind::Guardian => {
                let mut guardian = GuardianConfig::new(require("GUARDIAN_API_KEY")?);
                if let Some(query) = get("GUARDIAN_QUERY") {
                    guardian.query = query;
                }
                guardian.from_date = get("GUARDIAN_FROM_DATE");
                config.guardian = Some(guardian);
            }
        }

        config.lexicon = match (get("SENTIMENT_LEXICON_URL"), get("SENTIMENT_LEXICON_PATH")) {
            (Some(url), Some(path)) => LexiconSource::Remote {
                url,
                cache_path: PathBuf::from(path),
            },
            (Some(url), None) => LexiconSource::Remote {
                url,
                cache_path: LexiconSource::default_cache_path(),
            },
            (None, Some(path)) if path == "builtin" => LexiconSource::Builtin,
            (None, Some(path)) => LexiconSource::File(PathBuf::from(path)),
            (None, None) => LexiconSource::default(),
        };

        Ok(config)
    }

    pub fn with_max_age_minutes(mut self, minutes: i64) -> Self {
        self.max_age_minutes = minutes;
        self
    }

    pub fn with_table_name(mut self, table: impl Into<String>) -> Self {
        self.table_name = table.into();
        self
    }

    pub fn with_database(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    pub fn with_blob(mut self, blob: BlobTarget) -> Self {
        self.blob = blob;
        self
    }

    pub fn with_lexicon(mut self, lexicon: LexiconSource) -> Self {
        self.lexicon = lexicon;
        self
    }
}

/// `postgres://postgres:<password>@<host>:5432/postgres`，用户信息部分做百分号编码
fn postgres_url(host: &str, password: &str) -> ETLResult<String> {
    let mut url = reqwest::Url::parse(&format!("postgres://{}:5432/postgres", host))
        .map_err(|e| ETLError::Config(format!("DB_HOST is not a valid host `{}`: {}", host, e)))?;
    // 用户名和密码按 URL userinfo 规则百分号编码
    url.set_username("postgres")
        .and_then(|_| url.set_password(Some(password)))
        .map_err(|_| ETLError::Config(format!("DB_HOST cannot carry credentials `{}`", host)))?;
    Ok(url.to_string())
}
