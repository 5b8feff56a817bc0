//! 外部数据源抓取

pub mod guardian;
pub mod twitter;

use crate::config::ETLConfig;
use crate::normalize::RawRecord;
use crate::types::{ETLError, ETLResult, SourceKind};
use async_trait::async_trait;
use std::time::Duration;

pub use guardian::GuardianFetcher;
pub use twitter::TwitterFetcher;

/// 数据源接口，一次返回已经完整物化的记录列表（不在内部分页）
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn source(&self) -> SourceKind;

    async fn fetch(&self) -> ETLResult<Vec<RawRecord>>;
}

/// 抓取器工厂
pub struct FetcherFactory;

impl FetcherFactory {
    pub fn create(config: &ETLConfig) -> ETLResult<Box<dyn Fetcher>> {
        let client = create_http_client(Duration::from_secs(config.request_timeout_secs))?;

        match config.source {
            SourceKind::Twitter => {
                let twitter = config
                    .twitter
                    .clone()
                    .ok_or_else(|| ETLError::Config("twitter credentials are not set".to_string()))?;
                Ok(Box::new(TwitterFetcher::new(client, twitter)))
            }
            SourceKind::Guardian => {
                let guardian = config
                    .guardian
                    .clone()
                    .ok_or_else(|| ETLError::Config("guardian api key is not set".to_string()))?;
                Ok(Box::new(GuardianFetcher::new(client, guardian)))
            }
        }
    }
}

/// 通用 HTTP 客户端配置
pub fn create_http_client(timeout: Duration) -> ETLResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("sentiment-etl/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .map_err(Into::into)
}

pub(crate) fn fetch_error(source: SourceKind, err: impl std::fmt::Display) -> ETLError {
    ETLError::Fetch(format!("{}: {}", source, err))
}
