//! Guardian 内容搜索 API

use super::{fetch_error, Fetcher};
use crate::config::GuardianConfig;
use crate::normalize::{NewsRecord, RawRecord};
use crate::types::{ETLResult, SourceKind};
use async_trait::async_trait;
use serde::Deserialize;

pub const GUARDIAN_SEARCH_URL: &str = "https://content.guardianapis.com/search";

#[derive(Debug, Deserialize)]
struct GuardianResponse {
    response: GuardianBody,
}

#[derive(Debug, Deserialize)]
struct GuardianBody {
    #[serde(default)]
    results: Vec<NewsRecord>,
}

pub struct GuardianFetcher {
    client: reqwest::Client,
    config: GuardianConfig,
    search_url: String,
}

impl GuardianFetcher {
    pub fn new(client: reqwest::Client, config: GuardianConfig) -> Self {
        Self {
            client,
            config,
            search_url: GUARDIAN_SEARCH_URL.to_string(),
        }
    }

    pub fn with_search_url(mut self, url: impl Into<String>) -> Self {
        self.search_url = url.into();
        self
    }

    /// 查询参数，与 API 参数名一致
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("api-key", self.config.api_key.clone()),
            ("order-by", "newest".to_string()),
            ("page-size", self.config.page_size.to_string()),
            ("page", self.config.page.to_string()),
            ("q", self.config.query.clone()),
        ];
        if let Some(from_date) = &self.config.from_date {
            params.push(("from-date", from_date.clone()));
        }
        params
    }
}

pub fn parse_search_response(body: &str) -> ETLResult<Vec<RawRecord>> {
    let response: GuardianResponse = serde_json::from_str(body)
        .map_err(|e| fetch_error(SourceKind::Guardian, e))?;

    Ok(response
        .response
        .results
        .into_iter()
        .map(RawRecord::News)
        .collect())
}

#[async_trait]
impl Fetcher for GuardianFetcher {
    fn source(&self) -> SourceKind {
        SourceKind::Guardian
    }

    async fn fetch(&self) -> ETLResult<Vec<RawRecord>> {
        let body = self
            .client
            .get(&self.search_url)
            .query(&self.query_params())
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| fetch_error(SourceKind::Guardian, e))?
            .text()
            .await
            .map_err(|e| fetch_error(SourceKind::Guardian, e))?;

        let records = parse_search_response(&body)?;
        tracing::info!("Fetched {} posts from Guardian", records.len());
        Ok(records)
    }
}
