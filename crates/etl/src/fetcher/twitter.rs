//! 推特用户时间线（应用级认证）

use super::{fetch_error, Fetcher};
use crate::config::TwitterConfig;
use crate::normalize::{RawRecord, TweetRecord};
use crate::types::{ETLResult, SourceKind};
use async_trait::async_trait;
use serde::Deserialize;

pub const TWITTER_API_URL: &str = "https://api.twitter.com";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct TwitterFetcher {
    client: reqwest::Client,
    config: TwitterConfig,
    base_url: String,
}

impl TwitterFetcher {
    pub fn new(client: reqwest::Client, config: TwitterConfig) -> Self {
        Self {
            client,
            config,
            base_url: TWITTER_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// 用 API key/secret 换取 bearer token
    async fn bearer_token(&self) -> ETLResult<String> {
        let token: TokenResponse = self
            .client
            .post(format!("{}/oauth2/token", self.base_url))
            .basic_auth(&self.config.api_key, Some(&self.config.api_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| fetch_error(SourceKind::Twitter, e))?
            .json()
            .await
            .map_err(|e| fetch_error(SourceKind::Twitter, e))?;

        Ok(token.access_token)
    }
}

pub fn parse_timeline(body: &str) -> ETLResult<Vec<RawRecord>> {
    let tweets: Vec<TweetRecord> =
        serde_json::from_str(body).map_err(|e| fetch_error(SourceKind::Twitter, e))?;

    Ok(tweets.into_iter().map(RawRecord::Tweet).collect())
}

#[async_trait]
impl Fetcher for TwitterFetcher {
    fn source(&self) -> SourceKind {
        SourceKind::Twitter
    }

    async fn fetch(&self) -> ETLResult<Vec<RawRecord>> {
        let token = self.bearer_token().await?;

        let body = self
            .client
            .get(format!("{}/1.1/statuses/user_timeline.json", self.base_url))
            .bearer_auth(token)
            .query(&[("screen_name", self.config.screen_name.as_str())])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| fetch_error(SourceKind::Twitter, e))?
            .text()
            .await
            .map_err(|e| fetch_error(SourceKind::Twitter, e))?;

        let records = parse_timeline(&body)?;
        tracing::info!(
            "Fetched {} tweets from @{}",
            records.len(),
            self.config.screen_name
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;

    #[test]
    fn test_parse_timeline() {
        let body = r#"[
            {"created_at": "Thu Sep 02 14:25:02 +0000 2021", "text": "Stocks rise", "user": {"screen_name": "Reuters", "id": 1}},
            {"created_at": "Thu Sep 02 14:20:00 +0000 2021", "user": {"screen_name": "Reuters"}}
        ]"#;

        let records = parse_timeline(body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(normalize(&records[0]).unwrap().author.as_deref(), Some("Reuters"));
        assert!(normalize(&records[1]).is_err());
    }

    #[test]
    fn test_error_payload_is_rejected() {
        assert!(parse_timeline(r#"{"errors": [{"code": 89}]}"#).is_err());
    }
}
