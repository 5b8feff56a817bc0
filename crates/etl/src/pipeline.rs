//! ETL 管道
//!
//! 抓取 → 时间过滤 → 规范化 → 情感打分 → 快照 → 入库，全部按顺序执行。
//! 任何阶段的错误都在 [`Pipeline::run`] 边界捕获并记录，运行本身总是返回完成。

use crate::config::{BlobTarget, ETLConfig};
use crate::fetcher::{create_http_client, Fetcher};
use crate::normalize::normalize_all;
use crate::recency::RecencyFilter;
use crate::sentiment::ensure_initialized;
use crate::snapshot::{write_snapshot, BlobSink, HttpBlobStore, LocalBlobStore, S3BlobStore};
use crate::storage::{persist, DatabaseConnector, SinkConnector};
use crate::types::{Batch, ETLError, ETLResult, ScoredDocument, SourceKind};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

/// 入库结果
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    /// 未执行到入库阶段
    NotAttempted,
    /// 批次为空，跳过
    Skipped,
    Persisted(u64),
    Failed(String),
}

/// 单次运行的统计
#[derive(Debug, Clone)]
pub struct RunReport {
    pub source: SourceKind,
    pub started_at: DateTime<Utc>,
    pub fetched: usize,
    pub recent: usize,
    pub dropped: usize,
    pub scored: usize,
    pub snapshot_written: bool,
    pub persist: PersistOutcome,
    /// 在运行边界捕获的错误
    pub failure: Option<String>,
}

impl RunReport {
    fn new(source: SourceKind, started_at: DateTime<Utc>) -> Self {
        Self {
            source,
            started_at,
            fetched: 0,
            recent: 0,
            dropped: 0,
            scored: 0,
            snapshot_written: false,
            persist: PersistOutcome::NotAttempted,
            failure: None,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failure.is_none() && !matches!(self.persist, PersistOutcome::Failed(_))
    }
}

/// ETL 管道
pub struct Pipeline {
    config: ETLConfig,
    blob: Box<dyn BlobSink>,
    connector: Box<dyn SinkConnector>,
}

impl Pipeline {
    pub fn new(
        config: ETLConfig,
        blob: Box<dyn BlobSink>,
        connector: Box<dyn SinkConnector>,
    ) -> Self {
        Self {
            config,
            blob,
            connector,
        }
    }

    /// 按配置创建对象存储与数据库连接器
    pub fn from_config(config: ETLConfig) -> ETLResult<Self> {
        let blob: Box<dyn BlobSink> = match &config.blob {
            BlobTarget::Local { root, bucket } => Box::new(LocalBlobStore::new(root, bucket)),
            BlobTarget::Http { endpoint, bucket } => {
                let client = create_http_client(Duration::from_secs(config.request_timeout_secs))?;
                Box::new(HttpBlobStore::new(client, endpoint, bucket))
            }
            BlobTarget::S3 { bucket, region } => {
                let credentials = config
                    .aws
                    .clone()
                    .ok_or_else(|| ETLError::Config("AWS credentials are not set".to_string()))?;
                let client = create_http_client(Duration::from_secs(config.request_timeout_secs))?;
                Box::new(S3BlobStore::new(client, bucket, region, credentials))
            }
        };

        let connector = DatabaseConnector::new(
            &config.database_url,
            config.source,
            &config.table_name,
        )
        .with_connect_timeout(Duration::from_secs(config.connect_timeout_secs));

        Ok(Self::new(config, blob, Box::new(connector)))
    }

    pub fn config(&self) -> &ETLConfig {
        &self.config
    }

    /// 执行一次完整流程，不返回错误
    pub async fn run(&self, fetcher: &dyn Fetcher, now: DateTime<Utc>) -> RunReport {
        let mut report = RunReport::new(self.config.source, now);

        let outcome = AssertUnwindSafe(self.run_stages(fetcher, now, &mut report))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("Pipeline run for {} failed: {}", self.config.source, e);
                report.failure = Some(e.to_string());
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("Pipeline run for {} panicked: {}", self.config.source, message);
                report.failure = Some(message);
            }
        }

        tracing::info!(
            "Pipeline run completed: fetched={} recent={} dropped={} scored={} snapshot={} persist={:?}",
            report.fetched,
            report.recent,
            report.dropped,
            report.scored,
            report.snapshot_written,
            report.persist
        );
        report
    }

    async fn run_stages(
        &self,
        fetcher: &dyn Fetcher,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> ETLResult<()> {
        if fetcher.source() != self.config.source {
            return Err(ETLError::Config(format!(
                "fetcher source {} does not match configured source {}",
                fetcher.source(),
                self.config.source
            )));
        }

        // 1. 抓取
        let records = fetcher.fetch().await?;
        report.fetched = records.len();

        // 2. 时间过滤
        let recent = RecencyFilter::new(self.config.max_age_minutes).apply(records, now);
        report.recent = recent.len();

        // 3. 规范化，格式错误的记录被丢弃
        let (documents, dropped) = normalize_all(&recent);
        report.dropped = dropped;

        // 4. 情感打分
        let analyzer = ensure_initialized(&self.config.lexicon).await?;
        let scored: Vec<ScoredDocument> = documents
            .into_iter()
            .map(|doc| {
                let score = analyzer.score(&doc.text);
                doc.with_score(score)
            })
            .collect();
        report.scored = scored.len();

        let batch = Batch::with_documents(self.config.source, now, scored);

        // 5. 快照，失败不影响后续
        report.snapshot_written =
            write_snapshot(&batch, self.blob.as_ref(), &self.config.snapshot_prefix).await;

        // 6. 入库
        if batch.is_empty() {
            tracing::info!("No recent {} records, skipping persistence", self.config.source);
            report.persist = PersistOutcome::Skipped;
            return Ok(());
        }

        let mut sink = self.connector.connect().await?;
        report.persist = match persist(&batch, sink.as_mut(), &self.config.table_name).await {
            Ok(rows) => PersistOutcome::Persisted(rows),
            Err(e) => {
                tracing::error!("Persisting batch into {} failed: {}", self.config.table_name, e);
                PersistOutcome::Failed(e.to_string())
            }
        };

        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 管道构建器
pub struct PipelineBuilder {
    config: ETLConfig,
    blob: Option<Box<dyn BlobSink>>,
    connector: Option<Box<dyn SinkConnector>>,
}

impl PipelineBuilder {
    pub fn new(source: SourceKind) -> Self {
        Self {
            config: ETLConfig::new(source),
            blob: None,
            connector: None,
        }
    }

    pub fn with_config(mut self, config: ETLConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_age_minutes(mut self, minutes: i64) -> Self {
        self.config.max_age_minutes = minutes;
        self
    }

    pub fn with_table_name(mut self, table: impl Into<String>) -> Self {
        self.config.table_name = table.into();
        self
    }

    pub fn with_blob_sink(mut self, blob: Box<dyn BlobSink>) -> Self {
        self.blob = Some(blob);
        self
    }

    pub fn with_connector(mut self, connector: Box<dyn SinkConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// 未显式设置的部分按配置创建
    pub fn build(self) -> ETLResult<Pipeline> {
        let defaults = Pipeline::from_config(self.config)?;
        Ok(Pipeline {
            blob: self.blob.unwrap_or(defaults.blob),
            connector: self.connector.unwrap_or(defaults.connector),
            config: defaults.config,
        })
    }
}
