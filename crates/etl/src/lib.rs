//! # Sentiment ETL
//!
//! 抓取推特时间线或 Guardian 新闻，给每条记录打情感分，
//! 原始批次写入对象存储，结构化数据批量写入关系库。
//!
//! ## 流程
//!
//! - 从数据源抓取最新记录
//! - 只保留最近若干分钟内的记录
//! - 规范化两种来源的字段
//! - 基于词典的情感打分
//! - 快照写入对象存储，批次以单个事务写入数据库
//!
//! 另外提供按日期范围浏览分析表的终端仪表盘。

pub mod config;
pub mod dashboard;
pub mod fetcher;
pub mod normalize;
pub mod pipeline;
pub mod recency;
pub mod sentiment;
pub mod snapshot;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{BlobTarget, ETLConfig, GuardianConfig, TwitterConfig};
pub use pipeline::{PersistOutcome, Pipeline, PipelineBuilder, RunReport};
pub use types::{
    Batch, CanonicalDocument, ColumnValue, ETLError, ETLResult, MalformedRecordError,
    ScoredDocument, SourceKind,
};
