//! 关系库写入与读取
//!
//! 每次写入拥有连接的完整生命周期：一个事务、一条多行 INSERT、提交；
//! 失败时显式回滚。无论成败，返回前都会关闭连接。

pub mod postgres;
pub mod sqlite;

use crate::types::{Batch, ColumnValue, ETLError, ETLResult, ScoredDocument, SourceKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub use postgres::PostgresSink;
pub use sqlite::SqliteSink;

/// 关系库连接接口
#[async_trait]
pub trait RelationalSink: Send {
    /// 连接是否仍然可用
    fn is_open(&self) -> bool;

    async fn begin(&mut self) -> ETLResult<()>;

    /// 执行一条多行 INSERT，返回写入行数
    async fn insert(&mut self, insert: &BatchInsert) -> ETLResult<u64>;

    async fn commit(&mut self) -> ETLResult<()>;

    /// 回滚当前事务，使连接回到干净状态
    async fn rollback(&mut self) -> ETLResult<()>;

    async fn close(&mut self) -> ETLResult<()>;
}

/// 每次运行新建连接
#[async_trait]
pub trait SinkConnector: Send + Sync {
    async fn connect(&self) -> ETLResult<Box<dyn RelationalSink>>;
}

/// 由批次生成的多行插入语句
#[derive(Debug, Clone, PartialEq)]
pub struct BatchInsert {
    pub table: String,
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<ColumnValue>>,
}

impl BatchInsert {
    pub fn from_batch(batch: &Batch, table: &str) -> ETLResult<Self> {
        validate_table_name(table)?;

        Ok(Self {
            table: table.to_string(),
            columns: batch.source.columns().to_vec(),
            rows: batch
                .documents
                .iter()
                .map(|doc| doc.column_values(batch.source))
                .collect(),
        })
    }

    /// `INSERT INTO <table> (<columns>) `，VALUES 部分由各后端拼接
    pub fn statement_prefix(&self) -> String {
        format!("INSERT INTO {} ({}) ", self.table, self.columns.join(", "))
    }
}

/// 表名会直接拼进 SQL，只允许普通标识符
pub fn validate_table_name(table: &str) -> ETLResult<()> {
    let mut chars = table.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(ETLError::Config(format!("invalid table name `{}`", table)))
    }
}

/// 将批次作为一个事务写入 `table_name`。
///
/// 批次为空返回 `EmptyBatch`，连接不可用返回 `NoConnection`，两者都不会触发任何写操作。
/// 写入失败时回滚并返回 `Transaction`。连接在所有返回路径上都会被关闭。
pub async fn persist(
    batch: &Batch,
    sink: &mut dyn RelationalSink,
    table_name: &str,
) -> ETLResult<u64> {
    if !sink.is_open() {
        return Err(ETLError::NoConnection);
    }

    let insert = if batch.is_empty() {
        Err(ETLError::EmptyBatch)
    } else {
        BatchInsert::from_batch(batch, table_name)
    };
    let insert = match insert {
        Ok(insert) => insert,
        Err(e) => {
            close_sink(sink).await;
            return Err(e);
        }
    };

    let outcome = match write_in_transaction(sink, &insert).await {
        Ok(rows) => {
            tracing::info!("Inserted {} rows into {}", rows, table_name);
            Ok(rows)
        }
        Err(e) => {
            tracing::error!("Transaction on {} failed: {}", table_name, e);
            if let Err(rollback_err) = sink.rollback().await {
                tracing::error!("Rollback on {} failed: {}", table_name, rollback_err);
            }
            Err(ETLError::Transaction(e.to_string()))
        }
    };

    close_sink(sink).await;
    outcome
}

async fn write_in_transaction(
    sink: &mut dyn RelationalSink,
    insert: &BatchInsert,
) -> ETLResult<u64> {
    sink.begin().await?;
    let rows = sink.insert(insert).await?;
    sink.commit().await?;
    Ok(rows)
}

async fn close_sink(sink: &mut dyn RelationalSink) {
    if let Err(e) = sink.close().await {
        tracing::warn!("Failed to close database connection: {}", e);
    }
}

fn is_sqlite_url(url: &str) -> bool {
    url.starts_with("sqlite:")
}

fn is_postgres_url(url: &str) -> bool {
    url.starts_with("postgres://") || url.starts_with("postgresql://")
}

/// 根据 URL 打开 SQLite 或 Postgres 连接
#[derive(Debug, Clone)]
pub struct DatabaseConnector {
    url: String,
    connect_timeout: Duration,
    source: SourceKind,
    table: String,
}

impl DatabaseConnector {
    pub fn new(url: impl Into<String>, source: SourceKind, table: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(1),
            source,
            table: table.into(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl SinkConnector for DatabaseConnector {
    async fn connect(&self) -> ETLResult<Box<dyn RelationalSink>> {
        if is_sqlite_url(&self.url) {
            let mut sink = SqliteSink::connect(&self.url, self.connect_timeout).await?;
            // 本地 SQLite 库按需建表
            sink.ensure_table(&self.table, self.source).await?;
            Ok(Box::new(sink))
        } else if is_postgres_url(&self.url) {
            let sink = PostgresSink::connect(&self.url, self.connect_timeout).await?;
            Ok(Box::new(sink))
        } else {
            Err(ETLError::Config(format!(
                "unsupported database url scheme: {}",
                self.url.split(':').next().unwrap_or_default()
            )))
        }
    }
}

/// 仪表盘使用的只读查询
pub enum AnalyticsStore {
    Sqlite(sqlx::SqlitePool),
    Postgres(sqlx::PgPool),
}

impl AnalyticsStore {
    pub async fn connect(url: &str) -> ETLResult<Self> {
        if is_sqlite_url(url) {
            let options = sqlite::connect_options(url)?;
            Ok(AnalyticsStore::Sqlite(sqlx::SqlitePool::connect_with(options).await?))
        } else if is_postgres_url(url) {
            Ok(AnalyticsStore::Postgres(sqlx::PgPool::connect(url).await?))
        } else {
            Err(ETLError::Config(format!("unsupported database url: {}", url)))
        }
    }

    /// 查询 `[start, end]` 内的记录，按时间升序
    pub async fn query_by_timerange(
        &self,
        table: &str,
        source: SourceKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ETLResult<Vec<ScoredDocument>> {
        validate_table_name(table)?;

        match self {
            AnalyticsStore::Sqlite(pool) => {
                sqlite::query_by_timerange(pool, table, source, start, end).await
            }
            AnalyticsStore::Postgres(pool) => {
                postgres::query_by_timerange(pool, table, source, start, end).await
            }
        }
    }
}
