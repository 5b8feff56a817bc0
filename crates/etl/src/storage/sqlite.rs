//! SQLite 后端，用于本地运行和测试

use super::{BatchInsert, RelationalSink};
use crate::types::{ColumnValue, ETLError, ETLResult, ScoredDocument, SourceKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub struct SqliteSink {
    conn: Option<SqliteConnection>,
}

impl SqliteSink {
    pub async fn connect(database_url: &str, timeout: Duration) -> ETLResult<Self> {
        // 确保数据库文件的目录存在
        let path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        if !path.starts_with(":memory:") {
            if let Some(parent) = Path::new(path.split('?').next().unwrap_or(path)).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }

        let options = connect_options(database_url)?;
        let conn = tokio::time::timeout(timeout, SqliteConnection::connect_with(&options))
            .await
            .map_err(|_| ETLError::Database(format!("connect timed out after {:?}", timeout)))??;

        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: SqliteConnection) -> Self {
        Self { conn: Some(conn) }
    }

    fn conn(&mut self) -> ETLResult<&mut SqliteConnection> {
        self.conn.as_mut().ok_or(ETLError::NoConnection)
    }

    /// 建表（不做迁移，仅在表不存在时创建）
    pub async fn ensure_table(&mut self, table: &str, source: SourceKind) -> ETLResult<()> {
        super::validate_table_name(table)?;

        let author = if source.has_author() { "author TEXT,\n" } else { "" };
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                timestamp TEXT NOT NULL,
                {}text TEXT NOT NULL,
                sentiment_score REAL NOT NULL
            )
            "#,
            table, author
        );

        sqlx::query(&sql).execute(self.conn()?).await?;
        Ok(())
    }
}

#[async_trait]
impl RelationalSink for SqliteSink {
    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    async fn begin(&mut self) -> ETLResult<()> {
        sqlx::query("BEGIN").execute(self.conn()?).await?;
        Ok(())
    }

    async fn insert(&mut self, insert: &BatchInsert) -> ETLResult<u64> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(insert.statement_prefix());
        builder.push_values(insert.rows.iter(), |mut row, values| {
            for value in values {
                match value {
                    ColumnValue::Timestamp(ts) => row.push_bind(*ts),
                    ColumnValue::Text(text) => row.push_bind(text.clone()),
                    ColumnValue::NullableText(text) => row.push_bind(text.clone()),
                    ColumnValue::Float(score) => row.push_bind(*score),
                };
            }
        });

        let result = builder.build().execute(self.conn()?).await?;
        Ok(result.rows_affected())
    }

    async fn commit(&mut self) -> ETLResult<()> {
        sqlx::query("COMMIT").execute(self.conn()?).await?;
        Ok(())
    }

    async fn rollback(&mut self) -> ETLResult<()> {
        match sqlx::query("ROLLBACK").execute(self.conn()?).await {
            Ok(_) => Ok(()),
            // 没有活动事务，连接已经是干净的
            Err(e) if is_no_active_transaction(&e) => {
                tracing::debug!("SQLite rollback without transaction: {}", e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn close(&mut self) -> ETLResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
        }
        Ok(())
    }
}

/// 数据库文件不存在时自动创建
pub(crate) fn connect_options(database_url: &str) -> ETLResult<SqliteConnectOptions> {
    Ok(SqliteConnectOptions::from_str(database_url)?.create_if_missing(true))
}

fn is_no_active_transaction(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .map(|e| e.message().contains("no transaction is active"))
        .unwrap_or(false)
}

pub(crate) async fn query_by_timerange(
    pool: &SqlitePool,
    table: &str,
    source: SourceKind,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> ETLResult<Vec<ScoredDocument>> {
    if source.has_author() {
        let sql = format!(
            "SELECT timestamp, author, text, sentiment_score FROM {} \
             WHERE timestamp >= ? AND timestamp <= ? ORDER BY timestamp",
            table
        );
        let rows: Vec<(DateTime<Utc>, Option<String>, String, f64)> = sqlx::query_as(&sql)
            .bind(start)
            .bind(end)
            .fetch_all(pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(timestamp, author, text, sentiment_score)| ScoredDocument {
                timestamp,
                author,
                text,
                sentiment_score,
            })
            .collect())
    } else {
        let sql = format!(
            "SELECT timestamp, text, sentiment_score FROM {} \
             WHERE timestamp >= ? AND timestamp <= ? ORDER BY timestamp",
            table
        );
        let rows: Vec<(DateTime<Utc>, String, f64)> = sqlx::query_as(&sql)
            .bind(start)
            .bind(end)
            .fetch_all(pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(timestamp, text, sentiment_score)| ScoredDocument {
                timestamp,
                author: None,
                text,
                sentiment_score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::persist;
    use crate::testing::sample_batch;
    use sqlx::Row;

    async fn memory_sink(source: SourceKind, table: &str) -> SqliteSink {
        let mut sink = SqliteSink::connect("sqlite::memory:", Duration::from_secs(1))
            .await
            .unwrap();
        sink.ensure_table(table, source).await.unwrap();
        sink
    }

    #[tokio::test]
    async fn test_insert_and_commit() {
        let mut sink = memory_sink(SourceKind::Twitter, "tweets_analytics").await;
        let batch = sample_batch(SourceKind::Twitter, 3);
        let insert = BatchInsert::from_batch(&batch, "tweets_analytics").unwrap();

        sink.begin().await.unwrap();
        assert_eq!(sink.insert(&insert).await.unwrap(), 3);
        sink.commit().await.unwrap();

        let row = sqlx::query("SELECT COUNT(*) AS n, MIN(author) AS a FROM tweets_analytics")
            .fetch_one(sink.conn().unwrap())
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("n"), 3);
        assert_eq!(row.get::<String, _>("a"), "reuters");

        sink.close().await.unwrap();
        assert!(!sink.is_open());
    }

    #[tokio::test]
    async fn test_rollback_discards_rows() {
        let mut sink = memory_sink(SourceKind::Guardian, "guardian_posts_analytics").await;
        let batch = sample_batch(SourceKind::Guardian, 2);
        let insert = BatchInsert::from_batch(&batch, "guardian_posts_analytics").unwrap();

        sink.begin().await.unwrap();
        sink.insert(&insert).await.unwrap();
        sink.rollback().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM guardian_posts_analytics")
            .fetch_one(sink.conn().unwrap())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_persist_into_missing_table_fails_and_closes() {
        let mut sink = SqliteSink::connect("sqlite::memory:", Duration::from_secs(1))
            .await
            .unwrap();
        let batch = sample_batch(SourceKind::Twitter, 2);

        let err = persist(&batch, &mut sink, "tweets_analytics").await.unwrap_err();

        assert!(matches!(err, ETLError::Transaction(_)));
        assert!(!sink.is_open());
    }

    #[tokio::test]
    async fn test_query_by_timerange_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("etl.db").display());

        let mut sink = SqliteSink::connect(&url, Duration::from_secs(1)).await.unwrap();
        sink.ensure_table("tweets_analytics", SourceKind::Twitter).await.unwrap();
        let batch = sample_batch(SourceKind::Twitter, 3);
        persist(&batch, &mut sink, "tweets_analytics").await.unwrap();

        let pool = SqlitePool::connect(&url).await.unwrap();
        let first = batch.documents[0].timestamp;
        let rows = query_by_timerange(
            &pool,
            "tweets_analytics",
            SourceKind::Twitter,
            first,
            first + chrono::Duration::minutes(1),
        )
        .await
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], batch.documents[0]);
        assert_eq!(rows[1].author.as_deref(), Some("reuters"));
    }

    #[tokio::test]
    async fn test_connect_creates_missing_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("etl.db");
        let url = format!("sqlite:{}", path.display());
        assert!(!path.exists());

        let mut sink = SqliteSink::connect(&url, Duration::from_secs(1)).await.unwrap();
        sink.ensure_table("guardian_posts_analytics", SourceKind::Guardian)
            .await
            .unwrap();
        sink.close().await.unwrap();
        assert!(path.exists());

        let store = crate::storage::AnalyticsStore::connect(&url).await.unwrap();
        let first = Utc::now() - chrono::Duration::days(1);
        let rows = store
            .query_by_timerange("guardian_posts_analytics", SourceKind::Guardian, first, Utc::now())
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_rollback_without_transaction_is_clean() {
        let mut sink = SqliteSink::connect("sqlite::memory:", Duration::from_secs(1))
            .await
            .unwrap();
        sink.rollback().await.unwrap();
        assert!(sink.is_open());
    }

    #[tokio::test]
    async fn test_only_missing_transaction_is_ignored() {
        let mut sink = SqliteSink::connect("sqlite::memory:", Duration::from_secs(1))
            .await
            .unwrap();

        let no_tx = sqlx::query("ROLLBACK")
            .execute(sink.conn().unwrap())
            .await
            .unwrap_err();
        assert!(is_no_active_transaction(&no_tx));

        let other = sqlx::query("SELECT * FROM missing_table")
            .execute(sink.conn().unwrap())
            .await
            .unwrap_err();
        assert!(!is_no_active_transaction(&other));
        assert!(!is_no_active_transaction(&sqlx::Error::RowNotFound));
    }

    #[tokio::test]
    async fn test_rollback_on_closed_sink_fails() {
        let mut sink = SqliteSink::connect("sqlite::memory:", Duration::from_secs(1))
            .await
            .unwrap();
        sink.close().await.unwrap();
        assert!(matches!(sink.rollback().await, Err(ETLError::NoConnection)));
    }
}
