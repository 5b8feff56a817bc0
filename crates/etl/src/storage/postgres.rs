//! Postgres 后端

use super::{BatchInsert, RelationalSink};
use crate::types::{ColumnValue, ETLError, ETLResult, ScoredDocument, SourceKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgConnection, PgPool, Postgres, QueryBuilder};
use std::time::Duration;

pub struct PostgresSink {
    conn: Option<PgConnection>,
}

impl PostgresSink {
    pub async fn connect(database_url: &str, timeout: Duration) -> ETLResult<Self> {
        let conn = tokio::time::timeout(timeout, PgConnection::connect(database_url))
            .await
            .map_err(|_| ETLError::Database(format!("connect timed out after {:?}", timeout)))??;

        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: PgConnection) -> Self {
        Self { conn: Some(conn) }
    }

    fn conn(&mut self) -> ETLResult<&mut PgConnection> {
        self.conn.as_mut().ok_or(ETLError::NoConnection)
    }
}

#[async_trait]
impl RelationalSink for PostgresSink {
    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    async fn begin(&mut self) -> ETLResult<()> {
        sqlx::query("BEGIN").execute(self.conn()?).await?;
        Ok(())
    }

    async fn insert(&mut self, insert: &BatchInsert) -> ETLResult<u64> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(insert.statement_prefix());
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

    /// 也用于清理处于 aborted 状态的事务
    async fn rollback(&mut self) -> ETLResult<()> {
        sqlx::query("ROLLBACK").execute(self.conn()?).await?;
        Ok(())
    }

    async fn close(&mut self) -> ETLResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
        }
        Ok(())
    }
}

pub(crate) async fn query_by_timerange(
    pool: &PgPool,
    table: &str,
    source: SourceKind,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> ETLResult<Vec<ScoredDocument>> {
    if source.has_author() {
        let sql = format!(
            "SELECT timestamp, author, text, sentiment_score FROM {} \
             WHERE timestamp BETWEEN $1 AND $2 ORDER BY timestamp",
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
             WHERE timestamp BETWEEN $1 AND $2 ORDER BY timestamp",
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
