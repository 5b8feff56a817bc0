//! 终端仪表盘：按日期范围读取分析表，关键字过滤后以表格或时间序列展示

use crate::storage::AnalyticsStore;
use crate::types::{ETLError, ETLResult, ScoredDocument, SourceKind};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

const RED: &str = "\x1b[41;30m";
const GRAY: &str = "\x1b[47;30m";
const GREEN: &str = "\x1b[42;30m";
const RESET: &str = "\x1b[0m";

pub const NO_DATA_MESSAGE: &str = "Your search parameters resulted in no data!";

/// 展示方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardView {
    Table,
    Analytics,
}

/// 仪表盘查询条件
#[derive(Debug, Clone)]
pub struct DashboardQuery {
    pub source: SourceKind,
    pub table: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub keyword: Option<String>,
}

impl DashboardQuery {
    pub fn new(source: SourceKind, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            source,
            table: source.default_table().to_string(),
            start_date,
            end_date,
            keyword: None,
        }
    }

    /// 两个日期都取当天 00:00 UTC，与 `between date(start) and date(end)` 一致
    pub fn time_range(&self) -> ETLResult<(DateTime<Utc>, DateTime<Utc>)> {
        if self.end_date < self.start_date {
            return Err(ETLError::Config(format!(
                "end date {} is before start date {}",
                self.end_date, self.start_date
            )));
        }
        let start = self.start_date.and_time(chrono::NaiveTime::MIN).and_utc();
        let end = self.end_date.and_time(chrono::NaiveTime::MIN).and_utc();
        Ok((start, end))
    }
}

/// 展示用的一行，列顺序为 timestamp, sentiment_score, text
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayRow<Tz: TimeZone> {
    pub timestamp: DateTime<Tz>,
    pub sentiment_score: f64,
    pub text: String,
}

pub async fn load(
    store: &AnalyticsStore,
    query: &DashboardQuery,
) -> ETLResult<Vec<ScoredDocument>> {
    let (start, end) = query.time_range()?;
    let rows = store
        .query_by_timerange(&query.table, query.source, start, end)
        .await?;
    tracing::debug!("Loaded {} rows from {}", rows.len(), query.table);
    Ok(rows)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 关键字过滤（区分大小写）、分数保留两位小数、转换到展示时区，作者列不展示
pub fn prepare_rows<Tz: TimeZone>(
    documents: &[ScoredDocument],
    keyword: Option<&str>,
    tz: &Tz,
) -> Vec<DisplayRow<Tz>> {
    documents
        .iter()
        .filter(|doc| match keyword {
            Some(keyword) if !keyword.is_empty() => doc.text.contains(keyword),
            _ => true,
        })
        .map(|doc| DisplayRow {
            timestamp: doc.timestamp.with_timezone(tz),
            sentiment_score: round2(doc.sentiment_score),
            text: doc.text.clone(),
        })
        .collect()
}

fn score_color(score: f64) -> &'static str {
    if score < 0.0 {
        RED
    } else if score == 0.0 {
        GRAY
    } else {
        GREEN
    }
}

/// 表格视图，分数单元格按正负着色
pub fn render_table<Tz: TimeZone>(rows: &[DisplayRow<Tz>]) -> String
where
    Tz::Offset: std::fmt::Display,
{
    if rows.is_empty() {
        return NO_DATA_MESSAGE.to_string();
    }

    let mut out = format!("{:<25} | {:>15} | {}\n", "timestamp", "sentiment_score", "text");
    out.push_str(&format!("{}\n", "-".repeat(80)));
    for row in rows {
        out.push_str(&format!(
            "{:<25} | {}{:>15.2}{} | {}\n",
            row.timestamp.format("%Y-%m-%d %H:%M:%S %z").to_string(),
            score_color(row.sentiment_score),
            row.sentiment_score,
            RESET,
            row.text
        ));
    }
    out
}

/// 分数随时间变化的 ASCII 折线（每行一个点，`|` 为 0 轴）
pub fn render_chart<Tz: TimeZone>(rows: &[DisplayRow<Tz>], width: usize) -> String
where
    Tz::Offset: std::fmt::Display,
{
    if rows.is_empty() {
        return NO_DATA_MESSAGE.to_string();
    }

    let half = (width / 2).max(1);
    let mut ordered: Vec<&DisplayRow<Tz>> = rows.iter().collect();
    ordered.sort_by_key(|row| row.timestamp.timestamp());

    let mut out = String::from("Sentiment score over time\n");
    for row in ordered {
        let offset = (row.sentiment_score.clamp(-1.0, 1.0) * half as f64).round() as i64;
        let mut line = vec![' '; half * 2 + 1];
        line[half] = '|';
        let position = (half as i64 + offset) as usize;
        line[position] = '*';

        out.push_str(&format!(
            "{} {} {:>5.2}\n",
            row.timestamp.format("%Y-%m-%d %H:%M"),
            line.into_iter().collect::<String>(),
            row.sentiment_score
        ));
    }
    out
}

pub fn render<Tz: TimeZone>(rows: &[DisplayRow<Tz>], view: DashboardView) -> String
where
    Tz::Offset: std::fmt::Display,
{
    match view {
        DashboardView::Table => render_table(rows),
        DashboardView::Analytics => render_chart(rows, 40),
    }
}
