//! 时间窗口过滤

use crate::normalize::RawRecord;
use chrono::{DateTime, Utc};

/// `now - timestamp` 落在 `[0, max_age_minutes]` 分钟内才算最近。
///
/// 使用有符号的 `chrono::Duration`，时间戳晚于 `now`（时钟偏差）时差值为负，直接拒绝。
pub fn is_recent(timestamp: DateTime<Utc>, now: DateTime<Utc>, max_age_minutes: i64) -> bool {
    let elapsed_ms = now.signed_duration_since(timestamp).num_milliseconds();

    elapsed_ms >= 0 && elapsed_ms <= max_age_minutes.saturating_mul(60_000)
}

/// 原始记录的最近性过滤器
#[derive(Debug, Clone, Copy)]
pub struct RecencyFilter {
    pub max_age_minutes: i64,
}

impl RecencyFilter {
    pub fn new(max_age_minutes: i64) -> Self {
        Self { max_age_minutes }
    }

    /// 时间戳无法解析的记录放行，由规范化阶段丢弃并记录
    pub fn accepts(&self, record: &RawRecord, now: DateTime<Utc>) -> bool {
        match record.timestamp() {
            Ok(timestamp) => is_recent(timestamp, now, self.max_age_minutes),
            Err(_) => true,
        }
    }

    pub fn apply(&self, records: Vec<RawRecord>, now: DateTime<Utc>) -> Vec<RawRecord> {
        records
            .into_iter()
            .filter(|record| self.accepts(record, now))
            .collect()
    }
}

impl Default for RecencyFilter {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::NewsRecord;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_window_boundaries() {
        let now = now();
        assert!(is_recent(now, now, 5));
        assert!(is_recent(now - Duration::minutes(2), now, 5));
        assert!(is_recent(now - Duration::minutes(5), now, 5));
        assert!(!is_recent(now - Duration::minutes(5) - Duration::seconds(1), now, 5));
        assert!(!is_recent(now - Duration::minutes(30), now, 5));
    }

    #[test]
    fn test_future_timestamp_is_not_recent() {
        let now = now();
        // 差值为负时不能像取模运算那样回绕成一个大的正数
        assert!(!is_recent(now + Duration::seconds(1), now, 5));
        assert!(!is_recent(now + Duration::hours(23) + Duration::minutes(58), now, 5));
        assert!(!is_recent(now + Duration::days(3), now, 60 * 24 * 365));
    }

    #[test]
    fn test_old_record_a_day_later_is_not_recent() {
        let now = now();
        assert!(!is_recent(now - Duration::days(1) - Duration::minutes(1), now, 5));
    }

    #[test]
    fn test_filter_keeps_unparsable_records() {
        let now = now();
        let filter = RecencyFilter::new(5);
        let records = vec![
            RawRecord::News(NewsRecord {
                web_publication_date: Some("2024-06-10T11:58:00Z".to_string()),
                web_title: Some("fresh".to_string()),
            }),
            RawRecord::News(NewsRecord {
                web_publication_date: Some("2024-06-10T11:30:00Z".to_string()),
                web_title: Some("stale".to_string()),
            }),
            RawRecord::News(NewsRecord {
                web_publication_date: Some("yesterday".to_string()),
                web_title: Some("broken".to_string()),
            }),
        ];

        let kept = filter.apply(records, now);
        assert_eq!(kept.len(), 2);
    }
}
