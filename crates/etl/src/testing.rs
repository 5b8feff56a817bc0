//! 测试用的替身实现

use crate::config::ETLConfig;
use crate::fetcher::Fetcher;
use crate::normalize::RawRecord;
use crate::sentiment::LexiconSource;
use crate::snapshot::BlobSink;
use crate::storage::{BatchInsert, RelationalSink, SinkConnector};
use crate::types::{Batch, CanonicalDocument, ETLError, ETLResult, SourceKind};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::sync::{Arc, Mutex};

/// 使用内置词表，不访问网络
pub fn offline_config(source: SourceKind) -> ETLConfig {
    ETLConfig::new(source).with_lexicon(LexiconSource::Builtin)
}

/// 间隔 45 秒的已打分文档
pub fn sample_batch(source: SourceKind, len: usize) -> Batch {
    let base = Utc.with_ymd_and_hms(2024, 6, 10, 10, 0, 0).unwrap();
    let documents = (0..len)
        .map(|i| {
            CanonicalDocument {
                timestamp: base + Duration::seconds(45 * i as i64),
                author: source.has_author().then(|| "reuters".to_string()),
                text: format!("headline number {}", i),
            }
            .with_score(0.1 * i as f64 - 0.05)
        })
        .collect();

    Batch::with_documents(source, base + Duration::minutes(10), documents)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Begin,
    Insert,
    Commit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkCalls {
    pub begins: usize,
    pub inserts: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub closes: usize,
    pub rows: usize,
}

/// 记录每次调用的关系库替身
#[derive(Debug, Clone)]
pub struct RecordingSink {
    open: bool,
    fail_at: Option<FailAt>,
    pub fail_rollback: bool,
    calls: Arc<Mutex<SinkCalls>>,
}

impl RecordingSink {
    pub fn healthy() -> Self {
        Self {
            open: true,
            fail_at: None,
            fail_rollback: false,
            calls: Arc::new(Mutex::new(SinkCalls::default())),
        }
    }

    pub fn failing(fail_at: FailAt) -> Self {
        Self {
            fail_at: Some(fail_at),
            ..Self::healthy()
        }
    }

    pub fn closed() -> Self {
        Self {
            open: false,
            ..Self::healthy()
        }
    }

    pub fn calls(&self) -> SinkCalls {
        *self.calls.lock().unwrap()
    }

    fn record(&self, update: impl FnOnce(&mut SinkCalls)) {
        let mut calls = self.calls.lock().unwrap();
        update(&mut *calls);
    }

    fn check(&self, stage: FailAt) -> ETLResult<()> {
        if self.fail_at == Some(stage) {
            Err(ETLError::Database(format!("forced failure at {:?}", stage)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RelationalSink for RecordingSink {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn begin(&mut self) -> ETLResult<()> {
        self.record(|c| c.begins += 1);
        self.check(FailAt::Begin)
    }

    async fn insert(&mut self, insert: &BatchInsert) -> ETLResult<u64> {
        self.record(|c| c.inserts += 1);
        self.check(FailAt::Insert)?;
        self.record(|c| c.rows += insert.rows.len());
        Ok(insert.rows.len() as u64)
    }

    async fn commit(&mut self) -> ETLResult<()> {
        self.record(|c| c.commits += 1);
        self.check(FailAt::Commit)
    }

    async fn rollback(&mut self) -> ETLResult<()> {
        self.record(|c| c.rollbacks += 1);
        if self.fail_rollback {
            return Err(ETLError::Database("forced rollback failure".to_string()));
        }
        Ok(())
    }

    async fn close(&mut self) -> ETLResult<()> {
        self.record(|c| c.closes += 1);
        self.open = false;
        Ok(())
    }
}

/// 每次连接都返回共享同一计数器的 `RecordingSink`
#[derive(Clone)]
pub struct RecordingConnector {
    pub sink: RecordingSink,
    pub refuse: bool,
    connects: Arc<Mutex<usize>>,
}

impl RecordingConnector {
    pub fn new(sink: RecordingSink) -> Self {
        Self {
            sink,
            refuse: false,
            connects: Arc::new(Mutex::new(0)),
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::new(RecordingSink::healthy())
        }
    }

    pub fn connects(&self) -> usize {
        *self.connects.lock().unwrap()
    }
}

#[async_trait]
impl SinkConnector for RecordingConnector {
    async fn connect(&self) -> ETLResult<Box<dyn RelationalSink>> {
        *self.connects.lock().unwrap() += 1;
        if self.refuse {
            return Err(ETLError::Database("connection refused".to_string()));
        }
        Ok(Box::new(self.sink.clone()))
    }
}

/// 内存对象存储
#[derive(Debug, Default, Clone)]
pub struct MemoryBlobSink {
    fail: bool,
    objects: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl MemoryBlobSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn objects(&self) -> Vec<(String, Vec<u8>)> {
        self.objects.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobSink for MemoryBlobSink {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> ETLResult<()> {
        if self.fail {
            return Err(ETLError::SnapshotWrite("bucket unreachable".to_string()));
        }
        self.objects.lock().unwrap().push((key.to_string(), bytes));
        Ok(())
    }
}

/// 返回固定记录的抓取器
pub struct StaticFetcher {
    pub source: SourceKind,
    pub records: Option<Vec<RawRecord>>,
}

impl StaticFetcher {
    pub fn new(source: SourceKind, records: Vec<RawRecord>) -> Self {
        Self {
            source,
            records: Some(records),
        }
    }

    /// 抓取总是失败
    pub fn broken(source: SourceKind) -> Self {
        Self {
            source,
            records: None,
        }
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    fn source(&self) -> SourceKind {
        self.source
    }

    async fn fetch(&self) -> ETLResult<Vec<RawRecord>> {
        self.records
            .clone()
            .ok_or_else(|| ETLError::Fetch(format!("{}: service unavailable", self.source)))
    }
}
