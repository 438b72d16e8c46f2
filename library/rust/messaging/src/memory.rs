//! InMemoryBroker: ネットワーク I/O を行わないテスト用ブローカー。
//!
//! トピックごとのパーティションログとコンシューマーグループのオフセット台帳を
//! メモリ上に保持し、[`BrokerReader`] / [`BrokerWriter`] を提供する。

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::broker::{BrokerReader, BrokerWriter};
use crate::error::BrokerError;
use crate::record::{OutgoingRecord, Record, RecordPosition};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type CommitKey = (String, String, i32);

#[derive(Default)]
struct BrokerState {
    /// トピック名 → パーティションごとのログ
    topics: Mutex<HashMap<String, Vec<Vec<Record>>>>,
    /// (グループ, トピック, パーティション) → 次に読むオフセット
    commits: Mutex<HashMap<CommitKey, i64>>,
    appended: Notify,
}

/// InMemoryBroker はプロセス内で完結するブローカー。Clone は同じ状態を共有する。
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// トピックを作成する。既に存在する場合は何もしない。
    pub fn create_topic(&self, topic: &str, partitions: u32) {
        let mut topics = lock(&self.state.topics);
        topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions.max(1) as usize]);
    }

    /// トピック・グループに束縛されたリーダーを生成する。
    /// 読み出し開始位置はグループのコミット済みオフセット、なければ先頭。
    pub fn reader(&self, topic: &str, group_id: &str) -> InMemoryReader {
        InMemoryReader {
            broker: self.clone(),
            topic: topic.to_string(),
            group_id: group_id.to_string(),
            cursors: Mutex::new(HashMap::new()),
            fetch_failures: Mutex::new(VecDeque::new()),
            commit_failures: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn writer(&self) -> InMemoryWriter {
        InMemoryWriter {
            broker: self.clone(),
            writes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// レコードを追記し、割り当てたオフセットを含むレコードを返す。
    /// 未作成のトピックは 1 パーティションで自動作成する。
    pub fn append(&self, record: OutgoingRecord) -> Result<Record, BrokerError> {
        let stored = {
            let mut topics = lock(&self.state.topics);
            let partitions = topics
                .entry(record.topic.clone())
                .or_insert_with(|| vec![Vec::new()]);
            let count = partitions.len();
            let partition = match record.partition {
                Some(p) => usize::try_from(p)
                    .ok()
                    .filter(|p| *p < count)
                    .ok_or_else(|| {
                        BrokerError::Write(format!(
                            "partition {p} out of range for topic {} ({count} partitions)",
                            record.topic
                        ))
                    })?,
                None => route(record.key.as_deref(), count),
            };
            let log = &mut partitions[partition];
            let stored = Record {
                topic: record.topic,
                partition: i32::try_from(partition).unwrap_or(i32::MAX),
                offset: i64::try_from(log.len()).unwrap_or(i64::MAX),
                key: record.key,
                value: record.value,
                timestamp: record.timestamp,
            };
            log.push(stored.clone());
            stored
        };
        self.state.appended.notify_waiters();
        Ok(stored)
    }

    /// トピックの全パーティションのレコードをパーティション順に返す。
    pub fn records(&self, topic: &str) -> Vec<Record> {
        let topics = lock(&self.state.topics);
        topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// グループのコミット済みオフセット（次に読む位置）を返す。
    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        let commits = lock(&self.state.commits);
        commits
            .get(&(group_id.to_string(), topic.to_string(), partition))
            .copied()
    }

    fn record_commit(&self, group_id: &str, position: &RecordPosition) {
        let mut commits = lock(&self.state.commits);
        commits.insert(
            (
                group_id.to_string(),
                position.topic.clone(),
                position.partition,
            ),
            position.next_offset(),
        );
    }
}

fn route(key: Option<&[u8]>, partitions: usize) -> usize {
    match key {
        Some(key) if partitions > 1 => {
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            usize::try_from(hasher.finish() % partitions as u64).unwrap_or(0)
        }
        _ => 0,
    }
}

/// InMemoryReader は InMemoryBroker 上の 1 トピック・1 グループのリーダー。
///
/// 障害注入用に、次回以降の fetch / commit を失敗させるキューを持つ。
pub struct InMemoryReader {
    broker: InMemoryBroker,
    topic: String,
    group_id: String,
    cursors: Mutex<HashMap<i32, i64>>,
    fetch_failures: Mutex<VecDeque<BrokerError>>,
    commit_failures: Mutex<VecDeque<BrokerError>>,
    closed: AtomicBool,
}

impl InMemoryReader {
    /// 次の fetch を指定エラーで失敗させる。複数回呼ぶとその回数分失敗する。
    pub fn fail_next_fetch(&self, error: BrokerError) {
        lock(&self.fetch_failures).push_back(error);
        self.broker.state.appended.notify_waiters();
    }

    pub fn fail_next_commit(&self, error: BrokerError) {
        lock(&self.commit_failures).push_back(error);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn next_record(&self) -> Option<Record> {
        let topics = lock(&self.broker.state.topics);
        let partitions = topics.get(&self.topic)?;
        let mut cursors = lock(&self.cursors);
        for (index, log) in partitions.iter().enumerate() {
            let partition = i32::try_from(index).unwrap_or(i32::MAX);
            let cursor = cursors.entry(partition).or_insert_with(|| {
                self.broker
                    .committed_offset(&self.group_id, &self.topic, partition)
                    .unwrap_or(0)
            });
            let Ok(position) = usize::try_from(*cursor) else {
                continue;
            };
            if let Some(record) = log.get(position) {
                *cursor += 1;
                return Some(record.clone());
            }
        }
        None
    }
}

#[async_trait]
impl BrokerReader for InMemoryReader {
    async fn fetch(&self, max_wait: Duration) -> Result<Option<Record>, BrokerError> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let appended = self.broker.state.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if self.is_closed() {
                return Err(BrokerError::Closed);
            }
            if let Some(error) = lock(&self.fetch_failures).pop_front() {
                return Err(error);
            }
            if let Some(record) = self.next_record() {
                return Ok(Some(record));
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn commit(&self, position: &RecordPosition) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        if let Some(error) = lock(&self.commit_failures).pop_front() {
            return Err(error);
        }
        self.broker.record_commit(&self.group_id, position);
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);
        self.broker.state.appended.notify_waiters();
        Ok(())
    }
}

/// InMemoryWriter は InMemoryBroker へ書き込むライター。書き込み回数を記録する。
pub struct InMemoryWriter {
    broker: InMemoryBroker,
    writes: AtomicUsize,
    closed: AtomicBool,
}

impl InMemoryWriter {
    /// write が呼ばれた回数（失敗を含む）。
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerWriter for InMemoryWriter {
    async fn write(&self, record: OutgoingRecord) -> Result<(), BrokerError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        self.broker.append(record)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outgoing(topic: &str, key: &str, value: &str) -> OutgoingRecord {
        OutgoingRecord::new(topic, Some(key.as_bytes()), value.as_bytes())
    }

    #[tokio::test]
    async fn test_append_assigns_offsets_per_partition() {
        let broker = InMemoryBroker::new();
        broker.create_topic("t", 2);

        let a = broker.append(outgoing("t", "a", "1").with_partition(0)).unwrap();
        let b = broker.append(outgoing("t", "b", "2").with_partition(1)).unwrap();
        let c = broker.append(outgoing("t", "c", "3").with_partition(0)).unwrap();

        assert_eq!((a.partition, a.offset), (0, 0));
        assert_eq!((b.partition, b.offset), (1, 0));
        assert_eq!((c.partition, c.offset), (0, 1));
        assert_eq!(broker.records("t").len(), 3);
    }

    #[tokio::test]
    async fn test_append_rejects_unknown_partition() {
        let broker = InMemoryBroker::new();
        broker.create_topic("t", 1);
        let err = broker.append(outgoing("t", "a", "1").with_partition(3)).unwrap_err();
        assert!(matches!(err, BrokerError::Write(_)));
    }

    #[tokio::test]
    async fn test_fetch_returns_none_after_max_wait() {
        let broker = InMemoryBroker::new();
        let reader = broker.reader("t", "g");
        let fetched = reader.fetch(Duration::from_millis(20)).await.unwrap();
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn test_fetch_wakes_on_append() {
        let broker = InMemoryBroker::new();
        broker.create_topic("t", 1);
        let reader = broker.reader("t", "g");

        let writer_broker = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer_broker.append(outgoing("t", "k", "v")).unwrap();
        });

        let fetched = reader.fetch(Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(fetched.value, b"v".to_vec());
    }

    #[tokio::test]
    async fn test_reader_resumes_from_committed_offset() {
        let broker = InMemoryBroker::new();
        broker.create_topic("t", 1);
        for v in ["1", "2", "3"] {
            broker.append(outgoing("t", "k", v)).unwrap();
        }

        let first = broker.reader("t", "g");
        let rec = first.fetch(Duration::from_millis(10)).await.unwrap().unwrap();
        first.commit(&rec.position()).await.unwrap();
        assert_eq!(broker.committed_offset("g", "t", 0), Some(1));

        let second = broker.reader("t", "g");
        let rec = second.fetch(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(rec.value, b"2".to_vec());

        let other_group = broker.reader("t", "other");
        let rec = other_group.fetch(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(rec.value, b"1".to_vec());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let broker = InMemoryBroker::new();
        let reader = broker.reader("t", "g");
        reader.fail_next_fetch(BrokerError::Fetch("first".to_string()));
        reader.fail_next_fetch(BrokerError::Fetch("second".to_string()));

        assert_eq!(
            reader.fetch(Duration::from_millis(10)).await.unwrap_err(),
            BrokerError::Fetch("first".to_string())
        );
        assert_eq!(
            reader.fetch(Duration::from_millis(10)).await.unwrap_err(),
            BrokerError::Fetch("second".to_string())
        );
        assert!(reader.fetch(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_fetch() {
        let broker = InMemoryBroker::new();
        let reader = Arc::new(broker.reader("t", "g"));

        let pending = {
            let reader = reader.clone();
            tokio::spawn(async move { reader.fetch(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        reader.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.unwrap_err(), BrokerError::Closed);
    }

    #[tokio::test]
    async fn test_writer_counts_writes_and_rejects_after_close() {
        let broker = InMemoryBroker::new();
        let writer = broker.writer();
        writer.write(outgoing("t", "a", "1")).await.unwrap();
        writer.close().await.unwrap();
        let err = writer.write(outgoing("t", "b", "2")).await.unwrap_err();

        assert_eq!(err, BrokerError::Closed);
        assert_eq!(writer.write_count(), 2);
        assert_eq!(broker.records("t").len(), 1);
    }
}
