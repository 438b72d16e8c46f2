use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broker::BrokerReader;
use crate::error::{BrokerError, FetchError, MessagingError};
use crate::record::Record;

/// StartOffset はコミット済みオフセットがない場合の読み出し開始位置。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    Earliest,
    #[default]
    Latest,
}

impl StartOffset {
    /// librdkafka の auto.offset.reset プロパティ値。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

/// ConsumerOptions は購読ループの設定を表す。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerOptions {
    /// 1 回の fetch の最大待ち時間（ミリ秒）。キャンセル確認の間隔の上限にもなる。
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    #[serde(default = "default_min_bytes")]
    pub min_bytes: usize,
    /// 1 回の fetch で取得する最大バイト数
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    /// レコードチャネルの容量
    #[serde(default = "default_record_buffer")]
    pub record_buffer: usize,
    /// エラーチャネルの容量。満杯時のエラーは破棄する。
    #[serde(default = "default_error_buffer")]
    pub error_buffer: usize,
    /// 配信直後に自動コミットするか
    #[serde(default = "default_auto_commit")]
    pub auto_commit: bool,
    #[serde(default)]
    pub start_offset: StartOffset,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
}

fn default_max_wait_ms() -> u64 {
    100
}

fn default_min_bytes() -> usize {
    1
}

fn default_max_bytes() -> usize {
    10_000_000
}

fn default_record_buffer() -> usize {
    100
}

fn default_error_buffer() -> usize {
    10
}

fn default_auto_commit() -> bool {
    true
}

fn default_session_timeout_ms() -> u64 {
    30000
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            max_wait_ms: default_max_wait_ms(),
            min_bytes: default_min_bytes(),
            max_bytes: default_max_bytes(),
            record_buffer: default_record_buffer(),
            error_buffer: default_error_buffer(),
            auto_commit: default_auto_commit(),
            start_offset: StartOffset::default(),
            session_timeout_ms: default_session_timeout_ms(),
        }
    }
}

impl ConsumerOptions {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// 自動コミットを無効にする。呼び出し側は commit_message で明示的にコミットする。
    pub fn manual_commit(mut self) -> Self {
        self.auto_commit = false;
        self
    }
}

/// ConsumptionStream は 1 つのトピック・コンシューマーグループの購読をチャネルとして公開する。
///
/// `subscribe` でバックグラウンドの取得ループを 1 つだけ起動し、レコードとエラーを
/// それぞれ有界チャネルで渡す。レコードはチャネルへ渡した直後にコミットされる
/// （処理完了前のコミットのため at-least-once。クラッシュのタイミングによっては
/// 未処理のままオフセットが進むこともある）。より強い保証が必要な場合は
/// `ConsumerOptions::manual_commit` と `commit_message` を使う。
pub struct ConsumptionStream {
    reader: Arc<dyn BrokerReader>,
    topic: String,
    group_id: String,
    options: ConsumerOptions,
    subscribed: AtomicBool,
    closed: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ConsumptionStream {
    /// rdkafka のリーダーを生成して ConsumptionStream を構築する。購読はまだ開始しない。
    #[cfg(feature = "kafka")]
    pub fn new(
        config: &tactify_kafka::BrokerConfig,
        topic: &str,
        group_id: &str,
    ) -> Result<Self, MessagingError> {
        Self::with_options(config, topic, group_id, ConsumerOptions::default())
    }

    #[cfg(feature = "kafka")]
    pub fn with_options(
        config: &tactify_kafka::BrokerConfig,
        topic: &str,
        group_id: &str,
        options: ConsumerOptions,
    ) -> Result<Self, MessagingError> {
        let reader = crate::kafka_consumer::KafkaReader::new(config, topic, group_id, &options)?;
        Ok(Self::from_reader(Arc::new(reader), topic, group_id, options))
    }

    /// 任意の BrokerReader から ConsumptionStream を構築する。
    pub fn from_reader(
        reader: Arc<dyn BrokerReader>,
        topic: &str,
        group_id: &str,
        options: ConsumerOptions,
    ) -> Self {
        Self {
            reader,
            topic: topic.to_string(),
            group_id: group_id.to_string(),
            options,
            subscribed: AtomicBool::new(false),
            closed: CancellationToken::new(),
            worker: Mutex::new(None),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    /// 取得ループを起動し、レコードチャネルとエラーチャネルを返す。
    ///
    /// ctx のキャンセルまたは `close` でループは終了し、両チャネルが閉じる。
    /// チャネルのクローズが唯一の終了通知となる。
    pub fn subscribe(
        &self,
        ctx: CancellationToken,
    ) -> Result<(mpsc::Receiver<Record>, mpsc::Receiver<FetchError>), MessagingError> {
        if self.closed.is_cancelled() {
            return Err(MessagingError::Closed);
        }
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Err(MessagingError::AlreadySubscribed);
        }

        let (records_tx, records_rx) = mpsc::channel(self.options.record_buffer.max(1));
        let (errors_tx, errors_rx) = mpsc::channel(self.options.error_buffer.max(1));

        let fetch_loop = FetchLoop {
            reader: self.reader.clone(),
            topic: self.topic.clone(),
            group_id: self.group_id.clone(),
            max_wait: self.options.max_wait(),
            auto_commit: self.options.auto_commit,
            ctx,
            closed: self.closed.clone(),
            records: records_tx,
            errors: errors_tx,
        };
        let handle = tokio::spawn(fetch_loop.run());
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        tracing::info!(
            topic = %self.topic,
            group = %self.group_id,
            "consumption stream subscribed"
        );
        Ok((records_rx, errors_rx))
    }

    /// レコードのオフセットを手動でコミットする。同じレコードを複数回コミットしてもよい。
    pub async fn commit_message(&self, record: &Record) -> Result<(), MessagingError> {
        self.reader
            .commit(&record.position())
            .await
            .map_err(MessagingError::Commit)
    }

    /// 取得ループを停止してリーダーを解放する。
    ///
    /// 実行中の fetch は待たずに破棄するため、ブロッキング中の fetch とデッドロックしない。
    pub async fn close(&self) -> Result<(), MessagingError> {
        self.closed.cancel();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, topic = %self.topic, "fetch loop terminated abnormally");
            }
        }
        self.reader.close().await?;
        tracing::info!(
            topic = %self.topic,
            group = %self.group_id,
            "consumption stream closed"
        );
        Ok(())
    }
}

/// 購読 1 回分の取得ループ。
struct FetchLoop {
    reader: Arc<dyn BrokerReader>,
    topic: String,
    group_id: String,
    max_wait: Duration,
    auto_commit: bool,
    ctx: CancellationToken,
    closed: CancellationToken,
    records: mpsc::Sender<Record>,
    errors: mpsc::Sender<FetchError>,
}

impl FetchLoop {
    async fn run(self) {
        loop {
            if self.is_done() {
                break;
            }

            let fetched = tokio::select! {
                biased;
                () = self.ctx.cancelled() => break,
                () = self.closed.cancelled() => break,
                fetched = self.reader.fetch(self.max_wait) => fetched,
            };

            let record = match fetched {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    if self.is_done() || e == BrokerError::Closed {
                        break;
                    }
                    self.report(FetchError::fetch(e));
                    // 即座に失敗するリーダーでも再取得は max_wait 間隔に抑える
                    tokio::select! {
                        biased;
                        () = self.ctx.cancelled() => break,
                        () = self.closed.cancelled() => break,
                        () = tokio::time::sleep(self.max_wait) => {}
                    }
                    continue;
                }
            };

            let position = record.position();
            tokio::select! {
                biased;
                () = self.ctx.cancelled() => break,
                () = self.closed.cancelled() => break,
                sent = self.records.send(record) => {
                    if sent.is_err() {
                        // 受信側が破棄された
                        break;
                    }
                }
            }

            if self.auto_commit {
                if let Err(e) = self.reader.commit(&position).await {
                    self.report(FetchError::commit(e));
                }
            }
        }

        tracing::info!(
            topic = %self.topic,
            group = %self.group_id,
            "fetch loop stopped"
        );
    }

    fn is_done(&self) -> bool {
        self.ctx.is_cancelled() || self.closed.is_cancelled()
    }

    /// エラーチャネルへの非ブロッキング送信。満杯なら破棄して続行する。
    fn report(&self, error: FetchError) {
        match self.errors.try_send(error) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(dropped)) => {
                tracing::debug!(
                    topic = %self.topic,
                    error = %dropped,
                    "error channel full, dropping error"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBrokerReader;
    use crate::memory::InMemoryBroker;

    #[test]
    fn test_consumer_options_defaults() {
        let opts = ConsumerOptions::default();
        assert_eq!(opts.max_wait(), Duration::from_millis(100));
        assert_eq!(opts.record_buffer, 100);
        assert_eq!(opts.error_buffer, 10);
        assert_eq!(opts.max_bytes, 10_000_000);
        assert!(opts.auto_commit);
        assert_eq!(opts.start_offset, StartOffset::Latest);
    }

    #[test]
    fn test_consumer_options_deserialize_defaults() {
        let json = r#"{"max_wait_ms": 250, "start_offset": "earliest"}"#;
        let opts: ConsumerOptions = serde_json::from_str(json).unwrap();
        assert_eq!(opts.max_wait_ms, 250);
        assert_eq!(opts.start_offset, StartOffset::Earliest);
        assert_eq!(opts.record_buffer, 100);
        assert!(opts.auto_commit);
    }

    #[test]
    fn test_manual_commit_disables_auto_commit() {
        assert!(!ConsumerOptions::default().manual_commit().auto_commit);
    }

    #[tokio::test]
    async fn test_subscribe_twice_is_rejected() {
        let broker = InMemoryBroker::new();
        let stream = ConsumptionStream::from_reader(
            Arc::new(broker.reader("t", "g")),
            "t",
            "g",
            ConsumerOptions::default(),
        );

        let ctx = CancellationToken::new();
        let _channels = stream.subscribe(ctx.clone()).unwrap();
        let err = stream.subscribe(ctx.clone()).unwrap_err();
        assert!(matches!(err, MessagingError::AlreadySubscribed));

        stream.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_after_close_is_rejected() {
        let mut reader = MockBrokerReader::new();
        reader.expect_close().times(1).returning(|| Ok(()));
        let stream = ConsumptionStream::from_reader(
            Arc::new(reader),
            "t",
            "g",
            ConsumerOptions::default(),
        );

        stream.close().await.unwrap();
        let err = stream.subscribe(CancellationToken::new()).unwrap_err();
        assert!(matches!(err, MessagingError::Closed));
    }

    #[tokio::test]
    async fn test_commit_message_error_is_wrapped() {
        let mut reader = MockBrokerReader::new();
        reader
            .expect_commit()
            .returning(|_| Err(BrokerError::Commit("coordinator not available".to_string())));
        let stream = ConsumptionStream::from_reader(
            Arc::new(reader),
            "t",
            "g",
            ConsumerOptions::default().manual_commit(),
        );

        let record = Record {
            topic: "t".to_string(),
            partition: 0,
            offset: 3,
            key: None,
            value: b"v".to_vec(),
            timestamp: chrono::Utc::now(),
        };
        let err = stream.commit_message(&record).await.unwrap_err();
        assert!(matches!(err, MessagingError::Commit(_)));
        assert!(err.to_string().starts_with("committing message"));
    }

    #[tokio::test]
    async fn test_reader_closed_error_ends_loop() {
        let mut reader = MockBrokerReader::new();
        reader.expect_fetch().returning(|_| Err(BrokerError::Closed));
        let stream = ConsumptionStream::from_reader(
            Arc::new(reader),
            "t",
            "g",
            ConsumerOptions::default(),
        );

        let (mut records, mut errors) = stream.subscribe(CancellationToken::new()).unwrap();
        let next = tokio::time::timeout(Duration::from_secs(1), records.recv())
            .await
            .unwrap();
        assert!(next.is_none());
        assert!(errors.recv().await.is_none());
    }
}
