//! KafkaReader: rdkafka を使用した BrokerReader 実装。
//! feature = "kafka" で有効化される。

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use tactify_kafka::BrokerConfig;

use crate::broker::BrokerReader;
use crate::consumer::ConsumerOptions;
use crate::error::BrokerError;
use crate::record::{Record, RecordPosition};

/// KafkaReader は rdkafka の StreamConsumer を 1 トピックに購読させたリーダー。
/// オフセットは自動コミットせず、commit で明示的に確定させる。
///
/// close でコンシューマーを手放す。実行中の fetch / commit が保持する参照が
/// 解放された時点でコンシューマーも破棄される。
pub struct KafkaReader {
    consumer: Mutex<Option<Arc<StreamConsumer>>>,
}

impl KafkaReader {
    pub fn new(
        config: &BrokerConfig,
        topic: &str,
        group_id: &str,
        options: &ConsumerOptions,
    ) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.bootstrap_servers())
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", options.start_offset.as_str())
            .set("session.timeout.ms", options.session_timeout_ms.to_string())
            .set("fetch.min.bytes", options.min_bytes.to_string())
            .set("fetch.max.bytes", options.max_bytes.to_string())
            .set("fetch.wait.max.ms", options.max_wait_ms.to_string())
            .create()
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        tracing::info!(topic = %topic, group = %group_id, "kafka reader subscribed");

        Ok(Self {
            consumer: Mutex::new(Some(Arc::new(consumer))),
        })
    }

    fn consumer(&self) -> Result<Arc<StreamConsumer>, BrokerError> {
        self.consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(BrokerError::Closed)
    }

    /// close 済みかどうか。
    pub fn is_closed(&self) -> bool {
        self.consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

#[async_trait]
impl BrokerReader for KafkaReader {
    async fn fetch(&self, max_wait: Duration) -> Result<Option<Record>, BrokerError> {
        let consumer = self.consumer()?;

        let msg = match tokio::time::timeout(max_wait, consumer.recv()).await {
            Err(_) => return Ok(None),
            Ok(Err(e)) => return Err(BrokerError::Fetch(e.to_string())),
            Ok(Ok(msg)) => msg,
        };

        let timestamp = msg
            .timestamp()
            .to_millis()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        Ok(Some(Record {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg.key().map(<[u8]>::to_vec),
            value: msg.payload().unwrap_or_default().to_vec(),
            timestamp,
        }))
    }

    async fn commit(&self, position: &RecordPosition) -> Result<(), BrokerError> {
        let consumer = self.consumer()?;
        let position = position.clone();

        // 同期コミットはブローカーとの往復を待つためワーカースレッドを塞がない
        tokio::task::spawn_blocking(move || {
            let mut tpl = TopicPartitionList::new();
            tpl.add_partition_offset(
                &position.topic,
                position.partition,
                Offset::Offset(position.next_offset()),
            )
            .map_err(|e| BrokerError::Commit(e.to_string()))?;
            consumer
                .commit(&tpl, CommitMode::Sync)
                .map_err(|e| BrokerError::Commit(e.to_string()))
        })
        .await
        .map_err(|e| BrokerError::Commit(e.to_string()))?
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let consumer = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(consumer) = consumer {
            consumer.unsubscribe();
            tracing::info!("kafka reader closed");
        }
        Ok(())
    }
}
