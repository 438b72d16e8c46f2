//! KafkaWriter: rdkafka を使用した BrokerWriter 実装。
//! feature = "kafka" で有効化される。

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tactify_kafka::BrokerConfig;

use crate::broker::BrokerWriter;
use crate::error::BrokerError;
use crate::record::OutgoingRecord;

/// KafkaWriter は rdkafka の FutureProducer を使ったライター。
/// バッチング・再送・応答待ちは librdkafka に任せる。
pub struct KafkaWriter {
    producer: FutureProducer,
    delivery_timeout: Duration,
}

impl KafkaWriter {
    /// BrokerConfig からライターを生成する。
    pub fn new(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.bootstrap_servers())
            .set("acks", config.acks.as_str())
            .set("retries", config.retries.to_string())
            .set("retry.backoff.ms", millis(config.retry_backoff))
            .set("delivery.timeout.ms", millis(config.delivery_timeout))
            .set("batch.num.messages", config.batch_size.to_string())
            .set("linger.ms", millis(config.linger))
            .set("compression.type", config.compression.as_str())
            .set(
                "queue.buffering.max.kbytes",
                (config.buffer_memory / 1024).max(1).to_string(),
            )
            .create()
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(Self {
            producer,
            delivery_timeout: config.delivery_timeout,
        })
    }
}

fn millis(duration: Duration) -> String {
    duration.as_millis().to_string()
}

#[async_trait]
impl BrokerWriter for KafkaWriter {
    async fn write(&self, record: OutgoingRecord) -> Result<(), BrokerError> {
        let mut future_record: FutureRecord<'_, Vec<u8>, Vec<u8>> =
            FutureRecord::to(&record.topic)
                .payload(&record.value)
                .timestamp(record.timestamp.timestamp_millis());
        if let Some(key) = &record.key {
            future_record = future_record.key(key);
        }
        if let Some(partition) = record.partition {
            future_record = future_record.partition(partition);
        }

        // キュー満杯時は待たずに失敗させ、配信の上限は delivery.timeout.ms に任せる
        self.producer
            .send(future_record, Duration::ZERO)
            .await
            .map_err(|(err, _)| BrokerError::Write(err.to_string()))?;

        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let producer = self.producer.clone();
        let timeout = self.delivery_timeout;
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| BrokerError::Write(e.to_string()))?
            .map_err(|e| BrokerError::Write(e.to_string()))
    }
}
