use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tactify_kafka::{BrokerConfig, RequiredAcks};

use crate::balancer::LeastBytesBalancer;
use crate::broker::BrokerWriter;
use crate::error::MessagingError;
use crate::record::OutgoingRecord;

/// StructuredMessage は正規 JSON（フィールド名を保持し、既定値のフィールドも含む）に
/// シリアライズできるメッセージ。`serde::Serialize` を実装する型はすべて該当する。
pub trait StructuredMessage: Send + Sync {
    fn encode_canonical(&self) -> Result<Vec<u8>, serde_json::Error>;
}

impl<T: Serialize + Send + Sync> StructuredMessage for T {
    fn encode_canonical(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Model は `publish_with_encoding` に渡すモデル。
///
/// 構造化メッセージとして送信できるモデルは `as_structured` で自身を返す。
pub trait Model: Send + Sync {
    fn as_structured(&self) -> Option<&dyn StructuredMessage> {
        None
    }

    fn model_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl Model for serde_json::Value {
    fn as_structured(&self) -> Option<&dyn StructuredMessage> {
        Some(self)
    }
}

// 生バイト列・文字列は構造化メッセージではない
impl Model for Vec<u8> {}
impl Model for String {}

/// Structured は任意のシリアライズ可能な値を構造化モデルとして包む。
#[derive(Debug, Clone, PartialEq)]
pub struct Structured<T>(pub T);

impl<T: Serialize + Send + Sync> Model for Structured<T> {
    fn as_structured(&self) -> Option<&dyn StructuredMessage> {
        Some(&self.0)
    }

    fn model_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// PublicationClient はトピックへの同期的なレコード発行を提供する。
///
/// ライターは全呼び出しで共有され、並行呼び出しに対して安全。
/// 再送はブローカークライアント内部（BrokerConfig の retries / retry_backoff）に任せ、
/// この層では行わない。
pub struct PublicationClient {
    writer: Arc<dyn BrokerWriter>,
    balancer: LeastBytesBalancer,
    /// ワイヤー上のトピック名 → 宣言済みパーティション数
    partitions: HashMap<String, u32>,
    acks: RequiredAcks,
    batch_size: usize,
    linger: Duration,
}

impl PublicationClient {
    /// 環境から設定を読み込んでクライアントを構築する。設定の誤りはプロセスを終了させる。
    #[cfg(feature = "kafka")]
    pub fn new() -> Result<Self, MessagingError> {
        let config = tactify_kafka::load_or_abort();
        Self::with_config(&config)
    }

    /// rdkafka のライターを生成してクライアントを構築する。
    #[cfg(feature = "kafka")]
    pub fn with_config(config: &BrokerConfig) -> Result<Self, MessagingError> {
        let writer = crate::kafka_producer::KafkaWriter::new(config)?;
        Ok(Self::with_writer(Arc::new(writer), config))
    }

    /// 任意の BrokerWriter からクライアントを構築する。
    pub fn with_writer(writer: Arc<dyn BrokerWriter>, config: &BrokerConfig) -> Self {
        let partitions = config
            .topics
            .values()
            .map(|t| (t.name.clone(), t.partitions))
            .collect();
        Self {
            writer,
            balancer: LeastBytesBalancer::new(),
            partitions,
            acks: config.acks,
            batch_size: config.batch_size,
            linger: config.linger,
        }
    }

    pub fn required_acks(&self) -> RequiredAcks {
        self.acks
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn linger(&self) -> Duration {
        self.linger
    }

    /// 1 件のレコードを発行し、ブローカークライアントの応答条件を満たすまで待つ。
    ///
    /// topic が空の場合はネットワーク呼び出しを行わずにエラーを返す。
    /// ライターのエラーはそのまま返す。
    pub async fn publish(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        value: &[u8],
    ) -> Result<(), MessagingError> {
        if topic.is_empty() {
            return Err(MessagingError::Validation("kafka topic is empty".to_string()));
        }

        let mut record = OutgoingRecord::new(topic, key, value);
        if let Some(&partitions) = self.partitions.get(topic) {
            let partition = self.balancer.select(topic, partitions, record.size());
            record = record.with_partition(partition);
        }

        self.writer.write(record).await?;
        Ok(())
    }

    /// 構造化モデルを正規 JSON にシリアライズして発行する。
    pub async fn publish_with_encoding(
        &self,
        model: &dyn Model,
        topic: &str,
        key: Option<&[u8]>,
    ) -> Result<(), MessagingError> {
        let Some(message) = model.as_structured() else {
            return Err(MessagingError::UnsupportedModel(model.model_name()));
        };

        let payload = message
            .encode_canonical()
            .map_err(|source| MessagingError::Serialization {
                topic: topic.to_string(),
                source,
            })?;

        if let Err(e) = self.publish(topic, key, &payload).await {
            tracing::error!(error = %e, topic = %topic, "kafka: failed to publish");
            return Err(e);
        }

        tracing::debug!(
            topic = %topic,
            key = %String::from_utf8_lossy(key.unwrap_or_default()),
            "message published"
        );
        Ok(())
    }

    /// 未送信のレコードをフラッシュしてライターを解放する。プロセス終了前に呼ぶこと。
    pub async fn close(&self) -> Result<(), MessagingError> {
        self.writer.close().await?;
        Ok(())
    }
}
