//! tactify-messaging: アプリケーションとメッセージブローカーを仲介するライブラリ。
//!
//! トピックからの継続的な受信（[`ConsumptionStream`]）と
//! 同期的な送信（[`PublicationClient`]）を提供する。
//! 接続設定は tactify-kafka が解決した [`tactify_kafka::BrokerConfig`] を使う。

pub mod balancer;
pub mod broker;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod producer;
pub mod record;

#[cfg(feature = "kafka")]
pub mod kafka_consumer;
#[cfg(feature = "kafka")]
pub mod kafka_producer;

pub use balancer::LeastBytesBalancer;
pub use broker::{BrokerReader, BrokerWriter};
pub use consumer::{ConsumerOptions, ConsumptionStream, StartOffset};
pub use error::{BrokerError, FetchError, FetchPhase, MessagingError};
pub use memory::{InMemoryBroker, InMemoryReader, InMemoryWriter};
pub use producer::{Model, PublicationClient, Structured, StructuredMessage};
pub use record::{OutgoingRecord, Record, RecordPosition};

#[cfg(feature = "kafka")]
pub use kafka_consumer::KafkaReader;
#[cfg(feature = "kafka")]
pub use kafka_producer::KafkaWriter;

#[cfg(feature = "mock")]
pub use broker::{MockBrokerReader, MockBrokerWriter};
