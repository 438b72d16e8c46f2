//! tactify-kafka: Kafka ブローカー設定の解決ライブラリ。
//!
//! 環境変数・`.env` ファイル・トピック宣言ファイル（topics.yaml）から
//! 不変の [`BrokerConfig`] スナップショットを構築する。

pub mod config;
pub mod env;
pub mod error;
pub mod loader;
pub mod topic;

pub use config::{BrokerConfig, BrokerConfigBuilder, CompressionType, RequiredAcks};
pub use error::ConfigError;
pub use loader::{load, load_or_abort, loader_for_dir, ConfigLoader};
pub use topic::{TopicDeclaration, TopicManifest};
