use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::topic::TopicDeclaration;

/// RequiredAcks は書き込み完了とみなすまでに必要なレプリカ応答数を表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequiredAcks {
    /// 応答を待たない
    None,
    /// リーダーのみ
    Leader,
    /// 全 ISR レプリカ
    #[default]
    All,
}

impl RequiredAcks {
    /// 文字列コードから変換する。"0" / "1" 以外はすべて All とする。
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "0" => Self::None,
            "1" => Self::Leader,
            _ => Self::All,
        }
    }

    /// librdkafka の acks プロパティ値を返す。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "0",
            Self::Leader => "1",
            Self::All => "all",
        }
    }
}

impl fmt::Display for RequiredAcks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CompressionType はプロデューサーのバッチ圧縮方式を表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionType {
    #[default]
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

impl CompressionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Snappy => "snappy",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }
}

impl FromStr for CompressionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            "snappy" => Ok(Self::Snappy),
            "lz4" => Ok(Self::Lz4),
            "zstd" => Ok(Self::Zstd),
            other => Err(format!("unsupported compression type: {other}")),
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) const DEFAULT_RETRIES: u32 = 3;
pub(crate) const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;
pub(crate) const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 120_000;
pub(crate) const DEFAULT_BATCH_SIZE: usize = 100;
pub(crate) const DEFAULT_LINGER_MS: u64 = 5;
pub(crate) const DEFAULT_BUFFER_MEMORY: usize = 32 * 1024 * 1024;
pub(crate) const DEFAULT_PARTITIONS: u32 = 3;
pub(crate) const DEFAULT_REPLICATION: i16 = 3;

/// BrokerConfig はプロセス起動時に一度だけ構築される不変の設定スナップショット。
///
/// コンシューマー・プロデューサーは参照で共有し、構築後に変更しない。
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    /// ブローカーアドレスのリスト（例: ["kafka:9092"]）
    pub brokers: Vec<String>,
    pub acks: RequiredAcks,
    /// ブローカークライアント内部での再送回数
    pub retries: u32,
    pub retry_backoff: Duration,
    /// 書き込み 1 件あたりの配信タイムアウト
    pub delivery_timeout: Duration,
    /// 1 バッチあたりの最大メッセージ数
    pub batch_size: usize,
    pub linger: Duration,
    pub compression: CompressionType,
    /// 送信待ちバッファの上限（バイト）
    pub buffer_memory: usize,
    pub default_partitions: u32,
    pub default_replication: i16,
    /// 論理トピック名 → ワイヤー上のトピック
    pub topics: BTreeMap<String, TopicDeclaration>,
    /// 論理トピック名 → 保持期間（ブローカーに渡す文字列のまま保持する）
    pub retention: BTreeMap<String, String>,
    /// 論理コンシューマー名 → コンシューマーグループ ID
    pub consumer_groups: BTreeMap<String, String>,
}

impl BrokerConfig {
    /// ビルダーを取得する。
    pub fn builder() -> BrokerConfigBuilder {
        BrokerConfigBuilder::default()
    }

    /// ブローカーアドレスをカンマ区切り文字列で返す（rdkafka の bootstrap.servers 用）。
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    pub fn topic(&self, logical: &str) -> Option<&TopicDeclaration> {
        self.topics.get(logical)
    }

    /// 論理トピック名からワイヤー上のトピック名を引く。
    pub fn topic_name(&self, logical: &str) -> Option<&str> {
        self.topics.get(logical).map(|t| t.name.as_str())
    }

    pub fn consumer_group(&self, logical: &str) -> Option<&str> {
        self.consumer_groups.get(logical).map(String::as_str)
    }

    pub fn retention(&self, logical: &str) -> Option<&str> {
        self.retention.get(logical).map(String::as_str)
    }

    /// ワイヤー上のトピック名に宣言されたパーティション数を返す。未宣言なら None。
    pub fn partitions_for(&self, wire_name: &str) -> Option<u32> {
        self.topics
            .values()
            .find(|t| t.name == wire_name)
            .map(|t| t.partitions)
    }

    /// 設定の論理的妥当性を検証する。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.brokers.is_empty() {
            return Err(ConfigError::Validation("no brokers configured".to_string()));
        }
        if self.brokers.iter().any(String::is_empty) {
            return Err(ConfigError::Validation("empty broker address".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Validation("batch size must be > 0".to_string()));
        }
        if self.default_partitions == 0 {
            return Err(ConfigError::Validation(
                "default partitions must be > 0".to_string(),
            ));
        }
        if self.default_replication <= 0 {
            return Err(ConfigError::Validation(
                "default replication must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// BrokerConfigBuilder は BrokerConfig のビルダー。
#[derive(Default)]
pub struct BrokerConfigBuilder {
    brokers: Vec<String>,
    acks: Option<RequiredAcks>,
    retries: Option<u32>,
    retry_backoff: Option<Duration>,
    delivery_timeout: Option<Duration>,
    batch_size: Option<usize>,
    linger: Option<Duration>,
    compression: Option<CompressionType>,
    buffer_memory: Option<usize>,
    default_partitions: Option<u32>,
    default_replication: Option<i16>,
    topics: BTreeMap<String, TopicDeclaration>,
    retention: BTreeMap<String, String>,
    consumer_groups: BTreeMap<String, String>,
}

impl BrokerConfigBuilder {
    /// ブローカーアドレスを設定する。カンマ区切りの複数指定も受け付ける。
    pub fn broker(mut self, address: &str) -> Self {
        self.brokers = split_brokers(address);
        self
    }

    pub fn brokers(mut self, brokers: Vec<String>) -> Self {
        self.brokers = brokers;
        self
    }

    pub fn acks(mut self, acks: RequiredAcks) -> Self {
        self.acks = Some(acks);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = Some(backoff);
        self
    }

    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = Some(timeout);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn linger(mut self, linger: Duration) -> Self {
        self.linger = Some(linger);
        self
    }

    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn buffer_memory(mut self, bytes: usize) -> Self {
        self.buffer_memory = Some(bytes);
        self
    }

    pub fn default_partitions(mut self, partitions: u32) -> Self {
        self.default_partitions = Some(partitions);
        self
    }

    pub fn default_replication(mut self, replication: i16) -> Self {
        self.default_replication = Some(replication);
        self
    }

    /// 論理トピックを宣言する。
    pub fn topic(mut self, logical: &str, name: &str, partitions: u32) -> Self {
        self.topics
            .insert(logical.to_string(), TopicDeclaration::new(name, partitions));
        self
    }

    pub fn topics(mut self, topics: BTreeMap<String, TopicDeclaration>) -> Self {
        self.topics.extend(topics);
        self
    }

    pub fn retention(mut self, logical: &str, retention: &str) -> Self {
        self.retention
            .insert(logical.to_string(), retention.to_string());
        self
    }

    pub fn consumer_group(mut self, logical: &str, group_id: &str) -> Self {
        self.consumer_groups
            .insert(logical.to_string(), group_id.to_string());
        self
    }

    /// BrokerConfig を構築する。妥当性検証に失敗した場合はエラーを返す。
    pub fn build(self) -> Result<BrokerConfig, ConfigError> {
        let config = BrokerConfig {
            brokers: self.brokers,
            acks: self.acks.unwrap_or_default(),
            retries: self.retries.unwrap_or(DEFAULT_RETRIES),
            retry_backoff: self
                .retry_backoff
                .unwrap_or(Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS)),
            delivery_timeout: self
                .delivery_timeout
                .unwrap_or(Duration::from_millis(DEFAULT_DELIVERY_TIMEOUT_MS)),
            batch_size: self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            linger: self
                .linger
                .unwrap_or(Duration::from_millis(DEFAULT_LINGER_MS)),
            compression: self.compression.unwrap_or_default(),
            buffer_memory: self.buffer_memory.unwrap_or(DEFAULT_BUFFER_MEMORY),
            default_partitions: self.default_partitions.unwrap_or(DEFAULT_PARTITIONS),
            default_replication: self.default_replication.unwrap_or(DEFAULT_REPLICATION),
            topics: self.topics,
            retention: self.retention,
            consumer_groups: self.consumer_groups,
        };
        config.validate()?;
        Ok(config)
    }
}

pub(crate) fn split_brokers(address: &str) -> Vec<String> {
    address
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_acks_from_code() {
        assert_eq!(RequiredAcks::from_code("0"), RequiredAcks::None);
        assert_eq!(RequiredAcks::from_code("1"), RequiredAcks::Leader);
        assert_eq!(RequiredAcks::from_code("all"), RequiredAcks::All);
        assert_eq!(RequiredAcks::from_code("-1"), RequiredAcks::All);
        assert_eq!(RequiredAcks::from_code(""), RequiredAcks::All);
        assert_eq!(RequiredAcks::from_code("garbage"), RequiredAcks::All);
    }

    #[test]
    fn test_required_acks_as_str() {
        assert_eq!(RequiredAcks::None.as_str(), "0");
        assert_eq!(RequiredAcks::Leader.as_str(), "1");
        assert_eq!(RequiredAcks::All.to_string(), "all");
    }

    #[test]
    fn test_compression_from_str() {
        assert_eq!("".parse::<CompressionType>().unwrap(), CompressionType::None);
        assert_eq!("GZIP".parse::<CompressionType>().unwrap(), CompressionType::Gzip);
        assert_eq!(" zstd ".parse::<CompressionType>().unwrap(), CompressionType::Zstd);
        assert!("brotli".parse::<CompressionType>().is_err());
    }

    #[test]
    fn test_bootstrap_servers_single() {
        let cfg = BrokerConfig::builder().broker("kafka:9092").build().unwrap();
        assert_eq!(cfg.bootstrap_servers(), "kafka:9092");
    }

    #[test]
    fn test_bootstrap_servers_multiple() {
        let cfg = BrokerConfig::builder()
            .broker("kafka-0:9092, kafka-1:9092")
            .build()
            .unwrap();
        assert_eq!(cfg.brokers.len(), 2);
        assert_eq!(cfg.bootstrap_servers(), "kafka-0:9092,kafka-1:9092");
    }

    #[test]
    fn test_builder_defaults() {
        let cfg = BrokerConfig::builder().broker("kafka:9092").build().unwrap();
        assert_eq!(cfg.acks, RequiredAcks::All);
        assert_eq!(cfg.retries, 3);
        assert_eq!(cfg.retry_backoff, Duration::from_millis(100));
        assert_eq!(cfg.delivery_timeout, Duration::from_secs(120));
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.linger, Duration::from_millis(5));
        assert_eq!(cfg.compression, CompressionType::None);
        assert_eq!(cfg.default_partitions, 3);
        assert_eq!(cfg.default_replication, 3);
        assert!(cfg.topics.is_empty());
    }

    #[test]
    fn test_builder_without_broker_fails() {
        let err = BrokerConfig::builder().build().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_builder_rejects_zero_batch_size() {
        let err = BrokerConfig::builder()
            .broker("kafka:9092")
            .batch_size(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("batch size"));
    }

    #[test]
    fn test_lookup_helpers() {
        let cfg = BrokerConfig::builder()
            .broker("kafka:9092")
            .topic("fpl_teams", "fpl.teams", 6)
            .retention("fpl_teams", "604800000")
            .consumer_group("fpl_teams", "fpl-teams-group")
            .build()
            .unwrap();
        assert_eq!(cfg.topic_name("fpl_teams"), Some("fpl.teams"));
        assert_eq!(cfg.topic("fpl_teams").map(|t| t.partitions), Some(6));
        assert_eq!(cfg.partitions_for("fpl.teams"), Some(6));
        assert_eq!(cfg.partitions_for("fpl_teams"), None);
        assert_eq!(cfg.retention("fpl_teams"), Some("604800000"));
        assert_eq!(cfg.consumer_group("fpl_teams"), Some("fpl-teams-group"));
        assert_eq!(cfg.consumer_group("unknown"), None);
    }

    #[test]
    fn test_validate_empty_broker_address() {
        let mut cfg = BrokerConfig::builder().broker("kafka:9092").build().unwrap();
        cfg.brokers.push(String::new());
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }
}
