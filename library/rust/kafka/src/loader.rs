use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{split_brokers, BrokerConfig, CompressionType, RequiredAcks};
use crate::env::EnvSource;
use crate::error::ConfigError;
use crate::topic::TopicManifest;

const DEFAULT_TOPICS_FILE: &str = "topics.yaml";
/// トピック宣言ファイルの場所を上書きする環境変数
pub const TOPICS_FILE_VAR: &str = "KAFKA_TOPICS_FILE";

const RETENTION_PREFIX: &str = "TOPICSRETENTION_";
const CONSUMER_GROUP_PREFIX: &str = "CONSUMERSGROUPID_";

/// ConfigLoader は BrokerConfig の読み込み元と優先順位を管理する。
///
/// 優先順位（高い順）: `var` による明示指定 → プロセス環境変数 → `env_files` の先頭から順。
/// トピック宣言ファイルは環境変数とは独立に解析し、最後にマージする。
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_files: Vec<PathBuf>,
    topics_file: Option<PathBuf>,
    process_env: bool,
    overrides: Vec<(String, String)>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// カレントディレクトリの `.env`・親ディレクトリの `.env`・`topics.yaml` を読む既定のローダー。
    pub fn new() -> Self {
        Self {
            env_files: vec![PathBuf::from(".env"), PathBuf::from("../.env")],
            topics_file: None,
            process_env: true,
            overrides: Vec::new(),
        }
    }

    /// `.env` ファイルの一覧を置き換える。先頭ほど優先される。
    pub fn env_files(mut self, paths: Vec<PathBuf>) -> Self {
        self.env_files = paths;
        self
    }

    /// 最も優先度の低い `.env` ファイルを追加する。
    pub fn env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_files.push(path.into());
        self
    }

    pub fn topics_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.topics_file = Some(path.into());
        self
    }

    /// プロセス環境変数を参照しない（テスト用）。
    pub fn without_process_env(mut self) -> Self {
        self.process_env = false;
        self
    }

    /// 変数を明示的に指定する。すべての読み込み元より優先される。
    pub fn var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    /// 変数集合を構築する。
    pub fn env_source(&self) -> Result<EnvSource, ConfigError> {
        let mut env = EnvSource::new();
        if self.process_env {
            // UTF-8 でない変数は対象外
            env.extend(std::env::vars_os().filter_map(|(key, value)| {
                Some((key.into_string().ok()?, value.into_string().ok()?))
            }));
        }
        for path in &self.env_files {
            env.merge_file(path)?;
        }
        env.extend(self.overrides.iter().cloned());
        Ok(env)
    }

    /// 設定スナップショットを構築する。
    pub fn load(&self) -> Result<BrokerConfig, ConfigError> {
        let env = self.env_source()?;

        let topics_path = match &self.topics_file {
            Some(path) => path.clone(),
            None => env
                .non_empty(TOPICS_FILE_VAR)
                .map_or_else(|| PathBuf::from(DEFAULT_TOPICS_FILE), PathBuf::from),
        };
        let manifest = TopicManifest::from_path(&topics_path)?;

        let config = from_env(&env, &manifest)?;
        tracing::debug!(
            brokers = %config.bootstrap_servers(),
            topics = config.topics.len(),
            consumer_groups = config.consumer_groups.len(),
            topics_file = %topics_path.display(),
            "kafka configuration loaded"
        );
        Ok(config)
    }
}

/// 変数集合とトピックマニフェストから BrokerConfig を組み立てる。
pub fn from_env(env: &EnvSource, manifest: &TopicManifest) -> Result<BrokerConfig, ConfigError> {
    let broker = env
        .non_empty("KAFKA_BROKER")
        .ok_or_else(|| ConfigError::MissingVar("KAFKA_BROKER".to_string()))?;

    let mut builder = BrokerConfig::builder().brokers(split_brokers(broker));

    if let Some(code) = env.get("KAFKA_ACKS") {
        builder = builder.acks(RequiredAcks::from_code(code));
    }
    if let Some(retries) = env.parse::<u32>("KAFKA_RETRIES")? {
        builder = builder.retries(retries);
    }
    if let Some(ms) = env.parse::<u64>("KAFKA_RETRY_BACKOFF_MS")? {
        builder = builder.retry_backoff(Duration::from_millis(ms));
    }
    if let Some(ms) = env.parse::<u64>("KAFKA_DELIVERY_TIMEOUT_MS")? {
        builder = builder.delivery_timeout(Duration::from_millis(ms));
    }
    if let Some(size) = env.parse::<usize>("KAFKA_BATCH_SIZE")? {
        builder = builder.batch_size(size);
    }
    if let Some(ms) = env.parse::<u64>("KAFKA_LINGER_MS")? {
        builder = builder.linger(Duration::from_millis(ms));
    }
    if let Some(compression) = env.parse::<CompressionType>("KAFKA_COMPRESSION_TYPE")? {
        builder = builder.compression(compression);
    }
    if let Some(bytes) = env.parse::<usize>("KAFKA_BUFFER_MEMORY")? {
        builder = builder.buffer_memory(bytes);
    }
    let default_partitions = env
        .parse::<u32>("KAFKA_PARTITIONS")?
        .unwrap_or(crate::config::DEFAULT_PARTITIONS);
    builder = builder.default_partitions(default_partitions);
    if let Some(replication) = env.parse::<i16>("KAFKA_REPLICATION")? {
        builder = builder.default_replication(replication);
    }

    for (logical, retention) in env.with_prefix(RETENTION_PREFIX) {
        builder = builder.retention(&logical, &retention);
    }
    for (logical, group_id) in env.with_prefix(CONSUMER_GROUP_PREFIX) {
        builder = builder.consumer_group(&logical, &group_id);
    }

    builder.topics(manifest.resolve(default_partitions)).build()
}

/// 既定のローダーで設定を読み込む。
pub fn load() -> Result<BrokerConfig, ConfigError> {
    ConfigLoader::new().load()
}

/// 設定を読み込み、失敗した場合はプロセスを終了する。
///
/// ブローカーアドレスやトピック宣言の誤りは起動時の欠陥であり、部分的な起動は行わない。
pub fn load_or_abort() -> BrokerConfig {
    match load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "kafka: unable to load configuration");
            eprintln!("kafka: unable to load configuration: {e}");
            std::process::exit(1);
        }
    }
}

/// 指定ディレクトリ配下の `.env` と `topics.yaml` を読むローダーを返す。
pub fn loader_for_dir(dir: &Path) -> ConfigLoader {
    ConfigLoader::new()
        .env_files(vec![dir.join(".env")])
        .topics_file(dir.join(DEFAULT_TOPICS_FILE))
}
