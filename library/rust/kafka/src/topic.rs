use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Kafka が受け付けるトピック名（英数字・`.`・`_`・`-`、最大 249 文字）。
static TOPIC_NAME: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._-]{1,249}$"));

/// TopicDeclaration は論理トピック名に対応するワイヤー上のトピックを表す。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicDeclaration {
    /// ブローカー上のトピック名
    pub name: String,
    /// パーティション数
    pub partitions: u32,
}

impl TopicDeclaration {
    pub fn new(name: impl Into<String>, partitions: u32) -> Self {
        Self {
            name: name.into(),
            partitions,
        }
    }
}

/// トピック宣言ファイル上の 1 エントリ。partitions は省略可能。
#[derive(Debug, Deserialize)]
struct RawTopic {
    name: String,
    #[serde(default)]
    partitions: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    kafka: RawKafkaSection,
}

#[derive(Debug, Deserialize)]
struct RawKafkaSection {
    #[serde(default)]
    topics: BTreeMap<String, RawTopic>,
}

/// TopicManifest はバージョン管理されたトピック宣言ファイル（topics.yaml）の内容。
///
/// ```yaml
/// kafka:
///   topics:
///     fpl_teams:
///       name: fpl.teams
///       partitions: 3
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicManifest {
    entries: BTreeMap<String, (String, Option<u32>)>,
}

impl TopicManifest {
    /// YAML 文字列からマニフェストを解析する。名前・パーティション数の妥当性もここで検証する。
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let raw: RawManifest = serde_yaml::from_str(yaml)?;
        let mut entries = BTreeMap::new();
        for (logical, topic) in raw.kafka.topics {
            validate_topic_name(&logical, &topic.name)?;
            if topic.partitions == Some(0) {
                return Err(ConfigError::InvalidTopic(format!(
                    "{logical}: partitions must be > 0"
                )));
            }
            entries.insert(logical, (topic.name, topic.partitions));
        }
        Ok(Self { entries })
    }

    /// ファイルからマニフェストを読み込む。
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadTopics {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&data)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// パーティション数が省略された宣言に default_partitions を補って確定させる。
    pub fn resolve(&self, default_partitions: u32) -> BTreeMap<String, TopicDeclaration> {
        self.entries
            .iter()
            .map(|(logical, (name, partitions))| {
                (
                    logical.clone(),
                    TopicDeclaration::new(name.clone(), partitions.unwrap_or(default_partitions)),
                )
            })
            .collect()
    }
}

fn validate_topic_name(logical: &str, name: &str) -> Result<(), ConfigError> {
    let pattern = TOPIC_NAME
        .as_ref()
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    if !pattern.is_match(name) || name == "." || name == ".." {
        return Err(ConfigError::InvalidTopic(format!(
            "{logical}: illegal topic name {name:?}"
        )));
    }
    Ok(())
}
