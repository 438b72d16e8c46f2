use std::path::PathBuf;

/// ConfigError は設定解決の失敗を表す。いずれも起動時の致命的エラーとして扱う。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read env file {}: {source}", path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("missing required variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidVar {
        key: String,
        value: String,
        reason: String,
    },

    #[error("failed to read topic declarations at {}: {source}", path.display())]
    ReadTopics {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse topic declarations: {0}")]
    ParseTopics(#[from] serde_yaml::Error),

    #[error("invalid topic declaration: {0}")]
    InvalidTopic(String),

    #[error("configuration error: {0}")]
    Validation(String),
}
