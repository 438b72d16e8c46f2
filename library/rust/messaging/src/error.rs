use std::fmt;

/// BrokerError はブローカークライアント（リーダー・ライター）の失敗を表す。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("broker client is closed")]
    Closed,
}

/// FetchPhase は FetchError が発生した段階を表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Fetch,
    Commit,
}

impl fmt::Display for FetchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch => f.write_str("fetch"),
            Self::Commit => f.write_str("commit"),
        }
    }
}

/// FetchError は購読ループ 1 回分の取得・コミットの失敗。ストリームの終了は意味しない。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{phase} phase: {source}")]
pub struct FetchError {
    pub phase: FetchPhase,
    #[source]
    pub source: BrokerError,
}

impl FetchError {
    pub fn fetch(source: BrokerError) -> Self {
        Self {
            phase: FetchPhase::Fetch,
            source,
        }
    }

    pub fn commit(source: BrokerError) -> Self {
        Self {
            phase: FetchPhase::Commit,
            source,
        }
    }
}

/// MessagingError はメッセージング操作に関するエラーを表す。
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// ネットワーク呼び出し前に検出した入力不備
    #[error("validation error: {0}")]
    Validation(String),

    #[error("model {0} does not implement StructuredMessage")]
    UnsupportedModel(&'static str),

    #[error("failed to encode model for topic {topic}: {source}")]
    Serialization {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("committing message: {0}")]
    Commit(#[source] BrokerError),

    #[error("consumption stream is already subscribed")]
    AlreadySubscribed,

    #[error("consumption stream is closed")]
    Closed,

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Config(#[from] tactify_kafka::ConfigError),
}
