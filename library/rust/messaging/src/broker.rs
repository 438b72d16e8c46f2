//! ブローカークライアントの抽象化。
//!
//! rdkafka 実装（feature = "kafka"）とインメモリ実装（[`crate::memory`]）が
//! 同じインターフェースを満たすため、購読ループ・発行クライアントはネットワーク I/O なしで検証できる。

use std::time::Duration;

use async_trait::async_trait;

use crate::error::BrokerError;
use crate::record::{OutgoingRecord, Record, RecordPosition};

/// BrokerReader は 1 つのトピック・コンシューマーグループに束縛されたリーダー。
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait BrokerReader: Send + Sync {
    /// 次のレコードを取得する。max_wait 以内に届かなければ `Ok(None)` を返す。
    async fn fetch(&self, max_wait: Duration) -> Result<Option<Record>, BrokerError>;

    /// オフセットをコミットする。同じ位置を複数回コミットしてもよい。
    async fn commit(&self, position: &RecordPosition) -> Result<(), BrokerError>;

    /// リーダーを解放する。以降の fetch は `BrokerError::Closed` を返す。
    async fn close(&self) -> Result<(), BrokerError>;
}

/// BrokerWriter は同期的な書き込みを提供するライター。並行呼び出しに対して安全であること。
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait BrokerWriter: Send + Sync {
    /// レコードを書き込み、必要な応答を受け取るまで待つ。
    async fn write(&self, record: OutgoingRecord) -> Result<(), BrokerError>;

    /// 未送信のレコードをフラッシュしてライターを解放する。
    async fn close(&self) -> Result<(), BrokerError>;
}
