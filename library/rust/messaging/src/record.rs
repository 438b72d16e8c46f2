use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Record はブローカーから取得した 1 件のレコードを表す。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// トピック名
    pub topic: String,
    /// パーティション番号
    pub partition: i32,
    /// オフセット
    pub offset: i64,
    /// メッセージキー（パーティション振り分け・ログコンパクション用）
    pub key: Option<Vec<u8>>,
    /// メッセージペイロード
    pub value: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl Record {
    /// コミット対象の位置を返す。
    pub fn position(&self) -> RecordPosition {
        RecordPosition {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
        }
    }

    /// ペイロードを JSON としてデシリアライズする。
    pub fn deserialize_json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.value)
    }
}

/// RecordPosition はトピック・パーティション・オフセットの組。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordPosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl RecordPosition {
    /// コンシューマーグループが次に読むべきオフセット（コミット値）。
    pub fn next_offset(&self) -> i64 {
        self.offset + 1
    }
}

/// OutgoingRecord はライターに渡す送信レコード。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRecord {
    pub topic: String,
    /// 明示的な送信先パーティション。None の場合はブローカークライアントに任せる。
    pub partition: Option<i32>,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl OutgoingRecord {
    pub fn new(topic: impl Into<String>, key: Option<&[u8]>, value: &[u8]) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            key: key.map(<[u8]>::to_vec),
            value: value.to_vec(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    /// キーと値を合わせたバイト数。
    pub fn size(&self) -> usize {
        self.key.as_ref().map_or(0, Vec::len) + self.value.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        Record {
            topic: "fpl.live".to_string(),
            partition: 2,
            offset: 41,
            key: Some(b"event-7".to_vec()),
            value: serde_json::to_vec(&serde_json::json!({"event": 7, "minutes": 90})).unwrap(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_position_and_next_offset() {
        let pos = record().position();
        assert_eq!(pos.topic, "fpl.live");
        assert_eq!(pos.partition, 2);
        assert_eq!(pos.offset, 41);
        assert_eq!(pos.next_offset(), 42);
    }

    #[test]
    fn test_deserialize_json() {
        let parsed: serde_json::Value = record().deserialize_json().unwrap();
        assert_eq!(parsed["event"], 7);
        assert_eq!(parsed["minutes"], 90);
    }

    #[test]
    fn test_outgoing_record_size() {
        let rec = OutgoingRecord::new("t", Some(b"key".as_slice()), b"value");
        assert_eq!(rec.size(), 8);
        assert!(rec.partition.is_none());

        let rec = OutgoingRecord::new("t", None, b"value").with_partition(1);
        assert_eq!(rec.size(), 5);
        assert_eq!(rec.partition, Some(1));
    }
}
