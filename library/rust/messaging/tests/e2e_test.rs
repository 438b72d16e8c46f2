use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tactify_kafka::{BrokerConfig, RequiredAcks};
use tactify_messaging::{
    ConsumerOptions, ConsumptionStream, InMemoryBroker, MessagingError, PublicationClient,
    Structured,
};
use tokio_util::sync::CancellationToken;

fn config() -> BrokerConfig {
    BrokerConfig::builder()
        .broker("localhost:9092")
        .acks(RequiredAcks::from_code("1"))
        .topic("teams", "t", 1)
        .build()
        .unwrap()
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Fixture {
    id: u32,
    home_team: String,
    away_team: String,
    finished: bool,
}

#[tokio::test]
async fn test_publish_then_consume_round_trip() {
    let broker = InMemoryBroker::new();
    broker.create_topic("t", 1);
    let config = config();

    let stream = ConsumptionStream::from_reader(
        Arc::new(broker.reader("t", "g")),
        "t",
        "g",
        ConsumerOptions {
            max_wait_ms: 20,
            ..ConsumerOptions::default()
        },
    );
    let (mut records, mut errors) = stream.subscribe(CancellationToken::new()).unwrap();

    let client = PublicationClient::with_writer(Arc::new(broker.writer()), &config);
    assert_eq!(client.required_acks(), RequiredAcks::Leader);
    for (key, value) in [("a", "1"), ("b", "2"), ("c", "3")] {
        client
            .publish("t", Some(key.as_bytes()), value.as_bytes())
            .await
            .unwrap();
    }

    let mut keys = BTreeSet::new();
    for _ in 0..3 {
        let record = tokio::time::timeout(Duration::from_secs(2), records.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.partition, 0);
        keys.insert(record.key.unwrap());
    }
    let expected: BTreeSet<Vec<u8>> = [b"a", b"b", b"c"].iter().map(|k| k.to_vec()).collect();
    assert_eq!(keys, expected);
    assert!(errors.try_recv().is_err());

    client.close().await.unwrap();
    stream.close().await.unwrap();
}

#[tokio::test]
async fn test_structured_model_is_decodable_by_consumer() {
    let broker = InMemoryBroker::new();
    let config = config();
    let client = PublicationClient::with_writer(Arc::new(broker.writer()), &config);

    let fixture = Fixture {
        id: 7,
        home_team: "ARS".to_string(),
        away_team: "CHE".to_string(),
        finished: false,
    };
    client
        .publish_with_encoding(&Structured(&fixture), "t", Some(b"7".as_slice()))
        .await
        .unwrap();

    let stored = broker.records("t");
    assert_eq!(stored.len(), 1);
    let decoded: Fixture = stored[0].deserialize_json().unwrap();
    assert_eq!(decoded, fixture);
    // 既定値のフィールドも出力される
    let raw: serde_json::Value = serde_json::from_slice(&stored[0].value).unwrap();
    assert_eq!(raw["finished"], false);
}

#[tokio::test]
async fn test_publish_after_close_fails() {
    let broker = InMemoryBroker::new();
    let writer = Arc::new(broker.writer());
    let client = PublicationClient::with_writer(writer.clone(), &config());

    client.close().await.unwrap();
    let err = client.publish("t", None, b"late").await.unwrap_err();
    assert!(matches!(
        err,
        MessagingError::Broker(tactify_messaging::BrokerError::Closed)
    ));
    assert!(writer.is_closed());
    assert!(broker.records("t").is_empty());
}
