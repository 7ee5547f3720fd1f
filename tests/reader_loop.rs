use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mqbridge::{
    AtomicMetrics, Body, Counter, Cycle, DeliveryMode, MemoryBroker, Message, MessageClass,
    NativeField, NativeType, PropertyMapping, ReaderConfig, ReaderEndpoint, Record, RetryPolicy,
    Value,
};

fn config() -> ReaderConfig {
    let mut cfg = ReaderConfig::new(
        "quotes-in",
        "quotes",
        MessageClass::Map,
        vec![
            NativeField::new("symbol", NativeType::String),
            NativeField::new("price", NativeType::Double),
        ],
    );
    cfg.headers.timestamp = Some("ts".into());
    cfg.headers.redelivered = Some("again".into());
    cfg
}

fn quote(symbol: &str, price: f64) -> Message {
    let mut map = std::collections::BTreeMap::new();
    map.insert("symbol".to_owned(), Value::from(symbol));
    map.insert("price".to_owned(), Value::from(price));
    Message::new(Body::Map(map)).with_timestamp(42)
}

#[tokio::test(start_paused = true)]
async fn maps_headers_and_auto_acknowledges() {
    let broker = MemoryBroker::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<Record>();
    let reader = ReaderEndpoint::builder(config(), Arc::new(broker.clone()), Arc::new(tx))
        .build()
        .unwrap();
    broker.publish("quotes", quote("ACME", 9.5));

    reader.initialize().await.unwrap();
    assert_eq!(reader.poll_once().await.unwrap(), Cycle::Emitted);
    assert_eq!(reader.poll_once().await.unwrap(), Cycle::Idle);

    let record = rx.try_recv().unwrap();
    assert_eq!(record.get("symbol"), Some(&Value::from("ACME")));
    assert_eq!(record.get("ts"), Some(&Value::Long(42)));
    assert_eq!(record.get("again"), Some(&Value::Boolean(false)));
    assert_eq!(broker.depth("quotes"), 0);

    broker.sever();
    assert_eq!(broker.depth("quotes"), 0);
}

#[tokio::test(start_paused = true)]
async fn receive_failure_reconnects_and_continues() {
    let broker = MemoryBroker::new();
    let metrics = Arc::new(AtomicMetrics::default());
    let (tx, mut rx) = mpsc::unbounded_channel::<Record>();
    let reader = ReaderEndpoint::builder(config(), Arc::new(broker.clone()), Arc::new(tx))
        .with_metrics(metrics.clone())
        .build()
        .unwrap();
    broker.publish("quotes", quote("ACME", 1.0));
    reader.initialize().await.unwrap();

    broker.fail_next_receives(1);
    assert_eq!(reader.poll_once().await.unwrap(), Cycle::Reconnected);
    assert_eq!(reader.connection().generation(), 2);
    assert_eq!(reader.poll_once().await.unwrap(), Cycle::Emitted);
    assert!(rx.try_recv().is_ok());
    assert_eq!(metrics.counter(Counter::MessagesRead), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_reconnect_ends_the_loop_with_an_error() {
    let broker = MemoryBroker::new();
    let (tx, _rx) = mpsc::unbounded_channel::<Record>();
    let mut cfg = config();
    cfg.retry = Some(RetryPolicy::NoRetry);
    let reader = ReaderEndpoint::builder(cfg, Arc::new(broker.clone()), Arc::new(tx))
        .build()
        .unwrap();
    reader.initialize().await.unwrap();

    broker.fail_next_receives(1);
    broker.fail_next_connects(1);
    let err = reader.run().await.unwrap_err();
    assert_eq!(err.as_label(), "connection_exhausted");
}

#[tokio::test(start_paused = true)]
async fn run_stops_on_shutdown() {
    let broker = MemoryBroker::new();
    let token = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<Record>();
    let reader = Arc::new(
        ReaderEndpoint::builder(config(), Arc::new(broker.clone()), Arc::new(tx))
            .with_token(token.clone())
            .build()
            .unwrap(),
    );

    let handle = tokio::spawn({
        let reader = Arc::clone(&reader);
        async move { reader.run().await }
    });
    broker.publish("quotes", quote("ACME", 2.0));
    assert!(rx.recv().await.is_some());

    reader.shutdown().await;
    assert!(token.is_cancelled());
    handle.await.unwrap().unwrap();
    assert_eq!(broker.open_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn maps_message_headers_and_properties_into_fields() {
    let broker = MemoryBroker::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<Record>();
    let mut cfg = config();
    cfg.headers.correlation_id = Some("corr".into());
    cfg.headers.priority = Some("prio".into());
    cfg.headers.delivery_mode = Some("mode".into());
    cfg.headers.destination = Some("dest".into());
    cfg.headers.message_type = Some("kind".into());
    cfg.headers.reply_to = Some("reply".into());
    cfg.properties = vec![
        PropertyMapping::new("tenant", "tenant", NativeType::String),
        PropertyMapping::new("prio", "rank", NativeType::String),
        PropertyMapping::new("flag", "flag", NativeType::Int),
        PropertyMapping::new("region", "region", NativeType::Int),
    ];
    let reader = ReaderEndpoint::builder(cfg, Arc::new(broker.clone()), Arc::new(tx))
        .build()
        .unwrap();
    broker.publish(
        "quotes",
        quote("ACME", 9.5)
            .with_correlation_id("c-1")
            .with_type("tick")
            .with_priority(7)
            .with_delivery_mode(DeliveryMode::NonPersistent)
            .with_property("tenant", "acme")
            .with_property("prio", 3i64)
            .with_property("flag", "x"),
    );

    reader.initialize().await.unwrap();
    assert_eq!(reader.poll_once().await.unwrap(), Cycle::Emitted);

    let record = rx.try_recv().unwrap();
    assert_eq!(record.get("corr"), Some(&Value::from("c-1")));
    assert_eq!(record.get("prio"), Some(&Value::Int(7)));
    assert_eq!(record.get("mode"), Some(&Value::Int(1)));
    assert_eq!(record.get("dest"), Some(&Value::from("quotes")));
    assert_eq!(record.get("kind"), Some(&Value::from("tick")));
    assert_eq!(record.get("reply"), None);
    assert_eq!(record.get("tenant"), Some(&Value::from("acme")));
    assert_eq!(record.get("rank"), Some(&Value::from("3")));
    // Unconvertible or absent properties are skipped, not fatal.
    assert_eq!(record.get("flag"), None);
    assert_eq!(record.get("region"), None);
}
