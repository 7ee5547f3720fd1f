use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use mqbridge::{
    AtomicMetrics, Body, BridgeError, Bus, Checkpoint, ConfigError, Counter, Cycle,
    DeliveryFailure, DiscardReason, EventKind, MemoryBroker, Message, MessageClass, NativeField,
    NativeType, ReaderConfig, ReaderEndpoint, Record, RegionGate, RetryPolicy, StateHandler, Value,
};

const SOURCE: &str = "events";

struct Harness {
    broker: MemoryBroker,
    gate: Arc<RegionGate>,
    reader: ReaderEndpoint,
    records: mpsc::UnboundedReceiver<Record>,
    failures: mpsc::UnboundedReceiver<DeliveryFailure>,
    metrics: Arc<AtomicMetrics>,
    bus: Bus,
}

fn config(trigger_count: Option<u64>) -> ReaderConfig {
    let mut cfg = ReaderConfig::new(
        "events-in",
        SOURCE,
        MessageClass::Text,
        vec![NativeField::new("body", NativeType::String)],
    )
    .in_region(trigger_count);
    cfg.headers.message_id = Some("id".into());
    cfg
}

fn harness(trigger: bool, trigger_count: Option<u64>) -> Harness {
    harness_with(config(trigger_count), trigger, CancellationToken::new())
}

fn harness_with(cfg: ReaderConfig, trigger: bool, token: CancellationToken) -> Harness {
    let broker = MemoryBroker::new();
    let gate = Arc::new(RegionGate::new(trigger));
    let metrics = Arc::new(AtomicMetrics::default());
    let bus = Bus::default();
    let (out, records) = mpsc::unbounded_channel();
    let (err, failures) = mpsc::unbounded_channel();

    let reader = ReaderEndpoint::builder(cfg, Arc::new(broker.clone()), Arc::new(out))
        .with_region(gate.clone())
        .with_error_port(Arc::new(err))
        .with_metrics(metrics.clone())
        .with_bus(bus.clone())
        .with_token(token)
        .build()
        .unwrap();
    Harness {
        broker,
        gate,
        reader,
        records,
        failures,
        metrics,
        bus,
    }
}

fn publish(broker: &MemoryBroker, id: &str, timestamp: i64) {
    broker.publish(
        SOURCE,
        Message::new(Body::Text(format!("payload {id}")))
            .with_id(id)
            .with_timestamp(timestamp),
    );
}

fn emitted_ids(records: &mut mpsc::UnboundedReceiver<Record>) -> Vec<String> {
    let mut ids = Vec::new();
    while let Ok(record) = records.try_recv() {
        if let Some(Value::String(id)) = record.get("id") {
            ids.push(id.clone());
        }
    }
    ids
}

async fn take_checkpoint(h: &Harness, id: u64) -> Checkpoint {
    let _hold = h.gate.hold().await;
    let mut cp = Checkpoint::new(id);
    h.reader.checkpoint(&mut cp).await.unwrap();
    cp
}

#[tokio::test(start_paused = true)]
async fn redelivery_after_checkpoint_is_drained() {
    let mut h = harness(false, None);
    for (id, ts) in [("a", 100), ("b", 100), ("c", 100), ("d", 101)] {
        publish(&h.broker, id, ts);
    }
    h.reader.initialize().await.unwrap();
    for _ in 0..3 {
        assert_eq!(h.reader.poll_once().await.unwrap(), Cycle::Emitted);
    }
    let cp = take_checkpoint(&h, 1).await;

    // Connection lost before the next cycle could acknowledge a, b, c.
    h.broker.sever();
    assert_eq!(h.reader.poll_once().await.unwrap(), Cycle::Reconnected);
    assert!(h.gate.reset_requests() >= 1);
    assert_eq!(h.broker.depth(SOURCE), 4);

    let restored = Checkpoint::restored(1, cp.data().unwrap().to_vec());
    h.reader.reset(&restored).await.unwrap();
    assert_eq!(h.metrics.counter(Counter::DuplicatesDiscarded), 3);

    // A second drain over the same window finds nothing to discard.
    h.reader.reset(&restored).await.unwrap();
    assert_eq!(h.metrics.counter(Counter::DuplicatesDiscarded), 3);

    assert_eq!(h.reader.poll_once().await.unwrap(), Cycle::Emitted);
    assert_eq!(emitted_ids(&mut h.records), vec!["a", "b", "c", "d"]);
}

#[tokio::test(start_paused = true)]
async fn drain_reports_discarded_count() {
    let h = harness(false, None);
    let mut events = h.bus.subscribe();
    publish(&h.broker, "a", 7);
    publish(&h.broker, "b", 8);
    h.reader.initialize().await.unwrap();
    h.reader.poll_once().await.unwrap();
    let cp = take_checkpoint(&h, 3).await;

    h.broker.sever();
    h.reader.poll_once().await.unwrap();
    h.reader.reset(&cp).await.unwrap();

    let drained = std::iter::from_fn(|| events.try_recv().ok())
        .find(|ev| ev.kind == EventKind::DrainCompleted)
        .unwrap();
    assert_eq!(drained.count, Some(1));
    assert_eq!(drained.checkpoint_id, Some(3));
}

#[tokio::test(start_paused = true)]
async fn reset_without_snapshot_only_redelivers() {
    let mut h = harness(false, None);
    publish(&h.broker, "a", 1);
    h.reader.initialize().await.unwrap();
    assert_eq!(h.reader.poll_once().await.unwrap(), Cycle::Emitted);

    h.reader.reset(&Checkpoint::new(0)).await.unwrap();
    assert_eq!(h.metrics.counter(Counter::DuplicatesDiscarded), 0);

    assert_eq!(h.reader.poll_once().await.unwrap(), Cycle::Emitted);
    assert_eq!(emitted_ids(&mut h.records), vec!["a", "a"]);
}

#[tokio::test(start_paused = true)]
async fn redelivery_on_a_new_session_is_discarded() {
    let mut h = harness(false, None);
    publish(&h.broker, "a", 100);
    publish(&h.broker, "b", 100);
    h.reader.initialize().await.unwrap();
    h.reader.poll_once().await.unwrap();
    h.reader.poll_once().await.unwrap();

    h.broker.sever();
    assert_eq!(h.reader.poll_once().await.unwrap(), Cycle::Reconnected);
    assert_eq!(h.reader.poll_once().await.unwrap(), Cycle::Duplicate);
    assert_eq!(h.reader.poll_once().await.unwrap(), Cycle::Duplicate);

    publish(&h.broker, "c", 101);
    assert_eq!(h.reader.poll_once().await.unwrap(), Cycle::Emitted);
    assert_eq!(emitted_ids(&mut h.records), vec!["a", "b", "c"]);
    assert_eq!(h.metrics.counter(Counter::MessagesRead), 5);
    assert_eq!(h.metrics.counter(Counter::DuplicatesDiscarded), 2);
}

#[tokio::test(start_paused = true)]
async fn checkpoint_acknowledges_on_the_next_cycle() {
    let h = harness(false, None);
    publish(&h.broker, "a", 1);
    publish(&h.broker, "b", 2);
    h.reader.initialize().await.unwrap();
    h.reader.poll_once().await.unwrap();
    take_checkpoint(&h, 1).await;

    assert_eq!(h.reader.poll_once().await.unwrap(), Cycle::Emitted);
    h.broker.sever();

    let left: Vec<String> = h.broker.snapshot(SOURCE).into_iter().map(|m| m.id).collect();
    assert_eq!(left, vec!["b"]);
}

#[tokio::test(start_paused = true)]
async fn trigger_requests_consistency_every_trigger_count_messages() {
    let h = harness(true, Some(2));
    for (i, id) in ["a", "b", "c", "d", "e"].into_iter().enumerate() {
        publish(&h.broker, id, i as i64 + 1);
    }
    h.reader.initialize().await.unwrap();
    for _ in 0..5 {
        h.reader.poll_once().await.unwrap();
    }
    assert_eq!(h.gate.consistency_requests(), 2);
}

#[tokio::test(start_paused = true)]
async fn undecodable_messages_are_dropped_and_reported() {
    let mut h = harness(false, None);
    h.broker.publish(SOURCE, Message::new(Body::Stream(vec![Value::Int(1)])).with_id("bad"));
    h.broker.publish(SOURCE, Message::new(Body::Bytes(vec![0xff, 0xfe])).with_id("junk"));
    h.reader.initialize().await.unwrap();

    assert_eq!(
        h.reader.poll_once().await.unwrap(),
        Cycle::Dropped(DiscardReason::WrongType)
    );
    assert_eq!(
        h.reader.poll_once().await.unwrap(),
        Cycle::Dropped(DiscardReason::Unreadable)
    );
    assert_eq!(h.metrics.counter(Counter::MessagesDropped), 2);
    assert_eq!(h.failures.try_recv().unwrap().message_id.as_deref(), Some("bad"));
    assert_eq!(h.failures.try_recv().unwrap().message_id.as_deref(), Some("junk"));
    assert!(emitted_ids(&mut h.records).is_empty());
}

#[tokio::test]
async fn closed_region_stops_the_loop() {
    let h = harness(false, None);
    h.reader.initialize().await.unwrap();
    h.gate.close();
    assert_eq!(h.reader.poll_once().await.unwrap(), Cycle::Stopped);
    h.reader.run().await.unwrap();
}

#[test]
fn region_reader_needs_a_region_and_trigger_count() {
    let broker = MemoryBroker::new();
    let (out, _records) = mpsc::unbounded_channel::<Record>();
    let out = Arc::new(out);

    let err = ReaderEndpoint::builder(config(None), Arc::new(broker.clone()), out.clone())
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, ConfigError::Invalid { field: "consistent_region", .. }));

    let err = ReaderEndpoint::builder(config(None), Arc::new(broker), out)
        .with_region(Arc::new(RegionGate::new(true)))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, ConfigError::Invalid { field: "trigger_count", .. }));
}

/// True when the host can take the region barrier without waiting.
async fn barrier_free(gate: &RegionGate) -> bool {
    matches!(timeout(Duration::from_millis(1), gate.hold()).await, Ok(Some(_)))
}

#[tokio::test(start_paused = true)]
async fn failed_session_releases_the_permit_and_waits_for_reset() {
    let mut h = harness(false, None);
    let mut events = h.bus.subscribe();
    publish(&h.broker, "a", 1);
    h.reader.initialize().await.unwrap();
    assert_eq!(h.reader.poll_once().await.unwrap(), Cycle::Emitted);
    let attempts = h.broker.connect_attempts();

    h.broker.sever();
    h.broker.fail_next_connects(u32::MAX);
    assert_eq!(h.reader.poll_once().await.unwrap(), Cycle::ResetPending);
    assert_eq!(h.gate.reset_requests(), 1);
    assert_eq!(h.broker.connect_attempts(), attempts + 1);
    assert!(barrier_free(&h.gate).await);

    // Parked: no permit taken and no further connect attempts until the reset.
    let parked = h.reader.poll_once();
    tokio::pin!(parked);
    assert!(timeout(Duration::from_secs(600), &mut parked).await.is_err());
    assert_eq!(h.broker.connect_attempts(), attempts + 1);
    assert!(barrier_free(&h.gate).await);

    h.broker.fail_next_connects(0);
    {
        let _hold = h.gate.hold().await;
        h.reader.reset_to_initial_state().await.unwrap();
    }
    assert_eq!(parked.await.unwrap(), Cycle::Emitted);
    assert_eq!(emitted_ids(&mut h.records), vec!["a", "a"]);

    let kinds: Vec<EventKind> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|ev| ev.kind)
        .collect();
    assert!(kinds.contains(&EventKind::ResetRequested));
    assert!(kinds.contains(&EventKind::ResetApplied));
}

#[tokio::test(start_paused = true)]
async fn reader_in_region_rejects_retry_policy() {
    let mut cfg = config(None);
    cfg.retry = Some(RetryPolicy::NoRetry);
    let (out, _records) = mpsc::unbounded_channel::<Record>();
    let built = ReaderEndpoint::builder(cfg, Arc::new(MemoryBroker::new()), Arc::new(out))
        .with_region(Arc::new(RegionGate::new(false)))
        .build();
    assert!(matches!(built, Err(ConfigError::Invalid { field: "retry", .. })));
}

#[tokio::test(start_paused = true)]
async fn shutdown_while_receiving_releases_the_permit() {
    let token = CancellationToken::new();
    let h = harness_with(config(None), false, token.clone());
    h.reader.initialize().await.unwrap();

    let cycle = h.reader.poll_once();
    tokio::pin!(cycle);
    assert!(timeout(Duration::from_millis(100), &mut cycle).await.is_err());
    assert!(!barrier_free(&h.gate).await);

    token.cancel();
    assert_eq!(cycle.await.unwrap(), Cycle::Stopped);
    assert!(barrier_free(&h.gate).await);
}

#[tokio::test(start_paused = true)]
async fn closed_output_port_releases_the_permit() {
    let h = harness(false, None);
    drop(h.records);
    publish(&h.broker, "a", 1);
    h.reader.initialize().await.unwrap();

    let err = h.reader.poll_once().await.unwrap_err();
    assert!(matches!(err, BridgeError::Output(_)));
    assert!(barrier_free(&h.gate).await);
}
