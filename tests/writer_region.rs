use std::sync::Arc;
use std::time::Duration;

use mqbridge::{
    AckMode, AtomicMetrics, BridgeError, Bus, Checkpoint, CheckpointError, CheckpointMarker,
    ConnectionError, EventKind, Gauge, MemoryBroker, MessageClass, NativeField, NativeType,
    Provider, Record, SessionOptions, StateHandler, WriterConfig, WriterEndpoint,
};

const DATA: &str = "ledger";
const CONTROL: &str = "ledger.ckp";

async fn region_writer(
    broker: &MemoryBroker,
    operator_id: &str,
) -> (WriterEndpoint, Arc<AtomicMetrics>, Bus) {
    let cfg = WriterConfig::new(
        operator_id,
        DATA,
        MessageClass::Stream,
        vec![NativeField::new("n", NativeType::Long)],
    )
    .in_region(CONTROL);
    let metrics = Arc::new(AtomicMetrics::default());
    let bus = Bus::default();
    let writer = WriterEndpoint::builder(cfg, Arc::new(broker.clone()))
        .with_metrics(metrics.clone())
        .with_bus(bus.clone())
        .build()
        .unwrap();
    writer.initialize().await.unwrap();
    (writer, metrics, bus)
}

fn entry(n: i64) -> Record {
    Record::new().with("n", n)
}

fn markers(broker: &MemoryBroker) -> Vec<CheckpointMarker> {
    broker
        .snapshot(CONTROL)
        .iter()
        .map(|m| CheckpointMarker::from_message(m).unwrap())
        .collect()
}

async fn checkpoint(writer: &WriterEndpoint, id: u64) -> Result<(), BridgeError> {
    writer.checkpoint(&mut Checkpoint::new(id)).await
}

#[tokio::test(start_paused = true)]
async fn records_become_visible_with_their_marker() {
    let broker = MemoryBroker::new();
    let (writer, metrics, _bus) = region_writer(&broker, "w1").await;
    assert_eq!(broker.connect_attempts(), 1);

    writer.process(entry(1)).await.unwrap();
    writer.process(entry(2)).await.unwrap();
    assert_eq!(broker.depth(DATA), 0);

    checkpoint(&writer, 1).await.unwrap();
    assert_eq!(broker.depth(DATA), 2);
    assert_eq!(markers(&broker), vec![CheckpointMarker::new("w1", 1)]);

    writer.process(entry(3)).await.unwrap();
    checkpoint(&writer, 2).await.unwrap();
    assert_eq!(broker.depth(DATA), 3);
    assert_eq!(markers(&broker), vec![CheckpointMarker::new("w1", 2)]);
    assert_eq!(writer.last_checkpoint().await, 2);
    assert_eq!(metrics.gauge(Gauge::LastCheckpointId), 2);
}

#[tokio::test(start_paused = true)]
async fn replayed_cycle_after_rewind_is_rolled_back() {
    let broker = MemoryBroker::new();
    let (writer, _metrics, bus) = region_writer(&broker, "w1").await;

    for id in 1..=5 {
        writer.process(entry(id as i64)).await.unwrap();
        checkpoint(&writer, id).await.unwrap();
    }
    assert_eq!(broker.depth(DATA), 5);

    writer.reset(&Checkpoint::new(4)).await.unwrap();
    assert_eq!(writer.last_checkpoint().await, 4);

    let mut events = bus.subscribe();
    writer.process(entry(5)).await.unwrap();
    checkpoint(&writer, 6).await.unwrap();

    assert_eq!(broker.depth(DATA), 5);
    assert_eq!(markers(&broker), vec![CheckpointMarker::new("w1", 5)]);
    assert_eq!(writer.last_checkpoint().await, 6);
    let rolled_back = std::iter::from_fn(|| events.try_recv().ok())
        .any(|ev| ev.kind == EventKind::CheckpointRolledBack && ev.checkpoint_id == Some(6));
    assert!(rolled_back);

    writer.process(entry(6)).await.unwrap();
    checkpoint(&writer, 7).await.unwrap();
    assert_eq!(broker.depth(DATA), 6);
    assert_eq!(markers(&broker), vec![CheckpointMarker::new("w1", 7)]);
}

#[tokio::test(start_paused = true)]
async fn lost_marker_fails_the_checkpoint() {
    let broker = MemoryBroker::new();
    let (writer, _metrics, _bus) = region_writer(&broker, "w1").await;
    checkpoint(&writer, 1).await.unwrap();

    let mut thief = broker
        .connect(&SessionOptions::new(CONTROL, AckMode::Auto))
        .await
        .unwrap();
    assert!(thief.receive(Duration::from_millis(10)).await.unwrap().is_some());

    let err = checkpoint(&writer, 2).await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Checkpoint(CheckpointError::MissingMarker {
            checkpoint_id: 2,
            last_successful: 1,
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn writers_sharing_a_control_queue_only_see_their_markers() {
    let broker = MemoryBroker::new();
    let (w1, _, _) = region_writer(&broker, "w1").await;
    let (w2, _, _) = region_writer(&broker, "w2").await;

    checkpoint(&w1, 1).await.unwrap();
    checkpoint(&w2, 1).await.unwrap();
    checkpoint(&w1, 2).await.unwrap();

    let mut found = markers(&broker);
    found.sort_by(|a, b| a.operator_id.cmp(&b.operator_id));
    assert_eq!(
        found,
        vec![CheckpointMarker::new("w1", 2), CheckpointMarker::new("w2", 1)]
    );
}

#[tokio::test]
async fn uncommitted_records_are_never_visible() {
    let broker = MemoryBroker::new();
    let (writer, _metrics, _bus) = region_writer(&broker, "w1").await;

    for n in 0..3 {
        writer.process(entry(n)).await.unwrap();
    }
    writer.shutdown().await;
    drop(writer);

    assert_eq!(broker.depth(DATA), 0);
    assert_eq!(broker.depth(CONTROL), 0);
    assert_eq!(broker.open_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn reset_after_connection_loss_reopens_the_session() {
    let broker = MemoryBroker::new();
    let (writer, _metrics, _bus) = region_writer(&broker, "w1").await;
    writer.process(entry(1)).await.unwrap();

    broker.sever();
    let err = writer.process(entry(2)).await.unwrap_err();
    assert!(matches!(err, BridgeError::Connection(ConnectionError::Provider(_))));

    writer.reset_to_initial_state().await.unwrap();
    assert_eq!(writer.connection().generation(), 2);
    assert_eq!(writer.last_checkpoint().await, 0);

    writer.process(entry(1)).await.unwrap();
    writer.process(entry(2)).await.unwrap();
    checkpoint(&writer, 1).await.unwrap();
    assert_eq!(broker.depth(DATA), 2);
}

#[tokio::test]
async fn region_writer_rejects_retry_configuration() {
    let broker = MemoryBroker::new();
    let mut cfg = WriterConfig::new(
        "w1",
        DATA,
        MessageClass::Stream,
        vec![NativeField::new("n", NativeType::Long)],
    )
    .in_region(CONTROL);
    cfg.retry = Some(mqbridge::RetryPolicy::NoRetry);

    assert!(WriterEndpoint::builder(cfg, Arc::new(broker)).build().is_err());
}
