#![cfg(feature = "logging")]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use mqbridge::{
    Bus, Checkpoint, Event, EventKind, LogWriter, MemoryBroker, MessageClass, NativeField,
    NativeType, Record, StateHandler, Subscribe, SubscriberSet, WriterConfig, WriterEndpoint,
};

struct Forward(mpsc::UnboundedSender<EventKind>);

#[async_trait]
impl Subscribe for Forward {
    async fn on_event(&self, ev: &Event) {
        let _ = self.0.send(ev.kind);
    }

    fn name(&self) -> &'static str {
        "forward"
    }
}

#[tokio::test]
async fn endpoint_events_reach_log_writer_and_custom_subscribers() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();

    let bus = Bus::default();
    let (tx, mut kinds) = mpsc::unbounded_channel();
    let set = Arc::new(SubscriberSet::new(
        vec![
            Arc::new(LogWriter) as Arc<dyn Subscribe>,
            Arc::new(Forward(tx)),
        ],
        bus.clone(),
    ));
    let _listener = set.listen();

    let broker = MemoryBroker::new();
    let cfg = WriterConfig::new(
        "audit-out",
        "audit",
        MessageClass::Text,
        vec![NativeField::new("line", NativeType::String)],
    )
    .in_region("audit.ckp");
    let writer = WriterEndpoint::builder(cfg, Arc::new(broker.clone()))
        .with_bus(bus.clone())
        .build()
        .unwrap();

    writer.initialize().await.unwrap();
    writer.process(Record::new().with("line", "hello")).await.unwrap();
    writer.checkpoint(&mut Checkpoint::new(1)).await.unwrap();

    let mut seen = Vec::new();
    let completed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(kind) = kinds.recv().await {
            seen.push(kind);
            if kind == EventKind::CheckpointCompleted {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    assert!(completed);
    assert_eq!(seen[..2], [EventKind::ConnectStarting, EventKind::Connected]);
    assert_eq!(broker.depth("audit"), 1);
}
