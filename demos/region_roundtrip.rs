//! # Example: Region Round Trip
//!
//! A writer and a reader share one [`MemoryBroker`] inside a consistent region.
//!
//! ```text
//! writer.process ×3 ──► (held in transaction) ──► checkpoint 1 ──► ledger + marker
//! reader.poll ×2 ──► checkpoint 1 ──► sever ──► reset(1) ──► drain 2 duplicates ──► poll
//! ```
//!
//! Every record reaches the output exactly once.
//!
//! Run with: `cargo run --example region_roundtrip`

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use mqbridge::{
    Checkpoint, Cycle, MemoryBroker, MessageClass, NativeField, NativeType, ReaderConfig,
    ReaderEndpoint, Record, RegionGate, StateHandler, WriterConfig, WriterEndpoint,
};

const DATA: &str = "ledger";
const CONTROL: &str = "ledger.ckp";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let broker = MemoryBroker::new();
    let schema = vec![NativeField::new("n", NativeType::Long)];

    let cfg = WriterConfig::new("ledger-out", DATA, MessageClass::Stream, schema.clone())
        .in_region(CONTROL);
    let writer = WriterEndpoint::builder(cfg, Arc::new(broker.clone())).build()?;
    writer.initialize().await?;
    for n in 1..=3i64 {
        writer.process(Record::new().with("n", n)).await?;
    }
    println!("[writer] before checkpoint: {} visible", broker.depth(DATA));
    writer.checkpoint(&mut Checkpoint::new(1)).await?;
    println!("[writer] after checkpoint: {} visible", broker.depth(DATA));

    let gate = Arc::new(RegionGate::new(false));
    let (out, mut records) = mpsc::unbounded_channel::<Record>();
    let mut cfg = ReaderConfig::new("ledger-in", DATA, MessageClass::Stream, schema)
        .in_region(None);
    cfg.headers.message_id = Some("id".into());
    let reader = ReaderEndpoint::builder(cfg, Arc::new(broker.clone()), Arc::new(out))
        .with_region(gate.clone())
        .build()?;
    reader.initialize().await?;

    for _ in 0..2 {
        reader.poll_once().await?;
    }
    let mut cp = Checkpoint::new(1);
    {
        let _hold = gate.hold().await;
        reader.checkpoint(&mut cp).await?;
    }

    // The session dies before the next cycle acknowledges the checkpointed messages.
    broker.sever();
    let cycle = reader.poll_once().await?;
    println!("[reader] after sever: {cycle:?}, {} reset(s) requested", gate.reset_requests());

    let restored = Checkpoint::restored(1, cp.data().map(<[u8]>::to_vec).unwrap_or_default());
    {
        let _hold = gate.hold().await;
        reader.reset(&restored).await?;
    }
    while !matches!(reader.poll_once().await?, Cycle::Idle | Cycle::Stopped) {}

    while let Ok(record) = records.try_recv() {
        println!("[output] {:?} n={:?}", record.get("id"), record.get("n"));
    }

    reader.shutdown().await;
    writer.shutdown().await;
    Ok(())
}
