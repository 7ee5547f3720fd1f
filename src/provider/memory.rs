//! # In-process provider.
//!
//! [`MemoryBroker`] keeps named FIFO queues in memory and hands out sessions
//! that behave like a JMS provider's:
//!
//! - **auto-ack**: a received message is consumed;
//! - **client-ack**: received messages stay in flight until `acknowledge`;
//!   `recover` and `close` put them back at the head of their queue, flagged
//!   `redelivered`;
//! - **transacted**: sends are buffered until `commit`; receives are returned
//!   to their queue on `rollback`/`close`.
//!
//! The broker tracks every open session. [`MemoryBroker::sever`] drops them all
//! at once, as if the broker connection went away: in-flight work is
//! redelivered and the old sessions fail with `ConnectionLost`.
//!
//! ## Failure injection
//! `fail_next_connects`, `fail_next_sends`, `fail_next_receives` and
//! `fail_next_commits` make the next `n` calls of that kind fail.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

use crate::error::ProviderError;

use super::message::Message;
use super::selector::Selector;
use super::{AckMode, Provider, ProviderSession, SessionOptions};

type Entry = (String, Message);

#[derive(Default)]
struct Faults {
    connects: u32,
    sends: u32,
    receives: u32,
    commits: u32,
}

fn take_fault(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

/// Uncommitted/unacknowledged work of one session.
#[derive(Default)]
struct Ledger {
    inflight: Vec<Entry>,
    sent: Vec<Entry>,
    received: Vec<Entry>,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, VecDeque<Message>>,
    sessions: HashMap<u64, Ledger>,
    next_session: u64,
    next_message: u64,
    faults: Faults,
}

impl State {
    fn stamp(&mut self, msg: &mut Message) {
        if msg.id.is_empty() {
            self.next_message += 1;
            msg.id = format!("ID:{}", self.next_message);
        }
        if msg.timestamp == 0 {
            msg.timestamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));
        }
    }

    fn enqueue(&mut self, queue: &str, mut msg: Message) {
        if msg.destination.is_empty() {
            msg.destination = queue.to_owned();
        }
        self.queues.entry(queue.to_owned()).or_default().push_back(msg);
    }

    /// Puts messages back at the head of their queues, preserving their order.
    fn requeue(&mut self, entries: Vec<Entry>) {
        for (queue, mut msg) in entries.into_iter().rev() {
            msg.redelivered = true;
            self.queues.entry(queue).or_default().push_front(msg);
        }
    }

    fn release(&mut self, ledger: Ledger) {
        let Ledger {
            mut inflight,
            received,
            ..
        } = ledger;
        inflight.extend(received);
        self.requeue(inflight);
    }

    fn take(&mut self, queue: &str, selector: Option<&Selector>) -> Option<Message> {
        let q = self.queues.get_mut(queue)?;
        let pos = q
            .iter()
            .position(|m| selector.is_none_or(|s| s.matches(m)))?;
        q.remove(pos)
    }
}

struct Shared {
    state: Mutex<State>,
    arrivals: Notify,
    connects: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory broker; cheap to clone (shared state behind an `Arc`).
///
/// ## Example
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use std::time::Duration;
/// use mqbridge::{AckMode, Body, MemoryBroker, Message, Provider, SessionOptions};
///
/// let broker = MemoryBroker::new();
/// broker.publish("orders", Message::new(Body::Text("one".into())));
///
/// let mut session = broker
///     .connect(&SessionOptions::new("orders", AckMode::Client))
///     .await
///     .unwrap();
/// let msg = session.receive(Duration::from_millis(10)).await.unwrap().unwrap();
/// assert_eq!(msg.body, Body::Text("one".into()));
///
/// session.recover().await.unwrap();
/// assert_eq!(broker.depth("orders"), 1);
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Shared {
                state: Mutex::new(State::default()),
                arrivals: Notify::new(),
                connects: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueues a message from outside any session; returns its id.
    pub fn publish(&self, queue: &str, mut message: Message) -> String {
        let id = {
            let mut state = self.inner.lock();
            state.stamp(&mut message);
            let id = message.id.clone();
            state.enqueue(queue, message);
            id
        };
        self.inner.arrivals.notify_waiters();
        id
    }

    /// Copies the current content of a queue, head first.
    pub fn snapshot(&self, queue: &str) -> Vec<Message> {
        self.inner
            .lock()
            .queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of messages waiting in a queue.
    pub fn depth(&self, queue: &str) -> usize {
        self.inner.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Total `connect` calls seen, successful or not.
    pub fn connect_attempts(&self) -> u64 {
        self.inner.connects.load(Ordering::Relaxed)
    }

    /// Sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn fail_next_connects(&self, n: u32) {
        self.inner.lock().faults.connects = n;
    }

    pub fn fail_next_sends(&self, n: u32) {
        self.inner.lock().faults.sends = n;
    }

    pub fn fail_next_receives(&self, n: u32) {
        self.inner.lock().faults.receives = n;
    }

    pub fn fail_next_commits(&self, n: u32) {
        self.inner.lock().faults.commits = n;
    }

    /// Drops every open session as if the broker connection was lost.
    pub fn sever(&self) {
        {
            let mut state = self.inner.lock();
            let ledgers: Vec<Ledger> = state.sessions.drain().map(|(_, l)| l).collect();
            for ledger in ledgers {
                state.release(ledger);
            }
        }
        self.inner.arrivals.notify_waiters();
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MemoryBroker {
    async fn connect(
        &self,
        options: &SessionOptions,
    ) -> Result<Box<dyn ProviderSession>, ProviderError> {
        self.inner.connects.fetch_add(1, Ordering::Relaxed);

        let selector = options
            .selector
            .as_deref()
            .map(Selector::parse)
            .transpose()?;
        let control_selector = options
            .control
            .as_ref()
            .and_then(|c| c.selector.as_deref())
            .map(Selector::parse)
            .transpose()?;

        let id = {
            let mut state = self.inner.lock();
            if take_fault(&mut state.faults.connects) {
                return Err(ProviderError::Refused {
                    reason: "injected connect failure".into(),
                });
            }
            state.next_session += 1;
            let id = state.next_session;
            state.sessions.insert(id, Ledger::default());
            id
        };

        Ok(Box::new(MemorySession {
            shared: Arc::clone(&self.inner),
            id,
            options: options.clone(),
            selector,
            control_selector,
            closed: false,
        }))
    }
}

struct MemorySession {
    shared: Arc<Shared>,
    id: u64,
    options: SessionOptions,
    selector: Option<Selector>,
    control_selector: Option<Selector>,
    closed: bool,
}

impl MemorySession {
    fn ledger<'a>(&self, state: &'a mut State) -> Result<&'a mut Ledger, ProviderError> {
        if self.closed {
            return Err(ProviderError::SessionClosed);
        }
        state
            .sessions
            .get_mut(&self.id)
            .ok_or_else(|| ProviderError::ConnectionLost {
                reason: "broker connection severed".into(),
            })
    }

    fn unsupported(&self, op: &'static str) -> ProviderError {
        ProviderError::Unsupported {
            op,
            mode: self.options.ack_mode.as_label(),
        }
    }

    fn control_target(&self) -> Result<(String, Option<Selector>), ProviderError> {
        let control = self
            .options
            .control
            .as_ref()
            .ok_or(ProviderError::NoControlQueue)?;
        Ok((control.name.clone(), self.control_selector.clone()))
    }

    fn put(&self, queue: String, mut message: Message) -> Result<(), ProviderError> {
        let mut state = self.shared.lock();
        self.ledger(&mut state)?;
        if take_fault(&mut state.faults.sends) {
            return Err(ProviderError::ConnectionLost {
                reason: "injected send failure".into(),
            });
        }
        state.stamp(&mut message);
        if self.options.ack_mode == AckMode::Transacted {
            self.ledger(&mut state)?.sent.push((queue, message));
            return Ok(());
        }
        state.enqueue(&queue, message);
        drop(state);
        self.shared.arrivals.notify_waiters();
        Ok(())
    }

    fn try_take(
        &self,
        queue: &str,
        selector: Option<&Selector>,
    ) -> Result<Option<Message>, ProviderError> {
        let mut state = self.shared.lock();
        self.ledger(&mut state)?;
        if take_fault(&mut state.faults.receives) {
            return Err(ProviderError::ConnectionLost {
                reason: "injected receive failure".into(),
            });
        }
        let Some(msg) = state.take(queue, selector) else {
            return Ok(None);
        };
        let entry = (queue.to_owned(), msg.clone());
        match self.options.ack_mode {
            AckMode::Auto => {}
            AckMode::Client => self.ledger(&mut state)?.inflight.push(entry),
            AckMode::Transacted => self.ledger(&mut state)?.received.push(entry),
        }
        Ok(Some(msg))
    }

    async fn take_within(
        &self,
        queue: &str,
        selector: Option<&Selector>,
        timeout: Duration,
    ) -> Result<Option<Message>, ProviderError> {
        let shared = Arc::clone(&self.shared);
        let deadline = Instant::now() + timeout;
        loop {
            let notified = shared.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(msg) = self.try_take(queue, selector)? {
                return Ok(Some(msg));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            if time::timeout(deadline - now, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}

#[async_trait]
impl ProviderSession for MemorySession {
    async fn send(&mut self, message: Message) -> Result<(), ProviderError> {
        self.put(self.options.destination.clone(), message)
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Option<Message>, ProviderError> {
        let queue = self.options.destination.clone();
        let selector = self.selector.clone();
        self.take_within(&queue, selector.as_ref(), timeout).await
    }

    async fn send_control(&mut self, message: Message) -> Result<(), ProviderError> {
        let (queue, _) = self.control_target()?;
        self.put(queue, message)
    }

    async fn receive_control(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Message>, ProviderError> {
        let (queue, selector) = self.control_target()?;
        self.take_within(&queue, selector.as_ref(), timeout).await
    }

    async fn acknowledge(&mut self) -> Result<(), ProviderError> {
        let mut state = self.shared.lock();
        let ledger = self.ledger(&mut state)?;
        match self.options.ack_mode {
            AckMode::Auto => Ok(()),
            AckMode::Client => {
                ledger.inflight.clear();
                Ok(())
            }
            AckMode::Transacted => Err(self.unsupported("acknowledge")),
        }
    }

    async fn commit(&mut self) -> Result<(), ProviderError> {
        if self.options.ack_mode != AckMode::Transacted {
            return Err(self.unsupported("commit"));
        }
        {
            let mut state = self.shared.lock();
            let ledger = std::mem::take(self.ledger(&mut state)?);
            if take_fault(&mut state.faults.commits) {
                state.release(ledger);
                drop(state);
                self.shared.arrivals.notify_waiters();
                return Err(ProviderError::ConnectionLost {
                    reason: "injected commit failure".into(),
                });
            }
            for (queue, msg) in ledger.sent {
                state.enqueue(&queue, msg);
            }
        }
        self.shared.arrivals.notify_waiters();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), ProviderError> {
        if self.options.ack_mode != AckMode::Transacted {
            return Err(self.unsupported("rollback"));
        }
        {
            let mut state = self.shared.lock();
            let ledger = std::mem::take(self.ledger(&mut state)?);
            state.release(ledger);
        }
        self.shared.arrivals.notify_waiters();
        Ok(())
    }

    async fn recover(&mut self) -> Result<(), ProviderError> {
        match self.options.ack_mode {
            AckMode::Auto => Ok(()),
            AckMode::Transacted => Err(self.unsupported("recover")),
            AckMode::Client => {
                {
                    let mut state = self.shared.lock();
                    let inflight = std::mem::take(&mut self.ledger(&mut state)?.inflight);
                    state.requeue(inflight);
                }
                self.shared.arrivals.notify_waiters();
                Ok(())
            }
        }
    }

    async fn close(&mut self) -> Result<(), ProviderError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        {
            let mut state = self.shared.lock();
            if let Some(ledger) = state.sessions.remove(&self.id) {
                state.release(ledger);
            }
        }
        self.shared.arrivals.notify_waiters();
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let mut state = self.shared.lock();
        if let Some(ledger) = state.sessions.remove(&self.id) {
            state.release(ledger);
        }
        drop(state);
        self.shared.arrivals.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Body;

    const WAIT: Duration = Duration::from_millis(20);

    fn text(s: &str) -> Message {
        Message::new(Body::Text(s.into()))
    }

    fn body_of(msg: &Message) -> &str {
        match &msg.body {
            Body::Text(s) => s,
            other => panic!("unexpected body {other:?}"),
        }
    }

    async fn open(broker: &MemoryBroker, mode: AckMode) -> Box<dyn ProviderSession> {
        broker
            .connect(&SessionOptions::new("q", mode))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_publish_assigns_ids_and_timestamps() {
        let broker = MemoryBroker::new();
        let a = broker.publish("q", text("a"));
        let b = broker.publish("q", text("b").with_id("custom").with_timestamp(5));
        assert_eq!(a, "ID:1");
        assert_eq!(b, "custom");
        let snap = broker.snapshot("q");
        assert!(snap[0].timestamp > 0);
        assert_eq!(snap[1].timestamp, 5);
    }

    #[tokio::test]
    async fn test_auto_ack_consumes_on_receive() {
        let broker = MemoryBroker::new();
        broker.publish("q", text("a"));
        let mut s = open(&broker, AckMode::Auto).await;
        assert!(s.receive(WAIT).await.unwrap().is_some());
        s.recover().await.unwrap();
        assert_eq!(broker.depth("q"), 0);
    }

    #[tokio::test]
    async fn test_client_ack_recover_redelivers_in_order() {
        let broker = MemoryBroker::new();
        for b in ["a", "b", "c"] {
            broker.publish("q", text(b));
        }
        let mut s = open(&broker, AckMode::Client).await;
        let first = s.receive(WAIT).await.unwrap().unwrap();
        s.acknowledge().await.unwrap();
        let _ = s.receive(WAIT).await.unwrap().unwrap();
        let _ = s.receive(WAIT).await.unwrap().unwrap();
        s.recover().await.unwrap();

        assert_eq!(body_of(&first), "a");
        let again = s.receive(WAIT).await.unwrap().unwrap();
        assert_eq!(body_of(&again), "b");
        assert!(again.redelivered);
        assert_eq!(broker.depth("q"), 1);
    }

    #[tokio::test]
    async fn test_transacted_sends_visible_only_after_commit() {
        let broker = MemoryBroker::new();
        let mut s = open(&broker, AckMode::Transacted).await;
        s.send(text("x")).await.unwrap();
        assert_eq!(broker.depth("q"), 0);
        s.commit().await.unwrap();
        assert_eq!(broker.depth("q"), 1);

        s.send(text("y")).await.unwrap();
        s.rollback().await.unwrap();
        s.commit().await.unwrap();
        assert_eq!(broker.depth("q"), 1);
    }

    #[tokio::test]
    async fn test_transacted_rollback_returns_received() {
        let broker = MemoryBroker::new();
        broker.publish("q", text("a"));
        let mut s = open(&broker, AckMode::Transacted).await;
        assert!(s.receive(WAIT).await.unwrap().is_some());
        assert_eq!(broker.depth("q"), 0);
        s.rollback().await.unwrap();
        assert_eq!(broker.depth("q"), 1);
        assert!(broker.snapshot("q")[0].redelivered);
    }

    #[tokio::test]
    async fn test_close_discards_uncommitted_sends() {
        let broker = MemoryBroker::new();
        let mut s = open(&broker, AckMode::Transacted).await;
        s.send(text("x")).await.unwrap();
        s.close().await.unwrap();
        assert_eq!(broker.depth("q"), 0);
        assert_eq!(broker.open_sessions(), 0);
        assert_eq!(s.send(text("z")).await, Err(ProviderError::SessionClosed));
    }

    #[tokio::test]
    async fn test_sever_fails_sessions_and_redelivers() {
        let broker = MemoryBroker::new();
        broker.publish("q", text("a"));
        let mut s = open(&broker, AckMode::Client).await;
        assert!(s.receive(WAIT).await.unwrap().is_some());

        broker.sever();
        assert!(matches!(
            s.receive(WAIT).await,
            Err(ProviderError::ConnectionLost { .. })
        ));
        let mut fresh = open(&broker, AckMode::Client).await;
        let msg = fresh.receive(WAIT).await.unwrap().unwrap();
        assert!(msg.redelivered);
    }

    #[tokio::test]
    async fn test_control_queue_honours_selector() {
        let broker = MemoryBroker::new();
        broker.publish("ctl", Message::default().with_property("owner", "other"));
        broker.publish("ctl", Message::default().with_property("owner", "me"));

        let options = SessionOptions::new("q", AckMode::Transacted)
            .with_control("ctl", Some(Selector::equals_clause("owner", "me")));
        let mut s = broker.connect(&options).await.unwrap();
        let got = s.receive_control(WAIT).await.unwrap().unwrap();
        assert_eq!(got.property("owner").and_then(|v| v.as_str()), Some("me"));
        assert!(s.receive_control(WAIT).await.unwrap().is_none());
        assert_eq!(broker.depth("ctl"), 1);
    }

    #[tokio::test]
    async fn test_unsupported_operations_by_mode() {
        let broker = MemoryBroker::new();
        let mut auto = open(&broker, AckMode::Auto).await;
        assert!(matches!(
            auto.commit().await,
            Err(ProviderError::Unsupported { op: "commit", .. })
        ));
        assert!(matches!(
            auto.receive_control(WAIT).await,
            Err(ProviderError::NoControlQueue)
        ));
        let mut tx = open(&broker, AckMode::Transacted).await;
        assert!(matches!(
            tx.recover().await,
            Err(ProviderError::Unsupported { op: "recover", .. })
        ));
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed() {
        let broker = MemoryBroker::new();
        broker.fail_next_connects(2);
        let opts = SessionOptions::new("q", AckMode::Auto);
        assert!(broker.connect(&opts).await.is_err());
        assert!(broker.connect(&opts).await.is_err());
        let mut s = broker.connect(&opts).await.unwrap();
        assert_eq!(broker.connect_attempts(), 3);

        broker.fail_next_sends(1);
        assert!(s.send(text("a")).await.is_err());
        assert!(s.send(text("a")).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_waits_for_arrival() {
        let broker = MemoryBroker::new();
        let mut s = open(&broker, AckMode::Auto).await;

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            publisher.publish("q", Message::new(Body::Text("late".into())));
        });

        let msg = s.receive(Duration::from_secs(1)).await.unwrap();
        assert!(msg.is_some());
        assert!(s.receive(Duration::from_millis(500)).await.unwrap().is_none());
    }
}
