//! Fake implementations for testing.
//!
//! These implementations use in-memory data structures to simulate the broker,
//! the cache and the store, making them ideal for unit testing without
//! external dependencies. Each fake is cheap to clone; clones share state so a
//! test can keep a handle for inspection while the pipeline owns another.

use crate::backend::traits::{
    Acknowledger, BackendError, BackendResult, CacheStore, Delivery, DeliveryStream, ErrorKind,
    QueueClient, UserStore,
};
use crate::model::InsertRecord;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

// ============================================================================
// FakeQueue
// ============================================================================

#[derive(Clone)]
struct StoredMessage {
    payload: Bytes,
    deliveries: u32,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, StoredMessage>,
    dead_letters: Vec<Bytes>,
    published: u64,
    acked: u64,
    next_tag: u64,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    publish_failures: VecDeque<ErrorKind>,
}

#[derive(Default)]
struct Broker {
    state: Mutex<BrokerState>,
    changed: Notify,
}

impl Broker {
    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().expect("broker mutex poisoned")
    }
}

/// In-process broker with at-least-once semantics.
///
/// Messages move from *ready* to *unacked* on delivery and leave the queue only
/// on ack. A requeueing nack puts the message at the back of the ready list
/// with its delivery counter kept, so the next delivery is flagged as
/// redelivered. A nack without requeue moves it to the dead-letter list.
#[derive(Clone, Default)]
pub struct FakeQueue {
    broker: Arc<Broker>,
}

impl FakeQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` publishes fail with `kind`.
    pub fn fail_next_publishes(&self, count: usize, kind: ErrorKind) {
        self.broker
            .lock()
            .publish_failures
            .extend(std::iter::repeat_n(kind, count));
    }

    /// Place a raw payload on the queue, bypassing the publish failure hook.
    pub fn inject(&self, queue: &str, payload: impl Into<Bytes>) {
        {
            let mut state = self.broker.lock();
            let q = state.queues.entry(queue.to_string()).or_default();
            q.published += 1;
            q.ready.push_back(StoredMessage {
                payload: payload.into(),
                deliveries: 0,
            });
        }
        self.broker.changed.notify_waiters();
    }

    /// Payloads waiting for delivery, oldest first.
    #[must_use]
    pub fn ready(&self, queue: &str) -> Vec<Bytes> {
        self.broker
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn ready_len(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.ready.len())
    }

    #[must_use]
    pub fn unacked_len(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.unacked.len())
    }

    #[must_use]
    pub fn acked_count(&self, queue: &str) -> u64 {
        self.with_queue(queue, |q| q.acked)
    }

    #[must_use]
    pub fn published_count(&self, queue: &str) -> u64 {
        self.with_queue(queue, |q| q.published)
    }

    #[must_use]
    pub fn dead_letters(&self, queue: &str) -> Vec<Bytes> {
        self.broker
            .lock()
            .queues
            .get(queue)
            .map(|q| q.dead_letters.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_declared(&self, queue: &str) -> bool {
        self.broker.lock().queues.contains_key(queue)
    }

    fn with_queue<T: Default>(&self, queue: &str, f: impl FnOnce(&QueueState) -> T) -> T {
        self.broker.lock().queues.get(queue).map(f).unwrap_or_default()
    }
}

struct FakeAcker {
    broker: Arc<Broker>,
    queue: String,
    tag: u64,
    in_flight: Arc<AtomicUsize>,
}

impl FakeAcker {
    fn settle(&self, requeue: Option<bool>) -> BackendResult<()> {
        {
            let mut state = self.broker.lock();
            let q = state.queues.get_mut(&self.queue).ok_or_else(|| {
                BackendError::new(ErrorKind::NotFound, format!("queue {} deleted", self.queue))
            })?;
            let msg = q.unacked.remove(&self.tag).ok_or_else(|| {
                BackendError::new(
                    ErrorKind::InvalidInput,
                    format!("unknown delivery tag {}", self.tag),
                )
            })?;
            match requeue {
                None => q.acked += 1,
                Some(true) => q.ready.push_back(msg),
                Some(false) => q.dead_letters.push(msg.payload),
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.broker.changed.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for FakeAcker {
    async fn ack(&self) -> BackendResult<()> {
        self.settle(None)
    }

    async fn nack(&self, requeue: bool) -> BackendResult<()> {
        self.settle(Some(requeue))
    }
}

#[async_trait]
impl QueueClient for FakeQueue {
    async fn declare_queue(&self, queue: &str) -> BackendResult<()> {
        self.broker.lock().queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: Bytes) -> BackendResult<()> {
        {
            let mut state = self.broker.lock();
            if let Some(kind) = state.publish_failures.pop_front() {
                return Err(BackendError::new(kind, "injected publish failure"));
            }
            let q = state.queues.get_mut(queue).ok_or_else(|| {
                BackendError::new(ErrorKind::NotFound, format!("queue {queue} not declared"))
            })?;
            q.published += 1;
            q.ready.push_back(StoredMessage {
                payload,
                deliveries: 0,
            });
        }
        self.broker.changed.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, queue: &str, prefetch: u16) -> BackendResult<DeliveryStream> {
        if !self.is_declared(queue) {
            return Err(BackendError::new(
                ErrorKind::NotFound,
                format!("queue {queue} not declared"),
            ));
        }
        let broker = Arc::clone(&self.broker);
        let queue = queue.to_string();
        let prefetch = usize::from(prefetch.max(1));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let stream = futures::stream::unfold((), move |()| {
            let broker = Arc::clone(&broker);
            let queue = queue.clone();
            let in_flight = Arc::clone(&in_flight);
            async move {
                loop {
                    let changed = broker.changed.notified();
                    tokio::pin!(changed);
                    changed.as_mut().enable();

                    if in_flight.load(Ordering::SeqCst) < prefetch {
                        let next = {
                            let mut state = broker.lock();
                            let q = state.queues.entry(queue.clone()).or_default();
                            q.ready.pop_front().map(|mut msg| {
                                msg.deliveries += 1;
                                q.next_tag += 1;
                                let tag = q.next_tag;
                                q.unacked.insert(tag, msg.clone());
                                (tag, msg)
                            })
                        };
                        if let Some((tag, msg)) = next {
                            in_flight.fetch_add(1, Ordering::SeqCst);
                            let acker = FakeAcker {
                                broker: Arc::clone(&broker),
                                queue: queue.clone(),
                                tag,
                                in_flight: Arc::clone(&in_flight),
                            };
                            let delivery = Delivery::new(
                                msg.payload,
                                msg.deliveries > 1,
                                Some(msg.deliveries),
                                Box::new(acker),
                            );
                            return Some((Ok(delivery), ()));
                        }
                    }
                    changed.await;
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

// ============================================================================
// FakeCache
// ============================================================================

#[derive(Clone, Default)]
pub struct FakeCache {
    entries: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    unavailable: Arc<AtomicBool>,
}

impl FakeCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .insert(key.into(), value.into());
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .contains_key(key)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// While set, every operation fails with [`ErrorKind::Network`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> BackendResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::new(ErrorKind::Network, "cache unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FakeCache {
    async fn scan_prefix(&self, prefix: &str) -> BackendResult<Vec<String>> {
        self.check()?;
        Ok(self
            .entries
            .lock()
            .expect("cache mutex poisoned")
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, keys: &[String]) -> BackendResult<u64> {
        self.check()?;
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        let removed = keys.iter().filter(|k| entries.remove(*k).is_some()).count();
        drop(entries);
        Ok(removed as u64)
    }
}

// ============================================================================
// FakeStore
// ============================================================================

type RowPredicate = Arc<dyn Fn(&InsertRecord) -> bool + Send + Sync>;

/// In-memory `users` table.
///
/// A batch is rejected as a whole when an injected failure is pending or when
/// any record matches the reject predicate, mirroring a single multi-row
/// statement.
#[derive(Clone, Default)]
pub struct FakeStore {
    rows: Arc<Mutex<Vec<InsertRecord>>>,
    statements: Arc<AtomicUsize>,
    failures: Arc<Mutex<VecDeque<BackendError>>>,
    reject: Arc<Mutex<Option<RowPredicate>>>,
}

impl FakeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` batches with `kind`.
    pub fn fail_next(&self, count: usize, kind: ErrorKind) {
        let mut failures = self.failures.lock().expect("failures mutex poisoned");
        for _ in 0..count {
            failures.push_back(BackendError::new(kind, "injected insert failure"));
        }
    }

    /// Reject every batch containing a record that matches `predicate`.
    pub fn reject_rows_where<F>(&self, predicate: F)
    where
        F: Fn(&InsertRecord) -> bool + Send + Sync + 'static,
    {
        *self.reject.lock().expect("reject mutex poisoned") = Some(Arc::new(predicate));
    }

    #[must_use]
    pub fn rows(&self) -> Vec<InsertRecord> {
        self.rows.lock().expect("rows mutex poisoned").clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().expect("rows mutex poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of insert statements attempted, successful or not.
    #[must_use]
    pub fn statements(&self) -> usize {
        self.statements.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserStore for FakeStore {
    async fn insert_users(&self, records: &[InsertRecord]) -> BackendResult<u64> {
        self.statements.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self
            .failures
            .lock()
            .expect("failures mutex poisoned")
            .pop_front()
        {
            return Err(err);
        }
        let reject = self.reject.lock().expect("reject mutex poisoned").clone();
        if let Some(pred) = reject
            && let Some(bad) = records.iter().position(|r| pred(r))
        {
            return Err(BackendError::new(
                ErrorKind::Rejected,
                format!("row {} of batch violates a constraint", bad + 1),
            ));
        }
        self.rows
            .lock()
            .expect("rows mutex poisoned")
            .extend_from_slice(records);
        Ok(records.len() as u64)
    }
}
