//! Stream scheduler - lifecycle of streaming invocations.
//!
//! Every `stream` or `channel` invocation owns one Subscription. The
//! scheduler keeps a table of live Subscriptions indexed by
//! [`SubscriptionId`]; each entry carries the cancellation flag, the
//! sequence counter and the abort handle of the task producing elements.
//!
//! # Architecture
//!
//! ```text
//! producer ─► Emitter ─► mpsc (per Subscription) ─► SubscriptionStream ─► transport
//!               │                                          │
//!               └──────── slot table (id → Slot) ◄─ cancel ┘
//! ```
//!
//! Emission takes the Subscription's state lock, checks that the state is
//! not terminal, and posts the element before releasing it. Cancellation
//! takes the same lock, so a timer firing concurrently with `cancel` either
//! posts before the cancel or observes it and posts nothing. The consumer
//! side additionally stops yielding as soon as the cancelled flag is set.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::error::{DispatchError, Result};
use crate::handler::{EventObserver, TracingObserver};
use crate::message::Message;

/// Identifier of a Subscription, unique per scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Lifecycle state of a Subscription.
///
/// Server streams move `Created → Emitting`, channels `Created → Relaying`;
/// both end in exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Created,
    Emitting,
    Relaying,
    Completed,
    Cancelled,
    Failed,
}

impl SubscriptionState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubscriptionState::Completed | SubscriptionState::Cancelled | SubscriptionState::Failed
        )
    }
}

/// Point-in-time view of a live Subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    pub id: SubscriptionId,
    pub started_at: Instant,
    pub sequence: u64,
    pub cancelled: bool,
    pub state: SubscriptionState,
}

/// Item type of every outbound sequence.
pub type StreamItem = Result<Message>;

/// Table entry for one Subscription.
struct Slot {
    id: SubscriptionId,
    started_at: Instant,
    /// Number of elements emitted so far; also the next stream index.
    sequence: AtomicU64,
    cancelled: AtomicBool,
    state: Mutex<SubscriptionState>,
    abort: Mutex<Option<AbortHandle>>,
}

impl Slot {
    fn new(id: SubscriptionId) -> Self {
        Self {
            id,
            started_at: Instant::now(),
            sequence: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            state: Mutex::new(SubscriptionState::Created),
            abort: Mutex::new(None),
        }
    }

    fn snapshot(&self) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            id: self.id,
            started_at: self.started_at,
            sequence: self.sequence.load(Ordering::Acquire),
            cancelled: self.cancelled.load(Ordering::Acquire),
            state: *lock(&self.state),
        }
    }
}

/// State shared between the scheduler, its emitters and handles.
struct Shared {
    next_id: AtomicU64,
    slots: Mutex<HashMap<SubscriptionId, Arc<Slot>>>,
    observer: Arc<dyn EventObserver>,
}

impl Shared {
    /// Move a slot into a terminal state and drop it from the table.
    ///
    /// Returns false if the slot had already terminated.
    fn finish(&self, slot: &Slot, terminal: SubscriptionState) -> bool {
        {
            let mut state = lock(&slot.state);
            if state.is_terminal() {
                return false;
            }
            *state = terminal;
            if terminal == SubscriptionState::Cancelled {
                slot.cancelled.store(true, Ordering::Release);
            }
        }
        self.release(slot, terminal);
        true
    }

    fn release(&self, slot: &Slot, terminal: SubscriptionState) {
        lock(&self.slots).remove(&slot.id);
        self.observer.on_terminal(slot.id, terminal);
    }

    fn cancel(&self, slot: &Slot) -> bool {
        if !self.finish(slot, SubscriptionState::Cancelled) {
            return false;
        }
        // Dropping the producer future releases its timers.
        if let Some(abort) = lock(&slot.abort).take() {
            abort.abort();
        }
        tracing::debug!("Subscription {} cancelled", slot.id);
        true
    }
}

/// Scheduler owning every live Subscription.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct StreamScheduler {
    shared: Arc<Shared>,
}

impl StreamScheduler {
    /// Create a scheduler reporting to `observer`.
    pub fn new(observer: Arc<dyn EventObserver>) -> Self {
        Self {
            shared: Arc::new(Shared {
                next_id: AtomicU64::new(1),
                slots: Mutex::new(HashMap::new()),
                observer,
            }),
        }
    }

    /// The observer injected at construction.
    pub fn observer(&self) -> &Arc<dyn EventObserver> {
        &self.shared.observer
    }

    /// Open a Subscription and spawn its producer.
    ///
    /// `active` is the state entered once the producer is running
    /// (`Emitting` or `Relaying`). `capacity` bounds the elements buffered
    /// between producer and consumer.
    ///
    /// # Errors
    ///
    /// Returns `HandlerInvocation` when called outside a Tokio runtime.
    pub fn start<F, Fut>(
        &self,
        active: SubscriptionState,
        capacity: usize,
        producer: F,
    ) -> Result<SubscriptionStream>
    where
        F: FnOnce(Emitter) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            DispatchError::HandlerInvocation(
                "streaming invocations require a Tokio runtime".to_string(),
            )
        })?;

        let id = SubscriptionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(Slot::new(id));
        let (tx, rx) = mpsc::channel(capacity.max(1));

        lock(&self.shared.slots).insert(id, slot.clone());
        *lock(&slot.state) = active;

        let emitter = Emitter {
            slot: slot.clone(),
            tx,
            shared: self.shared.clone(),
        };
        let task = runtime.spawn(producer(emitter));
        *lock(&slot.abort) = Some(task.abort_handle());

        tracing::debug!("Subscription {} started ({:?})", id, active);

        Ok(SubscriptionStream {
            rx,
            handle: SubscriptionHandle {
                slot,
                shared: self.shared.clone(),
            },
        })
    }

    /// Number of live Subscriptions.
    pub fn active_count(&self) -> usize {
        lock(&self.shared.slots).len()
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        lock(&self.shared.slots).contains_key(&id)
    }

    /// Snapshot of a live Subscription.
    pub fn snapshot(&self, id: SubscriptionId) -> Option<SubscriptionSnapshot> {
        let slot = lock(&self.shared.slots).get(&id).cloned();
        slot.map(|s| s.snapshot())
    }

    /// Cancel a Subscription by id.
    ///
    /// Idempotent: returns true only for the call that performed the
    /// cancellation.
    pub fn cancel(&self, id: SubscriptionId) -> bool {
        let slot = lock(&self.shared.slots).get(&id).cloned();
        match slot {
            Some(slot) => self.shared.cancel(&slot),
            None => false,
        }
    }

    /// Cancel every live Subscription, returning how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let slots: Vec<Arc<Slot>> = lock(&self.shared.slots).values().cloned().collect();
        slots
            .iter()
            .filter(|slot| self.shared.cancel(slot))
            .count()
    }
}

impl Default for StreamScheduler {
    fn default() -> Self {
        Self::new(Arc::new(TracingObserver))
    }
}

/// Producer side of a Subscription, handed to the spawned task.
pub struct Emitter {
    slot: Arc<Slot>,
    tx: mpsc::Sender<StreamItem>,
    shared: Arc<Shared>,
}

impl Emitter {
    #[inline]
    pub fn id(&self) -> SubscriptionId {
        self.slot.id
    }

    #[inline]
    pub fn started_at(&self) -> Instant {
        self.slot.started_at
    }

    /// Number of elements emitted so far.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.slot.sequence.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.slot.cancelled.load(Ordering::Acquire)
    }

    /// Report an inbound element to the observer.
    pub fn observe_inbound(&self, index: u64, message: &Message) {
        self.shared.observer.on_inbound(self.slot.id, index, message);
    }

    /// Wait for buffer space towards the consumer.
    ///
    /// Returns `None` once the consumer is gone, after marking the
    /// Subscription cancelled.
    pub async fn reserve(&self) -> Option<EmitPermit<'_>> {
        match self.tx.reserve().await {
            Ok(permit) => Some(EmitPermit {
                emitter: self,
                permit,
            }),
            Err(_) => {
                self.shared.finish(&self.slot, SubscriptionState::Cancelled);
                None
            }
        }
    }

    /// Terminate with an error delivered as the last element.
    pub async fn fail(&self, err: DispatchError) {
        if let Some(permit) = self.reserve().await {
            permit.fail(err);
        }
    }

    /// Terminate normally; the consumer sees end-of-sequence once drained.
    pub fn complete(self) {
        if self.shared.finish(&self.slot, SubscriptionState::Completed) {
            tracing::debug!(
                "Subscription {} completed after {} elements",
                self.slot.id,
                self.sequence()
            );
        }
    }
}

/// Reserved slot for exactly one element.
pub struct EmitPermit<'a> {
    emitter: &'a Emitter,
    permit: mpsc::Permit<'a, StreamItem>,
}

impl EmitPermit<'_> {
    /// Post the element built from the current sequence number.
    ///
    /// Returns false, posting nothing, if the Subscription has already
    /// reached a terminal state.
    pub fn send(self, make: impl FnOnce(u64) -> Message) -> bool {
        let emitter = self.emitter;
        let slot = &emitter.slot;
        let state = lock(&slot.state);
        if state.is_terminal() {
            return false;
        }
        let sequence = slot.sequence.fetch_add(1, Ordering::AcqRel);
        let message = make(sequence);
        emitter.shared.observer.on_event(slot.id, &message);
        self.permit.send(Ok(message));
        true
    }

    /// Post a terminal error and move to `Failed`.
    pub fn fail(self, err: DispatchError) {
        let emitter = self.emitter;
        let slot = &emitter.slot;
        {
            let mut state = lock(&slot.state);
            if state.is_terminal() {
                return;
            }
            *state = SubscriptionState::Failed;
            tracing::warn!("Subscription {} failed: {}", slot.id, err);
            self.permit.send(Err(err));
        }
        emitter.shared.release(slot, SubscriptionState::Failed);
    }
}

/// Cancellation hook for one Subscription.
#[derive(Clone)]
pub struct SubscriptionHandle {
    slot: Arc<Slot>,
    shared: Arc<Shared>,
}

impl SubscriptionHandle {
    #[inline]
    pub fn id(&self) -> SubscriptionId {
        self.slot.id
    }

    /// Cancel the Subscription. Safe to call any number of times.
    pub fn cancel(&self) -> bool {
        self.shared.cancel(&self.slot)
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.slot.cancelled.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SubscriptionState {
        *lock(&self.slot.state)
    }

    pub fn snapshot(&self) -> SubscriptionSnapshot {
        self.slot.snapshot()
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.slot.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Consumer side of a Subscription.
///
/// Yields `Ok(Message)` elements, at most one trailing `Err`, then `None`.
/// Dropping the stream cancels the Subscription.
pub struct SubscriptionStream {
    rx: mpsc::Receiver<StreamItem>,
    handle: SubscriptionHandle,
}

impl SubscriptionStream {
    #[inline]
    pub fn id(&self) -> SubscriptionId {
        self.handle.id()
    }

    /// A cancellation hook that outlives borrows of the stream.
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }
}

impl Stream for SubscriptionStream {
    type Item = StreamItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.handle.is_cancelled() {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

impl std::fmt::Debug for SubscriptionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionStream")
            .field("handle", &self.handle)
            .finish()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    async fn count_forever(emitter: Emitter) {
        loop {
            let Some(permit) = emitter.reserve().await else {
                return;
            };
            tokio::time::sleep(Duration::from_millis(10)).await;
            if !permit.send(Message::stream_element) {
                return;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_registers_subscription() {
        let scheduler = StreamScheduler::default();
        let stream = scheduler
            .start(SubscriptionState::Emitting, 4, count_forever)
            .unwrap();

        assert_eq!(scheduler.active_count(), 1);
        let snapshot = scheduler.snapshot(stream.id()).unwrap();
        assert_eq!(snapshot.state, SubscriptionState::Emitting);
        assert_eq!(snapshot.sequence, 0);
        assert!(!snapshot.cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_counts_emissions() {
        let scheduler = StreamScheduler::default();
        let mut stream = scheduler
            .start(SubscriptionState::Emitting, 4, count_forever)
            .unwrap();

        for expected in 0..3 {
            let msg = stream.next().await.unwrap().unwrap();
            assert_eq!(msg.index(), Some(expected));
        }
        assert!(stream.handle().snapshot().sequence >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let scheduler = StreamScheduler::default();
        let mut stream = scheduler
            .start(SubscriptionState::Emitting, 4, count_forever)
            .unwrap();
        let id = stream.id();

        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
        assert!(!stream.cancel());

        assert_eq!(stream.handle().state(), SubscriptionState::Cancelled);
        assert!(!scheduler.contains(id));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_suppresses_buffered_elements() {
        let scheduler = StreamScheduler::default();
        let mut stream = scheduler
            .start(SubscriptionState::Emitting, 16, count_forever)
            .unwrap();

        // Let several elements pile up in the buffer.
        tokio::time::sleep(Duration::from_millis(55)).await;
        stream.cancel();

        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let scheduler = StreamScheduler::default();
        let stream = scheduler
            .start(SubscriptionState::Emitting, 4, count_forever)
            .unwrap();
        let handle = stream.handle();

        drop(stream);

        assert!(handle.is_cancelled());
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_ends_stream() {
        let scheduler = StreamScheduler::default();
        let mut stream = scheduler
            .start(SubscriptionState::Emitting, 4, |emitter| async move {
                if let Some(permit) = emitter.reserve().await {
                    permit.send(Message::stream_element);
                }
                emitter.complete();
            })
            .unwrap();
        let handle = stream.handle();

        assert_eq!(stream.next().await.unwrap().unwrap().index(), Some(0));
        assert!(stream.next().await.is_none());
        assert_eq!(handle.state(), SubscriptionState::Completed);
        // Cancelling a completed Subscription has no effect.
        assert!(!handle.cancel());
        assert_eq!(handle.state(), SubscriptionState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_delivers_error_last() {
        let scheduler = StreamScheduler::default();
        let mut stream = scheduler
            .start(SubscriptionState::Relaying, 4, |emitter| async move {
                emitter
                    .fail(DispatchError::UpstreamFailure("gone".into()))
                    .await;
            })
            .unwrap();
        let handle = stream.handle();

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, DispatchError::UpstreamFailure(_)));
        assert!(stream.next().await.is_none());
        assert_eq!(handle.state(), SubscriptionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let scheduler = StreamScheduler::default();
        let a = scheduler
            .start(SubscriptionState::Emitting, 4, count_forever)
            .unwrap();
        let b = scheduler
            .start(SubscriptionState::Emitting, 4, count_forever)
            .unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(scheduler.cancel_all(), 2);
        assert_eq!(scheduler.cancel_all(), 0);
        assert!(a.is_cancelled() && b.is_cancelled());
    }

    #[test]
    fn test_start_outside_runtime() {
        let scheduler = StreamScheduler::default();
        let result = scheduler.start(SubscriptionState::Emitting, 4, count_forever);
        assert!(matches!(result, Err(DispatchError::HandlerInvocation(_))));
    }
}
