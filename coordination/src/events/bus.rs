//! Progress reporter
//!
//! Publishers hand events to an unbounded mpsc channel and return at once.
//! A pump task owned by the reporter drains the channel in order, records
//! each non-terminal message as the workflow's `progress`, and fans it out
//! to subscribers.
//!
//! Each subscriber owns a bounded queue; when it falls behind, the oldest
//! non-terminal event is dropped so terminal events always get through.
//! `tokio::sync::broadcast` cannot give that guarantee: a lagging receiver
//! loses whatever is oldest, terminal or not.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::stream::{self, Stream};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, warn};

use super::types::{ProgressEvent, ProgressFilter, ProgressKind};
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::WorkflowId;

/// Default per-subscriber queue capacity
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Shared reference to a ProgressReporter
pub type SharedProgressReporter = Arc<ProgressReporter>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Queue state stays consistent across a panicking holder.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct QueueState {
    events: VecDeque<ProgressEvent>,
    dropped: u64,
}

struct SubscriberQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    filter: ProgressFilter,
}

impl SubscriberQueue {
    fn push(&self, event: ProgressEvent) {
        if !self.filter.matches(&event) {
            return;
        }
        let mut state = lock(&self.state);
        if state.events.len() >= self.capacity {
            match state.events.iter().position(|e| !e.is_terminal()) {
                Some(oldest) => {
                    state.events.remove(oldest);
                    state.dropped += 1;
                    if state.dropped == 1 {
                        warn!(
                            capacity = self.capacity,
                            "Progress subscriber lagging, dropping oldest events"
                        );
                    }
                }
                // Queue is all terminal events: keep them, shed the newcomer
                // unless it is terminal too.
                None if !event.is_terminal() => {
                    state.dropped += 1;
                    return;
                }
                None => {}
            }
        }
        state.events.push_back(event);
        drop(state);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<ProgressEvent> {
        lock(&self.state).events.pop_front()
    }
}

enum PumpMessage {
    Event(ProgressEvent),
    /// Acknowledged once every earlier message has been delivered.
    Flush(oneshot::Sender<()>),
}

/// Publishes workflow progress to the registry and to live subscribers.
pub struct ProgressReporter {
    registry: Arc<WorkflowRegistry>,
    subscribers: Mutex<Vec<Weak<SubscriberQueue>>>,
    buffer: usize,
    tx: mpsc::UnboundedSender<PumpMessage>,
    /// Taken when the pump task starts.
    pending_rx: Mutex<Option<mpsc::UnboundedReceiver<PumpMessage>>>,
}

impl ProgressReporter {
    pub fn new(registry: Arc<WorkflowRegistry>) -> SharedProgressReporter {
        Self::with_buffer(registry, DEFAULT_SUBSCRIBER_BUFFER)
    }

    pub fn with_buffer(registry: Arc<WorkflowRegistry>, buffer: usize) -> SharedProgressReporter {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            registry,
            subscribers: Mutex::new(Vec::new()),
            buffer: buffer.max(1),
            tx,
            pending_rx: Mutex::new(Some(rx)),
        })
    }

    /// Spawn the pump on the current runtime if it is not running yet.
    ///
    /// Outside a runtime this is a no-op; messages wait in the channel until
    /// a later publish starts the pump.
    fn ensure_pump(self: &Arc<Self>) {
        let mut pending = lock(&self.pending_rx);
        if pending.is_none() {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        if let Some(rx) = pending.take() {
            handle.spawn(pump(Arc::downgrade(self), rx));
        }
    }

    fn send(self: &Arc<Self>, message: PumpMessage) {
        self.ensure_pump();
        // Fails only after the pump's runtime shut down; a pending flush
        // then resolves at once.
        let _ = self.tx.send(message);
    }

    /// Queue a status line for `id`.
    pub fn publish(self: &Arc<Self>, id: &WorkflowId, message: impl Into<String>) {
        self.publish_event(ProgressEvent::new(id.clone(), ProgressKind::Status, message));
    }

    /// Queue an event. Never blocks on the registry or on subscribers.
    pub fn publish_event(self: &Arc<Self>, event: ProgressEvent) {
        self.send(PumpMessage::Event(event));
    }

    /// Wait until every event published before this call has been recorded
    /// and handed to subscribers.
    pub async fn flush(self: &Arc<Self>) {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(PumpMessage::Flush(ack_tx));
        let _ = ack_rx.await;
    }

    /// Record a non-terminal message as progress, then fan out.
    ///
    /// Terminal messages are written together with the terminal state, and a
    /// terminal record rejects later writes, so only fan-out happens for
    /// those.
    fn deliver(&self, event: ProgressEvent) {
        if event.kind != ProgressKind::Terminal {
            let message = event.message.clone();
            if let Err(err) = self
                .registry
                .update(&event.workflow_id, |w| w.progress = Some(message))
            {
                debug!(workflow_id = %event.workflow_id, error = %err, "Progress not recorded");
            }
        }
        self.fan_out(event);
    }

    fn fan_out(&self, event: ProgressEvent) {
        let live: Vec<Arc<SubscriberQueue>> = {
            let mut subscribers = lock(&self.subscribers);
            subscribers.retain(|weak| weak.strong_count() > 0);
            subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        for queue in live {
            queue.push(event.clone());
        }
    }

    /// Subscribe to every event delivered from now on.
    pub fn subscribe(&self) -> ProgressSubscription {
        self.subscribe_filtered(ProgressFilter::default())
    }

    pub fn subscribe_filtered(&self, filter: ProgressFilter) -> ProgressSubscription {
        let queue = Arc::new(SubscriberQueue {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity: self.buffer,
            filter,
        });
        lock(&self.subscribers).push(Arc::downgrade(&queue));
        ProgressSubscription { queue }
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|weak| weak.strong_count() > 0);
        subscribers.len()
    }
}

/// Drains the reporter's channel until the reporter is dropped.
async fn pump(reporter: Weak<ProgressReporter>, mut rx: mpsc::UnboundedReceiver<PumpMessage>) {
    while let Some(message) = rx.recv().await {
        let Some(reporter) = reporter.upgrade() else {
            break;
        };
        match message {
            PumpMessage::Event(event) => reporter.deliver(event),
            PumpMessage::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("Progress pump stopped");
}

/// One subscriber's view of the progress stream.
///
/// Dropping it unsubscribes.
pub struct ProgressSubscription {
    queue: Arc<SubscriberQueue>,
}

impl ProgressSubscription {
    /// Next event, waiting as long as needed.
    pub async fn recv(&mut self) -> ProgressEvent {
        loop {
            if let Some(event) = self.queue.pop() {
                return event;
            }
            self.queue.notify.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.queue.pop()
    }

    /// Events shed because this subscriber fell behind.
    pub fn dropped(&self) -> u64 {
        lock(&self.queue.state).dropped
    }

    /// Infinite stream of events.
    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send {
        stream::unfold(self, |mut sub| async move {
            let event = sub.recv().await;
            Some((event, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowStatus;
    use futures::StreamExt;

    fn setup(buffer: usize) -> (Arc<WorkflowRegistry>, SharedProgressReporter, WorkflowId) {
        let registry = Arc::new(WorkflowRegistry::new());
        let id = registry.create("task", "coding", 1).unwrap();
        let reporter = ProgressReporter::with_buffer(registry.clone(), buffer);
        (registry, reporter, id)
    }

    #[tokio::test]
    async fn test_publish_updates_registry_and_subscribers() {
        let (registry, reporter, id) = setup(8);
        let mut sub = reporter.subscribe();

        reporter.publish(&id, "attempt 1 on tier_1");
        let event = sub.recv().await;
        assert_eq!(event.workflow_id, id);
        assert_eq!(event.message, "attempt 1 on tier_1");
        assert_eq!(
            registry.get(&id).unwrap().progress.as_deref(),
            Some("attempt 1 on tier_1")
        );
    }

    #[tokio::test]
    async fn test_flush_waits_for_delivery() {
        let (registry, reporter, id) = setup(8);
        let mut sub = reporter.subscribe();

        reporter.publish(&id, "one");
        reporter.publish(&id, "two");
        reporter.flush().await;

        assert_eq!(registry.get(&id).unwrap().progress.as_deref(), Some("two"));
        let got: Vec<String> = std::iter::from_fn(|| sub.try_recv())
            .map(|e| e.message)
            .collect();
        assert_eq!(got, vec!["one", "two"]);
    }

    #[test]
    fn test_publish_outside_runtime_is_delivered_later() {
        let (registry, reporter, id) = setup(8);
        let mut sub = reporter.subscribe();
        reporter.publish(&id, "early");
        assert!(sub.try_recv().is_none());

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(reporter.flush());

        assert_eq!(sub.try_recv().map(|e| e.message).as_deref(), Some("early"));
        assert_eq!(registry.get(&id).unwrap().progress.as_deref(), Some("early"));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let (_registry, reporter, id) = setup(8);
        let mut a = reporter.subscribe();
        let mut b = reporter.subscribe();
        assert_eq!(reporter.subscriber_count(), 2);

        reporter.publish(&id, "hello");
        assert_eq!(a.recv().await.message, "hello");
        assert_eq!(b.recv().await.message, "hello");
    }

    #[test]
    fn test_lagging_subscriber_keeps_terminal_events() {
        let (_registry, reporter, id) = setup(3);
        let mut sub = reporter.subscribe();

        reporter.fan_out(ProgressEvent::new(id.clone(), ProgressKind::Terminal, "done"));
        for i in 0..10 {
            let line = format!("line {i}");
            reporter.fan_out(ProgressEvent::new(id.clone(), ProgressKind::Attempt, line));
        }

        let received: Vec<_> = std::iter::from_fn(|| sub.try_recv()).collect();
        assert_eq!(received.len(), 3);
        assert!(received[0].is_terminal());
        assert_eq!(received[1].message, "line 8");
        assert_eq!(received[2].message, "line 9");
        assert_eq!(sub.dropped(), 8);
    }

    #[tokio::test]
    async fn test_dropped_subscription_does_not_block_others() {
        let (_registry, reporter, id) = setup(2);
        let dead = reporter.subscribe();
        let mut live = reporter.subscribe();
        drop(dead);

        reporter.publish(&id, "still flowing");
        reporter.flush().await;
        assert_eq!(reporter.subscriber_count(), 1);
        assert_eq!(
            live.try_recv().map(|e| e.message).as_deref(),
            Some("still flowing")
        );
    }

    #[tokio::test]
    async fn test_publish_to_terminal_workflow_still_forwards() {
        let (registry, reporter, id) = setup(4);
        registry.update(&id, |w| w.status = WorkflowStatus::Naming).unwrap();
        registry.update(&id, |w| w.status = WorkflowStatus::Running).unwrap();
        registry
            .update(&id, |w| {
                w.status = WorkflowStatus::Completed;
                w.result = Some("ok".into());
            })
            .unwrap();

        let mut sub = reporter.subscribe();
        reporter.publish(&id, "late");
        reporter.flush().await;
        assert_eq!(sub.try_recv().map(|e| e.message).as_deref(), Some("late"));
        assert_eq!(registry.get(&id).unwrap().progress, None);
    }

    #[tokio::test]
    async fn test_terminal_event_does_not_touch_registry() {
        let (registry, reporter, id) = setup(4);
        let mut sub = reporter.subscribe();
        reporter.publish_event(ProgressEvent::new(id.clone(), ProgressKind::Terminal, "done"));
        assert!(sub.recv().await.is_terminal());
        assert_eq!(registry.get(&id).unwrap().progress, None);
    }

    #[tokio::test]
    async fn test_filtered_stream() {
        let (registry, reporter, id) = setup(8);
        let other = registry.create("other", "coding", 1).unwrap();
        let stream = reporter
            .subscribe_filtered(ProgressFilter::new().workflow(&id))
            .into_stream();
        tokio::pin!(stream);

        reporter.publish(&other, "ignored");
        reporter.publish(&id, "first");
        reporter.publish(&id, "second");

        let got: Vec<String> = stream.take(2).map(|e| e.message).collect().await;
        assert_eq!(got, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_recv_waits_for_publish() {
        let (_registry, reporter, id) = setup(8);
        let mut sub = reporter.subscribe();

        let publisher = reporter.clone();
        let handle = tokio::spawn(async move {
            tokio::task::yield_now().await;
            publisher.publish_event(ProgressEvent::new(id, ProgressKind::Terminal, "done"));
        });

        let event = sub.recv().await;
        assert!(event.is_terminal());
        handle.await.unwrap();
    }
}
