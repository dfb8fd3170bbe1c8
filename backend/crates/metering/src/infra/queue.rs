//! In-process topic queue
//!
//! FIFO per topic with push/pop/peek and subscriber fan-out. Each topic with
//! pending messages and at least one subscriber gets one Tokio task that
//! drains it in order; the task exits when the topic runs dry and is started
//! again by the next push. Handlers run in their own task so a failing or
//! panicking handler only loses its own message.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::task::JoinHandle;

use crate::domain::value_objects::QueueMessage;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;
pub type Handler = Arc<dyn Fn(QueueMessage) -> HandlerFuture + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue is shut down")]
    ShutDown,
}

struct QueueState {
    active: bool,
    queues: HashMap<String, VecDeque<QueueMessage>>,
    subscribers: HashMap<String, Vec<(u64, Handler)>>,
    loops: HashMap<String, JoinHandle<()>>,
    next_subscriber_id: u64,
}

type SharedState = Arc<Mutex<QueueState>>;

fn lock(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable handle to one shared queue
#[derive(Clone)]
pub struct InMemoryQueue {
    state: SharedState,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("InMemoryQueue")
            .field("active", &state.active)
            .field("topics", &state.queues.len())
            .field("running_loops", &state.loops.len())
            .finish()
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                active: true,
                queues: HashMap::new(),
                subscribers: HashMap::new(),
                loops: HashMap::new(),
                next_subscriber_id: 0,
            })),
        }
    }

    /// Append `message` to its topic and wake the topic's processing loop.
    ///
    /// Never blocks on handlers. Must be called from within a Tokio runtime.
    pub fn push(&self, message: QueueMessage) -> Result<(), QueueError> {
        let mut state = lock(&self.state);
        if !state.active {
            return Err(QueueError::ShutDown);
        }
        let topic = message.topic.clone();
        state.queues.entry(topic.clone()).or_default().push_back(message);
        ensure_loop(&mut state, &topic, &self.state);
        Ok(())
    }

    /// Remove and return the oldest message of `topic`
    pub fn pop(&self, topic: &str) -> Option<QueueMessage> {
        lock(&self.state)
            .queues
            .get_mut(topic)
            .and_then(VecDeque::pop_front)
    }

    /// Return the oldest message of `topic` without removing it
    pub fn peek(&self, topic: &str) -> Option<QueueMessage> {
        lock(&self.state)
            .queues
            .get(topic)
            .and_then(|queue| queue.front().cloned())
    }

    /// Messages waiting in `topic`
    pub fn len(&self, topic: &str) -> usize {
        lock(&self.state).queues.get(topic).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    pub fn is_active(&self) -> bool {
        lock(&self.state).active
    }

    /// Register `handler` for every future message of `topic`.
    ///
    /// Messages already waiting in the topic are delivered as well.
    pub fn subscribe<F, Fut>(&self, topic: &str, handler: F) -> Result<Subscription, QueueError>
    where
        F: Fn(QueueMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |message| -> HandlerFuture { Box::pin(handler(message)) });

        let mut state = lock(&self.state);
        if !state.active {
            return Err(QueueError::ShutDown);
        }
        let id = state.next_subscriber_id;
        state.next_subscriber_id += 1;
        state
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push((id, handler));
        ensure_loop(&mut state, topic, &self.state);

        tracing::debug!(topic, subscriber_id = id, "Queue subscriber registered");
        Ok(Subscription {
            topic: topic.to_string(),
            id,
            state: Arc::downgrade(&self.state),
        })
    }

    /// Stop accepting work, wait for running loops to finish, drop the rest.
    pub async fn shutdown(&self) {
        let loops: Vec<(String, JoinHandle<()>)> = {
            let mut state = lock(&self.state);
            state.active = false;
            state.loops.drain().collect()
        };

        for (topic, handle) in loops {
            if let Err(err) = handle.await {
                tracing::error!(topic = %topic, error = %err, "Queue loop terminated abnormally");
            }
        }

        let dropped: usize = {
            let mut state = lock(&self.state);
            let dropped = state.queues.values().map(VecDeque::len).sum();
            state.queues.clear();
            state.subscribers.clear();
            state.loops.clear();
            dropped
        };
        tracing::info!(dropped_messages = dropped, "Event queue shut down");
    }
}

/// Handle returned by [`InMemoryQueue::subscribe`]
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    id: u64,
    state: Weak<Mutex<QueueState>>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove the handler; messages already being delivered still reach it.
    pub fn unsubscribe(self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut state = lock(&state);
        if let Some(handlers) = state.subscribers.get_mut(&self.topic) {
            handlers.retain(|(id, _)| *id != self.id);
            if handlers.is_empty() {
                state.subscribers.remove(&self.topic);
            }
        }
        tracing::debug!(topic = %self.topic, subscriber_id = self.id, "Queue subscriber removed");
    }
}

// Called with the state lock held. The spawned loop takes the same lock
// before looking at the queue, so its entry in `loops` is always visible.
fn ensure_loop(state: &mut QueueState, topic: &str, shared: &SharedState) {
    let has_work = state.queues.get(topic).is_some_and(|q| !q.is_empty());
    let has_subscribers = state.subscribers.get(topic).is_some_and(|s| !s.is_empty());
    if !state.active || !has_work || !has_subscribers || state.loops.contains_key(topic) {
        return;
    }
    let handle = tokio::spawn(process_topic(Arc::clone(shared), topic.to_string()));
    state.loops.insert(topic.to_string(), handle);
}

async fn process_topic(shared: SharedState, topic: String) {
    loop {
        let (message, handlers) = {
            let mut state = lock(&shared);
            if !state.active {
                break;
            }
            let handlers: Vec<Handler> = state
                .subscribers
                .get(&topic)
                .map(|subs| subs.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default();
            // Leave pending messages for the next subscriber.
            if handlers.is_empty() {
                state.loops.remove(&topic);
                break;
            }
            // Empty check and loop removal under one lock: a concurrent
            // push either lands before this or starts a fresh loop.
            let Some(message) = state.queues.get_mut(&topic).and_then(VecDeque::pop_front) else {
                state.loops.remove(&topic);
                break;
            };
            (message, handlers)
        };

        for handler in handlers {
            let delivered = message.clone();
            let outcome = tokio::spawn(async move { handler(delivered).await }).await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(
                        topic = %topic,
                        key = %message.key,
                        kind = message.kind.as_str(),
                        error = %err,
                        "Queue handler failed"
                    );
                }
                Err(err) => {
                    tracing::error!(
                        topic = %topic,
                        key = %message.key,
                        kind = message.kind.as_str(),
                        error = %err,
                        "Queue handler panicked"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::MessageKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn handled() -> Result<(), HandlerError> {
        Ok(())
    }

    fn msg(topic: &str, key: &str) -> QueueMessage {
        QueueMessage::new(topic, key, MessageKind::Alert)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn test_pop_and_peek_are_fifo() {
        let queue = InMemoryQueue::new();
        queue.push(msg("t", "a")).unwrap();
        queue.push(msg("t", "b")).unwrap();

        assert_eq!(queue.peek("t").unwrap().key, "a");
        assert_eq!(queue.len("t"), 2);
        assert_eq!(queue.pop("t").unwrap().key, "a");
        assert_eq!(queue.pop("t").unwrap().key, "b");
        assert!(queue.pop("t").is_none());
        assert!(queue.peek("other").is_none());
    }

    #[tokio::test]
    async fn test_handlers_see_messages_in_push_order() {
        let queue = InMemoryQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        queue
            .subscribe("t", move |m: QueueMessage| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(m.key);
                    handled()
                }
            })
            .unwrap();

        for i in 0..50 {
            queue.push(msg("t", &i.to_string())).unwrap();
        }

        wait_for(|| seen.lock().unwrap().len() == 50).await;
        let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        assert_eq!(*seen.lock().unwrap(), expected);
        assert!(queue.is_empty("t"));
    }

    #[tokio::test]
    async fn test_failing_and_panicking_handlers_do_not_stop_the_loop() {
        let queue = InMemoryQueue::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&delivered);
        queue
            .subscribe("t", move |m: QueueMessage| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    match m.key.as_str() {
                        "boom" => panic!("handler panic"),
                        "fail" => Err("handler failure".into()),
                        _ => handled(),
                    }
                }
            })
            .unwrap();

        queue.push(msg("t", "boom")).unwrap();
        queue.push(msg("t", "fail")).unwrap();
        queue.push(msg("t", "ok")).unwrap();

        wait_for(|| delivered.load(Ordering::SeqCst) == 3).await;
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_each_message() {
        let queue = InMemoryQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            queue
                .subscribe("t", move |_| {
                    let hits = Arc::clone(&hits);
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        handled()
                    }
                })
                .unwrap();
        }

        queue.push(msg("t", "a")).unwrap();
        queue.push(msg("t", "b")).unwrap();
        wait_for(|| hits.load(Ordering::SeqCst) == 6).await;
    }

    #[tokio::test]
    async fn test_messages_wait_for_a_subscriber() {
        let queue = InMemoryQueue::new();
        queue.push(msg("t", "early")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.len("t"), 1);

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        queue
            .subscribe("t", move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    handled()
                }
            })
            .unwrap();

        wait_for(|| hits.load(Ordering::SeqCst) == 1).await;
        assert!(queue.is_empty("t"));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let queue = InMemoryQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let subscription = queue
            .subscribe("t", move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    handled()
                }
            })
            .unwrap();

        queue.push(msg("t", "a")).unwrap();
        wait_for(|| hits.load(Ordering::SeqCst) == 1).await;

        assert_eq!(subscription.topic(), "t");
        subscription.unsubscribe();
        queue.push(msg("t", "b")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len("t"), 1);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_running_handler_and_rejects_work() {
        let queue = InMemoryQueue::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);
        queue
            .subscribe("t", move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    handled()
                }
            })
            .unwrap();

        queue.push(msg("t", "a")).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        queue.shutdown().await;

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(!queue.is_active());
        assert_eq!(queue.push(msg("t", "late")), Err(QueueError::ShutDown));
        assert!(queue.subscribe("t", |_| async { handled() }).is_err());
    }
}
