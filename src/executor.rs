use std::collections::HashMap;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::acker::Acker;
use crate::apiv1::subscriber_client::SubscriberClient;
use crate::batch::WatchMap;
use crate::error::Error;
use crate::message::Message;
use crate::metrics::MetricSink;
use crate::puller::Puller;
use crate::retry::RetrySetting;

pub(crate) type CallbackFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub(crate) type Callback = Arc<dyn Fn(Message) -> CallbackFuture + Send + Sync + 'static>;

/// Below this sweep duration the pull loop pads out the iteration, capping the
/// pull rate at ~4 Hz under light load.
const PULL_LOW_RATE_CAP: Duration = Duration::from_millis(250);
const PULL_IDLE_WAIT: Duration = Duration::from_millis(100);
const ACK_IDLE_WAIT: Duration = Duration::from_millis(500);

/// Cross-task inbox of one loop: subscriptions to pick up, subscriptions to
/// drop, and the wake handle. Every mutation notifies the loop so it reacts
/// without waiting out its idle timeout.
struct Inbox<T> {
    shared: Mutex<InboxShared<T>>,
    notify: Arc<Notify>,
}

struct InboxShared<T> {
    input: HashMap<String, T>,
    removed: Vec<String>,
}

impl<T> Inbox<T> {
    fn new() -> Self {
        Self {
            shared: Mutex::new(InboxShared {
                input: HashMap::new(),
                removed: Vec::new(),
            }),
            notify: Arc::new(Notify::new()),
        }
    }

    fn add(&self, name: &str, item: T) {
        self.shared.lock().input.insert(name.to_string(), item);
        self.notify.notify_one();
    }

    fn remove(&self, name: &str) {
        self.shared.lock().removed.push(name.to_string());
        self.notify.notify_one();
    }

    fn drain_removed(&self) -> Vec<String> {
        mem::take(&mut self.shared.lock().removed)
    }

    fn take_input(&self) -> HashMap<String, T> {
        mem::take(&mut self.shared.lock().input)
    }

    fn input_is_empty(&self) -> bool {
        self.shared.lock().input.is_empty()
    }

    fn clear(&self) {
        let mut shared = self.shared.lock();
        shared.input.clear();
        shared.removed.clear();
    }

    async fn notified(&self) {
        self.notify.notified().await
    }
}

pub(crate) struct ExecutorConfig {
    pub(crate) max_prefetch: i32,
    pub(crate) retry: RetrySetting,
}

/// The background engine of a client: one pull task and one ack task, each
/// servicing every active subscription of the client.
pub(crate) struct Executor {
    config: ExecutorConfig,
    pull: Arc<Inbox<Puller>>,
    ack: Arc<Inbox<Arc<Acker>>>,
    metric_sink: Arc<Mutex<Option<Arc<dyn MetricSink>>>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Executor {
    pub(crate) fn start(
        subc: SubscriberClient,
        config: ExecutorConfig,
        metric_sink: Option<Arc<dyn MetricSink>>,
    ) -> Arc<Self> {
        let pull = Arc::new(Inbox::new());
        let ack = Arc::new(Inbox::new());
        let metric_sink = Arc::new(Mutex::new(metric_sink));
        let cancel = CancellationToken::new();

        // The tasks own only their inbox and client, never the executor, so
        // dropping the last client handle tears the engine down.
        let tasks = vec![
            tokio::spawn(pull_loop(Arc::clone(&pull), subc.clone(), cancel.clone())),
            tokio::spawn(ack_loop(
                Arc::clone(&ack),
                subc,
                Arc::clone(&metric_sink),
                cancel.clone(),
            )),
        ];

        Arc::new(Self {
            config,
            pull,
            ack,
            metric_sink,
            cancel,
            tasks: Mutex::new(tasks),
            stopped: AtomicBool::new(false),
        })
    }

    /// Registers a subscription with both loops.
    pub(crate) fn add_receiver(&self, subscription: &str, callback: Callback) -> Result<(), Error> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::Stopped);
        }
        tracing::debug!("add receiver: {subscription}");
        let acker = Arc::new(Acker::new(
            subscription.to_string(),
            self.config.retry,
            Arc::clone(&self.ack.notify),
        ));
        let puller = Puller::new(
            subscription.to_string(),
            self.config.max_prefetch,
            callback,
            Arc::clone(&acker),
        );
        self.pull.add(subscription, puller);
        self.ack.add(subscription, acker);
        Ok(())
    }

    /// Marks a subscription for removal; each loop drops it on its next
    /// iteration. Acks still pending for it are not guaranteed to reach the
    /// broker.
    pub(crate) fn remove_receiver(&self, subscription: &str) {
        tracing::debug!("remove receiver: {subscription}");
        self.pull.remove(subscription);
        self.ack.remove(subscription);
    }

    pub(crate) fn set_metric_sink(&self, sink: Option<Arc<dyn MetricSink>>) {
        *self.metric_sink.lock() = sink;
    }

    /// Cancels both loops and waits for them to finish.
    pub(crate) async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        let tasks = mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        self.pull.clear();
        self.ack.clear();
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn pull_loop(inbox: Arc<Inbox<Puller>>, client: SubscriberClient, cancel: CancellationToken) {
    tracing::debug!("pull loop started");
    let mut active: HashMap<String, Puller> = HashMap::new();

    while !cancel.is_cancelled() {
        // Removals first, unconditionally.
        for name in inbox.drain_removed() {
            active.remove(&name);
        }

        if active.is_empty() && inbox.input_is_empty() {
            let woken = tokio::select! {
                _ = cancel.cancelled() => break,
                result = timeout(PULL_IDLE_WAIT, inbox.notified()) => result.is_ok(),
            };
            if !woken {
                continue;
            }
        }

        active.extend(inbox.take_input());

        let started = Instant::now();
        for puller in active.values() {
            if cancel.is_cancelled() {
                break;
            }
            puller.pull(&client).await;
        }
        let elapsed = started.elapsed();
        tracing::trace!("pull sweep took {elapsed:?}");

        if elapsed < PULL_LOW_RATE_CAP {
            // Wait out the rest of the slot, but stay wakeable for new
            // subscriptions and cancellation.
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timeout(PULL_LOW_RATE_CAP - elapsed, inbox.notified()) => {}
            }
        }
    }
    tracing::debug!("pull loop stopped");
}

struct AckEntry {
    acker: Arc<Acker>,
    /// In-flight watches, owned by the ack task alone.
    keep_alive: WatchMap,
}

async fn ack_loop(
    inbox: Arc<Inbox<Arc<Acker>>>,
    client: SubscriberClient,
    metric_sink: Arc<Mutex<Option<Arc<dyn MetricSink>>>>,
    cancel: CancellationToken,
) {
    tracing::debug!("ack loop started");
    let mut active: HashMap<String, AckEntry> = HashMap::new();
    let mut sleep_hint: Option<Duration> = None;

    while !cancel.is_cancelled() {
        let wait = sleep_hint.unwrap_or(ACK_IDLE_WAIT);

        for name in inbox.drain_removed() {
            active.remove(&name);
        }

        let keep_alive_count: usize = active.values().map(|e| e.keep_alive.len()).sum();
        tracing::trace!("keep alive count: {keep_alive_count}");
        let sink = metric_sink.lock().clone();
        if let Some(sink) = sink {
            sink.on_keep_alive_queue_size(keep_alive_count);
        }

        let input_count: usize = active.values().map(|e| e.acker.input_count()).sum();
        let requested_sleep = sleep_hint.take().is_some();

        if requested_sleep || (input_count == 0 && keep_alive_count == 0) {
            tracing::trace!("ack wait for {wait:?}");
            let timed_out = tokio::select! {
                _ = cancel.cancelled() => break,
                result = timeout(wait, inbox.notified()) => result.is_err(),
            };
            // A plain idle timeout means nothing to do; a requested sleep
            // that timed out means extensions have just come due.
            if !requested_sleep && timed_out {
                continue;
            }
        }

        for (name, acker) in inbox.take_input() {
            active.insert(
                name,
                AckEntry {
                    acker,
                    keep_alive: WatchMap::new(),
                },
            );
        }
        for entry in active.values_mut() {
            entry.acker.merge_input(&mut entry.keep_alive);
        }

        let mut min_hint: Option<Duration> = None;
        for entry in active.values_mut() {
            let acker = Arc::clone(&entry.acker);
            match acker.process(&client, &mut entry.keep_alive).await {
                Ok(Some(hint)) => min_hint = Some(min_hint.map_or(hint, |m| m.min(hint))),
                Ok(None) => {}
                Err(status) => {
                    tracing::error!("ack pass failed: {}: {}", acker.subscription(), status);
                }
            }
        }
        sleep_hint = min_hint;
    }
    tracing::debug!("ack loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inbox_add_then_take() {
        let inbox: Inbox<u32> = Inbox::new();
        assert!(inbox.input_is_empty());
        inbox.add("a", 1);
        inbox.add("b", 2);
        assert!(!inbox.input_is_empty());
        let taken = inbox.take_input();
        assert_eq!(taken.len(), 2);
        assert!(inbox.input_is_empty());
    }

    #[tokio::test]
    async fn inbox_removals_are_drained_once() {
        let inbox: Inbox<u32> = Inbox::new();
        inbox.remove("a");
        inbox.remove("b");
        assert_eq!(inbox.drain_removed(), vec!["a".to_string(), "b".to_string()]);
        assert!(inbox.drain_removed().is_empty());
    }

    #[tokio::test]
    async fn inbox_mutation_stores_a_wakeup() {
        let inbox: Inbox<u32> = Inbox::new();
        inbox.add("a", 1);
        // The stored permit makes the next wait return immediately instead of
        // losing the notification.
        timeout(Duration::from_millis(10), inbox.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn inbox_keeps_the_latest_entry_for_a_name() {
        let inbox: Inbox<u32> = Inbox::new();
        inbox.add("a", 1);
        inbox.add("a", 2);
        let taken = inbox.take_input();
        assert_eq!(taken.get("a"), Some(&2));
    }
}
