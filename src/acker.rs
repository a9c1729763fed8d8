use std::mem;
use std::sync::Arc;
use std::time::Duration;

use google_cloud_gax::grpc::Status;
use google_cloud_googleapis::pubsub::v1::{AcknowledgeRequest, ModifyAckDeadlineRequest};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::apiv1::subscriber_client::SubscriberClient;
use crate::apiv1::{DEFAULT_RPC_TIMEOUT, MAX_ACK_DEADLINE, MIN_ACK_DEADLINE};
use crate::batch::{
    erase_keys, expiring_keys, populate_ack_ids, populate_ack_keys, split_request_ids,
    split_request_keys, AckIdSet, AckWatch, WatchMap, MAX_REQUEST_PAYLOAD,
};
use crate::distribution::Distribution;
use crate::retry::RetrySetting;

#[derive(Clone, Copy, Debug)]
pub(crate) enum DoneAction {
    Ack,
    Nack,
}

#[derive(Default)]
struct Shared {
    /// Watches for freshly pulled messages, not yet merged into the
    /// keep-alive set. Written by the pull task.
    input: WatchMap,
    /// Ids the user completed since the last ack pass.
    pending_ack: AckIdSet,
    pending_nack: AckIdSet,
}

/// Acknowledgment state of one subscription.
///
/// The pull task feeds `input`, user code feeds the pending sets through
/// [`Acker::done`], and the ack task consumes all three. Each mutation under
/// the mutex is paired with a wake of the ack task so completions are sent
/// promptly. The keep-alive map itself is owned by the ack task and only
/// passed in here, so extension never contends with delivery.
pub(crate) struct Acker {
    subscription: String,
    grace_period: Duration,
    ack_dist: Distribution,
    retry: RetrySetting,
    shared: Mutex<Shared>,
    notify: Arc<Notify>,
}

impl Acker {
    pub(crate) fn new(subscription: String, retry: RetrySetting, notify: Arc<Notify>) -> Self {
        Self {
            subscription,
            grace_period: MIN_ACK_DEADLINE / 2,
            ack_dist: Distribution::new(MAX_ACK_DEADLINE.as_secs()),
            retry,
            shared: Mutex::new(Shared::default()),
            notify,
        }
    }

    pub(crate) fn subscription(&self) -> &str {
        &self.subscription
    }

    /// Registers the deadline watch for a pulled message. Called by the pull
    /// task before the message is handed to the user.
    pub(crate) fn add_deadline_watch(&self, ack_id: String, next_ack: Instant) {
        tracing::trace!("watch deadline: {} {}", self.subscription, ack_id);
        self.shared.lock().input.insert(ack_id, AckWatch::new(next_ack));
        self.notify.notify_one();
    }

    /// Completes a message. Callable from any task; records the handling
    /// latency and moves the id into the matching pending set.
    pub(crate) fn done(&self, ack_id: &str, receive_time: Instant, action: DoneAction) {
        self.ack_dist.record(receive_time.elapsed().as_secs());
        {
            let mut shared = self.shared.lock();
            match action {
                DoneAction::Ack => {
                    shared.pending_nack.remove(ack_id);
                    shared.pending_ack.insert(ack_id.to_string());
                }
                DoneAction::Nack => {
                    shared.pending_ack.remove(ack_id);
                    shared.pending_nack.insert(ack_id.to_string());
                }
            }
        }
        self.notify.notify_one();
    }

    pub(crate) fn input_count(&self) -> usize {
        self.shared.lock().input.len()
    }

    /// Moves freshly pulled watches into the keep-alive map. Ack task only.
    pub(crate) fn merge_input(&self, keep_alive: &mut WatchMap) {
        let mut shared = self.shared.lock();
        keep_alive.extend(shared.input.drain());
    }

    /// 99th percentile of observed handling times, clamped to the deadline
    /// range the broker accepts.
    fn ack_deadline(&self) -> Duration {
        Duration::from_secs(self.ack_dist.percentile(0.99)).clamp(MIN_ACK_DEADLINE, MAX_ACK_DEADLINE)
    }

    /// One ack pass: apply pending acks, pending nacks, then extend whatever
    /// is close to expiry. Returns how long the ack task may sleep before the
    /// next pass is due, `None` meaning "no deadline pressure".
    pub(crate) async fn process(
        &self,
        client: &SubscriberClient,
        keep_alive: &mut WatchMap,
    ) -> Result<Option<Duration>, Status> {
        let (pending_acks, pending_nacks) = {
            let mut shared = self.shared.lock();
            let acks = mem::take(&mut shared.pending_ack);
            let nacks = mem::take(&mut shared.pending_nack);
            // A message can be pulled and completed between this pass's merge
            // and the swap above; its watch is still in `input` then. Drop it
            // here: a completed id must never enter the keep-alive set.
            for id in acks.iter().chain(nacks.iter()) {
                shared.input.remove(id);
            }
            (acks, nacks)
        };

        tracing::debug!(
            "ack pass {}: keep alives {}, acks {}, nacks {}",
            self.subscription,
            keep_alive.len(),
            pending_acks.len(),
            pending_nacks.len()
        );

        // Erase before sending: an id must never be extended after its ack.
        erase_keys(keep_alive, &pending_acks);
        self.send_acks(client, pending_acks).await?;

        erase_keys(keep_alive, &pending_nacks);
        self.send_nacks(client, pending_nacks).await?;

        self.extend_keep_alives(client, keep_alive, self.ack_deadline())
            .await
    }

    async fn send_acks(&self, client: &SubscriberClient, mut ids: AckIdSet) -> Result<(), Status> {
        while !ids.is_empty() {
            let mut batch = split_request_ids(&mut ids, MAX_REQUEST_PAYLOAD);
            let mut ack_ids = Vec::new();
            populate_ack_ids(&mut ack_ids, &mut batch);
            let req = AcknowledgeRequest {
                subscription: self.subscription.clone(),
                ack_ids,
            };
            client.acknowledge(req, &self.retry, DEFAULT_RPC_TIMEOUT).await?;
        }
        Ok(())
    }

    async fn send_nacks(&self, client: &SubscriberClient, mut ids: AckIdSet) -> Result<(), Status> {
        while !ids.is_empty() {
            let mut batch = split_request_ids(&mut ids, MAX_REQUEST_PAYLOAD);
            let mut ack_ids = Vec::new();
            populate_ack_ids(&mut ack_ids, &mut batch);
            // A zero deadline is the broker's "redeliver now".
            let req = ModifyAckDeadlineRequest {
                subscription: self.subscription.clone(),
                ack_deadline_seconds: 0,
                ack_ids,
            };
            client
                .modify_ack_deadline(req, &self.retry, DEFAULT_RPC_TIMEOUT)
                .await?;
        }
        Ok(())
    }

    async fn extend_keep_alives(
        &self,
        client: &SubscriberClient,
        keep_alive: &mut WatchMap,
        new_deadline: Duration,
    ) -> Result<Option<Duration>, Status> {
        let now = Instant::now();
        let (mut due, min_wait) = expiring_keys(keep_alive, self.grace_period, now);
        if due.is_empty() {
            // Half the smallest margin lands the next pass inside the grace period.
            return Ok(min_wait.map(|wait| wait / 2));
        }

        tracing::debug!("extend {} deadline(s): {}", due.len(), self.subscription);
        while !due.is_empty() {
            let batch = split_request_keys(&mut due, MAX_REQUEST_PAYLOAD);
            let mut ack_ids = Vec::new();
            populate_ack_keys(&mut ack_ids, &batch);
            let req = ModifyAckDeadlineRequest {
                subscription: self.subscription.clone(),
                ack_deadline_seconds: new_deadline.as_secs() as i32,
                ack_ids,
            };
            let rpc_time = client
                .modify_ack_deadline(req, &self.retry, DEFAULT_RPC_TIMEOUT)
                .await?;
            let next = rpc_time + new_deadline;
            for id in &batch {
                if let Some(watch) = keep_alive.get_mut(id) {
                    watch.update_next_ack(next);
                }
            }
        }
        Ok(None)
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> (AckIdSet, AckIdSet) {
        let shared = self.shared.lock();
        (shared.pending_ack.clone(), shared.pending_nack.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acker() -> Acker {
        Acker::new(
            "projects/p/subscriptions/s".to_string(),
            RetrySetting::default(),
            Arc::new(Notify::new()),
        )
    }

    #[tokio::test]
    async fn done_moves_ids_between_pending_sets() {
        let acker = acker();
        let now = Instant::now();

        acker.done("a", now, DoneAction::Ack);
        acker.done("b", now, DoneAction::Nack);
        let (acks, nacks) = acker.pending();
        assert!(acks.contains("a") && nacks.contains("b"));

        // The later decision wins.
        acker.done("a", now, DoneAction::Nack);
        let (acks, nacks) = acker.pending();
        assert!(!acks.contains("a") && nacks.contains("a"));
        assert_eq!(nacks.len(), 2);
    }

    #[tokio::test]
    async fn merge_input_drains_into_keep_alive() {
        let acker = acker();
        let next_ack = Instant::now() + MIN_ACK_DEADLINE;
        acker.add_deadline_watch("a".to_string(), next_ack);
        acker.add_deadline_watch("b".to_string(), next_ack);
        assert_eq!(acker.input_count(), 2);

        let mut keep_alive = WatchMap::new();
        acker.merge_input(&mut keep_alive);
        assert_eq!(acker.input_count(), 0);
        assert_eq!(keep_alive.len(), 2);
        assert!(keep_alive.contains_key("a"));
    }

    #[tokio::test]
    async fn ack_deadline_is_clamped_into_the_broker_range() {
        let acker = acker();
        assert_eq!(acker.ack_deadline(), MIN_ACK_DEADLINE);

        for _ in 0..100 {
            acker.ack_dist.record(1_000_000);
        }
        assert_eq!(acker.ack_deadline(), MAX_ACK_DEADLINE);
    }
}
