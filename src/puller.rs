use std::sync::Arc;
use std::time::Duration;

use google_cloud_googleapis::pubsub::v1::PullRequest;
use tokio::time::Instant;

use crate::acker::Acker;
use crate::apiv1::subscriber_client::SubscriberClient;
use crate::apiv1::{DEFAULT_RPC_TIMEOUT, MIN_ACK_DEADLINE};
use crate::executor::Callback;
use crate::message::Message;

/// Pull-side state of one subscription: issues one bounded pull per sweep and
/// delivers the results to the user callback.
pub(crate) struct Puller {
    subscription: String,
    max_prefetch: i32,
    callback: Callback,
    acker: Arc<Acker>,
}

impl Puller {
    pub(crate) fn new(
        subscription: String,
        max_prefetch: i32,
        callback: Callback,
        acker: Arc<Acker>,
    ) -> Self {
        Self {
            subscription,
            max_prefetch,
            callback,
            acker,
        }
    }

    /// One pull. Failures are logged and superseded by the next sweep.
    pub(crate) async fn pull(&self, client: &SubscriberClient) {
        #[allow(deprecated)]
        let req = PullRequest {
            subscription: self.subscription.clone(),
            return_immediately: true,
            max_messages: self.max_prefetch,
        };

        let response = match client.pull(req, DEFAULT_RPC_TIMEOUT).await {
            Ok(response) => response,
            Err(status) => {
                tracing::error!("pull failed: {}: {}", self.subscription, status);
                return;
            }
        };
        tracing::trace!(
            "pulled {} message(s): {}",
            response.received_messages.len(),
            self.subscription
        );

        let receive_time = Instant::now();
        // First extension is due one second before the minimum deadline.
        let next_ack = receive_time + MIN_ACK_DEADLINE - Duration::from_secs(1);

        // Schedule every deadline watch before any delivery: the callback may
        // be slow, and watches must not wait behind it.
        let mut messages = Vec::with_capacity(response.received_messages.len());
        for received in response.received_messages {
            let Some(message) = received.message else {
                continue;
            };
            self.acker.add_deadline_watch(received.ack_id.clone(), next_ack);
            messages.push(Message::new(
                message,
                received.ack_id,
                self.subscription.clone(),
                receive_time,
                Arc::downgrade(&self.acker),
            ));
        }

        // Deliver in broker order, on this task.
        for message in messages {
            (self.callback)(message).await;
        }
    }
}
