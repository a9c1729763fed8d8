use std::sync::Arc;
use std::time::Duration;

use google_cloud_gax::conn::Channel;
use google_cloud_gax::create_request;
use google_cloud_gax::grpc::Status;
use google_cloud_googleapis::pubsub::v1::subscriber_client::SubscriberClient as InternalSubscriberClient;
use google_cloud_googleapis::pubsub::v1::{
    AcknowledgeRequest, DeleteSubscriptionRequest, GetSubscriptionRequest,
    ModifyAckDeadlineRequest, PullRequest, PullResponse, Subscription,
};
use tokio::time::Instant;

use crate::apiv1::conn_pool::ConnectionManager;
use crate::apiv1::MAX_MESSAGE_SIZE;
use crate::retry::{invoke, RetrySetting};

#[derive(Clone, Debug)]
pub struct SubscriberClient {
    cm: Arc<ConnectionManager>,
}

impl SubscriberClient {
    pub fn new(cm: ConnectionManager) -> Self {
        Self { cm: Arc::new(cm) }
    }

    fn client(&self) -> InternalSubscriberClient<Channel> {
        InternalSubscriberClient::new(self.cm.conn())
            .max_decoding_message_size(MAX_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_MESSAGE_SIZE)
    }

    /// create_subscription creates a subscription on a topic. Returns
    /// ALREADY_EXISTS if the subscription exists and NOT_FOUND if the topic
    /// does not.
    pub async fn create_subscription(
        &self,
        req: Subscription,
        setting: &RetrySetting,
        rpc_timeout: Duration,
    ) -> Result<Subscription, Status> {
        let name = req.name.clone();
        invoke(setting, rpc_timeout, |timeout| {
            let mut client = self.client();
            let mut request = create_request(format!("name={name}"), req.clone());
            request.set_timeout(timeout);
            async move {
                client
                    .create_subscription(request)
                    .await
                    .map(|r| r.into_inner())
            }
        })
        .await
        .map(|(subscription, _)| subscription)
    }

    /// get_subscription fetches the configuration of a subscription. Returns
    /// NOT_FOUND if it does not exist.
    pub async fn get_subscription(
        &self,
        req: GetSubscriptionRequest,
        setting: &RetrySetting,
        rpc_timeout: Duration,
    ) -> Result<Subscription, Status> {
        let subscription = req.subscription.clone();
        invoke(setting, rpc_timeout, |timeout| {
            let mut client = self.client();
            let mut request = create_request(format!("subscription={subscription}"), req.clone());
            request.set_timeout(timeout);
            async move {
                client
                    .get_subscription(request)
                    .await
                    .map(|r| r.into_inner())
            }
        })
        .await
        .map(|(subscription, _)| subscription)
    }

    /// delete_subscription deletes a subscription; pending messages are
    /// dropped. Returns NOT_FOUND if it does not exist.
    pub async fn delete_subscription(
        &self,
        req: DeleteSubscriptionRequest,
        setting: &RetrySetting,
        rpc_timeout: Duration,
    ) -> Result<(), Status> {
        let subscription = req.subscription.clone();
        invoke(setting, rpc_timeout, |timeout| {
            let mut client = self.client();
            let mut request = create_request(format!("subscription={subscription}"), req.clone());
            request.set_timeout(timeout);
            async move {
                client
                    .delete_subscription(request)
                    .await
                    .map(|r| r.into_inner())
            }
        })
        .await
        .map(|(response, _)| response)
    }

    /// pull fetches up to `max_messages` messages. Deliberately not retried:
    /// the pull loop issues a fresh pull every sweep anyway, so a failed
    /// attempt is simply reported and superseded by the next one.
    pub async fn pull(&self, req: PullRequest, rpc_timeout: Duration) -> Result<PullResponse, Status> {
        let mut client = self.client();
        let mut request = create_request(format!("subscription={}", req.subscription), req);
        request.set_timeout(rpc_timeout);
        match tokio::time::timeout(rpc_timeout, client.pull(request)).await {
            Ok(result) => result.map(|r| r.into_inner()),
            Err(_) => Err(Status::deadline_exceeded(format!(
                "pull did not complete within {rpc_timeout:?}"
            ))),
        }
    }

    /// acknowledge removes the messages behind the ack ids from the broker's
    /// redelivery queue. Acknowledging an expired or already-acked id is not
    /// an error.
    pub async fn acknowledge(
        &self,
        req: AcknowledgeRequest,
        setting: &RetrySetting,
        rpc_timeout: Duration,
    ) -> Result<(), Status> {
        let subscription = req.subscription.clone();
        invoke(setting, rpc_timeout, |timeout| {
            let mut client = self.client();
            let mut request = create_request(format!("subscription={subscription}"), req.clone());
            request.set_timeout(timeout);
            async move { client.acknowledge(request).await.map(|r| r.into_inner()) }
        })
        .await
        .map(|(response, _)| response)
    }

    /// modify_ack_deadline moves the ack deadline of the given ids; a zero
    /// deadline asks for immediate redelivery. Returns the instant just
    /// before the winning attempt so callers can anchor the new deadline.
    pub async fn modify_ack_deadline(
        &self,
        req: ModifyAckDeadlineRequest,
        setting: &RetrySetting,
        rpc_timeout: Duration,
    ) -> Result<Instant, Status> {
        let subscription = req.subscription.clone();
        invoke(setting, rpc_timeout, |timeout| {
            let mut client = self.client();
            let mut request = create_request(format!("subscription={subscription}"), req.clone());
            request.set_timeout(timeout);
            async move {
                client
                    .modify_ack_deadline(request)
                    .await
                    .map(|r| r.into_inner())
            }
        })
        .await
        .map(|(_, rpc_time)| rpc_time)
    }
}
