use std::sync::Arc;
use std::time::Duration;

use google_cloud_gax::conn::Channel;
use google_cloud_gax::create_request;
use google_cloud_gax::grpc::Status;
use google_cloud_googleapis::pubsub::v1::publisher_client::PublisherClient as InternalPublisherClient;
use google_cloud_googleapis::pubsub::v1::{
    DeleteTopicRequest, GetTopicRequest, PublishRequest, PublishResponse, Topic,
};

use crate::apiv1::conn_pool::ConnectionManager;
use crate::apiv1::MAX_MESSAGE_SIZE;
use crate::retry::{invoke, RetrySetting};

#[derive(Clone, Debug)]
pub struct PublisherClient {
    cm: Arc<ConnectionManager>,
}

impl PublisherClient {
    pub fn new(cm: ConnectionManager) -> Self {
        Self { cm: Arc::new(cm) }
    }

    fn client(&self) -> InternalPublisherClient<Channel> {
        InternalPublisherClient::new(self.cm.conn())
            .max_decoding_message_size(MAX_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_MESSAGE_SIZE)
    }

    /// create_topic creates the topic with the given name. Returns
    /// ALREADY_EXISTS if the topic exists.
    pub async fn create_topic(
        &self,
        req: Topic,
        setting: &RetrySetting,
        rpc_timeout: Duration,
    ) -> Result<Topic, Status> {
        let name = req.name.clone();
        invoke(setting, rpc_timeout, |timeout| {
            let mut client = self.client();
            let mut request = create_request(format!("name={name}"), req.clone());
            request.set_timeout(timeout);
            async move { client.create_topic(request).await.map(|r| r.into_inner()) }
        })
        .await
        .map(|(topic, _)| topic)
    }

    /// get_topic fetches the configuration of a topic. Returns NOT_FOUND if
    /// the topic does not exist.
    pub async fn get_topic(
        &self,
        req: GetTopicRequest,
        setting: &RetrySetting,
        rpc_timeout: Duration,
    ) -> Result<Topic, Status> {
        let topic = req.topic.clone();
        invoke(setting, rpc_timeout, |timeout| {
            let mut client = self.client();
            let mut request = create_request(format!("topic={topic}"), req.clone());
            request.set_timeout(timeout);
            async move { client.get_topic(request).await.map(|r| r.into_inner()) }
        })
        .await
        .map(|(topic, _)| topic)
    }

    /// delete_topic deletes the topic with the given name. Returns NOT_FOUND
    /// if the topic does not exist.
    pub async fn delete_topic(
        &self,
        req: DeleteTopicRequest,
        setting: &RetrySetting,
        rpc_timeout: Duration,
    ) -> Result<(), Status> {
        let topic = req.topic.clone();
        invoke(setting, rpc_timeout, |timeout| {
            let mut client = self.client();
            let mut request = create_request(format!("topic={topic}"), req.clone());
            request.set_timeout(timeout);
            async move { client.delete_topic(request).await.map(|r| r.into_inner()) }
        })
        .await
        .map(|(response, _)| response)
    }

    /// publish adds one or more messages to the topic. Returns NOT_FOUND if
    /// the topic does not exist.
    pub async fn publish(
        &self,
        req: PublishRequest,
        setting: &RetrySetting,
        rpc_timeout: Duration,
    ) -> Result<PublishResponse, Status> {
        let topic = req.topic.clone();
        invoke(setting, rpc_timeout, |timeout| {
            let mut client = self.client();
            let mut request = create_request(format!("topic={topic}"), req.clone());
            request.set_timeout(timeout);
            async move { client.publish(request).await.map(|r| r.into_inner()) }
        })
        .await
        .map(|(response, _)| response)
    }
}
