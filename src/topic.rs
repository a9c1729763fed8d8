use std::collections::BTreeMap;

use google_cloud_gax::grpc::Code;
use google_cloud_googleapis::pubsub::v1::{
    DeleteTopicRequest, GetTopicRequest, PublishRequest, PubsubMessage, Topic as InternalTopic,
};

use crate::apiv1::publisher_client::PublisherClient;
use crate::apiv1::CONTROL_RPC_TIMEOUT;
use crate::error::Error;
use crate::retry::RetrySetting;

/// A reference to a Pub/Sub topic.
pub struct Topic {
    id: String,
    fqtn: String,
    pubc: PublisherClient,
    retry: RetrySetting,
}

impl Topic {
    pub(crate) fn new(id: String, fqtn: String, pubc: PublisherClient, retry: RetrySetting) -> Self {
        Self {
            id,
            fqtn,
            pubc,
            retry,
        }
    }

    /// Short topic name.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Fully qualified topic name, `projects/<project>/topics/<id>`.
    pub fn fully_qualified_name(&self) -> &str {
        &self.fqtn
    }

    /// Creates the topic on the broker.
    pub async fn create(&self) -> Result<(), Error> {
        let req = InternalTopic {
            name: self.fqtn.clone(),
            ..Default::default()
        };
        self.pubc
            .create_topic(req, &self.retry, CONTROL_RPC_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Reports whether the topic exists on the broker.
    pub async fn exists(&self) -> Result<bool, Error> {
        let req = GetTopicRequest {
            topic: self.fqtn.clone(),
        };
        match self.pubc.get_topic(req, &self.retry, CONTROL_RPC_TIMEOUT).await {
            Ok(_) => Ok(true),
            Err(status) if status.code() == Code::NotFound => Ok(false),
            Err(status) => Err(status.into()),
        }
    }

    /// Deletes the topic. A topic that is already gone is not an error.
    pub async fn delete(&self) -> Result<(), Error> {
        let req = DeleteTopicRequest {
            topic: self.fqtn.clone(),
        };
        match self
            .pubc
            .delete_topic(req, &self.retry, CONTROL_RPC_TIMEOUT)
            .await
        {
            Ok(()) => Ok(()),
            Err(status) if status.code() == Code::NotFound => Ok(()),
            Err(status) => Err(status.into()),
        }
    }

    /// Publishes one message and returns the broker-assigned message id.
    ///
    /// Attribute keys must not be empty.
    pub async fn publish(
        &self,
        data: impl Into<Vec<u8>>,
        attributes: BTreeMap<String, String>,
    ) -> Result<String, Error> {
        if attributes.keys().any(|key| key.is_empty()) {
            return Err(Error::InvalidArgument(
                "attribute key must not be empty".to_string(),
            ));
        }

        let message = PubsubMessage {
            data: data.into(),
            attributes: attributes.into_iter().collect(),
            ..Default::default()
        };
        let req = PublishRequest {
            topic: self.fqtn.clone(),
            messages: vec![message],
        };
        let response = self
            .pubc
            .publish(req, &self.retry, CONTROL_RPC_TIMEOUT)
            .await?;
        response
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| Error::UnexpectedResponse("publish returned no message id".to_string()))
    }
}
