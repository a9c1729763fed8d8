use std::collections::BTreeMap;
use std::sync::Weak;
use std::time::SystemTime;

use google_cloud_googleapis::pubsub::v1::PubsubMessage;
use tokio::time::Instant;

use crate::acker::{Acker, DoneAction};

/// A message delivered to a receive callback.
///
/// The message is owned by user code between delivery and completion.
/// [`ack`](Message::ack) and [`nack`](Message::nack) are terminal: the first
/// call routes the decision to the background acknowledgment task and clears
/// the link back to it, so a second call is a no-op, as is any call after the
/// receiver has been stopped. Dropping a message that was neither acked nor
/// nacked nacks it, asking the broker to redeliver.
#[derive(Debug)]
pub struct Message {
    data: Vec<u8>,
    attributes: BTreeMap<String, String>,
    message_id: String,
    publish_time: Option<prost_types::Timestamp>,
    ack_id: String,
    subscription: String,
    receive_time: Instant,
    acker: Option<Weak<Acker>>,
}

impl Message {
    pub(crate) fn new(
        message: PubsubMessage,
        ack_id: String,
        subscription: String,
        receive_time: Instant,
        acker: Weak<Acker>,
    ) -> Self {
        Self {
            attributes: message.attributes.into_iter().collect(),
            data: message.data,
            message_id: message.message_id,
            publish_time: message.publish_time,
            ack_id,
            subscription,
            receive_time,
            acker: Some(acker),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    /// Message attributes, ordered by key.
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Fully qualified name of the subscription this message came from.
    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    pub fn ack_id(&self) -> &str {
        &self.ack_id
    }

    /// Broker-assigned message id.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Time the broker accepted the message for publication.
    pub fn publish_time(&self) -> Option<SystemTime> {
        self.publish_time
            .clone()
            .and_then(|t| SystemTime::try_from(t).ok())
    }

    /// Acknowledges the message: the broker stops redelivering it.
    pub fn ack(&mut self) {
        self.finish(DoneAction::Ack);
    }

    /// Negatively acknowledges the message: the broker redelivers it
    /// immediately.
    pub fn nack(&mut self) {
        self.finish(DoneAction::Nack);
    }

    fn finish(&mut self, action: DoneAction) {
        match self.acker.take().and_then(|weak| weak.upgrade()) {
            Some(acker) => acker.done(&self.ack_id, self.receive_time, action),
            None => tracing::trace!("receiver gone, dropping {:?} of {}", action, self.ack_id),
        }
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        self.nack();
    }
}
