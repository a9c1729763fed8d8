use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use google_cloud_gax::grpc::Code;
use google_cloud_googleapis::pubsub::v1::{
    DeleteSubscriptionRequest, GetSubscriptionRequest, Subscription as InternalSubscription,
};
use parking_lot::Mutex;

use crate::apiv1::subscriber_client::SubscriberClient;
use crate::apiv1::CONTROL_RPC_TIMEOUT;
use crate::error::Error;
use crate::executor::{Callback, CallbackFuture, Executor};
use crate::message::Message;
use crate::retry::RetrySetting;

const STATE_IDLE: u8 = 0;
const STATE_RECEIVING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// A reference to a Pub/Sub subscription, including its receiver lifecycle.
///
/// A subscription handle moves Idle → Receiving → Stopped, each transition at
/// most once: after [`stop`](Subscription::stop) a new handle is needed to
/// receive again.
pub struct Subscription {
    id: String,
    fqsn: String,
    subc: SubscriberClient,
    executor: Weak<Executor>,
    retry: RetrySetting,
    /// Last ack deadline reported by the broker for this subscription.
    ack_deadline: Mutex<Option<Duration>>,
    state: AtomicU8,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        fqsn: String,
        subc: SubscriberClient,
        executor: Weak<Executor>,
        retry: RetrySetting,
    ) -> Self {
        Self {
            id,
            fqsn,
            subc,
            executor,
            retry,
            ack_deadline: Mutex::new(None),
            state: AtomicU8::new(STATE_IDLE),
        }
    }

    /// Short subscription name.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Fully qualified subscription name,
    /// `projects/<project>/subscriptions/<id>`.
    pub fn fully_qualified_name(&self) -> &str {
        &self.fqsn
    }

    /// The ack deadline the broker reported on the last `create`/`exists`
    /// call, if any was made yet.
    pub fn ack_deadline(&self) -> Option<Duration> {
        *self.ack_deadline.lock()
    }

    /// Creates the subscription on the given topic.
    ///
    /// `ack_deadline` must be within the broker's 10 s – 600 s range; zero
    /// selects the broker default of 10 s.
    pub async fn create(&self, fqtn: &str, ack_deadline: Duration) -> Result<(), Error> {
        let req = InternalSubscription {
            name: self.fqsn.clone(),
            topic: fqtn.to_string(),
            ack_deadline_seconds: ack_deadline.as_secs() as i32,
            ..Default::default()
        };
        let created = self
            .subc
            .create_subscription(req, &self.retry, CONTROL_RPC_TIMEOUT)
            .await?;
        *self.ack_deadline.lock() = Some(Duration::from_secs(created.ack_deadline_seconds.max(0) as u64));
        Ok(())
    }

    /// Reports whether the subscription exists, caching the broker's ack
    /// deadline when it does.
    pub async fn exists(&self) -> Result<bool, Error> {
        let req = GetSubscriptionRequest {
            subscription: self.fqsn.clone(),
        };
        match self
            .subc
            .get_subscription(req, &self.retry, CONTROL_RPC_TIMEOUT)
            .await
        {
            Ok(subscription) => {
                *self.ack_deadline.lock() =
                    Some(Duration::from_secs(subscription.ack_deadline_seconds.max(0) as u64));
                Ok(true)
            }
            Err(status) if status.code() == Code::NotFound => Ok(false),
            Err(status) => Err(status.into()),
        }
    }

    /// Deletes the subscription. One that is already gone is not an error.
    pub async fn delete(&self) -> Result<(), Error> {
        let req = DeleteSubscriptionRequest {
            subscription: self.fqsn.clone(),
        };
        match self
            .subc
            .delete_subscription(req, &self.retry, CONTROL_RPC_TIMEOUT)
            .await
        {
            Ok(()) => Ok(()),
            Err(status) if status.code() == Code::NotFound => Ok(()),
            Err(status) => Err(status.into()),
        }
    }

    /// Registers `f` as the receive callback and returns immediately; the
    /// client's background engine pulls messages and invokes `f` with each
    /// one until [`stop`](Subscription::stop) is called or the client shuts
    /// down.
    ///
    /// The callback runs on the client's pull task and must be fast
    /// (sub-second): blocking it stalls delivery for every subscription of
    /// this client. Each [`Message`] must be acked or nacked; dropping one
    /// unacknowledged is equivalent to a nack.
    pub async fn receive<F, Fut>(&self, f: F) -> Result<(), Error>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if !self.exists().await? {
            return Err(Error::SubscriptionNotFound(self.fqsn.clone()));
        }

        let executor = self.executor.upgrade().ok_or(Error::Stopped)?;

        if self
            .state
            .compare_exchange(STATE_IDLE, STATE_RECEIVING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyReceiving(self.fqsn.clone()));
        }

        let callback: Callback =
            Arc::new(move |message| -> CallbackFuture { Box::pin(f(message)) });
        if let Err(err) = executor.add_receiver(&self.fqsn, callback) {
            self.state.store(STATE_IDLE, Ordering::SeqCst);
            return Err(err);
        }
        Ok(())
    }

    /// Stops receiving. Messages in flight at this moment have no guarantee
    /// their acks reach the broker.
    pub fn stop(&self) -> Result<(), Error> {
        if self
            .state
            .compare_exchange(STATE_RECEIVING, STATE_STOPPED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::InvalidArgument(format!(
                "subscription {} has no active receiver",
                self.fqsn
            )));
        }
        match self.executor.upgrade() {
            Some(executor) => {
                executor.remove_receiver(&self.fqsn);
                Ok(())
            }
            None => Err(Error::Stopped),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.state.load(Ordering::SeqCst) == STATE_RECEIVING {
            if let Some(executor) = self.executor.upgrade() {
                executor.remove_receiver(&self.fqsn);
            }
        }
    }
}
