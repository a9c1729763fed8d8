use std::sync::Arc;
use std::time::Duration;

use google_cloud_auth::project::Config as AuthConfig;
use google_cloud_auth::token::DefaultTokenSourceProvider;
use google_cloud_gax::conn::{ConnectionOptions, Environment};
use token_source::TokenSourceProvider;

use crate::apiv1::conn_pool::{ConnectionManager, AUDIENCE, PUBSUB, SCOPES};
use crate::apiv1::publisher_client::PublisherClient;
use crate::apiv1::subscriber_client::SubscriberClient;
use crate::error::Error;
use crate::executor::{Executor, ExecutorConfig};
use crate::metrics::MetricSink;
use crate::retry::RetrySetting;
use crate::subscription::Subscription;
use crate::topic::Topic;

const CHANNEL_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Crate version string.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Client options.
pub struct ClientConfig {
    /// Project the topic and subscription ids are resolved against.
    /// Must not be empty.
    pub project: String,
    /// Broker host. TLS connections imply port 443; emulator hosts carry an
    /// explicit port.
    pub host: String,
    /// When false the channel is plaintext without credentials, for local
    /// emulators.
    pub secure_channel: bool,
    /// Number of pooled channels.
    pub pool_size: usize,
    /// Maximum messages requested per pull.
    pub max_message_prefetch: i32,
    /// Retry/backoff policies, snapshotted into every handle created from
    /// this client.
    pub retry: RetrySetting,
    /// Initial metric sink; can be replaced later through the client.
    pub metric_sink: Option<Arc<dyn MetricSink>>,
}

impl ClientConfig {
    /// Default configuration for a project. Honors `PUBSUB_EMULATOR_HOST` by
    /// switching to an insecure channel against that host.
    pub fn new(project: impl Into<String>) -> Self {
        let (host, secure_channel) = match std::env::var("PUBSUB_EMULATOR_HOST") {
            Ok(host) => (host, false),
            Err(_) => (PUBSUB.to_string(), true),
        };
        Self {
            project: project.into(),
            host,
            secure_channel,
            pool_size: 4,
            max_message_prefetch: 4,
            retry: RetrySetting::default(),
            metric_sink: None,
        }
    }
}

/// A Pub/Sub client scoped to one project.
///
/// Creating a client connects the channel pool and starts the two background
/// tasks (pull and ack) that service every receiving subscription. Clients
/// are cheap to clone and share their engine; dropping the last clone shuts
/// the engine down, [`stop`](Client::stop) does so gracefully.
#[derive(Clone)]
pub struct Client {
    project_id: String,
    pubc: PublisherClient,
    subc: SubscriberClient,
    executor: Arc<Executor>,
    retry: RetrySetting,
}

impl Client {
    pub async fn new(config: ClientConfig) -> Result<Self, Error> {
        if config.project.is_empty() {
            return Err(Error::InvalidArgument("project must not be empty".to_string()));
        }
        if config.host.is_empty() {
            return Err(Error::InvalidArgument("host must not be empty".to_string()));
        }

        let environment = if config.secure_channel {
            let auth_config = AuthConfig::default()
                .with_audience(AUDIENCE)
                .with_scopes(&SCOPES);
            let token_source: Box<dyn TokenSourceProvider> =
                Box::new(DefaultTokenSourceProvider::new(auth_config).await?);
            Environment::GoogleCloud(token_source)
        } else {
            Environment::Emulator(config.host.clone())
        };

        let options = ConnectionOptions {
            timeout: None,
            connect_timeout: Some(CHANNEL_CONNECT_TIMEOUT),
            http2_keep_alive_interval: None,
            keep_alive_timeout: None,
            keep_alive_while_idle: None,
        };

        let pubc = PublisherClient::new(
            ConnectionManager::new(config.pool_size, &config.host, &environment, &options).await?,
        );
        let subc = SubscriberClient::new(
            ConnectionManager::new(config.pool_size, &config.host, &environment, &options).await?,
        );

        let executor = Executor::start(
            subc.clone(),
            ExecutorConfig {
                max_prefetch: config.max_message_prefetch,
                retry: config.retry,
            },
            config.metric_sink,
        );

        Ok(Self {
            project_id: config.project,
            pubc,
            subc,
            executor,
            retry: config.retry,
        })
    }

    /// Creates a reference to a topic in the client's project.
    pub fn topic(&self, id: &str) -> Result<Topic, Error> {
        self.topic_in_project(id, &self.project_id)
    }

    /// Creates a reference to a topic in another project.
    pub fn topic_in_project(&self, id: &str, project: &str) -> Result<Topic, Error> {
        if id.is_empty() {
            return Err(Error::InvalidArgument("topic id must not be empty".to_string()));
        }
        if project.is_empty() {
            return Err(Error::InvalidArgument("project must not be empty".to_string()));
        }
        Ok(Topic::new(
            id.to_string(),
            format!("projects/{project}/topics/{id}"),
            self.pubc.clone(),
            self.retry,
        ))
    }

    /// Creates a reference to a subscription in the client's project.
    pub fn subscription(&self, id: &str) -> Result<Subscription, Error> {
        self.subscription_in_project(id, &self.project_id)
    }

    /// Creates a reference to a subscription in another project.
    pub fn subscription_in_project(&self, id: &str, project: &str) -> Result<Subscription, Error> {
        if id.is_empty() {
            return Err(Error::InvalidArgument(
                "subscription id must not be empty".to_string(),
            ));
        }
        if project.is_empty() {
            return Err(Error::InvalidArgument("project must not be empty".to_string()));
        }
        Ok(Subscription::new(
            id.to_string(),
            format!("projects/{project}/subscriptions/{id}"),
            self.subc.clone(),
            Arc::downgrade(&self.executor),
            self.retry,
        ))
    }

    pub fn set_metric_sink(&self, sink: Arc<dyn MetricSink>) {
        self.executor.set_metric_sink(Some(sink));
    }

    pub fn remove_metric_sink(&self) {
        self.executor.set_metric_sink(None);
    }

    /// Stops the background engine and waits for both loops to finish.
    /// Receivers are dropped; in-flight acks are not guaranteed to reach the
    /// broker.
    pub async fn stop(&self) {
        self.executor.stop().await;
    }

    pub fn fully_qualified_topic_name(&self, id: &str) -> String {
        format!("projects/{}/topics/{}", self.project_id, id)
    }

    pub fn fully_qualified_subscription_name(&self, id: &str) -> String {
        format!("projects/{}/subscriptions/{}", self.project_id, id)
    }
}
