//! # gcloud-pubsub-pull
//!
//! Google Cloud Pub/Sub client library built around a synchronous-pull
//! receiver: a background engine pulls messages in batches, delivers them to
//! a callback, and keeps the ack deadline of every in-flight message alive
//! until the application acks or nacks it. The deadline is chosen adaptively
//! from the observed message-handling latency.
//!
//! * [About Cloud Pub/Sub](https://cloud.google.com/pubsub/)
//! * [Pub/Sub API Documentation](https://cloud.google.com/pubsub/docs)
//!
//! ## Publish
//!
//! ```
//! use std::collections::BTreeMap;
//! use gcloud_pubsub_pull::client::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gcloud_pubsub_pull::error::Error> {
//!     let client = Client::new(ClientConfig::new("my-project")).await?;
//!
//!     let topic = client.topic("greetings")?;
//!     if !topic.exists().await? {
//!         topic.create().await?;
//!     }
//!
//!     let mut attributes = BTreeMap::new();
//!     attributes.insert("k".to_string(), "v".to_string());
//!     let message_id = topic.publish("hello", attributes).await?;
//!     println!("published {message_id}");
//!     Ok(())
//! }
//! ```
//!
//! ## Subscribe
//!
//! ```
//! use std::time::Duration;
//! use gcloud_pubsub_pull::client::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gcloud_pubsub_pull::error::Error> {
//!     let client = Client::new(ClientConfig::new("my-project")).await?;
//!
//!     let subscription = client.subscription("greetings-sub")?;
//!     let topic = client.topic("greetings")?;
//!     if !subscription.exists().await? {
//!         subscription
//!             .create(topic.fully_qualified_name(), Duration::from_secs(10))
//!             .await?;
//!     }
//!
//!     // The callback runs on the client's pull task and must be fast.
//!     subscription
//!         .receive(|mut message| async move {
//!             println!("{:?}", message.payload());
//!             message.ack();
//!         })
//!         .await?;
//!
//!     tokio::time::sleep(Duration::from_secs(30)).await;
//!     subscription.stop()?;
//!     client.stop().await;
//!     Ok(())
//! }
//! ```
pub mod apiv1;
pub mod client;
pub mod error;
pub mod message;
pub mod metrics;
pub mod retry;
pub mod subscription;
pub mod topic;

mod acker;
mod backoff;
mod batch;
mod distribution;
mod executor;
mod puller;
