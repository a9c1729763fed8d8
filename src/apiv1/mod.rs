pub mod conn_pool;
pub mod publisher_client;
pub mod subscriber_client;

use std::time::Duration;

/// Broker-defined bounds for a subscription ack deadline.
pub(crate) const MIN_ACK_DEADLINE: Duration = Duration::from_secs(10);
pub(crate) const MAX_ACK_DEADLINE: Duration = Duration::from_secs(600);

/// Per-attempt deadline for data-plane calls (pull, ack, deadline extension).
pub(crate) const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(20);
/// Per-attempt deadline for control-plane calls (topic/subscription CRUD).
pub(crate) const CONTROL_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Channel-level message size cap, both directions.
pub(crate) const MAX_MESSAGE_SIZE: usize = 20 * 1024 * 1024;
