/// Receives operational metrics from the client.
///
/// Implementations must be thread safe and fast: methods are called from the
/// background acknowledgment task once per pass, and slow sinks delay deadline
/// extension for every subscription of the client.
pub trait MetricSink: Send + Sync {
    /// Reports the summed size of the keep-alive queues across all active
    /// subscriptions.
    fn on_keep_alive_queue_size(&self, size: usize);
}
