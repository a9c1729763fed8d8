use std::future::Future;
use std::time::Duration;

use google_cloud_gax::grpc::{Code, Status};
use tokio::time::{sleep, timeout, Instant};

use crate::backoff::ExponentialBackoff;

/// Caps how many times a failed call may be retried.
#[derive(Clone, Copy, Debug)]
pub struct RetryCountPolicy {
    /// Maximum number of retries after the initial attempt. 0 retries
    /// indefinitely (the time policy still applies).
    pub count: u32,
}

impl Default for RetryCountPolicy {
    fn default() -> Self {
        Self { count: 3 }
    }
}

/// Caps how long a call may keep retrying, regardless of the attempt count.
#[derive(Clone, Copy, Debug)]
pub struct MaxRetryTimePolicy {
    pub interval: Duration,
}

impl Default for MaxRetryTimePolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
        }
    }
}

/// Shapes the delay sequence between retries.
#[derive(Clone, Copy, Debug)]
pub struct ExponentialBackoffPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper limit for any delay.
    pub max_delay: Duration,
    /// Growth factor applied between retries.
    pub scale: f64,
}

impl Default for ExponentialBackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            scale: 2.0,
        }
    }
}

/// Snapshot of the three retry policies.
///
/// Handles clone their snapshot when they are created from the client
/// configuration; an in-flight retry loop never observes later changes.
/// The count and time policies work together: whichever budget runs out
/// first ends the loop.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetrySetting {
    pub count: RetryCountPolicy,
    pub time: MaxRetryTimePolicy,
    pub backoff: ExponentialBackoffPolicy,
}

fn retries_exhausted(start: Instant, attempts: u32, setting: &RetrySetting) -> bool {
    (setting.count.count > 0 && attempts > setting.count.count)
        || start.elapsed() > setting.time.interval
}

/// Drives a unary RPC under the given retry setting.
///
/// The callable receives the per-attempt timeout so it can forward it as the
/// gRPC deadline; the same timeout is enforced locally. Only `UNAVAILABLE` and
/// `DEADLINE_EXCEEDED` are retried, and a deadline expiry doubles the timeout
/// for the next attempt. Every other status, OK included, is returned to the
/// caller unchanged so semantic codes such as `NOT_FOUND` stay visible.
///
/// On success the result carries the instant taken just before the winning
/// attempt; callers use it as the base for ack-deadline arithmetic.
pub(crate) async fn invoke<T, F, Fut>(
    setting: &RetrySetting,
    mut rpc_timeout: Duration,
    mut f: F,
) -> Result<(T, Instant), Status>
where
    F: FnMut(Duration) -> Fut,
    Fut: Future<Output = Result<T, Status>>,
{
    let mut backoff = ExponentialBackoff::new(setting.backoff);
    let start = Instant::now();
    let mut last: Option<Status> = None;

    while !retries_exhausted(start, backoff.retry_count(), setting) {
        let attempt_time = Instant::now();
        let status = match timeout(rpc_timeout, f(rpc_timeout)).await {
            Ok(Ok(value)) => return Ok((value, attempt_time)),
            Ok(Err(status)) => status,
            Err(_) => Status::deadline_exceeded(format!(
                "rpc did not complete within {rpc_timeout:?}"
            )),
        };

        match status.code() {
            Code::DeadlineExceeded => {
                rpc_timeout *= 2;
                let delay = backoff.delay();
                tracing::debug!(
                    "rpc deadline exceeded, next timeout {:?}, retry in {:?}",
                    rpc_timeout,
                    delay
                );
                last = Some(status);
                sleep(delay).await;
            }
            Code::Unavailable => {
                let delay = backoff.delay();
                tracing::debug!(
                    "rpc unavailable, retry in {:?} (attempt {})",
                    delay,
                    backoff.retry_count()
                );
                last = Some(status);
                sleep(delay).await;
            }
            _ => return Err(status),
        }
    }

    Err(last.unwrap_or_else(|| {
        Status::new(Code::Unknown, "retry budget exhausted before the first attempt")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tight_setting(count: u32) -> RetrySetting {
        RetrySetting {
            count: RetryCountPolicy { count },
            time: MaxRetryTimePolicy {
                interval: Duration::from_secs(3600),
            },
            backoff: ExponentialBackoffPolicy::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_needs_one_call() {
        let mut calls = 0u32;
        let result = invoke(&tight_setting(3), Duration::from_secs(20), |_| {
            calls += 1;
            async { Ok::<_, Status>(42) }
        })
        .await;
        assert_eq!(result.unwrap().0, 42);
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_code_returns_unchanged() {
        let mut calls = 0u32;
        let result = invoke(&tight_setting(3), Duration::from_secs(20), |_| {
            calls += 1;
            async { Err::<(), _>(Status::not_found("missing")) }
        })
        .await;
        assert_eq!(result.unwrap_err().code(), Code::NotFound);
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_transient_failures() {
        let mut calls = 0u32;
        let result = invoke(&tight_setting(5), Duration::from_secs(20), |_| {
            calls += 1;
            let attempt = calls;
            async move {
                if attempt < 3 {
                    Err(Status::unavailable("down"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap().0, 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_is_retried_count_plus_one_times() {
        let mut calls = 0u32;
        let result = invoke(&tight_setting(5), Duration::from_secs(20), |_| {
            calls += 1;
            async { Err::<(), _>(Status::unavailable("down")) }
        })
        .await;
        assert_eq!(result.unwrap_err().code(), Code::Unavailable);
        assert_eq!(calls, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_exceeded_doubles_the_timeout() {
        let mut timeouts = Vec::new();
        let result = invoke(&tight_setting(3), Duration::from_secs(1), |rpc_timeout| {
            timeouts.push(rpc_timeout);
            async { Err::<(), _>(Status::deadline_exceeded("slow")) }
        })
        .await;
        assert_eq!(result.unwrap_err().code(), Code::DeadlineExceeded);
        assert_eq!(
            timeouts,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn local_timeout_counts_as_deadline_exceeded() {
        let mut calls = 0u32;
        let result = invoke(&tight_setting(1), Duration::from_secs(1), |_| {
            calls += 1;
            async {
                sleep(Duration::from_secs(600)).await;
                Ok::<_, Status>(())
            }
        })
        .await;
        assert_eq!(result.unwrap_err().code(), Code::DeadlineExceeded);
        assert_eq!(calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn time_budget_stops_an_unbounded_count() {
        let setting = RetrySetting {
            count: RetryCountPolicy { count: 0 },
            time: MaxRetryTimePolicy {
                interval: Duration::from_secs(15),
            },
            backoff: ExponentialBackoffPolicy::default(),
        };
        let start = Instant::now();
        let result = invoke(&setting, Duration::from_secs(20), |_| async {
            Err::<(), _>(Status::unavailable("down"))
        })
        .await;
        assert_eq!(result.unwrap_err().code(), Code::Unavailable);
        assert!(start.elapsed() > Duration::from_secs(15));
    }
}
