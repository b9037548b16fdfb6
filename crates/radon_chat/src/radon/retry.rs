use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::error::RadonError;

/// 指数退避重试策略，每次调用独立计数
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::config::DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..self
        }
    }

    /// 第 attempt 次失败后的等待时间：base * 2^(attempt-1)
    fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << (attempt - 1).min(16))
    }
}

/// 执行 `op` 直到成功或达到尝试上限，失败时只返回最后一次的错误
pub async fn call_with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, RadonError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RadonError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                warn!("调用推理服务失败，已达到最大尝试次数 ({}/{}): {}", attempt, max_attempts, e);
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "调用推理服务失败 (尝试 {}/{}): {}，{:?} 后重试",
                    attempt, max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use assert_matches::assert_matches;
    use tokio::time::Instant;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let start = Instant::now();
        let result = call_with_retry(RetryPolicy::default(), move || async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(RadonError::Connection(format!("refused #{}", n)))
            } else {
                Ok("ok")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        // 1s + 2s
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_returns_last_error() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let policy = RetryPolicy::default().with_max_attempts(4);
        let start = Instant::now();
        let result: Result<(), _> = call_with_retry(policy, move || async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            Err(RadonError::Transport {
                status: 500 + n as u16,
                status_text: "Server Error".to_string(),
            })
        })
        .await;

        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_matches!(result, Err(RadonError::Transport { status: 504, .. }));
        // 1s + 2s + 4s
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_response_is_not_retried() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let result: Result<(), _> = call_with_retry(RetryPolicy::default(), move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(RadonError::MalformedResponse)
        })
        .await;

        assert_matches!(result, Err(RadonError::MalformedResponse));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
