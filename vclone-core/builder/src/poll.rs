//! 轮询等待
//!
//! 以截止时间为界的退避轮询循环。每次检查前后都会检查取消信号，
//! 取消在一个轮询间隔内生效，并与超时区分开。

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::BuildError;

/// 轮询策略
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// 初始间隔
    pub interval: Duration,

    /// 最大间隔
    pub max_interval: Duration,

    /// 退避倍数
    pub multiplier: f64,

    /// 最长等待
    pub timeout: Duration,
}

impl PollPolicy {
    /// 固定间隔
    pub fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            multiplier: 1.0,
            timeout,
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    /// 下一次间隔，不超过最大间隔
    pub fn next_interval(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier.max(1.0))
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }
}

/// 单次检查结果
#[derive(Debug, Clone, PartialEq)]
pub enum Poll<T> {
    Ready(T),
    Pending,
}

/// 等待失败
#[derive(Debug)]
pub enum WaitError<E> {
    /// 超过截止时间
    TimedOut { waited: Duration },
    /// 收到取消信号
    Cancelled,
    /// 检查本身失败
    Failed(E),
}

impl WaitError<BuildError> {
    /// 转换为通用的超时/取消错误
    pub fn into_build(self, operation: &str) -> BuildError {
        match self {
            Self::TimedOut { waited } => BuildError::Timeout {
                operation: operation.to_string(),
                waited,
            },
            Self::Cancelled => BuildError::Cancelled {
                operation: operation.to_string(),
            },
            Self::Failed(e) => e,
        }
    }
}

/// 轮询直到检查返回 `Ready`
pub async fn poll_until<T, E, F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut check: F,
) -> std::result::Result<T, WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<Poll<T>, E>>,
{
    let start = Instant::now();
    let deadline = start + policy.timeout;
    let mut interval = policy.interval;
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled);
        }

        attempt += 1;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WaitError::Cancelled),
            outcome = check() => outcome,
        };

        if let Poll::Ready(value) = outcome.map_err(WaitError::Failed)? {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(WaitError::TimedOut {
                waited: now - start,
            });
        }

        let sleep_for = interval.min(deadline - now);
        debug!("第 {} 次检查未就绪，{:?} 后重试", attempt, sleep_for);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WaitError::Cancelled),
            _ = tokio::time::sleep(sleep_for) => {}
        }

        interval = policy.next_interval(interval);
    }
}

/// 可取消的固定时长等待
pub async fn sleep_cancellable(
    duration: Duration,
    cancel: &CancellationToken,
) -> std::result::Result<(), WaitError<BuildError>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WaitError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
            timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let p = policy();
        assert_eq!(p.next_interval(Duration::from_secs(2)), Duration::from_secs(4));
        assert_eq!(p.next_interval(Duration::from_secs(8)), Duration::from_secs(10));
        assert_eq!(
            PollPolicy::fixed(Duration::from_secs(1), Duration::from_secs(5))
                .next_interval(Duration::from_secs(1)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_oversized_multiplier_falls_back_to_max() {
        for multiplier in [1e30, f64::INFINITY, f64::MAX] {
            let p = PollPolicy {
                multiplier,
                max_interval: Duration::from_secs(30),
                ..policy()
            };
            assert_eq!(p.next_interval(Duration::from_secs(2)), Duration::from_secs(30));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let result: std::result::Result<u32, WaitError<()>> =
            poll_until(&policy(), &token, || {
                let count = Arc::clone(&count);
                async move {
                    let n = count.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(if n >= 3 { Poll::Ready(n) } else { Poll::Pending })
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let token = CancellationToken::new();
        let started = Instant::now();
        let result: std::result::Result<(), WaitError<()>> =
            poll_until(&policy(), &token, || async { Ok(Poll::Pending) }).await;

        match result {
            Err(WaitError::TimedOut { waited }) => {
                assert!(waited >= Duration::from_secs(60));
                assert!(started.elapsed() < Duration::from_secs(61));
            }
            other => panic!("期望超时, 实际: {:?}", other.err()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_within_one_interval() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let result: std::result::Result<(), WaitError<()>> =
            poll_until(&policy(), &token, || async { Ok(Poll::Pending) }).await;

        assert!(matches!(result, Err(WaitError::Cancelled)));
        assert!(started.elapsed() <= Duration::from_secs(3) + policy().interval);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_failure_propagates() {
        let token = CancellationToken::new();
        let result: std::result::Result<(), WaitError<&str>> =
            poll_until(&policy(), &token, || async { Err("boom") }).await;
        assert!(matches!(result, Err(WaitError::Failed("boom"))));
    }

    #[test]
    fn test_into_build_error() {
        let err = WaitError::<BuildError>::Cancelled.into_build("克隆");
        assert!(err.is_cancelled());

        let err = WaitError::<BuildError>::TimedOut {
            waited: Duration::from_secs(5),
        }
        .into_build("关机");
        assert_eq!(err.kind(), "TimeoutError");
    }
}
