//! 重试 / 超时 / 兜底执行器
//!
//! 对任意异步操作施加「最多 retries + 1 次尝试、每次尝试限时、两次尝试之间固定等待」的策略；
//! 尝试耗尽后若提供了兜底函数则用其结果，否则把最后一次失败返回给调用方。
//! 每次调用都产出一条 ExecutionOutcome（尝试次数、耗时、是否超时、是否走兜底、最后错误），
//! 并输出结构化审计日志。本模块不了解计划、任务或能力，流水线阶段与单个任务共用。

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};

/// 重试策略
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    /// 首次失败后的额外尝试次数
    pub retries: u32,
    /// 两次尝试之间的等待
    pub delay: Duration,
    /// 单次尝试的时限；None 或 0 表示不限时
    pub timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    fn attempt_limit(&self) -> Option<Duration> {
        self.timeout.filter(|t| !t.is_zero())
    }
}

/// 单次执行器调用的诊断记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub label: String,
    /// 实际尝试次数
    pub attempts: u32,
    /// 实际发生的重试次数（attempts - 1）
    pub retries: u32,
    pub fallback_used: bool,
    /// 任一次尝试超时即为 true
    pub timed_out: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// 单次尝试的失败原因
#[derive(Debug)]
pub enum AttemptError<E> {
    /// 操作自身返回错误
    Failed(E),
    /// 超过单次时限；该次尝试的结果被放弃
    TimedOut { after_ms: u64 },
    /// 工作任务异常退出（panic）
    Aborted(String),
}

impl<E> AttemptError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AttemptError::TimedOut { .. })
    }
}

impl<E: fmt::Display> fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Failed(e) => write!(f, "{e}"),
            AttemptError::TimedOut { after_ms } => write!(f, "timed out after {after_ms}ms"),
            AttemptError::Aborted(msg) => write!(f, "worker aborted: {msg}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for AttemptError<E> {}

/// 尝试耗尽且没有兜底时的失败：最后一次错误 + 诊断记录
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub last_error: AttemptError<E>,
    pub outcome: ExecutionOutcome,
}

impl<E: fmt::Display> fmt::Display for RetryFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed after {} attempts: {}",
            self.outcome.label, self.outcome.attempts, self.last_error
        )
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryFailure<E> {}

struct Exhausted<E> {
    last_error: AttemptError<E>,
    attempts: u32,
    timed_out: bool,
}

/// 带重试与超时运行 operation；尝试耗尽后返回 RetryFailure
pub async fn run_with_retry<T, E, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    operation: F,
) -> Result<(T, ExecutionOutcome), RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let start = Instant::now();
    match attempt_loop(label, policy, operation).await {
        Ok((value, attempts, timed_out)) => {
            let outcome = finish(label, start, attempts, timed_out, false, None);
            Ok((value, outcome))
        }
        Err(exhausted) => {
            let outcome = finish(
                label,
                start,
                exhausted.attempts,
                exhausted.timed_out,
                false,
                Some(exhausted.last_error.to_string()),
            );
            Err(RetryFailure {
                last_error: exhausted.last_error,
                outcome,
            })
        }
    }
}

/// 带重试与超时运行 operation；尝试耗尽后以最后一次失败调用 fallback，总是返回结果
pub async fn run_with_fallback<T, E, F, Fut, FB>(
    label: &str,
    policy: &RetryPolicy,
    operation: F,
    fallback: FB,
) -> (T, ExecutionOutcome)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
    FB: FnOnce(&AttemptError<E>) -> T,
{
    let start = Instant::now();
    match attempt_loop(label, policy, operation).await {
        Ok((value, attempts, timed_out)) => {
            let outcome = finish(label, start, attempts, timed_out, false, None);
            (value, outcome)
        }
        Err(exhausted) => {
            tracing::warn!("{} failed; using fallback", label);
            let value = fallback(&exhausted.last_error);
            let outcome = finish(
                label,
                start,
                exhausted.attempts,
                exhausted.timed_out,
                true,
                Some(exhausted.last_error.to_string()),
            );
            (value, outcome)
        }
    }
}

async fn attempt_loop<T, E, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<(T, u32, bool), Exhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let max_attempts = policy.max_attempts();
    let mut timed_out = false;
    let mut attempt = 1;

    loop {
        match run_attempt(operation(), policy.attempt_limit()).await {
            Ok(value) => return Ok((value, attempt, timed_out)),
            Err(err) => {
                if err.is_timeout() {
                    timed_out = true;
                    tracing::warn!("{} timed out on attempt {}/{}", label, attempt, max_attempts);
                } else {
                    tracing::warn!(
                        error = %err,
                        "{} failed on attempt {}/{}",
                        label,
                        attempt,
                        max_attempts
                    );
                }

                if attempt >= max_attempts {
                    return Err(Exhausted {
                        last_error: err,
                        attempts: attempt,
                        timed_out,
                    });
                }
                if !policy.delay.is_zero() {
                    sleep(policy.delay).await;
                }
                attempt += 1;
            }
        }
    }
}

/// 执行一次尝试：总是交给独立的 tokio 任务，panic 记为 Aborted；超时后不再等待它（不主动中断）
async fn run_attempt<T, E, Fut>(fut: Fut, limit: Option<Duration>) -> Result<T, AttemptError<E>>
where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let worker = tokio::spawn(fut);
    let joined = match limit {
        Some(limit) => match timeout(limit, worker).await {
            Ok(joined) => joined,
            Err(_) => {
                return Err(AttemptError::TimedOut {
                    after_ms: limit.as_millis() as u64,
                })
            }
        },
        None => worker.await,
    };

    match joined {
        Ok(result) => result.map_err(AttemptError::Failed),
        Err(join_err) => Err(AttemptError::Aborted(join_err.to_string())),
    }
}

fn finish(
    label: &str,
    start: Instant,
    attempts: u32,
    timed_out: bool,
    fallback_used: bool,
    error: Option<String>,
) -> ExecutionOutcome {
    let outcome = ExecutionOutcome {
        label: label.to_string(),
        attempts,
        retries: attempts.saturating_sub(1),
        fallback_used,
        timed_out,
        error,
        duration_ms: start.elapsed().as_millis() as u64,
    };
    let audit = serde_json::json!({
        "event": "retry_audit",
        "label": outcome.label,
        "attempts": outcome.attempts,
        "fallback_used": outcome.fallback_used,
        "timed_out": outcome.timed_out,
        "duration_ms": outcome.duration_ms,
    });
    tracing::info!(audit = %audit, "retry");
    outcome
}
