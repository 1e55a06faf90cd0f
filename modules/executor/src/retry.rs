use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::domain::model::{EnvKind, ExecRequest, ExecResult};
use crate::manager::ExecutorManager;

/// Exponential-backoff retry policy for operations that may fail
/// transiently.
///
/// The wrapped operation runs up to `max_retries + 1` times; the i-th wait
/// is `initial_delay * backoff_factor^i`. Only `Err` outcomes trigger a
/// retry; a successful return is final whatever it carries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Run `op`, retrying raised failures with exponential backoff. The last
    /// failure is returned once the attempt budget is exhausted.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut delay = self.initial_delay;
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(e);
                    }
                    warn!(attempt = attempt + 1, error = %e, "retrying after failure");
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(self.backoff_factor);
                    attempt += 1;
                }
            }
        }
    }
}

/// Executor manager wrapped in a retry policy.
///
/// Transient platform faults (`Err` from the manager) are retried; once the
/// budget is exhausted the failure is flattened into a failed `ExecResult`
/// so callers always receive a terminal result.
pub struct RetryingExecutor {
    inner: Arc<ExecutorManager>,
    policy: RetryPolicy,
}

impl RetryingExecutor {
    pub fn new(inner: Arc<ExecutorManager>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub async fn execute(&self, request: ExecRequest) -> ExecResult {
        let outcome = self
            .policy
            .run(|| self.inner.execute(request.clone()))
            .await;
        match outcome {
            Ok(result) => result,
            Err(e) => ExecResult::failure(format!(
                "Failed after {} retries: {e}",
                self.policy.max_retries
            )),
        }
    }

    #[must_use]
    pub fn available_kinds(&self) -> Vec<EnvKind> {
        self.inner.available_kinds()
    }

    pub async fn cleanup(&self) {
        self.inner.cleanup().await;
    }
}
