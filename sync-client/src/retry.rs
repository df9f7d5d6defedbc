//! Bounded retry.
//!
//! Retrying an operation is always explicit: [`RetryPolicy::run`] calls the
//! operation with its attempt number and asks the caller whether a failure
//! is worth another try. No delays; the budget is the only limit.

use std::future::Future;

/// Retry budget for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl Default for RetryPolicy {
    /// One attempt plus one retry.
    fn default() -> Self {
        Self { max_attempts: 2 }
    }
}

impl RetryPolicy {
    /// Allow up to `max_attempts` calls (at least one).
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// The attempt budget.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds, `should_retry` declines, or the budget is
    /// spent. Attempts are numbered from 1. The last error is returned.
    pub async fn run<T, E, F, Fut>(
        &self,
        mut op: F,
        should_retry: impl Fn(&E) -> bool,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && should_retry(&e) => {
                    tracing::debug!(attempt, max = self.max_attempts, "Retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn success_needs_one_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = RetryPolicy::default()
            .run(
                |n| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(n) }
                },
                |_| true,
            )
            .await;
        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_once_then_gives_up() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = RetryPolicy::default()
            .run(
                |n| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Err(format!("attempt {n}")) }
                },
                |_| true,
            )
            .await;
        assert_eq!(result, Err("attempt 2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_attempt_can_succeed() {
        let result: Result<u32, &str> = RetryPolicy::default()
            .run(
                |n| async move {
                    if n == 1 {
                        Err("token expired")
                    } else {
                        Ok(n)
                    }
                },
                |e| *e == "token expired",
            )
            .await;
        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = RetryPolicy::new(5)
            .run(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("fatal") }
                },
                |_| false,
            )
            .await;
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn budget_is_at_least_one() {
        assert_eq!(RetryPolicy::new(0).max_attempts(), 1);
    }
}
