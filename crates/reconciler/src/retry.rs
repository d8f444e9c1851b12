//! Bounded retry for optimistic-concurrency conflicts.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::error::Result;

/// Wraps a single write in a bounded conflict-retry loop.
///
/// The mutation closure is expected to re-read the current object and
/// re-apply its change on every attempt; the retryer only decides whether
/// another attempt is worth making. Every write path (annotation update,
/// deployment update, service update) goes through this one contract.
#[derive(Debug, Clone)]
pub struct ConflictRetryer {
    max_attempts: u32,
    backoff: Duration,
}

impl Default for ConflictRetryer {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(10),
        }
    }
}

impl ConflictRetryer {
    /// Create a retryer with an explicit bound and base backoff.
    ///
    /// The mutation always runs at least once, even with a bound of zero.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `mutation`, retrying on conflict up to the bound.
    ///
    /// Non-conflict errors return immediately; exhausting the bound returns
    /// the last conflict error. Backoff grows linearly with the attempt
    /// number.
    pub async fn apply<F, Fut>(&self, mut mutation: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut attempt = 1;
        loop {
            match mutation().await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_conflict() && attempt < self.max_attempts => {
                    debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        "write conflicted, retrying"
                    );
                    sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use appservice_core::Kind;

    use super::*;
    use crate::error::Error;

    fn conflict() -> Error {
        Error::from(appservice_core::Error::conflict(
            Kind::AppService,
            "default",
            "web",
        ))
    }

    #[tokio::test]
    async fn test_succeeds_once_the_conflict_clears() {
        let retryer = ConflictRetryer::new(5, Duration::ZERO);
        let calls = Cell::new(0_u32);

        let result = retryer
            .apply(|| {
                calls.set(calls.get() + 1);
                let attempt = calls.get();
                async move {
                    if attempt < 3 {
                        Err(conflict())
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(()));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_non_conflict_errors_are_not_retried() {
        let retryer = ConflictRetryer::new(5, Duration::ZERO);
        let calls = Cell::new(0_u32);

        let result = retryer
            .apply(|| {
                calls.set(calls.get() + 1);
                async {
                    Err(Error::from(appservice_core::Error::transport(
                        "connection reset",
                    )))
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(Error::Store(appservice_core::Error::Transport { .. }))
        ));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_the_last_conflict() {
        let retryer = ConflictRetryer::new(3, Duration::ZERO);
        let calls = Cell::new(0_u32);

        let result = retryer
            .apply(|| {
                calls.set(calls.get() + 1);
                async { Err(conflict()) }
            })
            .await;

        assert!(matches!(result, Err(ref err) if err.is_conflict()));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_zero_bound_still_runs_once() {
        let retryer = ConflictRetryer::new(0, Duration::ZERO);
        let calls = Cell::new(0_u32);

        let result = retryer
            .apply(|| {
                calls.set(calls.get() + 1);
                async { Ok(()) }
            })
            .await;

        assert_eq!(result, Ok(()));
        assert_eq!(calls.get(), 1);
    }
}
