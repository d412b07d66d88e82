//! Deadline handling for a single attempt.

use crate::cancel::{AbortReason, CancellationToken};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Result of running work under a guard.
#[derive(Debug)]
pub(crate) enum Outcome<T> {
    Completed(T),
    Interrupted(AbortReason),
}

/// Run `work` until it completes, `token` fires, or `deadline` elapses.
///
/// Expiry fires the token with [`AbortReason::DeadlineExceeded`], so the
/// deadline and manual cancellation share one abort path. Whichever fires
/// first is the reported reason. A zero deadline means none.
pub(crate) async fn guard<F>(
    token: &CancellationToken,
    deadline: Option<Duration>,
    work: F,
) -> Outcome<F::Output>
where
    F: Future,
{
    if let Some(reason) = token.reason() {
        return Outcome::Interrupted(reason);
    }

    let deadline = deadline.filter(|d| !d.is_zero());
    let expiry = async {
        match deadline {
            Some(d) => sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        _ = token.cancelled() => {
            Outcome::Interrupted(token.reason().unwrap_or(AbortReason::Cancelled))
        }
        _ = expiry => {
            token.fire(AbortReason::DeadlineExceeded);
            Outcome::Interrupted(token.reason().unwrap_or(AbortReason::DeadlineExceeded))
        }
        out = work => Outcome::Completed(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_work_completes_before_deadline() {
        let token = CancellationToken::new();
        let outcome = guard(&token, Some(Duration::from_secs(5)), async { 42 }).await;
        assert!(matches!(outcome, Outcome::Completed(42)));
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_deadline_fires_token() {
        let token = CancellationToken::new();
        let start = Instant::now();
        let outcome = guard(
            &token,
            Some(Duration::from_millis(50)),
            sleep(Duration::from_secs(10)),
        )
        .await;

        assert!(matches!(
            outcome,
            Outcome::Interrupted(AbortReason::DeadlineExceeded)
        ));
        assert_eq!(token.reason(), Some(AbortReason::DeadlineExceeded));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_zero_deadline_means_none() {
        let token = CancellationToken::new();
        let outcome = guard(&token, Some(Duration::ZERO), async {
            sleep(Duration::from_millis(20)).await;
            "done"
        })
        .await;
        assert!(matches!(outcome, Outcome::Completed("done")));
    }

    #[tokio::test]
    async fn test_manual_cancel_beats_deadline() {
        let parent = CancellationToken::new();
        let attempt = parent.child();

        let canceller = parent.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let outcome = guard(
            &attempt,
            Some(Duration::from_secs(5)),
            sleep(Duration::from_secs(10)),
        )
        .await;
        assert!(matches!(outcome, Outcome::Interrupted(AbortReason::Cancelled)));
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_work() {
        let token = CancellationToken::new();
        token.cancel();
        let outcome = guard(&token, None, async { unreachable!() }).await;
        assert!(matches!(outcome, Outcome::Interrupted(AbortReason::Cancelled)));
    }
}
