//! Cooperative cancellation.
//!
//! One token type serves both manual cancellation and deadline expiry. The
//! first `fire` records its reason; later fires are no-ops.

use futures_util::future::select_all;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;

/// Why a token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The caller cancelled the exchange.
    Cancelled,
    /// An attempt outlived its timeout.
    DeadlineExceeded,
}

struct Inner {
    reason: OnceLock<AbortReason>,
    notify: watch::Sender<bool>,
}

impl Inner {
    fn new() -> Arc<Self> {
        let (notify, _) = watch::channel(false);
        Arc::new(Self {
            reason: OnceLock::new(),
            notify,
        })
    }

    async fn fired(self: Arc<Self>) {
        let mut rx = self.notify.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

/// Cancellation handle shared between the caller and the engine.
///
/// Cloning yields another handle to the same token. A [`child`] fires when
/// it or any ancestor fires, but firing a child never affects its parent.
///
/// [`child`]: CancellationToken::child
#[derive(Clone)]
pub struct CancellationToken {
    own: Arc<Inner>,
    ancestors: Vec<Arc<Inner>>,
}

impl CancellationToken {
    /// Create a new, unfired token.
    pub fn new() -> Self {
        Self {
            own: Inner::new(),
            ancestors: Vec::new(),
        }
    }

    /// Cancel the exchange this token is attached to.
    pub fn cancel(&self) {
        self.fire(AbortReason::Cancelled);
    }

    /// Fire with `reason`. Returns `false` if this token (or an ancestor)
    /// had already fired.
    pub fn fire(&self, reason: AbortReason) -> bool {
        if self.ancestors.iter().any(|a| a.reason.get().is_some()) {
            return false;
        }
        if self.own.reason.set(reason).is_err() {
            return false;
        }
        self.own.notify.send_replace(true);
        true
    }

    /// The reason recorded by the first fire, if any.
    pub fn reason(&self) -> Option<AbortReason> {
        self.own
            .reason
            .get()
            .or_else(|| self.ancestors.iter().find_map(|a| a.reason.get()))
            .copied()
    }

    /// Check if the token has fired.
    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Derive a token that also observes this one.
    pub fn child(&self) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.own.clone());
        Self {
            own: Inner::new(),
            ancestors,
        }
    }

    /// Wait until the token (or an ancestor) fires.
    pub async fn cancelled(&self) {
        let waits = std::iter::once(&self.own)
            .chain(self.ancestors.iter())
            .map(|inner| Box::pin(inner.clone().fired()));
        select_all(waits).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout, Duration};

    #[tokio::test]
    async fn test_cancellation_token() {
        let token = CancellationToken::new();
        let other = token.clone();

        assert!(!token.is_cancelled());
        other.cancel();

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some(AbortReason::Cancelled));
    }

    #[test]
    fn test_first_fire_wins() {
        let token = CancellationToken::new();
        assert!(token.fire(AbortReason::DeadlineExceeded));
        assert!(!token.fire(AbortReason::Cancelled));
        assert_eq!(token.reason(), Some(AbortReason::DeadlineExceeded));
    }

    #[test]
    fn test_child_observes_parent_but_not_reverse() {
        let parent = CancellationToken::new();
        let child = parent.child();

        assert!(child.fire(AbortReason::DeadlineExceeded));
        assert!(!parent.is_cancelled());

        let child = parent.child();
        parent.cancel();
        assert_eq!(child.reason(), Some(AbortReason::Cancelled));
        assert!(!child.fire(AbortReason::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_cancellation_wait() {
        let token = CancellationToken::new();
        let grandchild = token.child().child();

        let handle = tokio::spawn({
            let token = token.clone();
            async move {
                sleep(Duration::from_millis(20)).await;
                token.cancel();
            }
        });

        timeout(Duration::from_secs(2), grandchild.cancelled())
            .await
            .expect("grandchild should observe the root cancel");
        assert!(grandchild.is_cancelled());

        handle.await.unwrap();
    }

    #[test]
    fn test_cancelled_is_pending_until_fired() {
        let token = CancellationToken::new();
        let child = token.child();
        let mut wait = tokio_test::task::spawn(child.cancelled());

        tokio_test::assert_pending!(wait.poll());
        token.cancel();
        assert!(wait.is_woken());
        tokio_test::assert_ready!(wait.poll());
    }

    #[tokio::test]
    async fn test_already_fired_resolves_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        timeout(Duration::from_millis(100), token.cancelled())
            .await
            .unwrap();
    }
}
