//! Byte-level progress reporting.

use crate::body::BodyStream;
use crate::cancel::CancellationToken;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::trace;

/// A point-in-time view of one direction of a transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// Bytes transferred so far in this exchange.
    pub loaded: u64,
    /// Declared size, when known and not yet exceeded.
    pub total: Option<u64>,
    pub length_computable: bool,
    pub timestamp: DateTime<Utc>,
}

impl ProgressSnapshot {
    /// Completed fraction in `0.0..=1.0`, if the size is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) if self.length_computable => Some(self.loaded as f64 / total as f64),
            _ => None,
        }
    }
}

/// Callback receiving progress snapshots.
pub type ProgressCallback = Arc<dyn Fn(ProgressSnapshot) + Send + Sync>;

#[derive(Default)]
struct Watermark {
    high: u64,
    emitted: bool,
}

/// Progress state for one direction of one exchange.
///
/// Shared by every attempt and redirect hop of the exchange, so the
/// reported `loaded` never moves backwards when a transfer restarts.
#[derive(Clone)]
pub(crate) struct ProgressTracker {
    direction: &'static str,
    callback: ProgressCallback,
    mark: Arc<Mutex<Watermark>>,
}

impl ProgressTracker {
    pub(crate) fn new(direction: &'static str, callback: ProgressCallback) -> Self {
        Self {
            direction,
            callback,
            mark: Arc::new(Mutex::new(Watermark::default())),
        }
    }

    /// Begin counting one pass over a body of `total` bytes.
    pub(crate) fn pass(&self, total: Option<u64>, token: CancellationToken) -> ProgressPass {
        ProgressPass {
            tracker: self.clone(),
            total,
            loaded: 0,
            token,
        }
    }

    fn emit(&self, loaded: u64, total: Option<u64>, token: &CancellationToken, force: bool) {
        // Held across the callback so snapshots are delivered in order.
        let mut mark = self.mark.lock();
        if token.is_cancelled() {
            return;
        }
        let advanced = loaded > mark.high;
        if !advanced && !(force && !mark.emitted) {
            return;
        }
        mark.high = mark.high.max(loaded);
        mark.emitted = true;

        let total = total.filter(|t| loaded <= *t);
        let snapshot = ProgressSnapshot {
            loaded,
            total,
            length_computable: total.is_some(),
            timestamp: Utc::now(),
        };
        trace!(
            direction = self.direction,
            loaded,
            total = ?snapshot.total,
            "progress"
        );
        (self.callback)(snapshot);
    }
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("direction", &self.direction)
            .field("high", &self.mark.lock().high)
            .finish()
    }
}

/// Counts the bytes of a single pass over a body.
pub(crate) struct ProgressPass {
    tracker: ProgressTracker,
    total: Option<u64>,
    loaded: u64,
    token: CancellationToken,
}

impl ProgressPass {
    pub(crate) fn advance(&mut self, bytes: usize) {
        if bytes == 0 {
            return;
        }
        self.loaded += bytes as u64;
        self.tracker
            .emit(self.loaded, self.total, &self.token, false);
    }

    /// End of body. Guarantees at least one snapshot per exchange.
    pub(crate) fn finish(&mut self) {
        self.tracker
            .emit(self.loaded, self.total, &self.token, true);
    }
}

/// Report every chunk of `body` to `pass`.
pub(crate) fn track_stream(body: BodyStream, pass: ProgressPass) -> BodyStream {
    Box::pin(stream::unfold(Some((body, pass)), |state| async move {
        let (mut body, mut pass) = state?;
        match body.next().await {
            Some(Ok(chunk)) => {
                pass.advance(chunk.len());
                Some((Ok(chunk), Some((body, pass))))
            }
            Some(Err(e)) => Some((Err(e), None)),
            None => {
                pass.finish();
                None
            }
        }
    }))
}

/// End `body` with an error as soon as `token` fires.
pub(crate) fn abortable(body: BodyStream, token: CancellationToken) -> BodyStream {
    Box::pin(stream::unfold(Some((body, token)), |state| async move {
        let (mut body, token) = state?;
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                let err = io::Error::new(io::ErrorKind::Interrupted, "transfer aborted");
                return Some((Err(err), None));
            }
            next = body.next() => next,
        };
        match next {
            Some(Ok(chunk)) => Some((Ok(chunk), Some((body, token)))),
            Some(Err(e)) => Some((Err(e), None)),
            None => None,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<ProgressSnapshot>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |s| sink.lock().push(s));
        (callback, seen)
    }

    fn chunks(sizes: &[usize]) -> BodyStream {
        let items: Vec<io::Result<Bytes>> = sizes
            .iter()
            .map(|n| Ok(Bytes::from(vec![b'a'; *n])))
            .collect();
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn test_tracks_chunks_to_total() {
        let (callback, seen) = recorder();
        let tracker = ProgressTracker::new("download", callback);
        let body = track_stream(chunks(&[4, 4, 2]), tracker.pass(Some(10), CancellationToken::new()));

        let collected: Vec<_> = body.collect().await;
        assert_eq!(collected.len(), 3);

        let loaded: Vec<u64> = seen.lock().iter().map(|s| s.loaded).collect();
        assert_eq!(loaded, vec![4, 8, 10]);

        let last = seen.lock().last().cloned().unwrap();
        assert!(last.length_computable);
        assert_eq!(last.total, Some(10));
        assert_eq!(last.fraction(), Some(1.0));
    }

    #[test]
    fn test_retry_pass_never_goes_backwards() {
        let (callback, seen) = recorder();
        let tracker = ProgressTracker::new("upload", callback);

        let mut first = tracker.pass(Some(10), CancellationToken::new());
        first.advance(6);

        let mut second = tracker.pass(Some(10), CancellationToken::new());
        second.advance(5);
        second.advance(5);
        second.finish();

        let loaded: Vec<u64> = seen.lock().iter().map(|s| s.loaded).collect();
        assert_eq!(loaded, vec![6, 10]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_restarted_passes_stay_monotonic(
                sizes in prop::collection::vec(1usize..4096, 1..24),
                cuts in prop::collection::vec(0usize..24, 0..4),
            ) {
                let total: u64 = sizes.iter().map(|n| *n as u64).sum();
                let (callback, seen) = recorder();
                let tracker = ProgressTracker::new("upload", callback);

                // Aborted passes over a prefix, then one full pass.
                for cut in cuts {
                    let mut pass = tracker.pass(Some(total), CancellationToken::new());
                    for n in sizes.iter().take(cut) {
                        pass.advance(*n);
                    }
                }
                let mut pass = tracker.pass(Some(total), CancellationToken::new());
                for n in &sizes {
                    pass.advance(*n);
                }
                pass.finish();

                let seen = seen.lock();
                for pair in seen.windows(2) {
                    prop_assert!(pair[0].loaded < pair[1].loaded);
                }
                let last = seen.last().cloned().unwrap();
                prop_assert_eq!(last.loaded, total);
                prop_assert!(last.length_computable);
            }
        }
    }

    #[test]
    fn test_exceeding_total_drops_length() {
        let (callback, seen) = recorder();
        let tracker = ProgressTracker::new("download", callback);
        let mut pass = tracker.pass(Some(4), CancellationToken::new());
        pass.advance(3);
        pass.advance(3);

        let snapshots = seen.lock();
        assert!(snapshots[0].length_computable);
        assert_eq!(snapshots[1].total, None);
        assert!(!snapshots[1].length_computable);
    }

    #[test]
    fn test_empty_body_reports_once() {
        let (callback, seen) = recorder();
        let tracker = ProgressTracker::new("download", callback);
        tracker.pass(Some(0), CancellationToken::new()).finish();
        tracker.pass(Some(0), CancellationToken::new()).finish();

        let snapshots = seen.lock();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].loaded, 0);
        assert_eq!(snapshots[0].fraction(), Some(1.0));
    }

    #[test]
    fn test_no_snapshots_after_cancel() {
        let (callback, seen) = recorder();
        let tracker = ProgressTracker::new("download", callback);
        let token = CancellationToken::new();
        let mut pass = tracker.pass(None, token.clone());

        pass.advance(10);
        token.cancel();
        pass.advance(10);
        pass.finish();

        assert_eq!(seen.lock().len(), 1);
        assert!(!seen.lock()[0].length_computable);
    }

    #[tokio::test]
    async fn test_abortable_stream_stops_on_cancel() {
        let token = CancellationToken::new();
        let pending: BodyStream = Box::pin(stream::pending());
        let mut body = abortable(pending, token.clone());

        token.cancel();
        let err = body.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
        assert!(body.next().await.is_none());
    }
}
