//! Bounded, ordered queue of subscribe requests.
//!
//! Any number of callers enqueue; exactly one worker consumes, so requests are
//! handled in strict arrival order. A full queue suspends the caller, which is
//! the only backpressure point in the relay.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::subscription::Subscription;
use crate::error::{RelayError, RelayResult};

/// One pending "subscribe to source X" request.
#[derive(Debug)]
pub(crate) struct SubscriptionRequest {
    pub source_id: String,
    pub reply: oneshot::Sender<RelayResult<Subscription>>,
}

impl SubscriptionRequest {
    /// Returns `true` if the caller stopped waiting for the answer.
    pub fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }

    /// Completes the request. A subscription the caller no longer wants is
    /// dropped, which disposes it.
    pub fn resolve(self, result: RelayResult<Subscription>) {
        if let Err(Ok(subscription)) = self.reply.send(result) {
            log::debug!(
                "[Queue] Caller for {} went away, disposing subscription",
                subscription.source_id()
            );
        }
    }
}

/// Producer side of the request queue. Cheap to clone.
#[derive(Clone, Debug)]
pub struct RequestQueue {
    tx: mpsc::Sender<SubscriptionRequest>,
}

impl RequestQueue {
    /// Creates a queue holding at most `capacity` pending requests.
    pub(crate) fn bounded(capacity: usize) -> (Self, mpsc::Receiver<SubscriptionRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueues a request for `source_id` and waits for the worker's answer.
    pub async fn subscribe(&self, source_id: &str) -> RelayResult<Subscription> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(SubscriptionRequest {
                source_id: source_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| RelayError::RelayStopped)?;

        answer.await.unwrap_or(Err(RelayError::RelayStopped))
    }

    /// Like [`subscribe`](Self::subscribe), but gives up with
    /// [`RelayError::Cancelled`] as soon as `cancel` fires.
    ///
    /// Cancellation only affects this caller's request: before it is
    /// enqueued, while waiting for a queue slot, or while waiting for the
    /// worker. If the worker resolves the request after the caller gave up,
    /// the subscription is disposed right away.
    pub async fn subscribe_with_cancel(
        &self,
        source_id: &str,
        cancel: &CancellationToken,
    ) -> RelayResult<Subscription> {
        if cancel.is_cancelled() {
            return Err(RelayError::Cancelled);
        }

        let (reply, answer) = oneshot::channel();
        let request = SubscriptionRequest {
            source_id: source_id.to_string(),
            reply,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            sent = self.tx.send(request) => sent.map_err(|_| RelayError::RelayStopped)?,
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::debug!("[Queue] Request for {} cancelled while pending", source_id);
                Err(RelayError::Cancelled)
            }
            answer = answer => answer.unwrap_or(Err(RelayError::RelayStopped)),
        }
    }

    /// Returns `true` once the worker has stopped consuming.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Maximum number of pending requests.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requests_arrive_in_order() {
        let (queue, mut rx) = RequestQueue::bounded(4);
        for (i, id) in ["a", "b", "c"].into_iter().enumerate() {
            let queue = queue.clone();
            tokio::spawn(async move {
                let _ = queue.subscribe(id).await;
            });
            crate::test_support::wait_until(|| rx.len() == i + 1).await;
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.unwrap().source_id);
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn full_queue_blocks_until_a_slot_frees() {
        let (queue, mut rx) = RequestQueue::bounded(1);
        assert_eq!(queue.capacity(), 1);

        let first = tokio::spawn({
            let queue = queue.clone();
            async move { queue.subscribe("a").await }
        });
        let second = tokio::spawn({
            let queue = queue.clone();
            async move { queue.subscribe("b").await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(rx.len(), 1);

        // Dropping the reply slot makes the waiting caller see RelayStopped
        let request = rx.recv().await.unwrap();
        drop(request);
        let next = rx.recv().await.unwrap();
        drop(next);

        assert!(matches!(first.await.unwrap(), Err(RelayError::RelayStopped)));
        assert!(matches!(second.await.unwrap(), Err(RelayError::RelayStopped)));
    }

    #[tokio::test]
    async fn pre_cancelled_token_never_enqueues() {
        let (queue, mut rx) = RequestQueue::bounded(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = queue.subscribe_with_cancel("a", &cancel).await;
        assert_eq!(result.unwrap_err(), RelayError::Cancelled);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_while_waiting_for_slot() {
        let (queue, _rx) = RequestQueue::bounded(1);
        let _blocker = tokio::spawn({
            let queue = queue.clone();
            async move { queue.subscribe("a").await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let cancel = CancellationToken::new();
        let pending = tokio::spawn({
            let queue = queue.clone();
            let cancel = cancel.clone();
            async move { queue.subscribe_with_cancel("b", &cancel).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        cancel.cancel();

        assert_eq!(pending.await.unwrap().unwrap_err(), RelayError::Cancelled);
    }

    #[tokio::test]
    async fn cancel_while_waiting_for_worker_abandons_request() {
        let (queue, mut rx) = RequestQueue::bounded(4);
        let cancel = CancellationToken::new();
        let pending = tokio::spawn({
            let queue = queue.clone();
            let cancel = cancel.clone();
            async move { queue.subscribe_with_cancel("a", &cancel).await }
        });

        let request = rx.recv().await.unwrap();
        assert!(!request.is_abandoned());
        cancel.cancel();

        assert_eq!(pending.await.unwrap().unwrap_err(), RelayError::Cancelled);
        assert!(request.is_abandoned());
    }

    #[tokio::test]
    async fn closed_queue_reports_relay_stopped() {
        let (queue, rx) = RequestQueue::bounded(4);
        drop(rx);
        assert!(queue.is_closed());
        assert_eq!(
            queue.subscribe("a").await.unwrap_err(),
            RelayError::RelayStopped
        );
    }
}
