//! Retry Scheduler - delayed re-execution of failed orders
//!
//! Each scheduled retry is a timer task keyed by order id. When the delay
//! elapses the id is pushed onto the due channel consumed by the engine's
//! retry worker. Cancelling an order aborts its timer, so a cancelled order
//! never becomes due.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::debug;

struct Timer {
    /// Distinguishes a replacement timer from the one it replaced
    generation: u64,
    handle: AbortHandle,
}

pub struct RetryScheduler {
    delay: Duration,
    due_tx: mpsc::UnboundedSender<String>,
    pending: Arc<DashMap<String, Timer>>,
    next_generation: AtomicU64,
}

impl RetryScheduler {
    /// Create a scheduler and the receiver of due order ids
    pub fn new(delay: Duration) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (due_tx, due_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            delay,
            due_tx,
            pending: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
        };
        (scheduler, due_rx)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `order_id` to become due after the retry delay.
    /// An existing timer for the same id is replaced.
    pub fn schedule(&self, order_id: &str) {
        let key = order_id.to_string();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let pending = self.pending.clone();
        let due_tx = self.due_tx.clone();
        let delay = self.delay;
        let (armed_tx, armed_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Fires only after this timer's entry is in `pending`
            if armed_rx.await.is_err() {
                return;
            }
            pending.remove_if(&key, |_, timer| timer.generation == generation);
            if due_tx.send(key).is_err() {
                debug!("Retry worker gone, dropping due retry");
            }
        });

        let timer = Timer {
            generation,
            handle: handle.abort_handle(),
        };
        if let Some(previous) = self.pending.insert(order_id.to_string(), timer) {
            previous.handle.abort();
        }
        let _ = armed_tx.send(());

        debug!("Scheduled retry for {} in {:?}", order_id, delay);
    }

    /// Abort a scheduled retry. Returns `true` if one was pending.
    pub fn cancel(&self, order_id: &str) -> bool {
        match self.pending.remove(order_id) {
            Some((_, timer)) => {
                timer.handle.abort();
                debug!("Cancelled scheduled retry for {}", order_id);
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, order_id: &str) -> bool {
        self.pending
            .get(order_id)
            .map_or(false, |timer| !timer.handle.is_finished())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scheduled_id_becomes_due() {
        let (scheduler, mut due) = RetryScheduler::new(Duration::from_millis(5));
        scheduler.schedule("o1");
        assert!(scheduler.is_scheduled("o1"));

        let id = tokio::time::timeout(Duration::from_secs(2), due.recv())
            .await
            .unwrap();
        assert_eq!(id.as_deref(), Some("o1"));
    }

    #[tokio::test]
    async fn test_cancelled_id_never_due() {
        let (scheduler, mut due) = RetryScheduler::new(Duration::from_millis(20));
        scheduler.schedule("o1");
        assert!(scheduler.cancel("o1"));
        assert!(!scheduler.cancel("o1"));

        let result = tokio::time::timeout(Duration::from_millis(100), due.recv()).await;
        assert!(result.is_err(), "cancelled retry must not fire");
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_reschedule_replaces_timer() {
        let (scheduler, mut due) = RetryScheduler::new(Duration::from_millis(10));
        scheduler.schedule("o1");
        scheduler.schedule("o1");

        let first = tokio::time::timeout(Duration::from_secs(2), due.recv())
            .await
            .unwrap();
        assert_eq!(first.as_deref(), Some("o1"));

        let second = tokio::time::timeout(Duration::from_millis(100), due.recv()).await;
        assert!(second.is_err(), "replaced timer must not fire twice");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_immediate_timers_leave_no_entries() {
        let (scheduler, mut due) = RetryScheduler::new(Duration::ZERO);
        for i in 0..100 {
            scheduler.schedule(&format!("o{i}"));
        }

        for _ in 0..100 {
            tokio::time::timeout(Duration::from_secs(2), due.recv())
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_replacement_entry_survives_until_it_fires() {
        let (scheduler, mut due) = RetryScheduler::new(Duration::from_millis(200));
        scheduler.schedule("o1");
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.schedule("o1");
        assert_eq!(scheduler.pending_count(), 1);

        // past the replaced timer's deadline, before the replacement's
        tokio::time::sleep(Duration::from_millis(170)).await;
        assert!(scheduler.is_scheduled("o1"));

        let id = tokio::time::timeout(Duration::from_secs(2), due.recv())
            .await
            .unwrap();
        assert_eq!(id.as_deref(), Some("o1"));
        assert_eq!(scheduler.pending_count(), 0);
    }
}
