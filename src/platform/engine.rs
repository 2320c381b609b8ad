//! Order Engine - execution with bounded retries
//!
//! - `add_order` validates, persists and queues an order as pending
//! - `process_order` runs one execution attempt; a given order id is never
//!   executed by two overlapping attempts
//! - failures are retried after a fixed delay until `max_retries` is
//!   reached, then the order fails
//! - `cancel_order` finalizes a pending/retrying order and aborts its
//!   scheduled retry
//!
//! Execution failure is a status transition, not an error. `Err` is only
//! returned for validation and persistence faults.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::queue::{OrderQueue, QueueStats};
use super::scheduler::RetryScheduler;
use crate::config::ExecutionConfig;
use crate::domain::{NewOrder, Order, OrderStatus};
use crate::error::{FinError, Result};
use crate::exchange::ExchangeGateway;
use crate::persistence::Store;
use crate::supervisor::{Alert, AlertLevel, AlertSink};

/// Published on every order status change
#[derive(Debug, Clone, Serialize)]
pub struct OrderUpdate {
    pub order_id: String,
    pub status: OrderStatus,
    pub retry_count: u32,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<&Order> for OrderUpdate {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id.clone(),
            status: order.status,
            retry_count: order.retry_count,
            error: order.last_error.clone(),
            timestamp: order.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub orders_added: u64,
    pub executions_attempted: u64,
    pub retries_scheduled: u64,
    pub orders_completed: u64,
    pub orders_failed: u64,
    pub orders_cancelled: u64,
}

pub struct OrderEngine {
    store: Arc<dyn Store>,
    gateway: Arc<dyn ExchangeGateway>,
    config: ExecutionConfig,
    queue: Mutex<OrderQueue>,
    /// Orders with an execution attempt in progress
    in_flight: Mutex<HashSet<String>>,
    /// Serializes read-modify-write of order status
    state_lock: Mutex<()>,
    scheduler: RetryScheduler,
    due_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    updates: broadcast::Sender<OrderUpdate>,
    stats: RwLock<EngineStats>,
    alerts: Option<Arc<dyn AlertSink>>,
}

impl OrderEngine {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn ExchangeGateway>,
        config: ExecutionConfig,
    ) -> Self {
        let (scheduler, due_rx) = RetryScheduler::new(config.retry_delay());
        let (updates, _) = broadcast::channel(256);

        Self {
            store,
            gateway,
            queue: Mutex::new(OrderQueue::new(config.queue_size)),
            config,
            in_flight: Mutex::new(HashSet::new()),
            state_lock: Mutex::new(()),
            scheduler,
            due_rx: Mutex::new(Some(due_rx)),
            updates,
            stats: RwLock::new(EngineStats::default()),
            alerts: None,
        }
    }

    /// Raise an error alert whenever an order exhausts its retries.
    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Start the retry worker. Returns `None` if it is already running.
    ///
    /// The worker holds only a weak reference and stops once the engine is
    /// dropped.
    pub async fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut due_rx = self.due_rx.lock().await.take()?;
        let engine: Weak<Self> = Arc::downgrade(self);

        info!(
            "Starting order retry worker via {} (delay: {:?}, max retries: {})",
            self.gateway.name(),
            self.scheduler.delay(),
            self.config.max_retries
        );

        Some(tokio::spawn(async move {
            while let Some(order_id) = due_rx.recv().await {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                tokio::spawn(async move {
                    engine.run_due_retry(&order_id).await;
                });
            }
            info!("Order retry worker stopped");
        }))
    }

    async fn run_due_retry(&self, order_id: &str) {
        // cancelled during the delay window
        let status = self.get_order_status(order_id).await;
        if status != OrderStatus::Retrying {
            debug!("Skipping due retry for {} (status: {})", order_id, status);
            return;
        }
        if let Err(e) = self.process_order(order_id).await {
            error!("Retry of order {} failed: {}", order_id, e);
        }
    }

    /// Validate, persist and queue a new order. Returns the assigned id.
    pub async fn add_order(&self, request: NewOrder) -> Result<String> {
        request.validate()?;
        let order = Order::from_request(request);

        {
            let mut queue = self.queue.lock().await;
            if queue.len() >= self.config.queue_size {
                return Err(FinError::Validation(format!(
                    "order queue is full ({} orders)",
                    self.config.queue_size
                )));
            }
            self.store.insert_order(&order).await?;
            queue.enqueue(&order.id).map_err(FinError::Internal)?;
        }

        info!(
            "Order {} added: {} {} {} {} on {} (user {}, strategy {})",
            order.id,
            order.side,
            order.order_type,
            order.amount,
            order.symbol,
            order.exchange,
            order.user_id,
            order.strategy_id
        );
        self.stats.write().await.orders_added += 1;
        self.publish(&order);

        Ok(order.id)
    }

    /// Run one execution attempt for `order_id`.
    ///
    /// Returns the status after the attempt. If the order is already being
    /// executed the call returns its current status without executing.
    pub async fn process_order(&self, order_id: &str) -> Result<OrderStatus> {
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(order_id.to_string()) {
                debug!("Order {} already in flight, skipping", order_id);
                drop(in_flight);
                return Ok(self.get_order_status(order_id).await);
            }
        }

        self.queue.lock().await.remove(order_id);
        let result = self.attempt(order_id).await;
        self.in_flight.lock().await.remove(order_id);

        result
    }

    async fn attempt(&self, order_id: &str) -> Result<OrderStatus> {
        let Some(order) = self.store.get_order(order_id).await? else {
            warn!("Cannot process unknown order {}", order_id);
            return Ok(OrderStatus::Unknown);
        };
        if order.status.is_terminal() {
            debug!("Order {} already {}, not executing", order_id, order.status);
            return Ok(order.status);
        }

        self.stats.write().await.executions_attempted += 1;
        let outcome = self.gateway.execute_order(&order).await;

        let state = self.state_lock.lock().await;

        // Re-read: a cancel may have landed while the gateway call was pending
        let Some(mut order) = self.store.get_order(order_id).await? else {
            return Ok(OrderStatus::Unknown);
        };
        if order.status.is_terminal() {
            info!(
                "Order {} became {} during execution, discarding result",
                order_id, order.status
            );
            return Ok(order.status);
        }

        let retry = match outcome {
            Ok(receipt) => {
                order.last_error = None;
                order.transition(OrderStatus::Completed)?;
                info!(
                    "Order {} completed on {} (exchange id: {})",
                    order_id, self.gateway.name(), receipt.exchange_order_id
                );
                false
            }
            Err(e) if order.retry_count < self.config.max_retries => {
                order.retry_count += 1;
                order.last_error = Some(e.to_string());
                order.transition(OrderStatus::Retrying)?;
                warn!(
                    "Order {} execution failed (retry {}/{} in {:?}): {}",
                    order_id,
                    order.retry_count,
                    self.config.max_retries,
                    self.scheduler.delay(),
                    e
                );
                true
            }
            Err(e) => {
                order.last_error = Some(e.to_string());
                order.transition(OrderStatus::Failed)?;
                error!(
                    "Order {} failed after {} retries: {}",
                    order_id, order.retry_count, e
                );
                false
            }
        };

        self.store.update_order(&order).await?;
        if retry {
            self.scheduler.schedule(order_id);
        }
        drop(state);

        self.record_transition(&order).await;
        if order.status == OrderStatus::Failed {
            self.alert_failed(&order);
        }
        Ok(order.status)
    }

    fn alert_failed(&self, order: &Order) {
        let Some(alerts) = &self.alerts else {
            return;
        };
        let alert = Alert::new(
            AlertLevel::Error,
            "order_engine",
            "Order Failed",
            &format!(
                "Order {} ({} {} {} on {}) failed after {} retries: {}",
                order.id,
                order.side,
                order.amount,
                order.symbol,
                order.exchange,
                order.retry_count,
                order.last_error.as_deref().unwrap_or("unknown error")
            ),
        )
        .with_metadata(json!({
            "order_id": order.id,
            "user_id": order.user_id,
            "strategy_id": order.strategy_id,
            "retry_count": order.retry_count,
        }));

        let alerts = Arc::clone(alerts);
        tokio::spawn(async move {
            alerts.send_alert(alert).await;
        });
    }

    /// Process the oldest queued order that is still pending.
    pub async fn process_next(&self) -> Result<Option<(String, OrderStatus)>> {
        loop {
            let Some(order_id) = self.queue.lock().await.dequeue() else {
                return Ok(None);
            };
            if self.get_order_status(&order_id).await != OrderStatus::Pending {
                continue;
            }
            let status = self.process_order(&order_id).await?;
            return Ok(Some((order_id, status)));
        }
    }

    /// Cancel a pending or retrying order.
    ///
    /// Returns `Ok(false)` for unknown ids and orders in any other status.
    pub async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        let state = self.state_lock.lock().await;

        let Some(mut order) = self.store.get_order(order_id).await? else {
            debug!("Cancel ignored: unknown order {}", order_id);
            return Ok(false);
        };
        if !order.status.is_cancellable() {
            debug!("Cancel ignored: order {} is {}", order_id, order.status);
            return Ok(false);
        }

        order.transition(OrderStatus::Cancelled)?;
        self.store.update_order(&order).await?;
        self.scheduler.cancel(order_id);
        self.queue.lock().await.remove(order_id);
        drop(state);

        info!("Order {} cancelled", order_id);
        self.record_transition(&order).await;
        Ok(true)
    }

    /// Status lookup; `Unknown` for ids never seen
    pub async fn get_order_status(&self, order_id: &str) -> OrderStatus {
        match self.store.get_order(order_id).await {
            Ok(Some(order)) => order.status,
            Ok(None) => OrderStatus::Unknown,
            Err(e) => {
                error!("Status lookup for order {} failed: {}", order_id, e);
                OrderStatus::Unknown
            }
        }
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Option<Order>> {
        self.store.get_order(order_id).await
    }

    /// Requeue pending orders and reschedule retrying ones, e.g. after a
    /// restart against a durable store. Returns (requeued, rescheduled).
    pub async fn recover(&self) -> Result<(usize, usize)> {
        let mut requeued = 0;
        {
            let mut queue = self.queue.lock().await;
            for order in self.store.find_orders(Some(OrderStatus::Pending)).await? {
                if !queue.contains(&order.id) && queue.enqueue(&order.id).is_ok() {
                    requeued += 1;
                }
            }
        }

        let retrying = self.store.find_orders(Some(OrderStatus::Retrying)).await?;
        for order in &retrying {
            self.scheduler.schedule(&order.id);
        }

        info!(
            "Recovered orders: {} requeued, {} retries rescheduled",
            requeued,
            retrying.len()
        );
        Ok((requeued, retrying.len()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderUpdate> {
        self.updates.subscribe()
    }

    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    pub async fn queue_stats(&self) -> QueueStats {
        self.queue.lock().await.stats()
    }

    pub fn is_retry_scheduled(&self, order_id: &str) -> bool {
        self.scheduler.is_scheduled(order_id)
    }

    async fn record_transition(&self, order: &Order) {
        {
            let mut stats = self.stats.write().await;
            match order.status {
                OrderStatus::Retrying => stats.retries_scheduled += 1,
                OrderStatus::Completed => stats.orders_completed += 1,
                OrderStatus::Failed => stats.orders_failed += 1,
                OrderStatus::Cancelled => stats.orders_cancelled += 1,
                OrderStatus::Pending | OrderStatus::Unknown => {}
            }
        }
        self.publish(order);
    }

    fn publish(&self, order: &Order) {
        // no subscribers is fine
        let _ = self.updates.send(OrderUpdate::from(order));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderSide;
    use crate::exchange::{ExecutionReceipt, PaperGateway};
    use crate::persistence::InMemoryStore;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` calls, then succeeds
    struct FlakyGateway {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyGateway {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExchangeGateway for FlakyGateway {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn execute_order(&self, order: &Order) -> Result<ExecutionReceipt> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(FinError::Execution(format!("venue unavailable ({call})")))
            } else {
                Ok(ExecutionReceipt::new(&order.id, "ex-1"))
            }
        }
    }

    fn config(retry_delay_ms: u64) -> ExecutionConfig {
        ExecutionConfig {
            max_retries: 3,
            retry_delay_ms,
            queue_size: 16,
        }
    }

    fn request() -> NewOrder {
        NewOrder::market("u1", "s1", "binance", "BTCUSDT", OrderSide::Buy, dec!(0.1))
    }

    async fn wait_for_terminal(engine: &OrderEngine, order_id: &str) -> OrderStatus {
        for _ in 0..400 {
            let status = engine.get_order_status(order_id).await;
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("order {order_id} never reached a terminal status");
    }

    #[tokio::test]
    async fn test_success_completes() {
        let engine = OrderEngine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(PaperGateway::new()),
            config(5),
        );
        let id = engine.add_order(request()).await.unwrap();
        assert_eq!(engine.get_order_status(&id).await, OrderStatus::Pending);

        let status = engine.process_order(&id).await.unwrap();
        assert_eq!(status, OrderStatus::Completed);
        assert_eq!(engine.stats().await.orders_completed, 1);
        assert_eq!(engine.queue_stats().await.current_size, 0);
    }

    #[tokio::test]
    async fn test_failure_schedules_retry() {
        let gateway = Arc::new(FlakyGateway::new(1));
        let engine = Arc::new(OrderEngine::new(
            Arc::new(InMemoryStore::new()),
            gateway.clone(),
            config(20),
        ));
        engine.start().await.unwrap();

        let id = engine.add_order(request()).await.unwrap();
        let status = engine.process_order(&id).await.unwrap();
        assert_eq!(status, OrderStatus::Retrying);
        assert!(engine.is_retry_scheduled(&id));

        assert_eq!(wait_for_terminal(&engine, &id).await, OrderStatus::Completed);
        let order = engine.get_order(&id).await.unwrap().unwrap();
        assert_eq!(order.retry_count, 1);
        assert_eq!(order.last_error, None);
        assert_eq!(gateway.calls(), 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted_fails() {
        let gateway = Arc::new(FlakyGateway::new(u32::MAX));
        let engine = Arc::new(OrderEngine::new(
            Arc::new(InMemoryStore::new()),
            gateway.clone(),
            config(2),
        ));
        engine.start().await.unwrap();

        let id = engine.add_order(request()).await.unwrap();
        engine.process_order(&id).await.unwrap();

        assert_eq!(wait_for_terminal(&engine, &id).await, OrderStatus::Failed);
        let order = engine.get_order(&id).await.unwrap().unwrap();
        assert_eq!(order.retry_count, 3);
        assert!(order.last_error.is_some());
        // first attempt plus three retries
        assert_eq!(gateway.calls(), 4);
    }

    #[tokio::test]
    async fn test_cancel_during_retry_delay_prevents_execution() {
        let gateway = Arc::new(FlakyGateway::new(1));
        let engine = Arc::new(OrderEngine::new(
            Arc::new(InMemoryStore::new()),
            gateway.clone(),
            config(50),
        ));
        engine.start().await.unwrap();

        let id = engine.add_order(request()).await.unwrap();
        assert_eq!(
            engine.process_order(&id).await.unwrap(),
            OrderStatus::Retrying
        );
        assert!(engine.cancel_order(&id).await.unwrap());
        assert!(!engine.is_retry_scheduled(&id));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(engine.get_order_status(&id).await, OrderStatus::Cancelled);
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_is_noop_on_terminal_or_unknown() {
        let engine = OrderEngine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(PaperGateway::new()),
            config(5),
        );
        let id = engine.add_order(request()).await.unwrap();
        engine.process_order(&id).await.unwrap();

        assert!(!engine.cancel_order(&id).await.unwrap());
        assert!(!engine.cancel_order("missing").await.unwrap());
        assert_eq!(engine.get_order_status(&id).await, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn test_terminal_order_not_reexecuted() {
        let gateway = Arc::new(FlakyGateway::new(0));
        let engine = OrderEngine::new(
            Arc::new(InMemoryStore::new()),
            gateway.clone(),
            config(5),
        );
        let id = engine.add_order(request()).await.unwrap();
        engine.process_order(&id).await.unwrap();
        engine.process_order(&id).await.unwrap();
        assert_eq!(gateway.calls(), 1);

        let cancelled = engine.add_order(request()).await.unwrap();
        engine.cancel_order(&cancelled).await.unwrap();
        assert_eq!(
            engine.process_order(&cancelled).await.unwrap(),
            OrderStatus::Cancelled
        );
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_order_status() {
        let engine = OrderEngine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(PaperGateway::new()),
            config(5),
        );
        assert_eq!(engine.get_order_status("nope").await, OrderStatus::Unknown);
        assert_eq!(
            engine.process_order("nope").await.unwrap(),
            OrderStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_invalid_order_rejected() {
        let engine = OrderEngine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(PaperGateway::new()),
            config(5),
        );
        let mut bad = request();
        bad.amount = dec!(-1);
        let err = engine.add_order(bad).await.unwrap_err();
        assert!(matches!(err, FinError::Validation(_)));
        assert_eq!(engine.stats().await.orders_added, 0);
    }

    #[tokio::test]
    async fn test_process_next_is_fifo() {
        let engine = OrderEngine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(PaperGateway::new()),
            config(5),
        );
        let first = engine.add_order(request()).await.unwrap();
        let second = engine.add_order(request()).await.unwrap();

        let (id, status) = engine.process_next().await.unwrap().unwrap();
        assert_eq!(id, first);
        assert_eq!(status, OrderStatus::Completed);

        let (id, _) = engine.process_next().await.unwrap().unwrap();
        assert_eq!(id, second);
        assert!(engine.process_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_updates_are_published() {
        let engine = OrderEngine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(PaperGateway::new()),
            config(5),
        );
        let mut updates = engine.subscribe();

        let id = engine.add_order(request()).await.unwrap();
        engine.process_order(&id).await.unwrap();

        let added = updates.recv().await.unwrap();
        assert_eq!(added.status, OrderStatus::Pending);
        let done = updates.recv().await.unwrap();
        assert_eq!(done.order_id, id);
        assert_eq!(done.status, OrderStatus::Completed);
    }

    #[derive(Default)]
    struct RecordingSink {
        alerts: Mutex<Vec<Alert>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn send_alert(&self, alert: Alert) {
            self.alerts.lock().await.push(alert);
        }
    }

    #[tokio::test]
    async fn test_exhausted_retries_raise_error_alert() {
        let sink = Arc::new(RecordingSink::default());
        let engine = OrderEngine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(FlakyGateway::new(u32::MAX)),
            ExecutionConfig {
                max_retries: 0,
                ..config(5)
            },
        )
        .with_alerts(sink.clone());

        let id = engine.add_order(request()).await.unwrap();
        assert_eq!(engine.process_order(&id).await.unwrap(), OrderStatus::Failed);

        for _ in 0..100 {
            if !sink.alerts.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let alerts = sink.alerts.lock().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Error);
        assert!(alerts[0].message.contains(&id));
        assert!(alerts[0].message.contains("venue unavailable"));
    }

    #[tokio::test]
    async fn test_completed_order_raises_no_alert() {
        let sink = Arc::new(RecordingSink::default());
        let engine = OrderEngine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(PaperGateway::new()),
            config(5),
        )
        .with_alerts(sink.clone());

        let id = engine.add_order(request()).await.unwrap();
        engine.process_order(&id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sink.alerts.lock().await.is_empty());
    }
}
