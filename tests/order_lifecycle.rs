use async_trait::async_trait;
use fincore::config::ExecutionConfig;
use fincore::domain::{NewOrder, Order, OrderSide, OrderStatus, OrderType};
use fincore::error::{FinError, Result};
use fincore::exchange::{ExchangeGateway, ExecutionReceipt};
use fincore::{InMemoryStore, OrderEngine};
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Always fails, optionally after a pause
struct DownGateway {
    calls: AtomicU32,
    latency: Duration,
}

impl DownGateway {
    fn new(latency: Duration) -> Self {
        Self {
            calls: AtomicU32::new(0),
            latency,
        }
    }
}

#[async_trait]
impl ExchangeGateway for DownGateway {
    fn name(&self) -> &str {
        "down"
    }

    async fn execute_order(&self, _order: &Order) -> Result<ExecutionReceipt> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        Err(FinError::Execution("connection reset".into()))
    }
}

/// Succeeds after a pause
struct SlowGateway {
    calls: AtomicU32,
}

#[async_trait]
impl ExchangeGateway for SlowGateway {
    fn name(&self) -> &str {
        "slow"
    }

    async fn execute_order(&self, order: &Order) -> Result<ExecutionReceipt> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(ExecutionReceipt::new(&order.id, "slow-1"))
    }
}

fn config() -> ExecutionConfig {
    ExecutionConfig {
        max_retries: 3,
        retry_delay_ms: 5,
        queue_size: 100,
    }
}

fn limit_order() -> NewOrder {
    NewOrder {
        order_type: OrderType::Limit,
        price: Some(dec!(65000)),
        ..NewOrder::market("u1", "grid-1", "okx", "BTC-USDT", OrderSide::Buy, dec!(0.5))
    }
}

async fn wait_terminal(engine: &OrderEngine, id: &str) -> OrderStatus {
    for _ in 0..400 {
        let status = engine.get_order_status(id).await;
        if status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("order {id} did not finish");
}

#[tokio::test]
async fn failing_order_is_retried_three_times_then_failed() {
    let gateway = Arc::new(DownGateway::new(Duration::ZERO));
    let engine = Arc::new(OrderEngine::new(
        Arc::new(InMemoryStore::new()),
        gateway.clone(),
        config(),
    ));
    engine.start().await.expect("worker starts once");
    assert!(engine.start().await.is_none());

    let mut updates = engine.subscribe();
    let id = engine.add_order(limit_order()).await.unwrap();
    engine.process_order(&id).await.unwrap();

    assert_eq!(wait_terminal(&engine, &id).await, OrderStatus::Failed);
    let order = engine.get_order(&id).await.unwrap().unwrap();
    assert_eq!(order.retry_count, 3);
    assert_eq!(order.last_error.as_deref(), Some("Order execution failed: connection reset"));
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 4);

    let mut seen = Vec::new();
    while let Ok(update) = updates.try_recv() {
        seen.push(update.status);
    }
    assert_eq!(
        seen,
        vec![
            OrderStatus::Pending,
            OrderStatus::Retrying,
            OrderStatus::Retrying,
            OrderStatus::Retrying,
            OrderStatus::Failed
        ]
    );

    let stats = engine.stats().await;
    assert_eq!(stats.retries_scheduled, 3);
    assert_eq!(stats.orders_failed, 1);
    assert!(!engine.cancel_order(&id).await.unwrap());
}

#[tokio::test]
async fn overlapping_process_calls_execute_once() {
    let gateway = Arc::new(SlowGateway {
        calls: AtomicU32::new(0),
    });
    let engine = Arc::new(OrderEngine::new(
        Arc::new(InMemoryStore::new()),
        gateway.clone(),
        config(),
    ));
    let id = engine.add_order(limit_order()).await.unwrap();

    let first = {
        let engine = engine.clone();
        let id = id.clone();
        tokio::spawn(async move { engine.process_order(&id).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = engine.process_order(&id).await.unwrap();

    assert_eq!(second, OrderStatus::Pending);
    assert_eq!(first.await.unwrap().unwrap(), OrderStatus::Completed);
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancel_while_executing_discards_result() {
    let gateway = Arc::new(DownGateway::new(Duration::from_millis(50)));
    let engine = Arc::new(OrderEngine::new(
        Arc::new(InMemoryStore::new()),
        gateway.clone(),
        config(),
    ));
    engine.start().await;
    let id = engine.add_order(limit_order()).await.unwrap();

    let attempt = {
        let engine = engine.clone();
        let id = id.clone();
        tokio::spawn(async move { engine.process_order(&id).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(engine.cancel_order(&id).await.unwrap());

    assert_eq!(attempt.await.unwrap().unwrap(), OrderStatus::Cancelled);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let order = engine.get_order(&id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.retry_count, 0);
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn limit_order_without_price_is_rejected() {
    let engine = OrderEngine::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(SlowGateway {
            calls: AtomicU32::new(0),
        }),
        config(),
    );
    let mut order = limit_order();
    order.price = None;

    let err = engine.add_order(order).await.unwrap_err();
    assert!(err.is_client_error());
    assert_eq!(engine.queue_stats().await.current_size, 0);
}

#[tokio::test]
async fn full_queue_rejects_new_orders() {
    let engine = OrderEngine::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(SlowGateway {
            calls: AtomicU32::new(0),
        }),
        ExecutionConfig {
            queue_size: 2,
            ..config()
        },
    );
    engine.add_order(limit_order()).await.unwrap();
    engine.add_order(limit_order()).await.unwrap();

    let err = engine.add_order(limit_order()).await.unwrap_err();
    assert!(matches!(err, FinError::Validation(_)));

    engine.process_next().await.unwrap();
    engine.add_order(limit_order()).await.unwrap();
}

#[tokio::test]
async fn recover_reschedules_retrying_orders() {
    let store = Arc::new(InMemoryStore::new());
    let first = OrderEngine::new(
        store.clone(),
        Arc::new(DownGateway::new(Duration::ZERO)),
        config(),
    );
    let id = first.add_order(limit_order()).await.unwrap();
    first.process_order(&id).await.unwrap();
    let queued = first.add_order(limit_order()).await.unwrap();
    drop(first);

    // a fresh engine over the same store picks the work back up
    let restarted = Arc::new(OrderEngine::new(
        store,
        Arc::new(SlowGateway {
            calls: AtomicU32::new(0),
        }),
        config(),
    ));
    restarted.start().await;
    assert_eq!(restarted.recover().await.unwrap(), (1, 1));

    assert_eq!(wait_terminal(&restarted, &id).await, OrderStatus::Completed);
    let (next, status) = restarted.process_next().await.unwrap().unwrap();
    assert_eq!(next, queued);
    assert_eq!(status, OrderStatus::Completed);
}
