//! Order Queue - FIFO of orders waiting for their first execution attempt

use std::collections::VecDeque;
use tracing::{debug, warn};

/// Bounded FIFO of pending order ids
pub struct OrderQueue {
    items: VecDeque<String>,
    /// Maximum queue length
    max_size: usize,
    enqueued_count: u64,
    dequeued_count: u64,
    removed_count: u64,
}

impl OrderQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
            enqueued_count: 0,
            dequeued_count: 0,
            removed_count: 0,
        }
    }

    /// Append an order id
    ///
    /// # Returns
    /// - `Ok(())` queued
    /// - `Err(reason)` queue full or id already queued
    pub fn enqueue(&mut self, order_id: &str) -> Result<(), String> {
        if self.items.len() >= self.max_size {
            warn!(
                "Order queue full ({}), rejecting {}",
                self.max_size, order_id
            );
            return Err(format!("Order queue is full ({} orders)", self.max_size));
        }

        if self.contains(order_id) {
            return Err(format!("Order {} is already queued", order_id));
        }

        debug!("Enqueuing order {}", order_id);
        self.items.push_back(order_id.to_string());
        self.enqueued_count += 1;
        Ok(())
    }

    /// Take the oldest order id
    pub fn dequeue(&mut self) -> Option<String> {
        let id = self.items.pop_front()?;
        self.dequeued_count += 1;
        Some(id)
    }

    /// Drop an order id wherever it sits (cancel, or processed out of turn)
    pub fn remove(&mut self, order_id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|id| id != order_id);
        let removed = before != self.items.len();
        if removed {
            self.removed_count += 1;
        }
        removed
    }

    pub fn contains(&self, order_id: &str) -> bool {
        self.items.iter().any(|id| id == order_id)
    }

    pub fn peek(&self) -> Option<&str> {
        self.items.front().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            current_size: self.items.len(),
            max_size: self.max_size,
            enqueued_total: self.enqueued_count,
            dequeued_total: self.dequeued_count,
            removed_total: self.removed_count,
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub current_size: usize,
    pub max_size: usize,
    pub enqueued_total: u64,
    pub dequeued_total: u64,
    pub removed_total: u64,
}

impl std::fmt::Display for QueueStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Queue[{}/{}, enq={}, deq={}, rm={}]",
            self.current_size,
            self.max_size,
            self.enqueued_total,
            self.dequeued_total,
            self.removed_total
        )
    }
}
