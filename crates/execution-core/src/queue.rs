use std::collections::VecDeque;

use async_trait::async_trait;
use execution_types::TradeMessage;
use tokio::sync::Mutex;

/// A trade message plus the transport metadata a queue needs to move it:
/// `group_key` for best-effort per-run ordering, `dedup_id` for
/// at-least-once delivery collapsing. No FIFO guarantee is assumed by
/// anything that consumes this type.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message: TradeMessage,
    pub dedup_id: String,
    pub group_key: String,
}

impl QueuedMessage {
    pub fn for_trade(message: TradeMessage) -> Self {
        let dedup_id = message.trade_id.to_string();
        let group_key = message.run_id.to_string();
        Self { message, dedup_id, group_key }
    }
}

/// Queue transport interface, deliberately narrow: phase ordering is
/// enforced by the run state machine, not by this trait, so it need not
/// promise FIFO delivery between or within phases.
#[async_trait]
pub trait TradeQueue: Send + Sync {
    async fn send(&self, message: QueuedMessage) -> anyhow::Result<()>;
    async fn receive_batch(&self, max: usize) -> anyhow::Result<Vec<QueuedMessage>>;
    async fn ack(&self, dedup_id: &str) -> anyhow::Result<()>;
    async fn nack(&self, message: QueuedMessage) -> anyhow::Result<()>;
}

/// In-process FIFO stand-in for the real queueing transport, sized only to
/// let the worker's poll loop and tests run without an external broker.
pub struct InMemoryTradeQueue {
    inner: Mutex<VecDeque<QueuedMessage>>,
}

impl InMemoryTradeQueue {
    pub fn new() -> Self {
        Self { inner: Mutex::new(VecDeque::new()) }
    }
}

impl Default for InMemoryTradeQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TradeQueue for InMemoryTradeQueue {
    async fn send(&self, message: QueuedMessage) -> anyhow::Result<()> {
        self.inner.lock().await.push_back(message);
        Ok(())
    }

    async fn receive_batch(&self, max: usize) -> anyhow::Result<Vec<QueuedMessage>> {
        let mut guard = self.inner.lock().await;
        let take = max.min(guard.len());
        Ok(guard.drain(..take).collect())
    }

    async fn ack(&self, _dedup_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Redelivers at the back of the queue; a real transport's redelivery
    /// policy (visibility timeout, DLQ after N nacks) is out of scope here.
    async fn nack(&self, message: QueuedMessage) -> anyhow::Result<()> {
        self.inner.lock().await.push_back(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use execution_types::{Action, ExecutionPolicy, PlanItem};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn message(symbol: &str) -> TradeMessage {
        let item = PlanItem {
            symbol: symbol.to_string(),
            action: Action::Sell,
            target_weight: dec!(0),
            current_weight: dec!(0.1),
            trade_amount: dec!(100),
            priority: 0,
            shares: None,
            estimated_price: None,
        };
        TradeMessage::from_plan_item(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), "s", &item, ExecutionPolicy::WalkTheBook).unwrap()
    }

    #[tokio::test]
    async fn send_then_receive_preserves_message() {
        let queue = InMemoryTradeQueue::new();
        queue.send(QueuedMessage::for_trade(message("AAPL"))).await.unwrap();
        let batch = queue.receive_batch(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message.symbol, "AAPL");
    }

    #[tokio::test]
    async fn receive_batch_caps_at_requested_size() {
        let queue = InMemoryTradeQueue::new();
        for _ in 0..5 {
            queue.send(QueuedMessage::for_trade(message("AAPL"))).await.unwrap();
        }
        let batch = queue.receive_batch(2).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(queue.receive_batch(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn nack_redelivers_message() {
        let queue = InMemoryTradeQueue::new();
        let queued = QueuedMessage::for_trade(message("AAPL"));
        queue.nack(queued).await.unwrap();
        assert_eq!(queue.receive_batch(10).await.unwrap().len(), 1);
    }
}
