use std::sync::Arc;

use execution_types::Action;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Notification-boundary events, consumed by out-of-core notification
/// collaborators, never by this crate itself.
#[derive(Debug, Clone)]
pub enum Event {
    TradeExecuted {
        run_id: Uuid,
        trade_id: Uuid,
        symbol: String,
        action: Action,
        success: bool,
        order_id: Option<String>,
        shares_executed: Decimal,
        price: Option<Decimal>,
        error: Option<String>,
    },
    WorkflowFailed {
        correlation_id: Uuid,
        workflow_type: String,
        failure_reason: String,
        failure_step: String,
        error_details: Option<String>,
    },
}

pub trait Observer: Send + Sync {
    fn on_event(&self, event: &Event) -> anyhow::Result<()>;
}

/// Single-writer synchronous fan-out dispatcher: each observer runs in
/// sequence, and one observer's error is logged, never propagated, so it
/// can't stop the rest of the list from seeing the event.
pub struct EventBus {
    observers: Vec<Arc<dyn Observer>>,
}

impl EventBus {
    pub fn new(observers: Vec<Arc<dyn Observer>>) -> Self {
        Self { observers }
    }

    pub fn emit(&self, event: Event) {
        for observer in &self.observers {
            if let Err(err) = observer.on_event(&event) {
                tracing::error!(error = %err, "observer failed to handle event");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(vec![Arc::new(TracingObserver)])
    }
}

/// Reference `Observer`: logs via `tracing`, leaves richer sinks (metrics,
/// webhooks) to collaborators outside this crate.
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_event(&self, event: &Event) -> anyhow::Result<()> {
        match event {
            Event::TradeExecuted { run_id, trade_id, symbol, success, error, .. } => {
                tracing::info!(%run_id, %trade_id, symbol, success, error = error.as_deref(), "trade executed");
            }
            Event::WorkflowFailed { correlation_id, workflow_type, failure_reason, failure_step, .. } => {
                tracing::error!(%correlation_id, workflow_type, failure_reason, failure_step, "workflow failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingObserver {
        count: Arc<AtomicUsize>,
    }
    impl Observer for CountingObserver {
        fn on_event(&self, _event: &Event) -> anyhow::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn every_registered_observer_receives_the_event() {
        let count = Arc::new(AtomicUsize::new(0));
        let bus = EventBus::new(vec![
            Arc::new(CountingObserver { count: count.clone() }),
            Arc::new(CountingObserver { count: count.clone() }),
        ]);
        bus.emit(Event::WorkflowFailed {
            correlation_id: Uuid::new_v4(),
            workflow_type: "rebalance".to_string(),
            failure_reason: "test".to_string(),
            failure_step: "TEST".to_string(),
            error_details: None,
        });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    struct ErroringObserver;
    impl Observer for ErroringObserver {
        fn on_event(&self, _event: &Event) -> anyhow::Result<()> {
            anyhow::bail!("sink unavailable")
        }
    }

    #[test]
    fn a_failing_observer_does_not_block_the_next_one() {
        let count = Arc::new(AtomicUsize::new(0));
        let bus = EventBus::new(vec![Arc::new(ErroringObserver), Arc::new(CountingObserver { count: count.clone() })]);
        bus.emit(Event::WorkflowFailed {
            correlation_id: Uuid::new_v4(),
            workflow_type: "rebalance".to_string(),
            failure_reason: "test".to_string(),
            failure_step: "TEST".to_string(),
            error_details: None,
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
