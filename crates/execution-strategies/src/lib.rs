pub mod almgren_chriss;
pub mod phases;
pub mod result;
pub mod time_aware;
pub mod urgency;
pub mod walk_the_book;

pub use almgren_chriss::{AlmgrenChriss, AlmgrenChrissConfig};
pub use result::{quantize_price, ExecutionAttempt, ExecutionResult};
pub use time_aware::{TimeAwareConfig, TimeAwareExecutor, TimeAwareTickOutcome};
pub use urgency::{UrgencyBreakdown, UrgencyWeights};
pub use walk_the_book::{WalkTheBook, WalkTheBookConfig};

use std::sync::Arc;

use anyhow::Result;
use broker_trait::Broker;
use execution_types::{ExecutionPolicy, Quote, Side};
use rust_decimal::Decimal;

/// Trades run synchronously to completion within one worker invocation.
/// `WalkTheBook` and `AlmgrenChriss` never produce a `PendingExecution`;
/// that is `TimeAwareExecutor::tick`'s exclusive role.
pub enum SynchronousStrategy<B: Broker> {
    WalkTheBook(WalkTheBook<B>),
    AlmgrenChriss(AlmgrenChriss<B>),
}

impl<B: Broker> SynchronousStrategy<B> {
    pub fn for_policy(policy: ExecutionPolicy, broker: Arc<B>) -> Option<Self> {
        match policy {
            ExecutionPolicy::WalkTheBook => Some(Self::WalkTheBook(WalkTheBook::new(broker, WalkTheBookConfig::default()))),
            ExecutionPolicy::AlmgrenChriss => Some(Self::AlmgrenChriss(AlmgrenChriss::new(broker, AlmgrenChrissConfig::default()))),
            ExecutionPolicy::TimeAware => None,
        }
    }

    pub async fn execute(&self, symbol: &str, side: Side, qty: Decimal, quote: &Quote, parent_id: &str) -> Result<ExecutionResult> {
        match self {
            Self::WalkTheBook(s) => s.execute(symbol, side, qty, quote, parent_id).await,
            Self::AlmgrenChriss(s) => s.execute(symbol, side, qty, quote, parent_id).await,
        }
    }
}
