pub mod decomposer;
pub mod errors;
pub mod events;
pub mod queue;
pub mod reconcile;
pub mod worker;

pub use decomposer::{DecomposerConfig, PlanDecomposer};
pub use errors::ExecutionCoreError;
pub use events::{Event, EventBus, Observer, TracingObserver};
pub use queue::{InMemoryTradeQueue, QueuedMessage, TradeQueue};
pub use reconcile::reconcile_stuck_buy_phases;
pub use worker::{SingleTradeWorker, WorkerConfig};
