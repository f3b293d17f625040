pub mod error;
mod models;
pub mod store;

pub use error::RunStoreError;
pub use store::{
    CircuitBreakerCheck, PendingExecutionStore, RunStore, SqliteRunStore, TradeCompletion, TradeCompletionResult,
};

#[cfg(test)]
mod tests;
