use crate::order_intent::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionState {
    Pending,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Intraday trading-session phase driving the time-aware strategy's
/// aggression and peg selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionPhase {
    OpenAvoidance,
    PassiveAccumulation,
    UrgencyRamp,
    DeadlineClose,
    MarketClosed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildOrder {
    pub order_id: String,
    pub side: Side,
    pub qty: Decimal,
    pub filled_qty: Decimal,
    pub peg: crate::peg::PegType,
    pub submitted_at: DateTime<Utc>,
}

/// Persisted time-aware execution, tracked across ticks under optimistic
/// locking (`version` must match the current value for a save to succeed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingExecution {
    pub execution_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub target_qty: Decimal,
    pub filled_qty: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub state: ExecutionState,
    pub current_phase: ExecutionPhase,
    pub urgency_score: Decimal,
    pub child_orders: Vec<ChildOrder>,
    pub policy_id: Option<String>,
    pub version: i64,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingExecution {
    pub fn remaining_qty(&self) -> Decimal {
        (self.target_qty - self.filled_qty).max(Decimal::ZERO)
    }
}
