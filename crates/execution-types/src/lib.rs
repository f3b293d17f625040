pub mod client_order_id;
pub mod lifecycle;
pub mod order_intent;
pub mod peg;
pub mod pending_execution;
pub mod plan;
pub mod quote;
pub mod run;

pub use client_order_id::{generate_client_order_id, parse_client_order_id, ClientOrderIdError, ParsedClientOrderId};
pub use lifecycle::{validate_transition, InvalidOrderStateTransitionError, OrderLifecycleState};
pub use order_intent::{CloseType, OrderIntent, OrderIntentError, Side, Urgency};
pub use peg::PegType;
pub use pending_execution::{ChildOrder, ExecutionPhase, ExecutionState, PendingExecution};
pub use plan::{Action, ExecutionPolicy, Phase, PlanItem, RebalancePlan, TradeMessage};
pub use quote::{Quote, QuoteSource};
pub use run::{ExecutionData, RunRecord, RunStatus, TradeRecord, TradeStatus};
