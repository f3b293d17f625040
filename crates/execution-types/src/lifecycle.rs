use serde::{Deserialize, Serialize};
use std::fmt;

/// Comprehensive order lifecycle states covering the full order progression.
///
/// Terminal states: FILLED, CANCELLED, REJECTED, EXPIRED, ERROR. No
/// transition out of a terminal state is valid except an idempotent
/// self-transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderLifecycleState {
    New,
    Validated,
    Queued,
    Submitted,
    Acknowledged,
    PartiallyFilled,
    Filled,
    CancelPending,
    Cancelled,
    Rejected,
    Expired,
    Error,
}

impl OrderLifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired | Self::Error
        )
    }
}

#[derive(Debug)]
pub struct InvalidOrderStateTransitionError {
    pub from: OrderLifecycleState,
    pub to: OrderLifecycleState,
    pub order_id: Option<String>,
    pub reason: Option<String>,
}

impl InvalidOrderStateTransitionError {
    pub fn new(from: OrderLifecycleState, to: OrderLifecycleState, order_id: Option<String>) -> Self {
        Self {
            from,
            to,
            order_id,
            reason: None,
        }
    }
}

impl fmt::Display for InvalidOrderStateTransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid order state transition from {:?} to {:?}", self.from, self.to)?;
        if let Some(id) = &self.order_id {
            write!(f, " for order {id}")?;
        }
        match &self.reason {
            Some(r) => write!(f, ": {r}"),
            None => write!(f, ": transition not allowed by state machine rules"),
        }
    }
}

impl std::error::Error for InvalidOrderStateTransitionError {}

/// Validate a lifecycle transition and return its structured logging reason
/// code. Any pair not covered here is an invalid transition.
pub fn validate_transition(
    from: OrderLifecycleState,
    to: OrderLifecycleState,
    order_id: Option<&str>,
) -> Result<&'static str, InvalidOrderStateTransitionError> {
    use OrderLifecycleState::*;

    let reason = match (from, to) {
        (New, Validated) => "order_validated",
        (New, Rejected) => "validation_failed",
        (Validated, Queued) => "order_queued",
        (Validated, Submitted) => "order_submitted",
        (Validated, Rejected) => "validation_failed",
        (Queued, Submitted) => "order_submitted",
        (Queued, Cancelled) => "cancelled_before_submit",
        (Queued, Expired) => "expired_before_submit",
        (Submitted, Acknowledged) => "broker_acknowledged",
        (Submitted, Filled) => "immediate_fill",
        (Submitted, PartiallyFilled) => "immediate_partial_fill",
        (Submitted, Rejected) => "broker_rejected",
        (Submitted, CancelPending) => "cancel_requested",
        (Submitted, Error) => "submission_error",
        (Acknowledged, PartiallyFilled) => "partial_fill",
        (Acknowledged, Filled) => "completion_fill",
        (Acknowledged, CancelPending) => "cancel_requested",
        (Acknowledged, Rejected) => "broker_rejected",
        (Acknowledged, Expired) => "expired",
        (Acknowledged, Error) => "order_error",
        (PartiallyFilled, PartiallyFilled) => "additional_partial_fill",
        (PartiallyFilled, Filled) => "completion_fill",
        (PartiallyFilled, CancelPending) => "cancel_remaining",
        (PartiallyFilled, Error) => "order_error",
        (CancelPending, Cancelled) => "cancel_confirmed",
        (CancelPending, PartiallyFilled) => "late_partial_fill",
        (CancelPending, Filled) => "late_full_fill",
        (CancelPending, Error) => "order_error",
        (Filled, Filled) => "idempotent_filled",
        (Cancelled, Cancelled) => "idempotent_cancelled",
        (Rejected, Rejected) => "idempotent_rejected",
        (Expired, Expired) => "idempotent_expired",
        (Error, Error) => "idempotent_error",
        _ => {
            return Err(InvalidOrderStateTransitionError::new(
                from,
                to,
                order_id.map(str::to_string),
            ))
        }
    };
    Ok(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderLifecycleState::*;

    #[test]
    fn acknowledged_to_filled_is_completion_fill() {
        assert_eq!(validate_transition(Acknowledged, Filled, None).unwrap(), "completion_fill");
    }

    #[test]
    fn filled_to_filled_is_idempotent() {
        assert_eq!(validate_transition(Filled, Filled, None).unwrap(), "idempotent_filled");
    }

    #[test]
    fn filled_to_cancelled_is_rejected() {
        let err = validate_transition(Filled, Cancelled, Some("ord-1")).unwrap_err();
        assert_eq!(err.from, Filled);
        assert_eq!(err.to, Cancelled);
        assert_eq!(err.order_id.as_deref(), Some("ord-1"));
    }

    #[test]
    fn terminal_states_report_terminal() {
        for s in [Filled, Cancelled, Rejected, Expired, Error] {
            assert!(s.is_terminal());
        }
        for s in [New, Validated, Queued, Submitted, Acknowledged, PartiallyFilled, CancelPending] {
            assert!(!s.is_terminal());
        }
    }
}
