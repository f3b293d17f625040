use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseType {
    None,
    Partial,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Urgency {
    Low,
    Medium,
    High,
}

#[derive(Debug, Error)]
pub enum OrderIntentError {
    #[error("order intent quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),
    #[error("order intent symbol must not be empty")]
    EmptySymbol,
    #[error("close_type {0:?} requires side SELL")]
    CloseRequiresSell(CloseType),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub side: Side,
    pub close_type: CloseType,
    pub symbol: String,
    pub quantity: Decimal,
    pub urgency: Urgency,
    pub correlation_id: Uuid,
    pub client_order_id: String,
}

impl OrderIntent {
    pub fn new(
        side: Side,
        close_type: CloseType,
        symbol: impl Into<String>,
        quantity: Decimal,
        urgency: Urgency,
        correlation_id: Uuid,
        client_order_id: impl Into<String>,
    ) -> Result<Self, OrderIntentError> {
        let symbol = symbol.into();
        if symbol.trim().is_empty() {
            return Err(OrderIntentError::EmptySymbol);
        }
        if quantity <= Decimal::ZERO {
            return Err(OrderIntentError::NonPositiveQuantity(quantity));
        }
        if close_type != CloseType::None && side != Side::Sell {
            return Err(OrderIntentError::CloseRequiresSell(close_type));
        }
        Ok(Self {
            side,
            close_type,
            symbol,
            quantity,
            urgency,
            correlation_id,
            client_order_id: client_order_id.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rejects_nonpositive_quantity() {
        let err = OrderIntent::new(
            Side::Buy,
            CloseType::None,
            "AAPL",
            dec!(0),
            Urgency::Low,
            Uuid::new_v4(),
            "coid",
        );
        assert!(matches!(err, Err(OrderIntentError::NonPositiveQuantity(_))));
    }

    #[test]
    fn rejects_close_type_on_buy() {
        let err = OrderIntent::new(
            Side::Buy,
            CloseType::Full,
            "AAPL",
            dec!(1),
            Urgency::Low,
            Uuid::new_v4(),
            "coid",
        );
        assert!(matches!(err, Err(OrderIntentError::CloseRequiresSell(_))));
    }
}
