use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

const MAX_CLIENT_ORDER_ID_LENGTH: usize = 48;
const LEGACY_STRATEGY_PREFIX: &str = "alch";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientOrderIdError {
    #[error("signal_version cannot contain hyphens (breaks parsing): {0}")]
    VersionContainsHyphen(String),
    #[error("generated client_order_id exceeds the {MAX_CLIENT_ORDER_ID_LENGTH}-character limit: {0} characters")]
    TooLong(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedClientOrderId {
    pub strategy_id: String,
    pub symbol: String,
    pub timestamp: String,
    pub uuid_suffix: String,
    pub version: Option<String>,
}

/// Generate a unique client order id: `{prefix}-{SYMBOL}-{timestamp}-{uuid8}[-v{version}]`.
///
/// Carried forward algorithm-for-algorithm from the wire format's original
/// source: slashes in the symbol become underscores, the timestamp is
/// `%Y%m%dT%H%M%S` UTC, and the id is rejected (not silently truncated) if it
/// would exceed Alpaca's 48-character limit.
pub fn generate_client_order_id(
    symbol: &str,
    strategy_id: &str,
    prefix: Option<&str>,
    signal_version: Option<&str>,
) -> Result<String, ClientOrderIdError> {
    let prefix_part = prefix.unwrap_or(strategy_id);
    let normalized_symbol = symbol.trim().to_uppercase().replace('/', "_");
    let timestamp = Utc::now().format("%Y%m%dT%H%M%S").to_string();
    let uuid_suffix = Uuid::new_v4().simple().to_string()[..8].to_string();

    let mut client_order_id = format!("{prefix_part}-{normalized_symbol}-{timestamp}-{uuid_suffix}");

    if let Some(version) = signal_version {
        if version.contains('-') {
            return Err(ClientOrderIdError::VersionContainsHyphen(version.to_string()));
        }
        let version_str = if version.starts_with('v') {
            version.to_string()
        } else {
            format!("v{version}")
        };
        client_order_id = format!("{client_order_id}-{version_str}");
    }

    if client_order_id.len() > MAX_CLIENT_ORDER_ID_LENGTH {
        return Err(ClientOrderIdError::TooLong(client_order_id.len()));
    }

    Ok(client_order_id)
}

/// Parse a client order id. Returns `None` for malformed input rather than
/// erroring, matching the format's defensive parse contract.
pub fn parse_client_order_id(client_order_id: &str) -> Option<ParsedClientOrderId> {
    let parts: Vec<&str> = client_order_id.split('-').collect();
    if parts.len() < 4 || parts.len() > 5 {
        return None;
    }

    let mut strategy_id = parts[0].to_string();
    if strategy_id == LEGACY_STRATEGY_PREFIX {
        strategy_id = "unknown".to_string();
    }

    let version = if parts.len() == 5 {
        Some(parts[4].to_string())
    } else {
        None
    };

    Some(ParsedClientOrderId {
        strategy_id,
        symbol: parts[1].to_string(),
        timestamp: parts[2].to_string(),
        uuid_suffix: parts[3].to_string(),
        version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_generated_id() {
        let id = generate_client_order_id("AAPL", "nuclear", None, None).unwrap();
        let parsed = parse_client_order_id(&id).unwrap();
        assert_eq!(parsed.strategy_id, "nuclear");
        assert_eq!(parsed.symbol, "AAPL");
        assert!(parsed.version.is_none());
    }

    #[test]
    fn normalizes_slash_symbols() {
        let id = generate_client_order_id("BRK/B", "momentum", None, None).unwrap();
        assert!(id.contains("BRK_B"));
    }

    #[test]
    fn legacy_alch_prefix_parses_as_unknown_strategy() {
        let parsed = parse_client_order_id("alch-AAPL-20240101T093000-abcd1234").unwrap();
        assert_eq!(parsed.strategy_id, "unknown");
        assert_eq!(parsed.symbol, "AAPL");
    }

    #[test]
    fn version_gets_v_prefix_when_missing() {
        let id = generate_client_order_id("TSLA", "momentum", None, Some("1")).unwrap();
        assert!(id.ends_with("-v1"));
    }

    #[test]
    fn version_with_hyphen_is_rejected() {
        let err = generate_client_order_id("TSLA", "momentum", None, Some("v1-beta"));
        assert!(matches!(err, Err(ClientOrderIdError::VersionContainsHyphen(_))));
    }

    #[test]
    fn malformed_id_parses_to_none() {
        assert!(parse_client_order_id("too-few").is_none());
        assert!(parse_client_order_id("a-b-c-d-e-f").is_none());
    }

    #[test]
    fn overlong_id_is_rejected() {
        let long_strategy = "s".repeat(40);
        let err = generate_client_order_id("AAPL", &long_strategy, None, None);
        assert!(matches!(err, Err(ClientOrderIdError::TooLong(_))));
    }
}
