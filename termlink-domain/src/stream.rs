//! Server-push subscription types.

use serde::{Deserialize, Serialize};

use crate::requests::{OpenedOrder, Quote};
use crate::value_objects::{DomainError, DomainResult, Symbol, Ticket};

/// What a subscription asks the gateway to push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum StreamRequest {
    /// Quote ticks for the listed symbols
    Quotes {
        symbols: Vec<Symbol>,
        /// Minimum interval between ticks per symbol; `None` pushes every tick
        throttle_ms: Option<u64>,
    },
    /// Order lifecycle updates for the account
    OrderUpdates,
}

impl StreamRequest {
    /// Quote subscription for `symbols`.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidRequest` if `symbols` is empty.
    pub fn quotes(symbols: Vec<Symbol>) -> DomainResult<Self> {
        if symbols.is_empty() {
            return Err(DomainError::InvalidRequest(
                "Quote subscription needs at least one symbol".to_string(),
            ));
        }
        Ok(StreamRequest::Quotes { symbols, throttle_ms: None })
    }

    /// Order update subscription.
    pub fn order_updates() -> Self {
        StreamRequest::OrderUpdates
    }

    /// Limit the per-symbol tick rate of a quote subscription.
    pub fn with_throttle_ms(self, interval: u64) -> Self {
        match self {
            StreamRequest::Quotes { symbols, .. } => {
                StreamRequest::Quotes { symbols, throttle_ms: Some(interval) }
            }
            other => other,
        }
    }

    /// Topic name for logs.
    pub fn topic(&self) -> &'static str {
        match self {
            StreamRequest::Quotes { .. } => "quotes",
            StreamRequest::OrderUpdates => "order_updates",
        }
    }
}

/// One message pushed by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    Quote(Quote),
    OrderUpdate(OrderUpdate),
}

/// Change to an order observed by the terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub ticket: Ticket,
    pub action: OrderUpdateAction,
    /// Order state after the change
    pub order: OpenedOrder,
}

/// Kind of order change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderUpdateAction {
    Opened,
    Modified,
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quotes_requires_symbols() {
        assert!(StreamRequest::quotes(vec![]).is_err());

        let req = StreamRequest::quotes(vec![Symbol::new("EURUSD").unwrap()]).unwrap();
        assert_eq!(req.topic(), "quotes");
    }

    #[test]
    fn test_throttle_only_applies_to_quotes() {
        let req = StreamRequest::quotes(vec![Symbol::new("EURUSD").unwrap()])
            .unwrap()
            .with_throttle_ms(250);
        assert!(matches!(req, StreamRequest::Quotes { throttle_ms: Some(250), .. }));

        let req = StreamRequest::order_updates().with_throttle_ms(250);
        assert_eq!(req, StreamRequest::OrderUpdates);
    }
}
