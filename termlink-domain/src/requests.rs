//! Unary request/response types.
//!
//! Every unary operation the gateway offers is one variant of
//! [`GatewayRequest`], answered by one variant of [`GatewayResponse`].
//! The pairing is checked by the typed client, so a caller never has to
//! look up a property by a runtime identifier and cast the result.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::value_objects::{DomainError, DomainResult, Lots, OperationClass, Symbol, Ticket};

// =============================================================================
// Requests
// =============================================================================

/// A unary request to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GatewayRequest {
    /// Balance, equity and margin of the logged-in account
    AccountSummary,
    /// Latest bid/ask for one symbol
    Quote { symbol: Symbol },
    /// All symbols visible in the terminal
    Symbols,
    /// Orders and positions currently open
    OpenedOrders,
    /// Closed orders within a time range
    OrderHistory { from: DateTime<Utc>, to: DateTime<Utc> },
    /// Open a new order
    OrderSend(OrderSendRequest),
    /// Close (fully or partially) an open order
    OrderClose(OrderCloseRequest),
}

impl GatewayRequest {
    /// Operation class used to pick the default deadline.
    pub fn operation_class(&self) -> OperationClass {
        match self {
            GatewayRequest::AccountSummary
            | GatewayRequest::Quote { .. }
            | GatewayRequest::Symbols
            | GatewayRequest::OpenedOrders => OperationClass::Informational,
            GatewayRequest::OrderHistory { .. } => OperationClass::History,
            GatewayRequest::OrderSend(_) | GatewayRequest::OrderClose(_) => OperationClass::Trading,
        }
    }

    /// Short operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            GatewayRequest::AccountSummary => "account_summary",
            GatewayRequest::Quote { .. } => "quote",
            GatewayRequest::Symbols => "symbols",
            GatewayRequest::OpenedOrders => "opened_orders",
            GatewayRequest::OrderHistory { .. } => "order_history",
            GatewayRequest::OrderSend(_) => "order_send",
            GatewayRequest::OrderClose(_) => "order_close",
        }
    }

    /// Caller-supplied idempotency token of a mutating request, if any.
    pub fn client_token(&self) -> Option<&str> {
        match self {
            GatewayRequest::OrderSend(req) => req.client_token.as_deref(),
            GatewayRequest::OrderClose(req) => req.client_token.as_deref(),
            _ => None,
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    /// Buy
    Buy,
    /// Sell
    Sell,
}

/// Parameters for opening an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSendRequest {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub lots: Lots,
    /// Limit price; `None` for a market order
    pub price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub comment: Option<String>,
    /// Idempotency token; the gateway deduplicates replays carrying the same token
    pub client_token: Option<String>,
}

impl OrderSendRequest {
    /// Market order with no protective levels.
    pub fn market(symbol: Symbol, side: OrderSide, lots: Lots) -> Self {
        Self {
            symbol,
            side,
            lots,
            price: None,
            stop_loss: None,
            take_profit: None,
            comment: None,
            client_token: None,
        }
    }

    /// Limit order at `price`.
    pub fn limit(symbol: Symbol, side: OrderSide, lots: Lots, price: Decimal) -> DomainResult<Self> {
        if price <= Decimal::ZERO {
            return Err(DomainError::InvalidRequest(format!(
                "Limit price must be positive, got {}",
                price
            )));
        }
        Ok(Self { price: Some(price), ..Self::market(symbol, side, lots) })
    }

    /// Attach stop-loss and take-profit levels.
    ///
    /// Levels must sit on the correct side of the limit price when one is set.
    pub fn with_protection(
        mut self,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> DomainResult<Self> {
        if let (Some(price), Some(sl)) = (self.price, stop_loss) {
            let wrong_side = match self.side {
                OrderSide::Buy => sl >= price,
                OrderSide::Sell => sl <= price,
            };
            if wrong_side {
                return Err(DomainError::InvalidRequest(format!(
                    "Stop loss {} on wrong side of price {}",
                    sl, price
                )));
            }
        }
        if let (Some(price), Some(tp)) = (self.price, take_profit) {
            let wrong_side = match self.side {
                OrderSide::Buy => tp <= price,
                OrderSide::Sell => tp >= price,
            };
            if wrong_side {
                return Err(DomainError::InvalidRequest(format!(
                    "Take profit {} on wrong side of price {}",
                    tp, price
                )));
            }
        }
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        Ok(self)
    }

    /// Attach a comment shown in the terminal.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Attach an idempotency token, which makes the request safe to replay.
    pub fn with_client_token(mut self, token: impl Into<String>) -> Self {
        self.client_token = Some(token.into());
        self
    }
}

/// Parameters for closing an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCloseRequest {
    pub ticket: Ticket,
    /// Partial close volume; `None` closes the whole order
    pub lots: Option<Lots>,
    pub client_token: Option<String>,
}

impl OrderCloseRequest {
    /// Close the whole order.
    pub fn full(ticket: Ticket) -> Self {
        Self { ticket, lots: None, client_token: None }
    }

    /// Close part of the order.
    pub fn partial(ticket: Ticket, lots: Lots) -> Self {
        Self { ticket, lots: Some(lots), client_token: None }
    }

    /// Attach an idempotency token.
    pub fn with_client_token(mut self, token: impl Into<String>) -> Self {
        self.client_token = Some(token.into());
        self
    }
}

// =============================================================================
// Responses
// =============================================================================

/// A unary response from the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum GatewayResponse {
    AccountSummary(AccountSummary),
    Quote(Quote),
    Symbols(Vec<Symbol>),
    Orders(Vec<OpenedOrder>),
    Ticket(OrderTicket),
}

impl GatewayResponse {
    /// Short variant name for error messages.
    pub fn name(&self) -> &'static str {
        match self {
            GatewayResponse::AccountSummary(_) => "account_summary",
            GatewayResponse::Quote(_) => "quote",
            GatewayResponse::Symbols(_) => "symbols",
            GatewayResponse::Orders(_) => "orders",
            GatewayResponse::Ticket(_) => "ticket",
        }
    }
}

/// Account state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub free_margin: Decimal,
    /// Deposit currency (e.g., "USD")
    pub currency: String,
    /// Account leverage (e.g., 100 for 1:100)
    pub leverage: u32,
}

impl AccountSummary {
    /// Equity over used margin, in percent. `None` when no margin is used.
    pub fn margin_level(&self) -> Option<Decimal> {
        if self.margin.is_zero() {
            None
        } else {
            Some(self.equity / self.margin * Decimal::ONE_HUNDRED)
        }
    }
}

/// Top-of-book quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: Symbol,
    pub bid: Decimal,
    pub ask: Decimal,
    pub time: DateTime<Utc>,
}

impl Quote {
    /// Ask minus bid.
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    /// Midpoint of bid and ask.
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

/// An open (or historical) order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenedOrder {
    pub ticket: Ticket,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub lots: Lots,
    pub open_price: Decimal,
    pub open_time: DateTime<Utc>,
    pub profit: Decimal,
    pub comment: Option<String>,
}

/// Acknowledgement of an order send/close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTicket {
    pub ticket: Ticket,
    pub price: Decimal,
    pub time: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn eurusd() -> Symbol {
        Symbol::new("EURUSD").unwrap()
    }

    #[test]
    fn test_operation_classes() {
        assert_eq!(GatewayRequest::AccountSummary.operation_class(), OperationClass::Informational);
        assert_eq!(
            GatewayRequest::OrderHistory { from: Utc::now(), to: Utc::now() }.operation_class(),
            OperationClass::History
        );
        let send = OrderSendRequest::market(eurusd(), OrderSide::Buy, Lots::new(dec!(0.1)).unwrap());
        assert_eq!(GatewayRequest::OrderSend(send).operation_class(), OperationClass::Trading);
        assert_eq!(
            GatewayRequest::OrderClose(OrderCloseRequest::full(7)).operation_class(),
            OperationClass::Trading
        );
    }

    #[test]
    fn test_client_token_exposed_for_mutating_requests() {
        let send = OrderSendRequest::market(eurusd(), OrderSide::Sell, Lots::new(dec!(1)).unwrap())
            .with_client_token("tok-1");
        assert_eq!(GatewayRequest::OrderSend(send).client_token(), Some("tok-1"));
        assert_eq!(GatewayRequest::OrderClose(OrderCloseRequest::full(9)).client_token(), None);
        assert_eq!(GatewayRequest::Symbols.client_token(), None);
    }

    #[test]
    fn test_limit_order_validation() {
        let lots = Lots::new(dec!(0.5)).unwrap();
        assert!(OrderSendRequest::limit(eurusd(), OrderSide::Buy, lots, dec!(0)).is_err());

        let order = OrderSendRequest::limit(eurusd(), OrderSide::Buy, lots, dec!(1.1000)).unwrap();
        assert!(order.clone().with_protection(Some(dec!(1.0950)), Some(dec!(1.1100))).is_ok());
        assert!(order.clone().with_protection(Some(dec!(1.1050)), None).is_err());
        assert!(order.with_protection(None, Some(dec!(1.0900))).is_err());
    }

    #[test]
    fn test_sell_limit_protection_sides() {
        let lots = Lots::new(dec!(0.5)).unwrap();
        let order = OrderSendRequest::limit(eurusd(), OrderSide::Sell, lots, dec!(1.1000)).unwrap();
        assert!(order.clone().with_protection(Some(dec!(1.1050)), Some(dec!(1.0900))).is_ok());
        assert!(order.with_protection(Some(dec!(1.0950)), None).is_err());
    }

    #[test]
    fn test_quote_spread_and_mid() {
        let quote = Quote { symbol: eurusd(), bid: dec!(1.1000), ask: dec!(1.1002), time: Utc::now() };
        assert_eq!(quote.spread(), dec!(0.0002));
        assert_eq!(quote.mid(), dec!(1.1001));
    }

    #[test]
    fn test_margin_level() {
        let mut summary = AccountSummary {
            balance: dec!(10000),
            equity: dec!(10500),
            margin: dec!(0),
            free_margin: dec!(10500),
            currency: "USD".to_string(),
            leverage: 100,
        };
        assert_eq!(summary.margin_level(), None);

        summary.margin = dec!(1050);
        assert_eq!(summary.margin_level(), Some(dec!(1000)));
    }

    #[test]
    fn test_request_serialization_is_tagged() {
        let json = serde_json::to_value(GatewayRequest::Quote { symbol: eurusd() }).unwrap();
        assert_eq!(json["op"], "quote");
        assert_eq!(json["symbol"], "EURUSD");
    }
}
