//! TerminalClient: typed operations over one shared session.
//!
//! Every unary operation goes through the [`RetryExecutor`] and every
//! subscription through the [`StreamSupervisor`], so all of them share one
//! terminal instance id and one reconnect path.
//!
//! # Replay of mutating requests
//!
//! A trading request is only replayed after a reconnect when it carries a
//! client token the gateway can deduplicate on. Without one it is sent at
//! most once and a transient failure is returned as is.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use termlink_domain::{
    AccountSummary, GatewayRequest, GatewayResponse, OpenedOrder, OrderCloseRequest,
    OrderSendRequest, OrderTicket, Quote, StreamRequest, Symbol, TerminalInstanceId,
};
use tokio::time::Instant;
use tracing::debug;

use crate::backoff::RetryPolicy;
use crate::context::{CallContext, DefaultDeadlines};
use crate::error::{GatewayError, GatewayResult};
use crate::ports::GatewayConnector;
use crate::retry::RetryExecutor;
use crate::session::{Connection, Session, SessionConfig};
use crate::supervisor::{StreamConfig, StreamSupervisor, Subscription};

// =============================================================================
// Configuration
// =============================================================================

/// Resilience settings for a [`TerminalClient`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClientConfig {
    /// Attempt budget and backoff for unary calls
    pub retry: RetryPolicy,
    /// Deadlines injected when the caller gives none
    pub deadlines: DefaultDeadlines,
    /// Resubscription behavior for streams
    pub stream: StreamConfig,
}

// =============================================================================
// Terminal Client
// =============================================================================

/// Typed client for the trading-terminal gateway.
#[derive(Debug, Clone)]
pub struct TerminalClient {
    session: Arc<Session>,
    executor: RetryExecutor,
    supervisor: StreamSupervisor,
}

impl TerminalClient {
    /// Create a client with its own session. Call [`connect`](Self::connect)
    /// first, or let the first operation connect lazily.
    pub fn new(
        session_config: SessionConfig,
        connector: Arc<dyn GatewayConnector>,
        config: ClientConfig,
    ) -> Self {
        Self::with_session(Arc::new(Session::new(session_config, connector)), config)
    }

    /// Create a client over an existing session.
    pub fn with_session(session: Arc<Session>, config: ClientConfig) -> Self {
        let executor = RetryExecutor::new(session.clone(), config.retry, config.deadlines);
        let supervisor = StreamSupervisor::new(session.clone(), config.stream);
        Self { session, executor, supervisor }
    }

    /// Perform the handshake now.
    pub async fn connect(&self) -> GatewayResult<TerminalInstanceId> {
        self.session.connect().await
    }

    /// Release the session. Open subscriptions fail on their next reconnect.
    pub async fn close(&self) {
        self.session.close().await;
    }

    /// The shared session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// The unary executor.
    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    /// The stream supervisor.
    pub fn supervisor(&self) -> &StreamSupervisor {
        &self.supervisor
    }

    /// Send any unary request.
    ///
    /// Informational and history requests are retried under the client's
    /// policy. Trading requests are retried only when they carry a client
    /// token; otherwise they get a single attempt.
    pub async fn request(
        &self,
        ctx: Option<&CallContext>,
        request: GatewayRequest,
    ) -> GatewayResult<GatewayResponse> {
        let class = request.operation_class();
        let operation = |connection: Connection, deadline: Instant| {
            let request = request.clone();
            async move { connection.call(deadline, request).await }
        };

        if class.is_mutating() && request.client_token().is_none() {
            debug!(
                session_id = %self.session.id(),
                op = request.name(),
                "No client token, sending at most once"
            );
            self.executor.execute_once(ctx, class, operation).await
        } else {
            self.executor.execute(ctx, class, operation).await
        }
    }

    // =========================================================================
    // Account
    // =========================================================================

    /// Balance, equity and margin of the logged-in account.
    pub async fn account_summary(&self, ctx: Option<&CallContext>) -> GatewayResult<AccountSummary> {
        match self.request(ctx, GatewayRequest::AccountSummary).await? {
            GatewayResponse::AccountSummary(summary) => Ok(summary),
            other => Err(unexpected("account_summary", &other)),
        }
    }

    /// Account balance.
    pub async fn account_balance(&self, ctx: Option<&CallContext>) -> GatewayResult<Decimal> {
        Ok(self.account_summary(ctx).await?.balance)
    }

    /// Account equity.
    pub async fn account_equity(&self, ctx: Option<&CallContext>) -> GatewayResult<Decimal> {
        Ok(self.account_summary(ctx).await?.equity)
    }

    // =========================================================================
    // Market Data
    // =========================================================================

    /// Latest quote for `symbol`.
    pub async fn quote(&self, ctx: Option<&CallContext>, symbol: Symbol) -> GatewayResult<Quote> {
        match self.request(ctx, GatewayRequest::Quote { symbol }).await? {
            GatewayResponse::Quote(quote) => Ok(quote),
            other => Err(unexpected("quote", &other)),
        }
    }

    /// Symbols visible in the terminal.
    pub async fn symbols(&self, ctx: Option<&CallContext>) -> GatewayResult<Vec<Symbol>> {
        match self.request(ctx, GatewayRequest::Symbols).await? {
            GatewayResponse::Symbols(symbols) => Ok(symbols),
            other => Err(unexpected("symbols", &other)),
        }
    }

    // =========================================================================
    // Orders
    // =========================================================================

    /// Orders currently open.
    pub async fn opened_orders(&self, ctx: Option<&CallContext>) -> GatewayResult<Vec<OpenedOrder>> {
        match self.request(ctx, GatewayRequest::OpenedOrders).await? {
            GatewayResponse::Orders(orders) => Ok(orders),
            other => Err(unexpected("orders", &other)),
        }
    }

    /// Closed orders between `from` and `to`.
    pub async fn order_history(
        &self,
        ctx: Option<&CallContext>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> GatewayResult<Vec<OpenedOrder>> {
        if from > to {
            return Err(GatewayError::Protocol(format!(
                "History range is inverted: {} > {}",
                from, to
            )));
        }
        match self.request(ctx, GatewayRequest::OrderHistory { from, to }).await? {
            GatewayResponse::Orders(orders) => Ok(orders),
            other => Err(unexpected("orders", &other)),
        }
    }

    /// Open an order.
    pub async fn send_order(
        &self,
        ctx: Option<&CallContext>,
        order: OrderSendRequest,
    ) -> GatewayResult<OrderTicket> {
        match self.request(ctx, GatewayRequest::OrderSend(order)).await? {
            GatewayResponse::Ticket(ticket) => Ok(ticket),
            other => Err(unexpected("ticket", &other)),
        }
    }

    /// Close an order, fully or partially.
    pub async fn close_order(
        &self,
        ctx: Option<&CallContext>,
        close: OrderCloseRequest,
    ) -> GatewayResult<OrderTicket> {
        match self.request(ctx, GatewayRequest::OrderClose(close)).await? {
            GatewayResponse::Ticket(ticket) => Ok(ticket),
            other => Err(unexpected("ticket", &other)),
        }
    }

    // =========================================================================
    // Streams
    // =========================================================================

    /// Supervised subscription for any stream request.
    pub fn subscribe(&self, ctx: Option<&CallContext>, request: StreamRequest) -> Subscription {
        self.supervisor.subscribe(ctx, request)
    }

    /// Supervised quote stream for `symbols`.
    ///
    /// # Errors
    ///
    /// `Protocol` if `symbols` is empty.
    pub fn subscribe_quotes(
        &self,
        ctx: Option<&CallContext>,
        symbols: Vec<Symbol>,
    ) -> GatewayResult<Subscription> {
        let request = StreamRequest::quotes(symbols)?;
        Ok(self.subscribe(ctx, request))
    }

    /// Supervised order-update stream.
    pub fn subscribe_order_updates(&self, ctx: Option<&CallContext>) -> Subscription {
        self.subscribe(ctx, StreamRequest::order_updates())
    }
}

fn unexpected(expected: &str, got: &GatewayResponse) -> GatewayError {
    GatewayError::Protocol(format!("Expected {} response, got {}", expected, got.name()))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use termlink_domain::{Credentials, Endpoint, Lots, OrderSide};

    use crate::backoff::BackoffPolicy;
    use crate::stub::{CallScript, StubGateway};

    fn client(stub: &StubGateway) -> TerminalClient {
        let session_config = SessionConfig::new(
            Endpoint::parse("127.0.0.1:7000").unwrap(),
            Credentials::new(501234, "secret", "Broker-Demo").unwrap(),
        );
        let config = ClientConfig {
            retry: RetryPolicy::new(3, BackoffPolicy::constant(Duration::from_millis(50))),
            ..ClientConfig::default()
        };
        TerminalClient::new(session_config, Arc::new(stub.clone()), config)
    }

    fn market_buy() -> OrderSendRequest {
        OrderSendRequest::market(Symbol::new("EURUSD").unwrap(), OrderSide::Buy, Lots::new(dec!(0.10)).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_account_accessors() {
        let stub = StubGateway::new();
        let client = client(&stub);

        assert_eq!(client.account_balance(None).await.unwrap(), dec!(10000));
        assert_eq!(client.account_equity(None).await.unwrap(), dec!(10000));
        assert_eq!(client.account_summary(None).await.unwrap().leverage, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_response_is_protocol_error() {
        let stub = StubGateway::new();
        stub.push_call(CallScript::Respond(GatewayResponse::Orders(vec![])));
        let client = client(&stub);

        let result = client.quote(None, Symbol::new("EURUSD").unwrap()).await;

        assert!(matches!(result, Err(GatewayError::Protocol(_))));
        assert_eq!(stub.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_without_token_is_sent_once() {
        let stub = StubGateway::new();
        stub.push_call(CallScript::Fail(GatewayError::Connection("reset".into())));
        let client = client(&stub);

        let result = client.send_order(None, market_buy()).await;

        assert!(matches!(result, Err(GatewayError::Connection(_))));
        assert_eq!(stub.call_count(), 1);
        assert_eq!(client.session().stats().reconnects, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_with_token_is_replayed() {
        let stub = StubGateway::new();
        stub.push_call(CallScript::Fail(GatewayError::Connection("reset".into())));
        let client = client(&stub);

        let ticket = client
            .send_order(None, market_buy().with_client_token("order-42"))
            .await
            .unwrap();

        assert_eq!(ticket.ticket, 1);
        assert_eq!(stub.call_count(), 2);
        assert_eq!(client.session().stats().reconnects, 1);
        let requests = stub.requests();
        assert_eq!(requests[0], requests[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_order_echoes_ticket() {
        let stub = StubGateway::new();
        let client = client(&stub);

        let ticket = client.close_order(None, OrderCloseRequest::full(77)).await.unwrap();

        assert_eq!(ticket.ticket, 77);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inverted_history_range_is_rejected_locally() {
        let stub = StubGateway::new();
        let client = client(&stub);
        let now = Utc::now();

        let result = client.order_history(None, now, now - chrono::Duration::hours(1)).await;

        assert!(matches!(result, Err(GatewayError::Protocol(_))));
        assert_eq!(stub.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_quote_subscription_is_rejected() {
        let stub = StubGateway::new();
        let client = client(&stub);

        assert!(matches!(client.subscribe_quotes(None, vec![]), Err(GatewayError::Protocol(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_streams_and_calls_share_one_instance() {
        let stub = StubGateway::new();
        let client = client(&stub);

        let mut sub = client.subscribe_quotes(None, vec![Symbol::new("EURUSD").unwrap()]).unwrap();
        assert!(sub.data.recv().await.is_some());
        client.symbols(None).await.unwrap();

        assert_eq!(stub.handshake_count(), 1);
        sub.cancel();
    }
}
