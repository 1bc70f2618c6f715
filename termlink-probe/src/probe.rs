//! Probe runtime: connect, query, stream, close.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use termlink_core::{
    CallContext, GatewayConnector, SessionStats, StubGateway, TerminalClient,
};
use termlink_domain::{StreamEvent, TerminalInstanceId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::ProbeResult;

/// Outcome of one probe run.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    /// Instance id negotiated by the first handshake
    pub terminal_instance: TerminalInstanceId,
    /// Account balance at start
    pub balance: Decimal,
    /// Quotes fetched one by one
    pub quotes_fetched: usize,
    /// Messages received on the stream
    pub messages_streamed: u64,
    /// Session counters at the end of the run
    pub stats: SessionStats,
}

/// Exercises a gateway end to end through a [`TerminalClient`].
pub struct Probe {
    config: Config,
    client: TerminalClient,
}

impl Probe {
    /// Create a probe over the in-memory stub gateway.
    pub fn new_stub(config: Config) -> Self {
        let stub = StubGateway::new().with_quote_interval(Duration::from_millis(250));
        Self::new(config, Arc::new(stub))
    }

    /// Create a probe over any connector.
    pub fn new(config: Config, connector: Arc<dyn GatewayConnector>) -> Self {
        let client = TerminalClient::new(config.session_config(), connector, config.client_config());
        Self { config, client }
    }

    /// The client driven by this probe.
    pub fn client(&self) -> &TerminalClient {
        &self.client
    }

    /// Run until Ctrl-C or the message budget is spent.
    pub async fn run(self) -> ProbeResult<ProbeReport> {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                trigger.cancel();
            }
        });

        self.run_until(shutdown).await
    }

    /// Run until `shutdown` is cancelled or the message budget is spent.
    ///
    /// The session is closed before returning, whatever the outcome.
    pub async fn run_until(self, shutdown: CancellationToken) -> ProbeResult<ProbeReport> {
        let result = self.exercise(&CallContext::with_token(shutdown)).await;
        self.client.close().await;

        match &result {
            Ok(report) => info!(
                terminal_instance = %report.terminal_instance,
                messages = report.messages_streamed,
                handshakes = report.stats.handshakes,
                reconnects = report.stats.reconnects,
                "Probe finished"
            ),
            Err(e) => error!(error = %e, "Probe failed"),
        }
        result
    }

    async fn exercise(&self, ctx: &CallContext) -> ProbeResult<ProbeReport> {
        // 1. Handshake
        let terminal_instance = self.client.connect().await?;
        info!(
            session_id = %self.client.session().id(),
            terminal_instance = %terminal_instance,
            endpoint = %self.client.session().config().endpoint,
            "Connected"
        );

        // 2. Account and quotes
        let summary = self.client.account_summary(Some(ctx)).await?;
        info!(
            balance = %summary.balance,
            equity = %summary.equity,
            currency = %summary.currency,
            leverage = summary.leverage,
            "Account summary"
        );

        let mut quotes_fetched = 0;
        for symbol in &self.config.probe.symbols {
            let quote = self.client.quote(Some(ctx), symbol.clone()).await?;
            info!(symbol = %quote.symbol, bid = %quote.bid, ask = %quote.ask, "Quote");
            quotes_fetched += 1;
        }

        // 3. Stream
        let subscription = self.client.subscribe_quotes(Some(ctx), self.config.probe.symbols.clone())?;
        let (mut data, mut errors, handle) = subscription.into_parts();
        let budget = self.config.probe.message_budget;
        let mut messages_streamed: u64 = 0;

        info!(subscription_id = %handle.id(), ?budget, "Streaming quotes");
        while budget.map_or(true, |b| messages_streamed < b) {
            match data.recv().await {
                Some(StreamEvent::Quote(quote)) => {
                    debug!(symbol = %quote.symbol, bid = %quote.bid, ask = %quote.ask, "Tick");
                }
                Some(StreamEvent::OrderUpdate(update)) => {
                    debug!(ticket = update.ticket, "Order update");
                }
                None => break,
            }
            messages_streamed += 1;
        }

        // 4. Teardown
        handle.cancel();
        handle.closed().await;
        if let Some(e) = errors.recv().await {
            warn!(error = %e, "Stream ended with error");
            return Err(e.into());
        }

        Ok(ProbeReport {
            terminal_instance,
            balance: summary.balance,
            quotes_fetched,
            messages_streamed,
            stats: self.client.session().stats(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use termlink_core::{GatewayError, StreamEnd, StreamScript};
    use termlink_domain::Endpoint;

    use crate::error::ProbeError;

    #[tokio::test(start_paused = true)]
    async fn test_probe_stops_at_message_budget() {
        let probe = Probe::new_stub(Config::test().unwrap());
        let session = probe.client().session().clone();

        let report = probe.run_until(CancellationToken::new()).await.unwrap();

        assert_eq!(report.messages_streamed, 10);
        assert_eq!(report.quotes_fetched, 2);
        assert_eq!(report.stats.handshakes, 1);
        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_stops_on_shutdown() {
        let mut config = Config::test().unwrap();
        config.probe.message_budget = None;
        let probe = Probe::new_stub(config);
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let report = probe.run_until(shutdown).await.unwrap();

        // 250ms pacing over 2s
        assert!(report.messages_streamed <= 8, "{}", report.messages_streamed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_reports_fatal_stream_error() {
        let stub = StubGateway::new();
        stub.push_stream(StreamScript::new(
            StubGateway::quote_ticks("EURUSD", 2),
            StreamEnd::Error(GatewayError::Authentication("session revoked".into())),
        ));
        let probe = Probe::new(Config::test().unwrap(), Arc::new(stub.clone()));

        let result = probe.run_until(CancellationToken::new()).await;

        assert!(matches!(result, Err(ProbeError::Gateway(GatewayError::Authentication(_)))));
        assert_eq!(stub.closed_channels(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_uses_configured_gateway() {
        let mut config = Config::test().unwrap();
        config.gateway.endpoint = Endpoint::parse("gateway.example:9443").unwrap();
        let probe = Probe::new_stub(config);

        let session = probe.client().session();
        assert_eq!(session.config().endpoint.port(), 9443);
        assert_eq!(session.config().handshake_timeout, Duration::from_secs(1));
    }
}
