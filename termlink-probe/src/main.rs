//! Termlink Probe
//!
//! Connects to the gateway, prints account state and quotes, then streams
//! quotes until Ctrl-C or the message budget is spent.
//!
//! # Usage
//!
//! ```bash
//! # Stream until Ctrl-C
//! cargo run -p termlink-probe
//!
//! # Stop after 20 messages, verbose client logs
//! TERMLINK_MESSAGE_BUDGET=20 RUST_LOG=termlink_core=debug cargo run -p termlink-probe
//! ```
//!
//! # Environment Variables
//!
//! - `TERMLINK_ENDPOINT`: Gateway address (default: 127.0.0.1:7000)
//! - `TERMLINK_ACCOUNT`, `TERMLINK_PASSWORD`, `TERMLINK_CLUSTER`: Login
//! - `TERMLINK_HANDSHAKE_TIMEOUT_MS`: Handshake bound (default: 10000)
//! - `TERMLINK_RETRY_MAX_ATTEMPTS`: Unary attempt budget (default: 4)
//! - `TERMLINK_RETRY_BASE_DELAY_MS`, `TERMLINK_RETRY_MAX_DELAY_MS`,
//!   `TERMLINK_RETRY_MULTIPLIER`: Backoff schedule (default: 200, 10000, 2.0)
//! - `TERMLINK_INFO_TIMEOUT_MS`, `TERMLINK_HISTORY_TIMEOUT_MS`,
//!   `TERMLINK_TRADE_TIMEOUT_MS`: Default deadlines (default: 5000, 15000, 30000)
//! - `TERMLINK_STREAM_MAX_FAILURES`: Resubscribe bound, at least 1 (default: unbounded)
//! - `TERMLINK_SYMBOLS`: Comma-separated symbols (default: EURUSD,GBPUSD)
//! - `TERMLINK_MESSAGE_BUDGET`: Stop after N streamed messages

use termlink_probe::{Config, Probe};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("termlink=info".parse()?))
        .init();

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        endpoint = %config.gateway.endpoint,
        account = config.gateway.credentials.account_id(),
        symbols = config.probe.symbols.len(),
        "Termlink probe"
    );

    // Run against the in-memory gateway
    let probe = Probe::new_stub(config);
    let report = probe.run().await?;

    println!(
        "instance={} balance={} quotes={} streamed={} handshakes={} reconnects={}",
        report.terminal_instance,
        report.balance,
        report.quotes_fetched,
        report.messages_streamed,
        report.stats.handshakes,
        report.stats.reconnects,
    );

    Ok(())
}
