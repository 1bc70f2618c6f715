//! Probe configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use termlink_core::{
    BackoffPolicy, ClientConfig, DefaultDeadlines, RetryPolicy, SessionConfig, StreamConfig,
};
use termlink_domain::{Credentials, Endpoint, Symbol};

use crate::error::{ProbeError, ProbeResult};

// =============================================================================
// Configuration
// =============================================================================

/// Probe configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Gateway address and login
    pub gateway: GatewayConfig,

    /// Retry, deadline and resubscription settings
    pub resilience: ResilienceConfig,

    /// What to fetch and stream
    pub probe: ProbeConfig,
}

/// Gateway address and validated login.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway address
    pub endpoint: Endpoint,
    /// Account, password and trade server (redacted in `Debug`)
    pub credentials: Credentials,
    /// Bound on a single handshake
    pub handshake_timeout: Duration,
}

/// Resilience settings handed to the client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResilienceConfig {
    /// Unary retry policy
    pub retry: RetryPolicy,
    /// Per-class default deadlines
    pub deadlines: DefaultDeadlines,
    /// Consecutive stream failures tolerated (`None` = unbounded)
    pub stream_max_failures: Option<u32>,
}

/// What the probe does once connected.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Symbols to quote and stream
    pub symbols: Vec<Symbol>,
    /// Stop after this many streamed messages (`None` = until Ctrl-C)
    pub message_budget: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> ProbeResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        Self::load(|key| env::var(key).ok())
    }

    /// Built-in defaults: a local demo gateway and the client's stock
    /// resilience settings.
    pub fn local() -> ProbeResult<Self> {
        Self::load(|_| None)
    }

    /// Create test configuration.
    pub fn test() -> ProbeResult<Self> {
        let mut config = Self::local()?;
        config.gateway.handshake_timeout = Duration::from_secs(1);
        config.resilience = ResilienceConfig {
            retry: RetryPolicy::new(
                3,
                BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(100), 2.0),
            ),
            deadlines: DefaultDeadlines::default(),
            stream_max_failures: Some(3),
        };
        config.probe.message_budget = Some(10);
        Ok(config)
    }

    /// Session parameters for the client.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.gateway.endpoint.clone(), self.gateway.credentials.clone())
            .with_handshake_timeout(self.gateway.handshake_timeout)
    }

    /// Resilience parameters for the client.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            retry: self.resilience.retry,
            deadlines: self.resilience.deadlines,
            stream: StreamConfig {
                backoff: self.resilience.retry.backoff,
                max_consecutive_failures: self.resilience.stream_max_failures,
                ..StreamConfig::default()
            },
        }
    }

    fn load(lookup: impl Fn(&str) -> Option<String>) -> ProbeResult<Self> {
        let gateway = Self::load_gateway_config(&lookup)?;
        let resilience = Self::load_resilience_config(&lookup)?;
        let probe = Self::load_probe_config(&lookup)?;

        Ok(Self { gateway, resilience, probe })
    }

    fn load_gateway_config(lookup: &impl Fn(&str) -> Option<String>) -> ProbeResult<GatewayConfig> {
        let address = lookup("TERMLINK_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let endpoint = Endpoint::parse(&address)
            .map_err(|e| ProbeError::Config(format!("Invalid TERMLINK_ENDPOINT: {}", e)))?;

        let account_id = parse_env(lookup, "TERMLINK_ACCOUNT", DEFAULT_ACCOUNT)?;
        let password = lookup("TERMLINK_PASSWORD").unwrap_or_else(|| DEFAULT_PASSWORD.to_string());
        let cluster = lookup("TERMLINK_CLUSTER").unwrap_or_else(|| DEFAULT_CLUSTER.to_string());
        let credentials = Credentials::new(account_id, password, cluster)
            .map_err(|e| ProbeError::Config(e.to_string()))?;

        let handshake_timeout = millis_env(lookup, "TERMLINK_HANDSHAKE_TIMEOUT_MS", 10_000)?;

        Ok(GatewayConfig { endpoint, credentials, handshake_timeout })
    }

    fn load_resilience_config(
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> ProbeResult<ResilienceConfig> {
        let defaults = RetryPolicy::default();

        let max_attempts = parse_env(lookup, "TERMLINK_RETRY_MAX_ATTEMPTS", defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(ProbeError::Config("TERMLINK_RETRY_MAX_ATTEMPTS must be at least 1".to_string()));
        }

        let base_delay = millis_env(
            lookup,
            "TERMLINK_RETRY_BASE_DELAY_MS",
            defaults.backoff.base_delay.as_millis() as u64,
        )?;
        let max_delay = millis_env(
            lookup,
            "TERMLINK_RETRY_MAX_DELAY_MS",
            defaults.backoff.max_delay.as_millis() as u64,
        )?;
        if max_delay < base_delay {
            return Err(ProbeError::Config(format!(
                "TERMLINK_RETRY_MAX_DELAY_MS ({:?}) is below TERMLINK_RETRY_BASE_DELAY_MS ({:?})",
                max_delay, base_delay
            )));
        }

        let multiplier = parse_env(lookup, "TERMLINK_RETRY_MULTIPLIER", defaults.backoff.multiplier)?;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ProbeError::Config(format!(
                "TERMLINK_RETRY_MULTIPLIER must be >= 1.0, got {}",
                multiplier
            )));
        }

        let deadline_defaults = DefaultDeadlines::default();
        let informational = millis_env(
            lookup,
            "TERMLINK_INFO_TIMEOUT_MS",
            deadline_defaults.informational.as_millis() as u64,
        )?;
        let history = millis_env(
            lookup,
            "TERMLINK_HISTORY_TIMEOUT_MS",
            deadline_defaults.history.as_millis() as u64,
        )?;
        let trading = millis_env(
            lookup,
            "TERMLINK_TRADE_TIMEOUT_MS",
            deadline_defaults.trading.as_millis() as u64,
        )?;

        let stream_max_failures = match lookup("TERMLINK_STREAM_MAX_FAILURES") {
            Some(val) => match val.trim().parse::<u32>() {
                Ok(0) => {
                    return Err(ProbeError::Config(
                        "TERMLINK_STREAM_MAX_FAILURES must be at least 1".to_string(),
                    ))
                }
                Ok(max) => Some(max),
                Err(_) => {
                    return Err(ProbeError::Config(format!(
                        "Invalid TERMLINK_STREAM_MAX_FAILURES value: {}",
                        val
                    )))
                }
            },
            None => None,
        };

        Ok(ResilienceConfig {
            retry: RetryPolicy::new(
                max_attempts,
                BackoffPolicy::new(base_delay, max_delay, multiplier),
            ),
            deadlines: DefaultDeadlines { informational, history, trading },
            stream_max_failures,
        })
    }

    fn load_probe_config(lookup: &impl Fn(&str) -> Option<String>) -> ProbeResult<ProbeConfig> {
        let symbols = match lookup("TERMLINK_SYMBOLS") {
            Some(list) => parse_symbols(&list)?,
            None => default_symbols(),
        };

        let message_budget = match lookup("TERMLINK_MESSAGE_BUDGET") {
            Some(val) => Some(val.parse::<u64>().map_err(|_| {
                ProbeError::Config(format!("Invalid TERMLINK_MESSAGE_BUDGET value: {}", val))
            })?),
            None => None,
        };

        Ok(ProbeConfig { symbols, message_budget })
    }
}

// =============================================================================
// Helpers
// =============================================================================

const DEFAULT_ENDPOINT: &str = "127.0.0.1:7000";
const DEFAULT_ACCOUNT: u64 = 500_000;
const DEFAULT_PASSWORD: &str = "demo";
const DEFAULT_CLUSTER: &str = "Stub-Demo";

fn parse_env<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> ProbeResult<T> {
    match lookup(key) {
        Some(val) => val
            .trim()
            .parse::<T>()
            .map_err(|_| ProbeError::Config(format!("Invalid {} value: {}", key, val))),
        None => Ok(default),
    }
}

fn millis_env(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default_ms: u64,
) -> ProbeResult<Duration> {
    parse_env(lookup, key, default_ms).map(Duration::from_millis)
}

/// Comma-separated symbol list, e.g. `EURUSD, GBPUSD`.
fn parse_symbols(list: &str) -> ProbeResult<Vec<Symbol>> {
    let symbols = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Symbol::new)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProbeError::Config(format!("Invalid TERMLINK_SYMBOLS: {}", e)))?;

    if symbols.is_empty() {
        return Err(ProbeError::Config("TERMLINK_SYMBOLS is empty".to_string()));
    }
    Ok(symbols)
}

fn default_symbols() -> Vec<Symbol> {
    ["EURUSD", "GBPUSD"].into_iter().filter_map(|s| Symbol::new(s).ok()).collect()
}

// =============================================================================
// Tests
// =============================================================================
