//! Termlink Core
//!
//! Resilient client layer for the remote trading-terminal gateway.
//!
//! # Architecture
//!
//! ```text
//! TerminalClient
//!   ├── RetryExecutor ───┐  unary calls: deadline, reconnect, replay
//!   └── StreamSupervisor ┤  push streams: resubscribe, two feeds
//!                        ▼
//!                     Session (one handshake at a time, generations)
//!                        ▼
//!                GatewayConnector / GatewayChannel (ports)
//! ```
//!
//! # Components
//!
//! - **Session**: Owns credentials and the current transport handle
//! - **RetryExecutor**: Bounded reconnect-and-replay for unary calls
//! - **StreamSupervisor**: Resubscribing data/error feeds for push streams
//! - **Backoff**: Capped exponential delay schedule
//! - **Stub**: Scripted in-memory gateway for tests and simulation
//!
//! # Example
//!
//! ```rust,ignore
//! use termlink_core::{ClientConfig, SessionConfig, StubGateway, TerminalClient};
//! use std::sync::Arc;
//!
//! let client = TerminalClient::new(session_config, Arc::new(StubGateway::new()), ClientConfig::default());
//! client.connect().await?;
//!
//! let summary = client.account_summary(None).await?;
//! let mut quotes = client.subscribe_quotes(None, vec![symbol])?;
//! while let Some(event) = quotes.data.recv().await { /* ... */ }
//! ```

#![warn(clippy::all)]

pub mod backoff;
pub mod client;
pub mod context;
pub mod error;
pub mod ports;
pub mod retry;
pub mod session;
pub mod stub;
pub mod supervisor;

// Re-exports for convenience
pub use backoff::{BackoffPolicy, RetryPolicy};
pub use client::{ClientConfig, TerminalClient};
pub use context::{CallContext, DefaultDeadlines};
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use ports::{EventStream, GatewayChannel, GatewayConnector, Handshake};
pub use retry::RetryExecutor;
pub use session::{Connection, Session, SessionConfig, SessionStats};
pub use stub::{CallScript, StreamEnd, StreamScript, StubGateway};
pub use supervisor::{
    DataFeed, ErrorFeed, StreamConfig, StreamState, StreamSupervisor, Subscription,
    SubscriptionHandle,
};
