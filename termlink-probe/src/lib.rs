//! Termlink Probe Library
//!
//! Smoke-test runner for the gateway client.
//!
//! # Flow
//!
//! ```text
//! Config (env) → TerminalClient → connect → account + quotes → stream → close
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use termlink_probe::{Config, Probe};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let probe = Probe::new_stub(config);
//!     probe.run().await.expect("Probe error");
//! }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod probe;

pub use config::{Config, GatewayConfig, ProbeConfig, ResilienceConfig};
pub use error::{ProbeError, ProbeResult};
pub use probe::{Probe, ProbeReport};
