//! Value Objects for the Termlink Domain
//!
//! Immutable, validated primitives shared by the client layer.
//! All value objects enforce invariants at construction time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Domain errors for value object validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Symbol must be a non-empty terminal symbol name
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    /// Endpoint must be `host:port`
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Credentials are incomplete
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Order volume must be positive
    #[error("Invalid volume: {0}")]
    InvalidVolume(String),

    /// Request parameters are inconsistent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type for domain validation.
pub type DomainResult<T> = Result<T, DomainError>;

// =============================================================================
// Symbol
// =============================================================================

/// Symbol names an instrument as the terminal knows it (e.g., EURUSD, XAUUSD.m)
///
/// # Invariants
/// - Non-empty
/// - No whitespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Create a Symbol with validation
    ///
    /// # Examples
    /// ```
    /// # use termlink_domain::Symbol;
    /// let symbol = Symbol::new("EURUSD").unwrap();
    /// assert_eq!(symbol.as_str(), "EURUSD");
    /// ```
    ///
    /// # Errors
    /// Returns `DomainError::InvalidSymbol` if empty or containing whitespace
    pub fn new(name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(DomainError::InvalidSymbol("Symbol must be non-empty".to_string()));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(DomainError::InvalidSymbol(format!(
                "Symbol must not contain whitespace: {:?}",
                name
            )));
        }
        Ok(Self(name))
    }

    /// Get the symbol name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Symbol {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Volume
// =============================================================================

/// Order volume in lots
///
/// # Invariants
/// - Must be > 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lots(Decimal);

impl Lots {
    /// Create a new volume with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidVolume` if value <= 0
    pub fn new(value: Decimal) -> DomainResult<Self> {
        if value <= Decimal::ZERO {
            return Err(DomainError::InvalidVolume(format!("Lots must be positive, got {}", value)));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Lots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// Network address of the remote gateway (`host:port`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint from its parts.
    pub fn new(host: impl Into<String>, port: u16) -> DomainResult<Self> {
        let host = host.into();
        if host.is_empty() {
            return Err(DomainError::InvalidEndpoint("Host must be non-empty".to_string()));
        }
        if port == 0 {
            return Err(DomainError::InvalidEndpoint("Port must be non-zero".to_string()));
        }
        Ok(Self { host, port })
    }

    /// Parse a `host:port` address.
    pub fn parse(address: &str) -> DomainResult<Self> {
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| DomainError::InvalidEndpoint(format!("Missing port: {}", address)))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| DomainError::InvalidEndpoint(format!("Invalid port: {}", address)))?;
        Self::new(host, port)
    }

    /// Host name or IP.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Identifiers
// =============================================================================

/// Process-generated identifier of a client session (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new time-ordered session ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation id the gateway assigns to a terminal during the handshake.
///
/// Every subsequent call carries it so the remote side can associate the
/// call with one logical terminal. May change on reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerminalInstanceId(String);

impl TerminalInstanceId {
    /// Wrap an identifier returned by the gateway.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TerminalInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Order ticket number assigned by the terminal.
pub type Ticket = u64;

// =============================================================================
// Operation Class
// =============================================================================

/// Category of a unary operation, used to pick its default deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    /// Short read-only queries (account, quotes, symbol lists)
    Informational,
    /// Read-only queries over history ranges
    History,
    /// Operations that mutate trading state (send/close orders)
    Trading,
}

impl OperationClass {
    /// Whether operations of this class change state on the remote side.
    pub fn is_mutating(&self) -> bool {
        matches!(self, OperationClass::Trading)
    }

    /// Get the class name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Informational => "informational",
            OperationClass::History => "history",
            OperationClass::Trading => "trading",
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================
