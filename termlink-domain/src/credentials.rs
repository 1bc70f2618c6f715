//! Terminal Credentials
//!
//! Login material presented to the gateway during the handshake.
//!
//! # Security Model
//!
//! - The secret is held in a `Zeroizing` buffer and wiped on drop
//! - `Debug` output redacts the secret, so credentials are safe to pass
//!   through `tracing` fields by accident
//! - Credentials are never serialized

use std::fmt;

use zeroize::{Zeroize, Zeroizing};

use crate::value_objects::{DomainError, DomainResult};

// =============================================================================
// Credentials
// =============================================================================

/// Account login, secret and the trading cluster the terminal connects to.
#[derive(Clone)]
pub struct Credentials {
    /// Trading account number
    account_id: u64,
    /// Account password (investor or master)
    secret: Zeroizing<String>,
    /// Target cluster / trade server name (e.g., "Broker-Demo")
    cluster: String,
}

impl Credentials {
    /// Create credentials with validation.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidCredentials` if the account is zero or
    /// the secret or cluster is empty.
    pub fn new(
        account_id: u64,
        secret: impl Into<String>,
        cluster: impl Into<String>,
    ) -> DomainResult<Self> {
        let secret = Zeroizing::new(secret.into());
        let cluster = cluster.into();

        if account_id == 0 {
            return Err(DomainError::InvalidCredentials("Account id must be non-zero".to_string()));
        }
        if secret.is_empty() {
            return Err(DomainError::InvalidCredentials("Secret must be non-empty".to_string()));
        }
        if cluster.trim().is_empty() {
            return Err(DomainError::InvalidCredentials("Cluster must be non-empty".to_string()));
        }

        Ok(Self { account_id, secret, cluster })
    }

    /// Trading account number.
    pub fn account_id(&self) -> u64 {
        self.account_id
    }

    /// Plaintext secret. Never log this.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Target cluster name.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account_id", &self.account_id)
            .field("secret", &"<redacted>")
            .field("cluster", &self.cluster)
            .finish()
    }
}

impl Zeroize for Credentials {
    fn zeroize(&mut self) {
        self.secret.zeroize();
    }
}

// =============================================================================
// Tests
// =============================================================================
