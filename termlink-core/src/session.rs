//! Session: one authenticated relationship with the remote gateway.
//!
//! The session owns the credentials, the endpoint and the single current
//! transport handle ([`Connection`]). Every handshake, whether the initial
//! connect or a reconnect triggered by a unary call or a stream, runs under
//! one exclusive session lock, so two failing callers never race to replace
//! the handle.
//!
//! # Generations
//!
//! Each installed handle carries a generation number. A caller that saw a
//! handle fail asks for a reconnect *of that generation*; if another task
//! already replaced it, the newer handle is returned without a second
//! handshake.
//!
//! # Lifecycle
//!
//! ```text
//! new() ──connect()──► Connected(gen 1) ──reconnect(1)──► Connected(gen 2) ...
//!   │                        │
//!   └────────close()─────────┴──► Closed (terminal)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use termlink_domain::{
    Credentials, Endpoint, GatewayRequest, GatewayResponse, SessionId, StreamRequest,
    TerminalInstanceId,
};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::ports::{EventStream, GatewayChannel, GatewayConnector};

// =============================================================================
// Configuration
// =============================================================================

/// Static session parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Gateway address
    pub endpoint: Endpoint,
    /// Login material
    pub credentials: Credentials,
    /// Bound on a single handshake
    pub handshake_timeout: Duration,
}

impl SessionConfig {
    /// Create a config with the default handshake timeout (10s).
    pub fn new(endpoint: Endpoint, credentials: Credentials) -> Self {
        Self { endpoint, credentials, handshake_timeout: Duration::from_secs(10) }
    }

    /// Override the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

// =============================================================================
// Connection
// =============================================================================

/// The current transport handle: a channel, the terminal instance id it
/// was negotiated with, and its generation.
#[derive(Clone)]
pub struct Connection {
    channel: Arc<dyn GatewayChannel>,
    instance: TerminalInstanceId,
    generation: u64,
}

impl Connection {
    /// Terminal instance id negotiated by the handshake.
    pub fn instance(&self) -> &TerminalInstanceId {
        &self.instance
    }

    /// Generation of this handle within its session (starts at 1).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Unary call on this handle.
    pub async fn call(
        &self,
        deadline: Instant,
        request: GatewayRequest,
    ) -> GatewayResult<GatewayResponse> {
        self.channel.call(&self.instance, deadline, request).await
    }

    /// Open a push subscription on this handle.
    pub async fn subscribe(&self, request: StreamRequest) -> GatewayResult<EventStream> {
        self.channel.subscribe(&self.instance, request).await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("instance", &self.instance)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Handshakes started (initial connects and reconnects)
    pub handshakes: u64,
    /// Handshakes started to replace a failed handle
    pub reconnects: u64,
    /// Reconnect requests satisfied by a handle another task installed
    pub coalesced_reconnects: u64,
    /// Highest number of handshakes observed in flight at once
    pub max_concurrent_handshakes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    handshakes: AtomicU64,
    reconnects: AtomicU64,
    coalesced: AtomicU64,
    in_flight: AtomicU64,
    max_in_flight: AtomicU64,
}

impl Counters {
    fn handshake_started(&self) {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn handshake_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> SessionStats {
        SessionStats {
            handshakes: self.handshakes.load(Ordering::SeqCst),
            reconnects: self.reconnects.load(Ordering::SeqCst),
            coalesced_reconnects: self.coalesced.load(Ordering::SeqCst),
            max_concurrent_handshakes: self.max_in_flight.load(Ordering::SeqCst),
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// Handle slot guarded by the session.
#[derive(Default)]
struct Slot {
    current: Option<Connection>,
    next_generation: u64,
    closed: bool,
}

/// One authenticated relationship with the gateway.
///
/// Share it behind an `Arc`: the retry executor, the stream supervisor and
/// the typed client all route through the same session.
pub struct Session {
    id: SessionId,
    config: SessionConfig,
    connector: Arc<dyn GatewayConnector>,
    /// Serializes handshakes. Held across the handshake await.
    connect_lock: Mutex<()>,
    /// Current handle. Only written while `connect_lock` is held (or on close).
    slot: RwLock<Slot>,
    counters: Counters,
}

impl Session {
    /// Create a session. No network activity happens until `connect`.
    pub fn new(config: SessionConfig, connector: Arc<dyn GatewayConnector>) -> Self {
        Self {
            id: SessionId::new(),
            config,
            connector,
            connect_lock: Mutex::new(()),
            slot: RwLock::new(Slot::default()),
            counters: Counters::default(),
        }
    }

    /// Process-unique session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Perform the handshake and install a new handle.
    ///
    /// Idempotent: calling it again replaces the current handle with a
    /// freshly negotiated one and overwrites the terminal instance id.
    pub async fn connect(&self) -> GatewayResult<TerminalInstanceId> {
        self.connect_with_timeout(self.config.handshake_timeout).await
    }

    /// `connect` with an explicit handshake deadline.
    pub async fn connect_with_timeout(
        &self,
        handshake_timeout: Duration,
    ) -> GatewayResult<TerminalInstanceId> {
        let _guard = self.connect_lock.lock().await;
        let connection = self.handshake_locked(handshake_timeout).await?;
        Ok(connection.instance)
    }

    /// Current handle, without blocking.
    ///
    /// # Errors
    ///
    /// `SessionClosed` once `close` has been called.
    pub fn current_handle(&self) -> GatewayResult<Option<Connection>> {
        let slot = self.read_slot();
        if slot.closed {
            return Err(GatewayError::SessionClosed);
        }
        Ok(slot.current.clone())
    }

    /// Terminal instance id of the current handle.
    pub fn terminal_instance(&self) -> Option<TerminalInstanceId> {
        self.read_slot().current.as_ref().map(|c| c.instance.clone())
    }

    /// Current handle, connecting first if there is none.
    pub async fn ensure_connected(&self) -> GatewayResult<Connection> {
        if let Some(connection) = self.current_handle()? {
            return Ok(connection);
        }

        let _guard = self.connect_lock.lock().await;
        // Another task may have connected while we waited for the lock
        if let Some(connection) = self.current_handle()? {
            return Ok(connection);
        }
        self.handshake_locked(self.config.handshake_timeout).await
    }

    /// Replace the handle of generation `failed_generation`.
    ///
    /// If the current handle is already newer, it is returned as is.
    pub async fn reconnect(&self, failed_generation: u64) -> GatewayResult<Connection> {
        let _guard = self.connect_lock.lock().await;

        if let Some(current) = self.current_handle()? {
            if current.generation != failed_generation {
                self.counters.coalesced.fetch_add(1, Ordering::SeqCst);
                debug!(
                    session_id = %self.id,
                    failed_generation,
                    current_generation = current.generation,
                    "Handle already replaced, reusing"
                );
                return Ok(current);
            }
        }

        self.counters.reconnects.fetch_add(1, Ordering::SeqCst);
        info!(session_id = %self.id, failed_generation, "Reconnecting session");
        self.handshake_locked(self.config.handshake_timeout).await
    }

    /// Release the transport handle. Terminal; a second call is a no-op.
    pub async fn close(&self) {
        let previous = {
            let mut slot = self.write_slot();
            if slot.closed {
                return;
            }
            slot.closed = true;
            slot.current.take()
        };

        if let Some(connection) = previous {
            connection.channel.close().await;
        }
        info!(session_id = %self.id, "Session closed");
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.read_slot().closed
    }

    /// Counter snapshot.
    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    /// Run one handshake and install its handle. Caller holds `connect_lock`.
    async fn handshake_locked(&self, handshake_timeout: Duration) -> GatewayResult<Connection> {
        if self.is_closed() {
            return Err(GatewayError::SessionClosed);
        }

        debug!(
            session_id = %self.id,
            endpoint = %self.config.endpoint,
            account = self.config.credentials.account_id(),
            "Starting handshake"
        );

        self.counters.handshake_started();
        let outcome = tokio::time::timeout(
            handshake_timeout,
            self.connector.handshake(&self.config.endpoint, &self.config.credentials),
        )
        .await;
        self.counters.handshake_finished();

        let handshake = match outcome {
            Ok(Ok(handshake)) => handshake,
            Ok(Err(e)) => {
                warn!(session_id = %self.id, error = %e, "Handshake failed");
                return Err(e);
            }
            Err(_) => {
                warn!(
                    session_id = %self.id,
                    timeout_ms = handshake_timeout.as_millis() as u64,
                    "Handshake timed out"
                );
                return Err(GatewayError::Connection(format!(
                    "Handshake with {} timed out",
                    self.config.endpoint
                )));
            }
        };

        let (installed, previous) = {
            let mut slot = self.write_slot();
            if slot.closed {
                (None, None)
            } else {
                slot.next_generation += 1;
                let connection = Connection {
                    channel: handshake.channel.clone(),
                    instance: handshake.instance,
                    generation: slot.next_generation,
                };
                let previous = slot.current.replace(connection.clone());
                (Some(connection), previous)
            }
        };

        if let Some(previous) = previous {
            previous.channel.close().await;
        }

        match installed {
            Some(connection) => {
                info!(
                    session_id = %self.id,
                    terminal_instance = %connection.instance,
                    generation = connection.generation,
                    "Session connected"
                );
                Ok(connection)
            }
            None => {
                // Closed while the handshake was in flight
                handshake.channel.close().await;
                Err(GatewayError::SessionClosed)
            }
        }
    }

    fn read_slot(&self) -> RwLockReadGuard<'_, Slot> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slot(&self) -> RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("endpoint", &self.config.endpoint)
            .field("terminal_instance", &self.terminal_instance())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
