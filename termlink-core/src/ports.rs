//! Transport port definitions.
//!
//! Ports define the boundary this layer needs from the wire transport.
//! The wire format itself belongs to the remote gateway; adapters implement
//! these traits for a concrete transport (gRPC, in-memory stub, etc.).

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::time::Instant;

use termlink_domain::{
    Credentials, Endpoint, GatewayRequest, GatewayResponse, StreamEvent, StreamRequest,
    TerminalInstanceId,
};

use crate::error::GatewayResult;

/// Sequence of pushed messages, terminated by an error or by the end of
/// the stream.
pub type EventStream = BoxStream<'static, GatewayResult<StreamEvent>>;

// =============================================================================
// Connector Port
// =============================================================================

/// Port for establishing a transport handle via the handshake call.
///
/// Implementations:
/// - `StubGateway` - Scripted in-memory gateway for tests and simulation
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    /// Open a channel to `endpoint` and perform the login handshake.
    ///
    /// # Errors
    ///
    /// Failures must be classifiable: `Authentication` for rejected
    /// credentials, `Connection` for anything transient.
    async fn handshake(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> GatewayResult<Handshake>;
}

/// Successful handshake: a live channel plus the terminal instance id the
/// gateway assigned.
pub struct Handshake {
    /// Live channel to the gateway
    pub channel: Arc<dyn GatewayChannel>,
    /// Correlation id for subsequent calls
    pub instance: TerminalInstanceId,
}

// =============================================================================
// Channel Port
// =============================================================================

/// Port for calls over one live transport handle.
#[async_trait]
pub trait GatewayChannel: Send + Sync {
    /// Unary call bound to `deadline`.
    ///
    /// The caller also enforces the deadline around the future; transports
    /// that can propagate it to the server (e.g., a grpc-timeout header)
    /// should do so.
    async fn call(
        &self,
        instance: &TerminalInstanceId,
        deadline: Instant,
        request: GatewayRequest,
    ) -> GatewayResult<GatewayResponse>;

    /// Open a server-push subscription.
    async fn subscribe(
        &self,
        instance: &TerminalInstanceId,
        request: StreamRequest,
    ) -> GatewayResult<EventStream>;

    /// Release the channel. Calls on a closed channel fail with `Connection`.
    async fn close(&self);
}
