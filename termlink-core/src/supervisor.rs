//! StreamSupervisor: turns a server-push subscription into two feeds that
//! survive transient disconnects.
//!
//! # Architecture
//!
//! Each subscription spawns its own supervising task:
//!
//! ```text
//! subscribe(ctx, request) ──► (DataFeed, ErrorFeed) returned immediately
//!     │
//!     ▼ spawn
//! ┌─────────────────────────────────────────────┐
//! │ Supervising task                            │
//! │ Connecting:   open stream on session handle │
//! │ Streaming:    forward messages in order     │
//! │ Reconnecting: backoff, reconnect, reopen    │
//! │ Closed:       drop stream, close both feeds │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Delivery Contract
//!
//! - Messages reach the data feed in transport order. Nothing is reordered,
//!   deduplicated or replayed; a reconnect leaves a gap.
//! - The data feed holds at most one message. A consumer that stops
//!   draining blocks the task (backpressure).
//! - Retryable failures never reach the error feed. Anything else is pushed
//!   once, then both feeds close.
//! - The task owns both senders, so each feed closes exactly once, when the
//!   task drops them.
//! - After cancellation the data feed yields nothing further, even a
//!   message already buffered.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use termlink_domain::{StreamEvent, StreamRequest};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::BackoffPolicy;
use crate::context::CallContext;
use crate::error::{GatewayError, GatewayResult};
use crate::ports::EventStream;
use crate::session::{Connection, Session};

// =============================================================================
// Configuration
// =============================================================================

/// Resubscription behavior of a supervisor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamConfig {
    /// Delay schedule between resubscribe attempts
    pub backoff: BackoffPolicy,
    /// Consecutive failed (re)subscribe attempts tolerated before giving up.
    /// `None` retries for as long as the caller's token is alive. The count
    /// resets once a stream delivers a message.
    pub max_consecutive_failures: Option<u32>,
    /// Bound on opening one subscription
    pub open_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::new(Duration::from_millis(250), Duration::from_secs(30), 2.0),
            max_consecutive_failures: None,
            open_timeout: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Subscription State
// =============================================================================

/// Lifecycle of a subscription. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Negotiating the first subscription
    Connecting,
    /// Forwarding messages
    Streaming,
    /// Waiting out a backoff or re-opening after a transient failure
    Reconnecting,
    /// Feeds closed; no further writes
    Closed,
}

impl StreamState {
    /// Get the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Connecting => "connecting",
            StreamState::Streaming => "streaming",
            StreamState::Reconnecting => "reconnecting",
            StreamState::Closed => "closed",
        }
    }
}

// =============================================================================
// Feeds
// =============================================================================

/// Consumer side of the data feed.
///
/// Also usable as a `futures` [`Stream`].
#[derive(Debug)]
pub struct DataFeed {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
}

impl DataFeed {
    /// Next message, or `None` once the feed is closed or the
    /// subscription is cancelled.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        if self.cancel.is_cancelled() {
            self.rx.close();
            return None;
        }
        self.rx.recv().await
    }
}

impl Stream for DataFeed {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            self.rx.close();
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

/// Consumer side of the error feed. Yields at most one error.
#[derive(Debug)]
pub struct ErrorFeed {
    rx: mpsc::Receiver<GatewayError>,
}

impl ErrorFeed {
    /// The terminal error, or `None` once the feed is closed without one.
    pub async fn recv(&mut self) -> Option<GatewayError> {
        self.rx.recv().await
    }
}

/// Control side of a subscription: state and cancellation.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: Uuid,
    state: watch::Receiver<StreamState>,
    cancel: CancellationToken,
}

impl SubscriptionHandle {
    /// Subscription id (for logs).
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Watch receiver for state changes.
    pub fn state_changes(&self) -> watch::Receiver<StreamState> {
        self.state.clone()
    }

    /// Cancel this subscription only (the caller's context is untouched).
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until the supervising task has closed both feeds.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        // Err means the task is gone, which also means closed
        let _ = state.wait_for(|s| *s == StreamState::Closed).await;
    }
}

/// A live subscription: the two feeds plus the control handle.
#[derive(Debug)]
pub struct Subscription {
    /// Messages in transport order
    pub data: DataFeed,
    /// The terminal error, if the subscription fails
    pub errors: ErrorFeed,
    handle: SubscriptionHandle,
}

impl Subscription {
    /// Control handle.
    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    /// Current state.
    pub fn state(&self) -> StreamState {
        self.handle.state()
    }

    /// Cancel this subscription.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Split into the two feeds and the control handle.
    pub fn into_parts(self) -> (DataFeed, ErrorFeed, SubscriptionHandle) {
        (self.data, self.errors, self.handle)
    }

    /// Split into the two feeds; the subscription then ends only through
    /// the caller's context or by dropping the data feed.
    pub fn into_feeds(self) -> (DataFeed, ErrorFeed) {
        (self.data, self.errors)
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Spawns and supervises push subscriptions over a shared session.
#[derive(Debug, Clone)]
pub struct StreamSupervisor {
    session: Arc<Session>,
    config: StreamConfig,
}

impl StreamSupervisor {
    /// Create a supervisor over a shared session.
    pub fn new(session: Arc<Session>, config: StreamConfig) -> Self {
        Self { session, config }
    }

    /// Resubscription config in use.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Start a supervised subscription and return its feeds immediately.
    ///
    /// Must be called from within a tokio runtime. The subscription ends
    /// when `ctx` (or the returned handle) is cancelled, when the data feed
    /// is dropped, or on an unrecoverable error.
    pub fn subscribe(&self, ctx: Option<&CallContext>, request: StreamRequest) -> Subscription {
        let cancel = match ctx {
            Some(ctx) => ctx.cancellation_token().child_token(),
            None => CancellationToken::new(),
        };
        let id = Uuid::now_v7();

        let (data_tx, data_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::channel(1);
        let (state_tx, state_rx) = watch::channel(StreamState::Connecting);

        let task = SupervisorTask {
            id,
            session: self.session.clone(),
            config: self.config,
            request,
            cancel: cancel.clone(),
            data: data_tx,
            errors: error_tx,
            state: state_tx,
        };
        tokio::spawn(task.run());

        Subscription {
            data: DataFeed { rx: data_rx, cancel: cancel.clone() },
            errors: ErrorFeed { rx: error_rx },
            handle: SubscriptionHandle { id, state: state_rx, cancel },
        }
    }
}

// =============================================================================
// Supervising Task
// =============================================================================

/// Why the supervising loop stopped.
#[derive(Debug)]
enum Exit {
    Cancelled,
    ConsumerGone,
    Failed(GatewayError),
}

/// How one connected segment ended.
enum SegmentEnd {
    Cancelled,
    ConsumerGone,
    Failed(GatewayError),
}

/// The task is consumed by `run`; it owns the only senders of both feeds.
struct SupervisorTask {
    id: Uuid,
    session: Arc<Session>,
    config: StreamConfig,
    request: StreamRequest,
    cancel: CancellationToken,
    data: mpsc::Sender<StreamEvent>,
    errors: mpsc::Sender<GatewayError>,
    state: watch::Sender<StreamState>,
}

impl SupervisorTask {
    async fn run(self) {
        info!(
            subscription_id = %self.id,
            session_id = %self.session.id(),
            topic = self.request.topic(),
            "Subscription task started"
        );

        let exit = self.supervise().await;

        let SupervisorTask { id, data, errors, state, .. } = self;

        match exit {
            Exit::Failed(e) => {
                error!(subscription_id = %id, error = %e, "Subscription failed");
                // Capacity 1 and a single error per subscription
                let _ = errors.try_send(e);
            }
            Exit::Cancelled => info!(subscription_id = %id, "Subscription cancelled"),
            Exit::ConsumerGone => info!(subscription_id = %id, "Data feed dropped by consumer"),
        }

        drop(data);
        drop(errors);
        state.send_replace(StreamState::Closed);
        debug!(subscription_id = %id, "Subscription closed");
    }

    /// Open, pump, and reopen until cancelled or failed. The transport
    /// stream never outlives this function.
    async fn supervise(&self) -> Exit {
        let mut failures: u32 = 0;
        let mut failed_generation: Option<u64> = None;

        loop {
            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Exit::Cancelled,
                _ = self.data.closed() => return Exit::ConsumerGone,
                opened = self.open(&mut failed_generation) => opened,
            };

            let error = match opened {
                Ok((connection, stream)) => {
                    self.set_state(StreamState::Streaming);
                    info!(
                        subscription_id = %self.id,
                        terminal_instance = %connection.instance(),
                        generation = connection.generation(),
                        "Subscription streaming"
                    );

                    match self.pump(stream, &mut failures).await {
                        SegmentEnd::Cancelled => return Exit::Cancelled,
                        SegmentEnd::ConsumerGone => return Exit::ConsumerGone,
                        SegmentEnd::Failed(e) => e,
                    }
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Exit::Failed(error);
            }

            failures += 1;
            if let Some(max) = self.config.max_consecutive_failures {
                if failures >= max {
                    return Exit::Failed(GatewayError::RetriesExhausted {
                        attempts: failures,
                        last: Box::new(error),
                    });
                }
            }

            self.set_state(StreamState::Reconnecting);
            let delay = self.config.backoff.next_delay(failures);
            warn!(
                subscription_id = %self.id,
                failures,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Subscription interrupted, resubscribing"
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Exit::Cancelled,
                _ = self.data.closed() => return Exit::ConsumerGone,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Acquire a handle (reconnecting `failed_generation` if set) and open
    /// the subscription on it.
    /// The acquired handle's generation is recorded before subscribing.
    async fn open(
        &self,
        failed_generation: &mut Option<u64>,
    ) -> GatewayResult<(Connection, EventStream)> {
        let connection = match *failed_generation {
            Some(generation) => self.session.reconnect(generation).await?,
            None => self.session.ensure_connected().await?,
        };
        *failed_generation = Some(connection.generation());

        debug!(
            subscription_id = %self.id,
            generation = connection.generation(),
            "Opening subscription"
        );

        let stream = tokio::time::timeout(
            self.config.open_timeout,
            connection.subscribe(self.request.clone()),
        )
        .await
        .map_err(|_| GatewayError::Connection("Subscribe timed out".to_string()))??;

        Ok((connection, stream))
    }

    /// Forward messages until the stream ends, fails, or the task is told
    /// to stop.
    async fn pump(&self, mut stream: EventStream, failures: &mut u32) -> SegmentEnd {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SegmentEnd::Cancelled,
                _ = self.data.closed() => return SegmentEnd::ConsumerGone,
                next = stream.next() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => return SegmentEnd::Failed(e),
                None => return SegmentEnd::Failed(GatewayError::StreamClosedByServer),
            };
            *failures = 0;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SegmentEnd::Cancelled,
                sent = self.data.send(event) => {
                    if sent.is_err() {
                        return SegmentEnd::ConsumerGone;
                    }
                }
            }
        }
    }

    fn set_state(&self, state: StreamState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(
                subscription_id = %self.id,
                from = previous.as_str(),
                to = state.as_str(),
                "Subscription state changed"
            );
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
