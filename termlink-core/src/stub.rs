//! Scripted in-memory gateway for testing and simulation.
//!
//! [`StubGateway`] implements both transport ports. Outcomes are scripted
//! per handshake, per unary call and per subscription; anything not
//! scripted gets a canned success. Counters record what the layer above
//! actually did, so tests can assert on reconnects and replays.
//!
//! Scripts are consumed in FIFO order across all channels. A closed
//! channel fails every call with `Connection` and ends its open streams.

use std::collections::VecDeque;
use std::future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use rust_decimal::Decimal;
use termlink_domain::{
    AccountSummary, Credentials, Endpoint, GatewayRequest, GatewayResponse, OrderTicket, Quote,
    StreamEvent, StreamRequest, Symbol, TerminalInstanceId,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{GatewayError, GatewayResult};
use crate::ports::{EventStream, GatewayChannel, GatewayConnector, Handshake};

// =============================================================================
// Scripts
// =============================================================================

/// Scripted outcome of one unary call.
#[derive(Debug, Clone)]
pub enum CallScript {
    /// Return this response
    Respond(GatewayResponse),
    /// Fail with this error
    Fail(GatewayError),
    /// Never complete (the caller's deadline decides)
    Hang,
    /// Wait, then apply the inner script
    Delayed(Duration, Box<CallScript>),
}

/// How a scripted stream ends after its events.
#[derive(Debug, Clone)]
pub enum StreamEnd {
    /// Yield this error, then end
    Error(GatewayError),
    /// End cleanly (the server closed the stream)
    Close,
    /// Stay open without further events
    Pending,
}

/// Scripted outcome of one subscription.
#[derive(Debug, Clone)]
pub struct StreamScript {
    reject: Option<GatewayError>,
    events: Vec<StreamEvent>,
    end: StreamEnd,
    interval: Option<Duration>,
}

impl StreamScript {
    /// Open successfully, yield `events`, then end as `end`.
    pub fn new(events: Vec<StreamEvent>, end: StreamEnd) -> Self {
        Self { reject: None, events, end, interval: None }
    }

    /// Refuse the subscription itself.
    pub fn reject(error: GatewayError) -> Self {
        Self { reject: Some(error), events: Vec::new(), end: StreamEnd::Close, interval: None }
    }

    /// Wait `interval` before each event.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }
}

// =============================================================================
// Stub Gateway
// =============================================================================

#[derive(Debug, Default)]
struct StubState {
    handshake_delay: Mutex<Duration>,
    quote_interval: Mutex<Option<Duration>>,
    handshakes: Mutex<VecDeque<GatewayResult<()>>>,
    calls: Mutex<VecDeque<CallScript>>,
    streams: Mutex<VecDeque<StreamScript>>,
    requests: Mutex<Vec<GatewayRequest>>,
    stream_requests: Mutex<Vec<StreamRequest>>,
    handshake_count: AtomicU64,
    handshakes_in_flight: AtomicU64,
    max_handshakes_in_flight: AtomicU64,
    call_count: AtomicU64,
    subscription_count: AtomicU64,
    closed_channels: AtomicU64,
    delivered_events: AtomicU64,
    next_instance: AtomicU64,
    next_ticket: AtomicU64,
    /// Parent of every live channel's shutdown token
    transport: Mutex<CancellationToken>,
}

/// In-memory gateway. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct StubGateway {
    state: Arc<StubState>,
}

impl StubGateway {
    /// Create a stub where everything succeeds immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every handshake by `delay`.
    pub fn with_handshake_delay(self, delay: Duration) -> Self {
        *lock(&self.state.handshake_delay) = delay;
        self
    }

    /// Pace the default quote stream (unscripted quote subscriptions).
    pub fn with_quote_interval(self, interval: Duration) -> Self {
        *lock(&self.state.quote_interval) = Some(interval);
        self
    }

    /// Queue the outcome of the next unscripted handshake.
    pub fn push_handshake(&self, outcome: GatewayResult<()>) {
        lock(&self.state.handshakes).push_back(outcome);
    }

    /// Queue the outcome of the next unary call.
    pub fn push_call(&self, script: CallScript) {
        lock(&self.state.calls).push_back(script);
    }

    /// Queue the outcome of the next subscription.
    pub fn push_stream(&self, script: StreamScript) {
        lock(&self.state.streams).push_back(script);
    }

    /// Drop the transport under every channel handed out so far.
    ///
    /// Severed channels fail calls and subscribes with `Connection` and end
    /// their open streams, but stay installed until the session replaces
    /// them. Later handshakes get healthy channels.
    pub fn sever(&self) {
        let previous = std::mem::take(&mut *lock(&self.state.transport));
        previous.cancel();
        tracing::debug!("Stub: transport severed");
    }

    /// Handshakes started.
    pub fn handshake_count(&self) -> u64 {
        self.state.handshake_count.load(Ordering::SeqCst)
    }

    /// Highest number of handshakes observed in flight at once.
    pub fn max_concurrent_handshakes(&self) -> u64 {
        self.state.max_handshakes_in_flight.load(Ordering::SeqCst)
    }

    /// Unary calls received on live channels.
    pub fn call_count(&self) -> u64 {
        self.state.call_count.load(Ordering::SeqCst)
    }

    /// Subscriptions opened on live channels.
    pub fn subscription_count(&self) -> u64 {
        self.state.subscription_count.load(Ordering::SeqCst)
    }

    /// Channels released.
    pub fn closed_channels(&self) -> u64 {
        self.state.closed_channels.load(Ordering::SeqCst)
    }

    /// Stream events pulled by consumers, across all subscriptions.
    pub fn delivered_events(&self) -> u64 {
        self.state.delivered_events.load(Ordering::SeqCst)
    }

    /// Unary requests received, in arrival order.
    pub fn requests(&self) -> Vec<GatewayRequest> {
        lock(&self.state.requests).clone()
    }

    /// Subscription requests received, in arrival order.
    pub fn stream_requests(&self) -> Vec<StreamRequest> {
        lock(&self.state.stream_requests).clone()
    }

    /// `count` quote events for `symbol` with strictly increasing bids.
    ///
    /// Returns nothing if `symbol` is not a valid symbol name.
    pub fn quote_ticks(symbol: &str, count: usize) -> Vec<StreamEvent> {
        let Ok(symbol) = Symbol::new(symbol) else {
            return Vec::new();
        };
        (0..count as i64).map(|i| StreamEvent::Quote(tick(&symbol, i))).collect()
    }
}

#[async_trait]
impl GatewayConnector for StubGateway {
    async fn handshake(
        &self,
        _endpoint: &Endpoint,
        _credentials: &Credentials,
    ) -> GatewayResult<Handshake> {
        let state = &self.state;
        state.handshake_count.fetch_add(1, Ordering::SeqCst);
        let in_flight = state.handshakes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_handshakes_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        let _in_flight = InFlight(&state.handshakes_in_flight);

        let delay = *lock(&state.handshake_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let scripted = lock(&state.handshakes).pop_front();
        if let Some(Err(e)) = scripted {
            return Err(e);
        }

        let n = state.next_instance.fetch_add(1, Ordering::SeqCst) + 1;
        let instance = TerminalInstanceId::new(format!("stub-{}", n));
        tracing::debug!(terminal_instance = %instance, "Stub: handshake accepted");

        Ok(Handshake {
            channel: Arc::new(StubChannel {
                state: self.state.clone(),
                closed: AtomicBool::new(false),
                shutdown: lock(&self.state.transport).child_token(),
            }),
            instance,
        })
    }
}

/// Decrements the in-flight counter when the handshake future completes or
/// is dropped.
struct InFlight<'a>(&'a AtomicU64);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Stub Channel
// =============================================================================

struct StubChannel {
    state: Arc<StubState>,
    closed: AtomicBool,
    /// Ends every stream opened on this channel
    shutdown: CancellationToken,
}

impl StubChannel {
    fn ensure_open(&self) -> GatewayResult<()> {
        if self.closed.load(Ordering::SeqCst) || self.shutdown.is_cancelled() {
            return Err(GatewayError::Connection("Channel closed".to_string()));
        }
        Ok(())
    }

    fn default_response(&self, request: &GatewayRequest) -> GatewayResponse {
        match request {
            GatewayRequest::AccountSummary => GatewayResponse::AccountSummary(AccountSummary {
                balance: Decimal::new(10_000, 0),
                equity: Decimal::new(10_000, 0),
                margin: Decimal::ZERO,
                free_margin: Decimal::new(10_000, 0),
                currency: "USD".to_string(),
                leverage: 100,
            }),
            GatewayRequest::Quote { symbol } => GatewayResponse::Quote(tick(symbol, 0)),
            GatewayRequest::Symbols => GatewayResponse::Symbols(
                ["EURUSD", "GBPUSD", "USDJPY"]
                    .into_iter()
                    .filter_map(|s| Symbol::new(s).ok())
                    .collect(),
            ),
            GatewayRequest::OpenedOrders | GatewayRequest::OrderHistory { .. } => {
                GatewayResponse::Orders(Vec::new())
            }
            GatewayRequest::OrderSend(order) => GatewayResponse::Ticket(OrderTicket {
                ticket: self.state.next_ticket.fetch_add(1, Ordering::SeqCst) + 1,
                price: order.price.unwrap_or_else(|| Decimal::new(108_520, 5)),
                time: Utc::now(),
            }),
            GatewayRequest::OrderClose(close) => GatewayResponse::Ticket(OrderTicket {
                ticket: close.ticket,
                price: Decimal::new(108_500, 5),
                time: Utc::now(),
            }),
        }
    }

    fn default_stream(&self, request: &StreamRequest) -> EventStream {
        match request {
            StreamRequest::Quotes { symbols, .. } if symbols.is_empty() => stream::pending().boxed(),
            StreamRequest::Quotes { symbols, throttle_ms } => {
                let interval = throttle_ms
                    .map(Duration::from_millis)
                    .or(*lock(&self.state.quote_interval))
                    .unwrap_or(Duration::from_millis(100));
                let symbols = symbols.clone();
                stream::unfold(0i64, move |i| {
                    let symbol = symbols[(i as usize) % symbols.len()].clone();
                    async move {
                        tokio::time::sleep(interval).await;
                        Some((Ok::<_, GatewayError>(StreamEvent::Quote(tick(&symbol, i))), i + 1))
                    }
                })
                .boxed()
            }
            StreamRequest::OrderUpdates => stream::pending().boxed(),
        }
    }
}

#[async_trait]
impl GatewayChannel for StubChannel {
    async fn call(
        &self,
        _instance: &TerminalInstanceId,
        _deadline: Instant,
        request: GatewayRequest,
    ) -> GatewayResult<GatewayResponse> {
        self.ensure_open()?;
        self.state.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.requests).push(request.clone());

        let mut script = lock(&self.state.calls).pop_front();
        loop {
            match script {
                None => return Ok(self.default_response(&request)),
                Some(CallScript::Respond(response)) => return Ok(response),
                Some(CallScript::Fail(e)) => return Err(e),
                Some(CallScript::Hang) => return future::pending().await,
                Some(CallScript::Delayed(delay, inner)) => {
                    tokio::time::sleep(delay).await;
                    script = Some(*inner);
                }
            }
        }
    }

    async fn subscribe(
        &self,
        _instance: &TerminalInstanceId,
        request: StreamRequest,
    ) -> GatewayResult<EventStream> {
        self.ensure_open()?;
        self.state.subscription_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.stream_requests).push(request.clone());

        let scripted = lock(&self.state.streams).pop_front();
        let events: EventStream = match scripted {
            None => self.default_stream(&request),
            Some(StreamScript { reject: Some(e), .. }) => return Err(e),
            Some(StreamScript { events, end, interval, .. }) => {
                let body = stream::iter(events.into_iter().map(Ok::<_, GatewayError>));
                let body: EventStream = match interval {
                    Some(interval) => body
                        .then(move |event| async move {
                            tokio::time::sleep(interval).await;
                            event
                        })
                        .boxed(),
                    None => body.boxed(),
                };
                let tail: EventStream = match end {
                    StreamEnd::Error(e) => stream::once(async move { Err::<StreamEvent, _>(e) }).boxed(),
                    StreamEnd::Close => stream::empty().boxed(),
                    StreamEnd::Pending => stream::pending().boxed(),
                };
                body.chain(tail).boxed()
            }
        };

        let state = self.state.clone();
        Ok(events
            .take_until(self.shutdown.clone().cancelled_owned())
            .inspect(move |item| {
                if item.is_ok() {
                    state.delivered_events.fetch_add(1, Ordering::SeqCst);
                }
            })
            .boxed())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown.cancel();
            self.state.closed_channels.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Quote number `i` for `symbol`: bid rises by one point per tick.
fn tick(symbol: &Symbol, i: i64) -> Quote {
    let bid = Decimal::new(108_500 + i, 5);
    Quote { symbol: symbol.clone(), bid, ask: bid + Decimal::new(20, 5), time: Utc::now() }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials::new(501234, "secret", "Broker-Demo").unwrap()
    }

    fn endpoint() -> Endpoint {
        Endpoint::parse("127.0.0.1:7000").unwrap()
    }

    #[tokio::test]
    async fn test_instances_are_distinct() {
        let stub = StubGateway::new();

        let a = stub.handshake(&endpoint(), &credentials()).await.unwrap();
        let b = stub.handshake(&endpoint(), &credentials()).await.unwrap();

        assert_ne!(a.instance, b.instance);
        assert_eq!(stub.handshake_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_calls_then_defaults() {
        let stub = StubGateway::new();
        stub.push_call(CallScript::Fail(GatewayError::Connection("reset".into())));
        let handshake = stub.handshake(&endpoint(), &credentials()).await.unwrap();
        let deadline = Instant::now() + Duration::from_secs(1);

        let first = handshake.channel.call(&handshake.instance, deadline, GatewayRequest::Symbols).await;
        let second = handshake.channel.call(&handshake.instance, deadline, GatewayRequest::Symbols).await;

        assert!(matches!(first, Err(GatewayError::Connection(_))));
        match second {
            Ok(GatewayResponse::Symbols(symbols)) => assert_eq!(symbols.len(), 3),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(stub.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_closed_channel_rejects_calls() {
        let stub = StubGateway::new();
        let handshake = stub.handshake(&endpoint(), &credentials()).await.unwrap();
        handshake.channel.close().await;
        handshake.channel.close().await;

        let result = handshake
            .channel
            .call(&handshake.instance, Instant::now(), GatewayRequest::AccountSummary)
            .await;

        assert!(matches!(result, Err(GatewayError::Connection(_))));
        assert_eq!(stub.closed_channels(), 1);
        assert_eq!(stub.call_count(), 0);
    }

    #[tokio::test]
    async fn test_scripted_stream_order_and_end() {
        let stub = StubGateway::new();
        stub.push_stream(StreamScript::new(StubGateway::quote_ticks("EURUSD", 3), StreamEnd::Close));
        let handshake = stub.handshake(&endpoint(), &credentials()).await.unwrap();

        let stream = handshake
            .channel
            .subscribe(&handshake.instance, StreamRequest::order_updates())
            .await
            .unwrap();
        let items: Vec<_> = stream.collect().await;

        let bids: Vec<Decimal> = items
            .into_iter()
            .map(|item| match item {
                Ok(StreamEvent::Quote(q)) => q.bid,
                other => panic!("unexpected: {:?}", other),
            })
            .collect();
        assert_eq!(bids, vec![Decimal::new(108_500, 5), Decimal::new(108_501, 5), Decimal::new(108_502, 5)]);
        assert_eq!(stub.delivered_events(), 3);
    }

    #[tokio::test]
    async fn test_closing_channel_ends_streams() {
        let stub = StubGateway::new();
        stub.push_stream(StreamScript::new(vec![], StreamEnd::Pending));
        let handshake = stub.handshake(&endpoint(), &credentials()).await.unwrap();
        let mut stream = handshake
            .channel
            .subscribe(&handshake.instance, StreamRequest::order_updates())
            .await
            .unwrap();

        handshake.channel.close().await;

        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_severed_channels_stay_dead() {
        let stub = StubGateway::new();
        stub.push_stream(StreamScript::new(vec![], StreamEnd::Pending));
        let old = stub.handshake(&endpoint(), &credentials()).await.unwrap();
        let mut stream = old.channel.subscribe(&old.instance, StreamRequest::order_updates()).await.unwrap();

        stub.sever();

        assert!(stream.next().await.is_none());
        let resubscribe = old.channel.subscribe(&old.instance, StreamRequest::order_updates()).await;
        assert!(matches!(resubscribe, Err(GatewayError::Connection(_))));
        assert_eq!(stub.closed_channels(), 0);

        let fresh = stub.handshake(&endpoint(), &credentials()).await.unwrap();
        assert!(fresh.channel.subscribe(&fresh.instance, StreamRequest::order_updates()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_quote_stream_is_paced() {
        let stub = StubGateway::new().with_quote_interval(Duration::from_millis(250));
        let handshake = stub.handshake(&endpoint(), &credentials()).await.unwrap();
        let request = StreamRequest::quotes(vec![Symbol::new("EURUSD").unwrap()]).unwrap();
        let start = Instant::now();

        let stream = handshake.channel.subscribe(&handshake.instance, request).await.unwrap();
        let first_two: Vec<_> = stream.take(2).collect().await;

        assert_eq!(first_two.len(), 2);
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }
}
