//! Concurrency properties of the shared session.
//!
//! Unary calls and subscriptions race for the same handle; these tests
//! check that handshakes stay serialized, that reconnects are coalesced and
//! that per-subscription ordering holds.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use rust_decimal::Decimal;
use termlink_core::{
    BackoffPolicy, CallScript, ClientConfig, GatewayError, RetryPolicy, SessionConfig,
    StreamConfig, StreamEnd, StreamScript, StubGateway, TerminalClient,
};
use termlink_domain::{Credentials, Endpoint, StreamEvent, Symbol};

fn client(stub: &StubGateway, max_attempts: u32) -> TerminalClient {
    let session_config = SessionConfig::new(
        Endpoint::parse("gateway.local:443").expect("valid endpoint"),
        Credentials::new(501234, "secret", "Broker-Demo").expect("valid credentials"),
    );
    let backoff = BackoffPolicy::constant(Duration::from_millis(50));
    let config = ClientConfig {
        retry: RetryPolicy::new(max_attempts, backoff),
        stream: StreamConfig { backoff, ..StreamConfig::default() },
        ..ClientConfig::default()
    };
    TerminalClient::new(session_config, Arc::new(stub.clone()), config)
}

fn eurusd() -> Symbol {
    Symbol::new("EURUSD").expect("valid symbol")
}

fn bid(event: &StreamEvent) -> Decimal {
    match event {
        StreamEvent::Quote(quote) => quote.bid,
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_first_use_performs_one_handshake() {
    let stub = StubGateway::new().with_handshake_delay(Duration::from_millis(200));
    let client = client(&stub, 4);

    // Streams and calls all start before any handle exists
    let subs: Vec<_> = (0..3).map(|_| client.subscribe_order_updates(None)).collect();
    let calls = (0..10).map(|_| client.symbols(None));
    let results = join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(stub.handshake_count(), 1);
    assert_eq!(stub.max_concurrent_handshakes(), 1);
    assert_eq!(client.session().stats().max_concurrent_handshakes, 1);
    assert_eq!(stub.subscription_count(), 3);

    for sub in &subs {
        sub.cancel();
    }
}

#[tokio::test(start_paused = true)]
async fn test_simultaneous_failures_share_one_reconnect() {
    let stub = StubGateway::new().with_handshake_delay(Duration::from_millis(20));
    let client = client(&stub, 4);
    client.connect().await.expect("connect");

    for _ in 0..5 {
        stub.push_call(CallScript::Fail(GatewayError::Connection("reset".into())));
    }

    let results = join_all((0..5).map(|_| client.symbols(None))).await;

    assert!(results.iter().all(Result::is_ok));
    let stats = client.session().stats();
    assert_eq!(stats.handshakes, 2);
    assert_eq!(stats.reconnects, 1);
    assert_eq!(stats.coalesced_reconnects, 4);
    assert_eq!(stats.max_concurrent_handshakes, 1);
    assert_eq!(stub.call_count(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_stream_and_call_failing_together_reconnect_once() {
    let stub = StubGateway::new().with_handshake_delay(Duration::from_millis(20));
    stub.push_stream(StreamScript::new(
        StubGateway::quote_ticks("EURUSD", 1),
        StreamEnd::Error(GatewayError::Connection("reset".into())),
    ));
    stub.push_stream(StreamScript::new(StubGateway::quote_ticks("EURUSD", 1), StreamEnd::Pending));
    let client = client(&stub, 4);
    client.connect().await.expect("connect");
    stub.push_call(CallScript::Fail(GatewayError::Connection("reset".into())));

    let mut sub = client.subscribe_quotes(None, vec![eurusd()]).expect("subscribe");
    let call = client.symbols(None);
    let (first, result) = tokio::join!(sub.data.recv(), call);
    let second = sub.data.recv().await;

    assert!(first.is_some());
    assert!(second.is_some());
    assert!(result.is_ok());
    let stats = client.session().stats();
    assert_eq!(stats.max_concurrent_handshakes, 1);
    assert_eq!(stats.handshakes, stats.reconnects + 1);
    assert!(stats.reconnects <= 2, "{:?}", stats);
    sub.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_attempts_never_exceed_budget() {
    for max_attempts in 1..=5 {
        let stub = StubGateway::new();
        for _ in 0..10 {
            stub.push_call(CallScript::Fail(GatewayError::Connection("unavailable".into())));
        }
        let client = client(&stub, max_attempts);

        let result = client.symbols(None).await;

        assert!(result.is_err());
        assert_eq!(stub.call_count(), max_attempts as u64);
    }
}

#[tokio::test(start_paused = true)]
async fn test_feed_preserves_transport_order() {
    let stub = StubGateway::new().with_quote_interval(Duration::from_millis(5));
    let client = client(&stub, 4);

    let mut sub = client.subscribe_quotes(None, vec![eurusd()]).expect("subscribe");

    let mut previous = Decimal::MIN;
    for _ in 0..50 {
        let event = sub.data.recv().await.expect("stream open");
        let bid = bid(&event);
        assert!(bid > previous, "{} after {}", bid, previous);
        previous = bid;
    }
    sub.cancel();
    sub.handle().closed().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_consumer_loses_nothing_within_a_segment() {
    let stub = StubGateway::new();
    stub.push_stream(StreamScript::new(StubGateway::quote_ticks("EURUSD", 20), StreamEnd::Pending));
    let client = client(&stub, 4);

    let mut sub = client.subscribe_quotes(None, vec![eurusd()]).expect("subscribe");

    let mut bids = Vec::new();
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Production stays at most one message ahead of the consumer
        assert!(stub.delivered_events() <= bids.len() as u64 + 2);
        bids.push(bid(&sub.data.recv().await.expect("stream open")));
    }

    let expected: Vec<Decimal> = (0..20).map(|i| Decimal::new(108_500 + i, 5)).collect();
    assert_eq!(bids, expected);
}
