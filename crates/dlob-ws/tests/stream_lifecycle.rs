//! Stream client lifecycle integration tests.
//!
//! Tests against a local mock server:
//! - Lazy connect and subscription intents
//! - Frame dispatch to handlers
//! - Reconnection with full re-subscription
//! - Teardown when the last subscription goes away

mod common;
use common::MockWsServer;

use dlob_core::{MarketType, NetworkEnv, Price};
use dlob_ws::{ConnectionConfig, ConnectionState, OrderbookEvent, StreamClient, TradeEvent};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(3);

fn test_config(url: &str) -> ConnectionConfig {
    let mut config = ConnectionConfig::default();
    config.endpoints.mainnet_beta = url.to_string();
    config.reconnect_base_delay_ms = 50;
    config.reconnect_max_delay_ms = 200;
    config.heartbeat_check_interval_ms = 50;
    config
}

fn record_states(client: &StreamClient) -> Arc<Mutex<Vec<ConnectionState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let states_clone = states.clone();
    // Listener lives as long as the client.
    let _ = client.on_connection(move |e| states_clone.lock().push(e.state));
    states
}

async fn wait_for_state(client: &StreamClient, state: ConnectionState) -> bool {
    timeout(WAIT, async {
        while client.state() != state {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

fn subscribe_json(request_type: &str, channel: &str, market: &str) -> serde_json::Value {
    json!({
        "type": request_type,
        "marketType": "perp",
        "channel": channel,
        "market": market,
    })
}

const SOL_BOOK: &str = r#"{"channel":"orderbook_perp_SOL-PERP","data":"{\"bids\":[{\"price\":\"100000000\",\"size\":\"1000000000\"}],\"asks\":[{\"price\":\"101000000\",\"size\":\"2000000000\"}],\"marketName\":\"SOL-PERP\",\"slot\":42}"}"#;

#[tokio::test]
async fn test_no_connection_without_subscriptions() {
    let server = MockWsServer::start().await;
    let client = StreamClient::new(test_config(&server.url())).unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(client.state(), ConnectionState::Idle);
    assert_eq!(server.connection_count().await, 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_first_subscribe_connects_and_sends_once() {
    let server = MockWsServer::start().await;
    let client = StreamClient::new(test_config(&server.url())).unwrap();
    let states = record_states(&client);

    let _sub = client.subscribe_orderbook("SOL-PERP", MarketType::Perp, |_| {});

    let messages = server.wait_for_messages(1, WAIT).await;
    assert_eq!(messages.len(), 1, "Subscribe intent should arrive");
    assert!(wait_for_state(&client, ConnectionState::Connected).await);

    // Nothing else is sent.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        server.received_json().await,
        vec![subscribe_json("subscribe", "orderbook", "SOL-PERP")]
    );
    assert_eq!(
        *states.lock(),
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
    assert_eq!(server.connection_count().await, 1);
    assert_eq!(client.stats().active_subscriptions, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_second_handler_on_same_key_sends_nothing() {
    let server = MockWsServer::start().await;
    let client = StreamClient::new(test_config(&server.url())).unwrap();

    let _a = client.subscribe_orderbook("SOL-PERP", MarketType::Perp, |_| {});
    server.wait_for_messages(1, WAIT).await;
    assert!(wait_for_state(&client, ConnectionState::Connected).await);

    let _b = client.subscribe_orderbook("SOL-PERP", MarketType::Perp, |_| {});
    let _c = client.subscribe_trades("SOL-PERP", MarketType::Perp, |_| {});

    let messages = server.wait_for_messages(2, WAIT).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(messages.len(), 2);
    assert_eq!(
        server.received_json().await[1],
        subscribe_json("subscribe", "trades", "SOL-PERP")
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_orderbook_frame_dispatches_mark_price() {
    let server = MockWsServer::start().await;
    let client = StreamClient::new(test_config(&server.url())).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<OrderbookEvent>();

    let _sub = client.subscribe_orderbook("SOL-PERP", MarketType::Perp, move |e| {
        let _ = tx.send(e.clone());
    });
    server.wait_for_messages(1, WAIT).await;

    server.push_text(SOL_BOOK);
    let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();

    assert_eq!(event.key.market, "SOL-PERP");
    assert_eq!(event.channel_tag, "orderbook_perp_SOL-PERP");
    assert_eq!(event.bid_price, Some(Price::new(dec!(100))));
    assert_eq!(event.ask_price, Some(Price::new(dec!(101))));
    assert_eq!(event.mark_price, Some(Price::new(dec!(100.5))));
    assert_eq!(event.slot, Some(42));

    server.shutdown().await;
}

#[tokio::test]
async fn test_binary_frames_are_decoded() {
    let server = MockWsServer::start().await;
    let client = StreamClient::new(test_config(&server.url())).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<OrderbookEvent>();

    let _sub = client.subscribe_orderbook("SOL-PERP", MarketType::Perp, move |e| {
        let _ = tx.send(e.clone());
    });
    server.wait_for_messages(1, WAIT).await;

    server.push_binary(SOL_BOOK.as_bytes().to_vec());
    let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.mark_price, Some(Price::new(dec!(100.5))));

    server.shutdown().await;
}

#[tokio::test]
async fn test_frames_are_processed_in_order() {
    let server = MockWsServer::start().await;
    let client = StreamClient::new(test_config(&server.url())).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<TradeEvent>();

    let _sub = client.subscribe_trades("SOL-PERP", MarketType::Perp, move |e| {
        let _ = tx.send(e.clone());
    });
    server.wait_for_messages(1, WAIT).await;

    for slot in 1..=20 {
        server.push_text(format!(
            r#"{{"channel":"trades_perp_SOL-PERP","data":{{"marketName":"SOL-PERP","slot":{slot}}}}}"#
        ));
    }

    let mut slots = Vec::new();
    for _ in 0..20 {
        let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        slots.push(event.slot.unwrap());
    }
    assert_eq!(slots, (1..=20).collect::<Vec<u64>>());

    server.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_restores_all_subscriptions() {
    let server = MockWsServer::start().await;
    let client = StreamClient::new(test_config(&server.url())).unwrap();
    let states = record_states(&client);

    let _book = client.subscribe_orderbook("SOL-PERP", MarketType::Perp, |_| {});
    let _trades = client.subscribe_trades("BTC-PERP", MarketType::Perp, |_| {});
    server.wait_for_messages(2, WAIT).await;
    assert!(wait_for_state(&client, ConnectionState::Connected).await);

    server.drop_connections();

    assert_eq!(server.wait_for_connections(2, WAIT).await, 2);
    let messages = server.wait_for_messages(4, WAIT).await;
    assert_eq!(messages.len(), 4);
    assert!(wait_for_state(&client, ConnectionState::Connected).await);

    let json = server.received_json().await;
    let mut first: Vec<String> = json[..2].iter().map(|v| v.to_string()).collect();
    let mut second: Vec<String> = json[2..].iter().map(|v| v.to_string()).collect();
    first.sort();
    second.sort();
    assert_eq!(first, second);

    let states = states.lock().clone();
    assert_eq!(
        &states[..6],
        &[
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Reconnecting,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
    assert_eq!(client.stats().reconnect_attempt, 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_skips_subscriptions_removed_while_down() {
    let server = MockWsServer::start().await;
    let mut config = test_config(&server.url());
    config.reconnect_base_delay_ms = 400;
    config.reconnect_max_delay_ms = 400;
    let client = StreamClient::new(config).unwrap();

    let _book = client.subscribe_orderbook("SOL-PERP", MarketType::Perp, |_| {});
    let trades = client.subscribe_trades("BTC-PERP", MarketType::Perp, |_| {});
    server.wait_for_messages(2, WAIT).await;
    assert!(wait_for_state(&client, ConnectionState::Connected).await);

    server.drop_connections();
    assert!(wait_for_state(&client, ConnectionState::Reconnecting).await);
    trades.dispose();

    assert_eq!(server.wait_for_connections(2, WAIT).await, 2);
    server.wait_for_messages(3, WAIT).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // No unsubscribe while down; only the surviving key is restored.
    let json = server.received_json().await;
    assert_eq!(json.len(), 3);
    assert_eq!(json[2], subscribe_json("subscribe", "orderbook", "SOL-PERP"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_last_unsubscribe_closes_socket() {
    let server = MockWsServer::start().await;
    let client = StreamClient::new(test_config(&server.url())).unwrap();
    let states = record_states(&client);

    let sub = client.subscribe_orderbook("SOL-PERP", MarketType::Perp, |_| {});
    server.wait_for_messages(1, WAIT).await;
    assert!(wait_for_state(&client, ConnectionState::Connected).await);

    sub.dispose();
    assert_eq!(client.state(), ConnectionState::Idle);

    let messages = server.wait_for_messages(2, WAIT).await;
    assert_eq!(messages.len(), 2);
    assert_eq!(
        server.received_json().await[1],
        subscribe_json("unsubscribe", "orderbook", "SOL-PERP")
    );
    assert_eq!(server.wait_for_closes(1, WAIT).await, 1);

    // Disposing again sends nothing and does not reconnect.
    sub.dispose();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.received_messages().await.len(), 2);
    assert_eq!(server.connection_count().await, 1);
    assert_eq!(states.lock().last(), Some(&ConnectionState::Idle));

    server.shutdown().await;
}

#[tokio::test]
async fn test_removing_one_of_two_handlers_keeps_subscription() {
    let server = MockWsServer::start().await;
    let client = StreamClient::new(test_config(&server.url())).unwrap();

    let a = client.subscribe_orderbook("SOL-PERP", MarketType::Perp, |_| {});
    let _b = client.subscribe_orderbook("SOL-PERP", MarketType::Perp, |_| {});
    server.wait_for_messages(1, WAIT).await;
    assert!(wait_for_state(&client, ConnectionState::Connected).await);

    a.dispose();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(server.received_messages().await.len(), 1);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.stats().subscriptions, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_heartbeat_timeout_recycles_connection() {
    let server = MockWsServer::start().await;
    let mut config = test_config(&server.url());
    config.heartbeat_timeout_ms = 200;
    let client = StreamClient::new(config).unwrap();

    let _sub = client.subscribe_orderbook("SOL-PERP", MarketType::Perp, |_| {});
    server.wait_for_messages(1, WAIT).await;

    // The server never sends a heartbeat and never closes.
    assert_eq!(server.wait_for_connections(2, WAIT).await, 2);
    assert!(server.wait_for_closes(1, WAIT).await >= 1);
    let messages = server.wait_for_messages(2, WAIT).await;
    assert_eq!(messages.len(), 2);

    server.shutdown().await;
}

#[tokio::test]
async fn test_heartbeats_keep_connection_alive() {
    let server = MockWsServer::start().await;
    let mut config = test_config(&server.url());
    config.heartbeat_timeout_ms = 300;
    let client = StreamClient::new(config).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<Option<u64>>();
    let _hb = client.on_heartbeat(move |e| {
        let _ = tx.send(e.delta_ms);
    });

    let _sub = client.subscribe_orderbook("SOL-PERP", MarketType::Perp, |_| {});
    server.wait_for_messages(1, WAIT).await;

    for _ in 0..10 {
        server.push_heartbeat();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(server.connection_count().await, 1);
    assert_eq!(client.state(), ConnectionState::Connected);

    let first = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    let second = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(first, None);
    assert!(second.is_some());

    server.shutdown().await;
}

#[tokio::test]
async fn test_set_endpoint_moves_subscriptions() {
    let mainnet = MockWsServer::start().await;
    let devnet = MockWsServer::start().await;
    let mut config = test_config(&mainnet.url());
    config.endpoints.devnet = devnet.url();
    let client = StreamClient::new(config).unwrap();

    let _sub = client.subscribe_orderbook("SOL-PERP", MarketType::Perp, |_| {});
    mainnet.wait_for_messages(1, WAIT).await;
    assert!(wait_for_state(&client, ConnectionState::Connected).await);

    // Same environment: no-op.
    client.set_endpoint(NetworkEnv::MainnetBeta);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mainnet.connection_count().await, 1);

    client.set_endpoint(NetworkEnv::Devnet);
    assert_eq!(client.endpoint(), devnet.url());

    let messages = devnet.wait_for_messages(1, WAIT).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(
        devnet.received_json().await[0],
        subscribe_json("subscribe", "orderbook", "SOL-PERP")
    );
    assert_eq!(mainnet.wait_for_closes(1, WAIT).await, 1);
    assert!(wait_for_state(&client, ConnectionState::Connected).await);

    mainnet.shutdown().await;
    devnet.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_then_resubscribe_restores_everything() {
    let server = MockWsServer::start().await;
    let client = StreamClient::new(test_config(&server.url())).unwrap();

    let _book = client.subscribe_orderbook("SOL-PERP", MarketType::Perp, |_| {});
    server.wait_for_messages(1, WAIT).await;
    assert!(wait_for_state(&client, ConnectionState::Connected).await);

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(server.wait_for_closes(1, WAIT).await, 1);

    // No reconnect on its own after an explicit disconnect.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.connection_count().await, 1);

    let _trades = client.subscribe_trades("SOL-PERP", MarketType::Perp, |_| {});
    let messages = server.wait_for_messages(3, WAIT).await;
    assert_eq!(messages.len(), 3);

    let mut restored: Vec<String> = server.received_json().await[1..]
        .iter()
        .map(|v| v["channel"].as_str().unwrap().to_string())
        .collect();
    restored.sort();
    assert_eq!(restored, vec!["orderbook", "trades"]);

    server.shutdown().await;
}
