//! Main application orchestration.
//!
//! Wires the configured markets into one `StreamClient`:
//! - Connection, heartbeat and backpressure events feed metrics and logs
//! - Orderbook updates publish mark prices
//! - Trade fills are logged

use crate::config::{AppConfig, MarketConfig};
use crate::error::AppResult;
use dlob_core::Channel;
use dlob_telemetry::Metrics;
use dlob_ws::{ConnectionState, Disposer, OrderbookEvent, StreamClient, TradeEvent};
use rust_decimal::prelude::ToPrimitive;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Main application.
pub struct Application {
    config: AppConfig,
    client: StreamClient,
    disposers: Vec<Disposer>,
}

impl Application {
    /// Create a new application. Must run inside a tokio runtime.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let client = StreamClient::new(config.stream.clone()).map_err(Box::new)?;
        Ok(Self {
            config,
            client,
            disposers: Vec::new(),
        })
    }

    pub fn client(&self) -> &StreamClient {
        &self.client
    }

    /// Register event listeners and market subscriptions.
    pub fn start(&mut self) {
        Metrics::ws_state_set(self.client.state().as_str());

        self.disposers.push(self.client.on_connection(|event| {
            Metrics::ws_state_set(event.state.as_str());
            match event.state {
                ConnectionState::Connected => info!(url = %event.url, "Stream connected"),
                ConnectionState::Reconnecting => {
                    Metrics::ws_reconnect();
                    warn!(attempt = event.attempt, "Stream reconnecting");
                }
                state => debug!(%state, "Stream state changed"),
            }
        }));

        self.disposers.push(self.client.on_heartbeat(|event| {
            Metrics::heartbeat(event.delta_ms);
        }));

        self.disposers.push(self.client.on_backpressure(|event| {
            Metrics::backpressure(event.queue_depth, event.dropped_messages);
            warn!(
                queue_depth = event.queue_depth,
                dropped = event.dropped_messages,
                "Inbound queue overflow"
            );
        }));

        let markets = self.config.markets.clone();
        for market in &markets {
            self.subscribe_market(market);
        }
        info!(
            markets = markets.len(),
            subscriptions = self.client.stats().subscriptions,
            "Subscriptions registered"
        );
    }

    fn subscribe_market(&mut self, market: &MarketConfig) {
        if market.orderbook {
            let disposer = self.client.subscribe_orderbook(
                market.name.clone(),
                market.market_type,
                on_orderbook,
            );
            self.disposers.push(disposer);
        }
        if market.trades {
            let disposer =
                self.client
                    .subscribe_trades(market.name.clone(), market.market_type, on_trades);
            self.disposers.push(disposer);
        }
    }

    /// Run until Ctrl-C, then disconnect.
    pub async fn run(mut self) -> AppResult<()> {
        self.start();

        let stats_enabled = self.config.stats_interval_secs > 0;
        let mut stats_interval =
            tokio::time::interval(Duration::from_secs(self.config.stats_interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = stats_interval.tick(), if stats_enabled => {
                    let stats = self.client.stats();
                    info!(
                        state = %stats.state,
                        endpoint = %stats.endpoint,
                        subscriptions = stats.subscriptions,
                        active = stats.active_subscriptions,
                        queue_depth = stats.queue_depth,
                        dropped = stats.dropped_messages,
                        heartbeat_age_ms = ?stats.last_heartbeat_age_ms,
                        "Stream stats"
                    );
                }
                result = tokio::signal::ctrl_c() => {
                    result?;
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Disconnect the stream, release every registration and log final
    /// metrics.
    pub fn shutdown(&mut self) {
        self.client.disconnect();
        for disposer in self.disposers.drain(..) {
            disposer.dispose();
        }
        Metrics::ws_state_set(self.client.state().as_str());

        match Metrics::render() {
            Ok(text) => debug!(metrics = %text, "Final metrics"),
            Err(e) => warn!(error = %e, "Failed to render metrics"),
        }
        info!("DLOB stream stopped");
    }
}

fn on_orderbook(event: &OrderbookEvent) {
    let market = event.key.market.as_str();
    Metrics::event(Channel::Orderbook.as_str(), market);

    if let Some(mark) = event.mark_price {
        if let Some(value) = mark.inner().to_f64() {
            Metrics::mark_price(market, value);
        }
        debug!(
            market,
            mark = %mark,
            bid = ?event.bid_price.map(|p| p.to_string()),
            ask = ?event.ask_price.map(|p| p.to_string()),
            slot = ?event.slot,
            "Orderbook update"
        );
    }
}

fn on_trades(event: &TradeEvent) {
    let market = event.key.market.as_str();
    Metrics::event(Channel::Trades.as_str(), market);

    for fill in &event.fills {
        info!(
            market,
            price = ?fill.fill_price().map(|p| p.to_string()),
            size = ?fill.base_asset_amount_filled.map(|s| s.to_string()),
            direction = ?fill.taker_order_direction,
            slot = ?fill.slot,
            "Trade"
        );
    }
}
