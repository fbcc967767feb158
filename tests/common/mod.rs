//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use uuid::Uuid;

use trading_engine::models::{EnergySource, NewOrder, OrderSide, PaymentCurrency};
use trading_engine::services::MirrorEntry;
use trading_engine::{
    EngineConfig, EngineEvent, LedgerMirror, PriceOracle, TradingEngine, TradingEngineBuilder,
};

/// Install a test subscriber once per test binary; `RUST_LOG` controls
/// verbosity
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn engine() -> TradingEngine {
    init_tracing();
    TradingEngineBuilder::new(EngineConfig::default()).build()
}

pub fn engine_with_events() -> (TradingEngine, mpsc::Receiver<EngineEvent>) {
    init_tracing();
    let (builder, rx) = TradingEngineBuilder::new(EngineConfig::default()).with_channel_notifier();
    (builder.build(), rx)
}

/// Mirror that rejects every entry, for outage-tolerance tests
pub struct FailingMirror;

#[async_trait]
impl LedgerMirror for FailingMirror {
    async fn record(&self, _entry: MirrorEntry) -> anyhow::Result<String> {
        anyhow::bail!("mirror unavailable")
    }
}

/// Mirror that accepts every entry after a delay; widens race windows in
/// concurrency tests the way a slow external ledger would
pub struct SlowMirror {
    pub delay: Duration,
}

#[async_trait]
impl LedgerMirror for SlowMirror {
    async fn record(&self, _entry: MirrorEntry) -> anyhow::Result<String> {
        tokio::time::sleep(self.delay).await;
        Ok("mirrored".to_string())
    }
}

/// Oracle that answers after a delay
pub struct SlowOracle {
    pub delay: Duration,
    pub price: Decimal,
}

#[async_trait]
impl PriceOracle for SlowOracle {
    async fn latest_snapshot(&self) -> Option<Decimal> {
        tokio::time::sleep(self.delay).await;
        Some(self.price)
    }
}

/// Mint tokens for a user through the engine's ledger
pub async fn fund(engine: &TradingEngine, user_id: Uuid, amount: i64) {
    engine
        .ledger()
        .expect("token ledger enabled")
        .mint(user_id, Decimal::from(amount), "test_funding", None)
        .await
        .expect("mint succeeds");
}

pub fn order(
    owner_id: Uuid,
    side: OrderSide,
    source: EnergySource,
    quantity: i64,
    price: i64,
) -> NewOrder {
    NewOrder {
        owner_id,
        side,
        energy_source: source,
        quantity: Decimal::from(quantity),
        price: Decimal::from(price),
        payment_currency: PaymentCurrency::Fiat,
        valid_from: None,
        valid_until: None,
    }
}

pub fn token_order(
    owner_id: Uuid,
    side: OrderSide,
    source: EnergySource,
    quantity: i64,
    price: i64,
) -> NewOrder {
    NewOrder {
        payment_currency: PaymentCurrency::Token,
        ..order(owner_id, side, source, quantity, price)
    }
}

/// Match one fiat trade between two fresh users; returns (trade, buyer,
/// seller) ids
pub async fn matched_fiat_trade(
    engine: &TradingEngine,
    quantity: i64,
    price: i64,
) -> (Uuid, Uuid, Uuid) {
    let seller = Uuid::new_v4();
    let buyer = Uuid::new_v4();
    engine
        .matching()
        .submit_order(order(seller, OrderSide::Sell, EnergySource::Solar, quantity, price))
        .await
        .expect("sell accepted");
    engine
        .matching()
        .submit_order(order(buyer, OrderSide::Buy, EnergySource::Solar, quantity, price))
        .await
        .expect("buy accepted");

    let trades = engine.matching().get_trades(Some(buyer)).await;
    assert_eq!(trades.len(), 1);
    (trades[0].id, buyer, seller)
}

/// Drain all events currently buffered in the notifier channel
pub fn drain_events(rx: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
