//! Settlement creation, fee arithmetic, confirmation and failure handling.

mod common;

use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use common::{engine, fund, matched_fiat_trade, token_order, FailingMirror};
use trading_engine::models::{EnergySource, OrderSide, SettlementStatus, TradeStatus};
use trading_engine::{EngineConfig, TradingEngineBuilder, TradingError};

#[tokio::test]
async fn settlement_computes_fee_and_net_amount() {
    let engine = engine();
    // 100 kWh @ 100 = 10000 total
    let (trade_id, _, _) = matched_fiat_trade(&engine, 100, 100).await;

    let settlement = engine.settlements().create_settlement(trade_id).await.unwrap();
    assert_eq!(settlement.amount, Decimal::from(10_000));
    assert_eq!(settlement.fee, Decimal::from(200));
    assert_eq!(settlement.net_amount, Decimal::from(9_800));
    assert_eq!(settlement.status, SettlementStatus::Pending);
    assert!(settlement.settled_at.is_none());
}

#[tokio::test]
async fn settlement_requires_a_matched_trade() {
    let engine = engine();

    assert!(matches!(
        engine.settlements().create_settlement(Uuid::new_v4()).await,
        Err(TradingError::NotFound(_))
    ));

    let (trade_id, _, _) = matched_fiat_trade(&engine, 10, 50).await;
    let settlement = engine.settlements().create_settlement(trade_id).await.unwrap();
    engine
        .settlements()
        .confirm_settlement(settlement.id)
        .await
        .unwrap();

    // Trade is now SETTLED, a second settlement is rejected
    assert!(matches!(
        engine.settlements().create_settlement(trade_id).await,
        Err(TradingError::InvalidState(_))
    ));
}

#[tokio::test]
async fn duplicate_settlement_is_a_conflict() {
    let engine = engine();
    let (trade_id, _, _) = matched_fiat_trade(&engine, 10, 50).await;

    engine.settlements().create_settlement(trade_id).await.unwrap();
    assert!(matches!(
        engine.settlements().create_settlement(trade_id).await,
        Err(TradingError::Conflict(_))
    ));
}

#[tokio::test]
async fn confirm_completes_settlement_and_settles_trade() {
    let engine = engine();
    let (trade_id, buyer, _) = matched_fiat_trade(&engine, 10, 50).await;

    let settlement = engine.settlements().create_settlement(trade_id).await.unwrap();
    let confirmed = engine
        .settlements()
        .confirm_settlement(settlement.id)
        .await
        .unwrap();

    assert_eq!(confirmed.status, SettlementStatus::Completed);
    assert!(confirmed.settled_at.is_some());
    assert_eq!(
        engine.matching().get_trades(Some(buyer)).await[0].status,
        TradeStatus::Settled
    );

    // Confirming twice is rejected
    assert!(matches!(
        engine.settlements().confirm_settlement(settlement.id).await,
        Err(TradingError::InvalidState(_))
    ));
}

#[tokio::test]
async fn token_settlement_transfers_net_and_burns_fee() {
    let engine = engine();
    let seller = Uuid::new_v4();
    let buyer = Uuid::new_v4();
    fund(&engine, buyer, 10_000).await;

    engine
        .matching()
        .submit_order(token_order(seller, OrderSide::Sell, EnergySource::Solar, 100, 100))
        .await
        .unwrap();
    engine
        .matching()
        .submit_order(token_order(buyer, OrderSide::Buy, EnergySource::Solar, 100, 100))
        .await
        .unwrap();

    let trade_id = engine.matching().get_trades(Some(buyer)).await[0].id;
    engine.settlements().create_settlement(trade_id).await.unwrap();

    let ledger = engine.ledger().unwrap();
    let buyer_balance = ledger.get_balance(buyer).await.unwrap();
    let seller_balance = ledger.get_balance(seller).await.unwrap();
    // 10000 total: 9800 transferred, 200 burned
    assert_eq!(buyer_balance.balance, Decimal::ZERO);
    assert_eq!(seller_balance.balance, Decimal::from(9_800));
}

#[tokio::test]
async fn failed_token_settlement_records_audit_row_and_rethrows() {
    let engine = engine();
    let seller = Uuid::new_v4();
    let buyer = Uuid::new_v4();
    let elsewhere = Uuid::new_v4();
    fund(&engine, buyer, 10_000).await;

    engine
        .matching()
        .submit_order(token_order(seller, OrderSide::Sell, EnergySource::Solar, 100, 100))
        .await
        .unwrap();
    engine
        .matching()
        .submit_order(token_order(buyer, OrderSide::Buy, EnergySource::Solar, 100, 100))
        .await
        .unwrap();

    // Drain the buyer's balance after the match but before settlement
    let ledger = engine.ledger().unwrap();
    ledger
        .transfer(buyer, elsewhere, Decimal::from(9_000), "drain", None)
        .await
        .unwrap();

    let trade_id = engine.matching().get_trades(Some(buyer)).await[0].id;
    let err = engine
        .settlements()
        .create_settlement(trade_id)
        .await
        .expect_err("transfer must fail");
    assert!(matches!(err, TradingError::InsufficientBalance { .. }));

    let settlements = engine.settlements().get_settlements(buyer).await;
    assert_eq!(settlements.len(), 1);
    assert_eq!(settlements[0].status, SettlementStatus::Failed);

    // A FAILED settlement does not block a retry
    fund(&engine, buyer, 9_000).await;
    let retried = engine.settlements().create_settlement(trade_id).await.unwrap();
    assert_eq!(retried.status, SettlementStatus::Pending);
}

#[tokio::test]
async fn settlement_stats_cover_completed_settlements_only() {
    let engine = engine();
    let (first, buyer, _) = matched_fiat_trade(&engine, 100, 100).await;

    let settlement = engine.settlements().create_settlement(first).await.unwrap();
    engine
        .settlements()
        .confirm_settlement(settlement.id)
        .await
        .unwrap();

    let stats = engine.settlements().get_settlement_stats(buyer).await;
    assert_eq!(stats.total_settled, 1);
    assert_eq!(stats.total_amount, Decimal::from(10_000));
    assert_eq!(stats.total_fee, Decimal::from(200));
    assert_eq!(stats.total_net_amount, Decimal::from(9_800));

    // An unrelated user has no completed settlements
    let stats = engine.settlements().get_settlement_stats(Uuid::new_v4()).await;
    assert_eq!(stats.total_settled, 0);
    assert_eq!(stats.total_amount, Decimal::ZERO);
}

#[tokio::test]
async fn mirror_outage_does_not_fail_settlement() {
    let engine = TradingEngineBuilder::new(EngineConfig::default())
        .with_mirror(Arc::new(FailingMirror))
        .build();
    let (trade_id, _, _) = matched_fiat_trade(&engine, 10, 50).await;

    let settlement = engine.settlements().create_settlement(trade_id).await.unwrap();
    let confirmed = engine
        .settlements()
        .confirm_settlement(settlement.id)
        .await
        .unwrap();
    assert_eq!(confirmed.status, SettlementStatus::Completed);
}
