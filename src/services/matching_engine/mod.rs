//! Order book and price-time-priority matching.
//!
//! Matching is request-driven: one pass runs synchronously for each newly
//! accepted order, walking the opposite side of the book in price-time order.
//! Executed trades take the resting order's price (maker-price rule). Each
//! candidate fill commits as its own transaction with optimistic guards on
//! the remaining quantity of BOTH orders, so two passes racing for the same
//! order can never fill it past its true remaining quantity — the loser just
//! moves on to the next candidate.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::constants;
use crate::error::{Result, TradingError};
use crate::models::{
    NewOrder, Order, OrderFilter, OrderSide, OrderStatus, PaymentCurrency, Trade, TradeStatus,
};
use crate::services::mirror::{mirror_best_effort, LedgerMirror, MirrorEntry};
use crate::services::notification::{EngineEvent, Notifier};
use crate::services::TokenLedger;
use crate::store::MemoryStore;

/// Aggregate trade statistics
#[derive(Debug, Clone, Serialize)]
pub struct TradingStats {
    pub total_volume: Decimal,
    pub total_trades: u64,
    pub total_amount: Decimal,
    pub average_price: Decimal,
    pub today_volume: Decimal,
    pub today_trades: u64,
}

/// Order lifecycle and matching service
#[derive(Clone)]
pub struct MatchingEngine {
    store: Arc<MemoryStore>,
    notifier: Arc<dyn Notifier>,
    /// Absent in fiat-only deployments; token-denominated orders are then
    /// rejected at submission
    token_ledger: Option<Arc<TokenLedger>>,
    mirror: Option<Arc<dyn LedgerMirror>>,
}

impl MatchingEngine {
    pub fn new(store: Arc<MemoryStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            token_ledger: None,
            mirror: None,
        }
    }

    /// Set the token ledger used to escrow funds for token-denominated buys
    pub fn with_token_ledger(mut self, ledger: Arc<TokenLedger>) -> Self {
        self.token_ledger = Some(ledger);
        self
    }

    /// Set the external ledger mirror for trade records
    pub fn with_mirror(mut self, mirror: Arc<dyn LedgerMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Submit a new limit order and run one matching pass for it.
    ///
    /// Token-denominated buys first escrow `quantity × price`; when the lock
    /// fails the just-written order is cancelled again (compensating
    /// rollback) and the lock error is rethrown, so the caller never observes
    /// a pending order without its escrow.
    pub async fn submit_order(&self, new_order: NewOrder) -> Result<Order> {
        validate_order(&new_order)?;

        if new_order.payment_currency == PaymentCurrency::Token && self.token_ledger.is_none() {
            return Err(TradingError::InvalidState(
                "token payments unavailable in this deployment".to_string(),
            ));
        }

        let order = self
            .store
            .transaction(|t| {
                let order = Order {
                    id: Uuid::new_v4(),
                    owner_id: new_order.owner_id,
                    side: new_order.side,
                    energy_source: new_order.energy_source,
                    quantity: new_order.quantity,
                    price: new_order.price,
                    remaining_qty: new_order.quantity,
                    payment_currency: new_order.payment_currency,
                    status: OrderStatus::Pending,
                    valid_from: new_order.valid_from,
                    valid_until: new_order.valid_until,
                    created_at: Utc::now(),
                    sequence: t.next_sequence(),
                };
                t.orders.insert(order.id, order.clone());
                Ok(order)
            })
            .await?;

        info!(
            "📋 Order {} submitted: {} {} kWh of {} @ {}",
            order.id, order.side, order.quantity, order.energy_source, order.price
        );

        if order.is_token_buy() {
            if let Some(ledger) = &self.token_ledger {
                let escrow = order.quantity * order.price;
                if let Err(e) = ledger.lock(order.owner_id, escrow, Some(order.id)).await {
                    self.store
                        .transaction(|t| {
                            if let Some(o) = t.orders.get_mut(&order.id) {
                                o.status = OrderStatus::Cancelled;
                            }
                            Ok(())
                        })
                        .await?;
                    warn!("Order {} cancelled, escrow lock failed: {}", order.id, e);
                    self.notifier.publish(EngineEvent::OrderCancelled {
                        order_id: order.id,
                        owner_id: order.owner_id,
                    });
                    return Err(e);
                }
            }
        }

        self.notifier.publish(EngineEvent::OrderSubmitted {
            order: order.clone(),
        });

        self.run_matching(order.id).await
    }

    /// Cancel an open order; owner only. Token buys get their remaining
    /// escrow released; if the release fails the cancellation stands and the
    /// ledger error is returned.
    pub async fn cancel_order(&self, order_id: Uuid, requester_id: Uuid) -> Result<Order> {
        let cancelled = self
            .store
            .transaction(|t| {
                let order = t
                    .orders
                    .get_mut(&order_id)
                    .ok_or_else(|| TradingError::NotFound(format!("order {}", order_id)))?;
                if order.owner_id != requester_id {
                    return Err(TradingError::Unauthorized(
                        "only the order owner may cancel".to_string(),
                    ));
                }
                if !order.status.is_open() {
                    return Err(TradingError::InvalidState(format!(
                        "order is already {}",
                        order.status
                    )));
                }
                order.status = OrderStatus::Cancelled;
                Ok(order.clone())
            })
            .await?;

        if cancelled.is_token_buy() {
            if let Some(ledger) = &self.token_ledger {
                let refund = cancelled.remaining_qty * cancelled.price;
                if refund > Decimal::ZERO {
                    // The cancellation already committed; a failed release
                    // means the escrow no longer matches the order and the
                    // caller must know about it
                    if let Err(e) = ledger
                        .unlock(cancelled.owner_id, refund, "trade_cancelled", Some(order_id))
                        .await
                    {
                        error!("Escrow release for cancelled order {} failed: {}", order_id, e);
                        return Err(e);
                    }
                }
            }
        }

        info!("🚫 Order {} cancelled by owner", order_id);
        self.notifier.publish(EngineEvent::OrderCancelled {
            order_id,
            owner_id: cancelled.owner_id,
        });
        Ok(cancelled)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order> {
        self.store
            .read(|t| t.orders.get(&order_id).cloned())
            .await
            .ok_or_else(|| TradingError::NotFound(format!("order {}", order_id)))
    }

    /// Orders matching the filter, newest first
    pub async fn list_orders(&self, filter: OrderFilter) -> Vec<Order> {
        let mut orders = self
            .store
            .read(|t| {
                t.orders
                    .values()
                    .filter(|o| filter.side.map_or(true, |s| o.side == s))
                    .filter(|o| filter.status.map_or(true, |s| o.status == s))
                    .filter(|o| filter.owner_id.map_or(true, |u| o.owner_id == u))
                    .filter(|o| filter.energy_source.map_or(true, |e| o.energy_source == e))
                    .filter(|o| filter.payment_currency.map_or(true, |c| o.payment_currency == c))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .await;
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.sequence.cmp(&a.sequence)));
        orders
    }

    /// Trades, optionally restricted to ones the user participated in,
    /// newest first
    pub async fn get_trades(&self, user_id: Option<Uuid>) -> Vec<Trade> {
        let mut trades = self
            .store
            .read(|t| {
                t.trades
                    .values()
                    .filter(|tr| {
                        user_id.map_or(true, |u| tr.buyer_id == u || tr.seller_id == u)
                    })
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .await;
        trades.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        trades
    }

    /// Market-wide trade statistics
    pub async fn trading_stats(&self) -> TradingStats {
        self.store
            .read(|t| {
                let today = Utc::now().date_naive();
                let mut stats = TradingStats {
                    total_volume: Decimal::ZERO,
                    total_trades: 0,
                    total_amount: Decimal::ZERO,
                    average_price: Decimal::ZERO,
                    today_volume: Decimal::ZERO,
                    today_trades: 0,
                };
                let mut price_sum = Decimal::ZERO;
                for trade in t.trades.values() {
                    stats.total_volume += trade.quantity;
                    stats.total_trades += 1;
                    stats.total_amount += trade.total_amount;
                    price_sum += trade.price;
                    if trade.created_at.date_naive() == today {
                        stats.today_volume += trade.quantity;
                        stats.today_trades += 1;
                    }
                }
                if stats.total_trades > 0 {
                    stats.average_price = price_sum / Decimal::from(stats.total_trades);
                }
                stats
            })
            .await
    }

    /// One matching pass for the given order.
    ///
    /// Each fill commits the decrement of BOTH orders in one transaction,
    /// re-reading the incoming order's remaining quantity at write time. The
    /// incoming order is itself a resting candidate for concurrent passes
    /// from the moment it is inserted, so a pass-local counter would go stale
    /// the instant another pass fills it.
    async fn run_matching(&self, order_id: Uuid) -> Result<Order> {
        let incoming = self.get_order(order_id).await?;
        if !incoming.status.is_open() || incoming.remaining_qty <= Decimal::ZERO {
            return Ok(incoming);
        }

        let mut candidates = self
            .store
            .read(|t| {
                t.orders
                    .values()
                    .filter(|c| {
                        c.side == incoming.side.opposite()
                            && c.energy_source == incoming.energy_source
                            && c.payment_currency == incoming.payment_currency
                            && c.status.is_open()
                            && c.remaining_qty > Decimal::ZERO
                            && c.owner_id != incoming.owner_id
                            && price_crosses(&incoming, c)
                    })
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .await;

        // Price priority first (best price for the incoming side), then time
        match incoming.side {
            OrderSide::Buy => candidates.sort_by(|a, b| {
                a.price
                    .cmp(&b.price)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.sequence.cmp(&b.sequence))
            }),
            OrderSide::Sell => candidates.sort_by(|a, b| {
                b.price
                    .cmp(&a.price)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.sequence.cmp(&b.sequence))
            }),
        }

        let mut latest = incoming.clone();

        for candidate in candidates {
            if !latest.status.is_open() || latest.remaining_qty <= Decimal::ZERO {
                break;
            }

            // Maker-price rule: the executed price is the resting order's
            let trade_price = candidate.price;

            let (buy_order, sell_order) = match incoming.side {
                OrderSide::Buy => (&incoming, &candidate),
                OrderSide::Sell => (&candidate, &incoming),
            };
            let buy_order_id = buy_order.id;
            let sell_order_id = sell_order.id;
            let buyer_id = buy_order.owner_id;
            let seller_id = sell_order.owner_id;
            // The buy side locked at its own limit price; that is what gets
            // released per filled slice
            let buy_limit_price = buy_order.price;

            let result = self
                .store
                .transaction(|t| {
                    // Optimistic guards: both sides must still cover the fill
                    // at write time. Quantity is re-read here, never carried
                    // over from before the transaction.
                    let current = t
                        .orders
                        .get(&order_id)
                        .ok_or_else(|| TradingError::NotFound(format!("order {}", order_id)))?;
                    if !current.status.is_open() || current.remaining_qty <= Decimal::ZERO {
                        return Err(TradingError::Conflict(
                            "incoming order is no longer open".to_string(),
                        ));
                    }
                    let incoming_remaining = current.remaining_qty;

                    let resting = t
                        .orders
                        .get_mut(&candidate.id)
                        .ok_or_else(|| TradingError::NotFound(format!("order {}", candidate.id)))?;
                    if !resting.status.is_open() || resting.remaining_qty <= Decimal::ZERO {
                        return Err(TradingError::Conflict(
                            "resting order no longer covers the fill".to_string(),
                        ));
                    }
                    let trade_qty = incoming_remaining.min(resting.remaining_qty);
                    resting.remaining_qty -= trade_qty;
                    resting.status = if resting.remaining_qty.is_zero() {
                        OrderStatus::Filled
                    } else {
                        OrderStatus::PartiallyFilled
                    };
                    let resting_snapshot = resting.clone();

                    let own = t
                        .orders
                        .get_mut(&order_id)
                        .ok_or_else(|| TradingError::NotFound(format!("order {}", order_id)))?;
                    own.remaining_qty -= trade_qty;
                    own.status = if own.remaining_qty.is_zero() {
                        OrderStatus::Filled
                    } else {
                        OrderStatus::PartiallyFilled
                    };
                    let incoming_snapshot = own.clone();

                    let trade = Trade {
                        id: Uuid::new_v4(),
                        buy_order_id,
                        sell_order_id,
                        buyer_id,
                        seller_id,
                        energy_source: incoming.energy_source,
                        quantity: trade_qty,
                        price: trade_price,
                        total_amount: trade_qty * trade_price,
                        payment_currency: incoming.payment_currency,
                        status: TradeStatus::Matched,
                        created_at: Utc::now(),
                    };
                    t.trades.insert(trade.id, trade.clone());
                    Ok((trade, resting_snapshot, incoming_snapshot))
                })
                .await;

            let (trade, resting, incoming_now) = match result {
                Ok(tuple) => tuple,
                Err(e) => {
                    // Not fatal to the pass; either the candidate was taken
                    // by a concurrent fill, or the incoming order itself was
                    // filled/cancelled from another pass
                    debug!("Skipping candidate {}: {}", candidate.id, e);
                    latest = self.get_order(order_id).await?;
                    continue;
                }
            };
            latest = incoming_now;

            info!(
                "⚡ Matched {} kWh of {} at {} (trade {}, buyer {}, seller {})",
                trade.quantity, trade.energy_source, trade.price, trade.id, buyer_id, seller_id
            );

            // Release the escrow slice this fill consumed, so settlement can
            // draw on the funds; the open remainder stays locked
            if trade.payment_currency == PaymentCurrency::Token {
                if let Some(ledger) = &self.token_ledger {
                    let release = trade.quantity * buy_limit_price;
                    if let Err(e) = ledger
                        .unlock(buyer_id, release, "trade_matched", Some(trade.id))
                        .await
                    {
                        error!("Failed to release escrow for trade {}: {}", trade.id, e);
                    }
                }
            }

            mirror_best_effort(&self.mirror, MirrorEntry::Trade { trade: trade.clone() }).await;
            self.notifier.publish(EngineEvent::OrderUpdated {
                order_id: resting.id,
                status: resting.status,
                remaining_qty: resting.remaining_qty,
            });
            self.notifier
                .publish(EngineEvent::TradeExecuted { trade });
        }

        if latest.remaining_qty != incoming.remaining_qty {
            self.notifier.publish(EngineEvent::OrderUpdated {
                order_id: latest.id,
                status: latest.status,
                remaining_qty: latest.remaining_qty,
            });
        }

        Ok(latest)
    }
}

/// Does the resting order's price cross the incoming order's limit?
fn price_crosses(incoming: &Order, resting: &Order) -> bool {
    match incoming.side {
        OrderSide::Buy => resting.price <= incoming.price,
        OrderSide::Sell => resting.price >= incoming.price,
    }
}

fn validate_order(new_order: &NewOrder) -> Result<()> {
    if new_order.quantity < constants::trading::MIN_ORDER_KWH
        || new_order.quantity > constants::trading::MAX_ORDER_KWH
    {
        return Err(TradingError::InvalidInput(format!(
            "quantity {} outside allowed range",
            new_order.quantity
        )));
    }
    if new_order.price < constants::trading::MIN_PRICE_PER_KWH {
        return Err(TradingError::InvalidInput(format!(
            "price {} below minimum",
            new_order.price
        )));
    }
    if let (Some(from), Some(until)) = (new_order.valid_from, new_order.valid_until) {
        if until <= from {
            return Err(TradingError::InvalidInput(
                "valid_until must be after valid_from".to_string(),
            ));
        }
    }
    Ok(())
}
