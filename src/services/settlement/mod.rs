//! Settlement: turning a matched trade into a priced, fee-deducted payment
//! record.
//!
//! Creation claims the trade's settlement slot first: one transaction checks
//! the trade status, checks for an existing non-FAILED settlement and inserts
//! an in-flight PROCESSING row, so concurrent calls on the same trade cannot
//! both settle it. For token-denominated trades the money then moves — net
//! amount from buyer to seller, platform fee burned from the buyer — before
//! the row becomes PENDING. A ledger failure flips the claim to FAILED for
//! audit and rethrows; a PENDING settlement therefore only ever exists when
//! the funds actually moved (or the trade is fiat, settled off-platform).

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{Result, TradingError};
use crate::models::{PaymentCurrency, Settlement, SettlementStatus, TradeStatus};
use crate::services::mirror::{mirror_best_effort, LedgerMirror, MirrorEntry};
use crate::services::notification::{EngineEvent, Notifier};
use crate::services::oracle::PriceOracle;
use crate::services::TokenLedger;
use crate::store::MemoryStore;

/// Per-user settlement statistics over COMPLETED settlements
#[derive(Debug, Clone, Serialize)]
pub struct SettlementStats {
    pub total_settled: u64,
    pub total_amount: Decimal,
    pub total_fee: Decimal,
    pub total_net_amount: Decimal,
}

/// Settlement service
#[derive(Clone)]
pub struct SettlementService {
    store: Arc<MemoryStore>,
    notifier: Arc<dyn Notifier>,
    oracle: Arc<dyn PriceOracle>,
    token_ledger: Option<Arc<TokenLedger>>,
    mirror: Option<Arc<dyn LedgerMirror>>,
    fee_rate: Decimal,
}

impl SettlementService {
    pub fn new(
        store: Arc<MemoryStore>,
        notifier: Arc<dyn Notifier>,
        oracle: Arc<dyn PriceOracle>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            oracle,
            token_ledger: None,
            mirror: None,
            fee_rate: config.fee_rate,
        }
    }

    /// Set the token ledger used to move funds for token-denominated trades
    pub fn with_token_ledger(mut self, ledger: Arc<TokenLedger>) -> Self {
        self.token_ledger = Some(ledger);
        self
    }

    /// Set the external ledger mirror for settlement records
    pub fn with_mirror(mut self, mirror: Arc<dyn LedgerMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Create a settlement for a matched trade.
    ///
    /// `fee = total_amount × fee_rate`, `net = total_amount − fee`. At most
    /// one non-FAILED settlement may exist per trade: the status check, the
    /// duplicate check and the insertion of an in-flight (PROCESSING) row
    /// commit as one transaction, so a concurrent call on the same trade
    /// loses with `Conflict` before any funds move. The row only becomes
    /// PENDING once the token transfer (if any) has gone through.
    pub async fn create_settlement(&self, trade_id: Uuid) -> Result<Settlement> {
        let currency = self
            .store
            .read(|t| t.trades.get(&trade_id).map(|tr| tr.payment_currency))
            .await
            .ok_or_else(|| TradingError::NotFound(format!("trade {}", trade_id)))?;
        let ledger = if currency == PaymentCurrency::Token {
            Some(self.token_ledger.clone().ok_or_else(|| {
                TradingError::InvalidState(
                    "token payments unavailable in this deployment".to_string(),
                )
            })?)
        } else {
            None
        };

        // Claim the trade's settlement slot
        let fee_rate = self.fee_rate;
        let claimed = self
            .store
            .transaction(move |t| {
                let trade = t
                    .trades
                    .get(&trade_id)
                    .ok_or_else(|| TradingError::NotFound(format!("trade {}", trade_id)))?;
                if trade.status != TradeStatus::Matched {
                    return Err(TradingError::InvalidState(format!(
                        "trade is {}, settlement requires a matched trade",
                        trade.status
                    )));
                }
                if let Some(existing) = t.open_settlement_for_trade(trade_id) {
                    return Err(TradingError::Conflict(format!(
                        "trade {} already has settlement {}",
                        trade_id, existing.id
                    )));
                }
                let fee = trade.total_amount * fee_rate;
                let settlement = Settlement {
                    id: Uuid::new_v4(),
                    trade_id,
                    buyer_id: trade.buyer_id,
                    seller_id: trade.seller_id,
                    amount: trade.total_amount,
                    fee,
                    net_amount: trade.total_amount - fee,
                    payment_currency: trade.payment_currency,
                    price_snapshot: None,
                    status: SettlementStatus::Processing,
                    created_at: Utc::now(),
                    settled_at: None,
                };
                t.settlements.insert(settlement.id, settlement.clone());
                Ok(settlement)
            })
            .await?;

        // Token trades: move funds before the row becomes PENDING. Seller
        // receives the net amount, the platform fee is burned from the buyer.
        if let Some(ledger) = &ledger {
            let moved = async {
                ledger
                    .transfer(
                        claimed.buyer_id,
                        claimed.seller_id,
                        claimed.net_amount,
                        "settlement",
                        Some(trade_id),
                    )
                    .await?;
                ledger
                    .burn(claimed.buyer_id, claimed.fee, "settlement_fee", Some(trade_id))
                    .await
            }
            .await;

            if let Err(e) = moved {
                error!(
                    "❌ Token settlement for trade {} failed, recording audit row: {}",
                    trade_id, e
                );
                let failed = self.mark_failed(claimed.id).await?;
                mirror_best_effort(
                    &self.mirror,
                    MirrorEntry::Settlement { settlement: failed },
                )
                .await;
                return Err(e);
            }
        }

        // Best-effort reference price, recorded for audit only
        let price_snapshot = self.oracle.latest_snapshot().await;

        let settlement = self
            .store
            .transaction(move |t| {
                let frozen = t
                    .trades
                    .get(&trade_id)
                    .map(|tr| tr.status == TradeStatus::Disputed)
                    .unwrap_or(false);
                let settlement = t
                    .settlements
                    .get_mut(&claimed.id)
                    .ok_or_else(|| TradingError::NotFound(format!("settlement {}", claimed.id)))?;
                settlement.price_snapshot = price_snapshot;
                // A dispute raised while funds were moving keeps the row
                // frozen; otherwise it becomes confirmable
                if !frozen {
                    settlement.status = SettlementStatus::Pending;
                }
                Ok(settlement.clone())
            })
            .await?;

        info!(
            "📝 Created settlement {} for trade {}: amount {}, fee {}, net {}",
            settlement.id, trade_id, settlement.amount, settlement.fee, settlement.net_amount
        );

        mirror_best_effort(
            &self.mirror,
            MirrorEntry::Settlement {
                settlement: settlement.clone(),
            },
        )
        .await;
        self.notifier.publish(EngineEvent::SettlementCreated {
            settlement: settlement.clone(),
        });

        Ok(settlement)
    }

    /// Confirm a PENDING settlement: settlement becomes COMPLETED and the
    /// trade becomes SETTLED in one atomic unit.
    pub async fn confirm_settlement(&self, settlement_id: Uuid) -> Result<Settlement> {
        let confirmed = self
            .store
            .transaction(|t| {
                let settlement = t
                    .settlements
                    .get_mut(&settlement_id)
                    .ok_or_else(|| TradingError::NotFound(format!("settlement {}", settlement_id)))?;
                if settlement.status != SettlementStatus::Pending {
                    return Err(TradingError::InvalidState(format!(
                        "settlement is {}, only pending settlements can be confirmed",
                        settlement.status
                    )));
                }
                settlement.status = SettlementStatus::Completed;
                settlement.settled_at = Some(Utc::now());
                let snapshot = settlement.clone();

                let trade = t
                    .trades
                    .get_mut(&snapshot.trade_id)
                    .ok_or_else(|| TradingError::NotFound(format!("trade {}", snapshot.trade_id)))?;
                trade.status = TradeStatus::Settled;

                Ok(snapshot)
            })
            .await?;

        info!(
            "✅ Settlement {} confirmed, trade {} settled",
            confirmed.id, confirmed.trade_id
        );

        mirror_best_effort(
            &self.mirror,
            MirrorEntry::Settlement {
                settlement: confirmed.clone(),
            },
        )
        .await;
        self.notifier.publish(EngineEvent::SettlementConfirmed {
            settlement_id: confirmed.id,
            trade_id: confirmed.trade_id,
        });

        Ok(confirmed)
    }

    pub async fn get_settlement(&self, settlement_id: Uuid) -> Result<Settlement> {
        self.store
            .read(|t| t.settlements.get(&settlement_id).cloned())
            .await
            .ok_or_else(|| TradingError::NotFound(format!("settlement {}", settlement_id)))
    }

    /// Settlements the user participated in, newest first
    pub async fn get_settlements(&self, user_id: Uuid) -> Vec<Settlement> {
        let mut settlements = self
            .store
            .read(|t| {
                t.settlements
                    .values()
                    .filter(|s| s.buyer_id == user_id || s.seller_id == user_id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .await;
        settlements.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        settlements
    }

    /// Aggregate COMPLETED settlements the user participated in
    pub async fn get_settlement_stats(&self, user_id: Uuid) -> SettlementStats {
        self.store
            .read(|t| {
                let mut stats = SettlementStats {
                    total_settled: 0,
                    total_amount: Decimal::ZERO,
                    total_fee: Decimal::ZERO,
                    total_net_amount: Decimal::ZERO,
                };
                for s in t.settlements.values() {
                    if s.status == SettlementStatus::Completed
                        && (s.buyer_id == user_id || s.seller_id == user_id)
                    {
                        stats.total_settled += 1;
                        stats.total_amount += s.amount;
                        stats.total_fee += s.fee;
                        stats.total_net_amount += s.net_amount;
                    }
                }
                stats
            })
            .await
    }

    async fn mark_failed(&self, settlement_id: Uuid) -> Result<Settlement> {
        self.store
            .transaction(move |t| {
                let settlement = t
                    .settlements
                    .get_mut(&settlement_id)
                    .ok_or_else(|| TradingError::NotFound(format!("settlement {}", settlement_id)))?;
                settlement.status = SettlementStatus::Failed;
                Ok(settlement.clone())
            })
            .await
    }
}
