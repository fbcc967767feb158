//! Dispute handling for executed trades.
//!
//! A party to a trade can raise a dispute, which freezes the trade and parks
//! any in-flight settlement until an operator resolves it. Resolution either
//! completes the settlement as if confirmed, or cancels the trade and fails
//! the settlement.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, TradingError};
use crate::models::{DisputeResolution, Settlement, SettlementStatus, Trade, TradeStatus};
use crate::services::notification::{EngineEvent, Notifier};
use crate::store::MemoryStore;

/// A disputed trade together with its settlement, if one was in flight
#[derive(Debug, Clone, Serialize)]
pub struct DisputeSummary {
    pub trade: Trade,
    pub settlement: Option<Settlement>,
}

/// Dispute service
#[derive(Clone)]
pub struct DisputeService {
    store: Arc<MemoryStore>,
    notifier: Arc<dyn Notifier>,
}

impl DisputeService {
    pub fn new(store: Arc<MemoryStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Raise a dispute on a trade. Only the buyer or seller may dispute;
    /// the trade is frozen and any non-terminal settlement moves to
    /// PROCESSING so it cannot be confirmed while the dispute is open.
    pub async fn create_dispute(
        &self,
        trade_id: Uuid,
        requester_id: Uuid,
        reason: &str,
    ) -> Result<Trade> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(TradingError::InvalidInput(
                "dispute reason must not be empty".to_string(),
            ));
        }

        let disputed = self
            .store
            .transaction(|t| {
                let trade = t
                    .trades
                    .get_mut(&trade_id)
                    .ok_or_else(|| TradingError::NotFound(format!("trade {}", trade_id)))?;

                if trade.buyer_id != requester_id && trade.seller_id != requester_id {
                    return Err(TradingError::Unauthorized(
                        "only a party to the trade may dispute it".to_string(),
                    ));
                }
                match trade.status {
                    TradeStatus::Disputed => {
                        return Err(TradingError::Conflict(format!(
                            "trade {} is already disputed",
                            trade_id
                        )))
                    }
                    TradeStatus::Cancelled => {
                        return Err(TradingError::InvalidState(
                            "cancelled trades cannot be disputed".to_string(),
                        ))
                    }
                    TradeStatus::Matched | TradeStatus::Settled => {}
                }

                trade.status = TradeStatus::Disputed;
                let snapshot = trade.clone();

                // Park any in-flight settlement until resolution
                if let Some(settlement) = t
                    .settlements
                    .values_mut()
                    .find(|s| s.trade_id == trade_id && !s.status.is_terminal())
                {
                    settlement.status = SettlementStatus::Processing;
                }

                Ok(snapshot)
            })
            .await?;

        info!(
            "⚖️ Dispute opened on trade {} by {}: {}",
            trade_id, requester_id, reason
        );
        self.notifier.publish(EngineEvent::TradeDisputed {
            trade_id,
            requested_by: requester_id,
            reason: reason.to_string(),
        });

        Ok(disputed)
    }

    /// Resolve an open dispute.
    ///
    /// COMPLETE settles the trade and completes its settlement; CANCEL and
    /// REFUND cancel the trade and fail the settlement. Token balances are
    /// not rewound here; refund compensation is handled operationally.
    pub async fn resolve_dispute(
        &self,
        trade_id: Uuid,
        admin_id: Uuid,
        resolution: DisputeResolution,
    ) -> Result<DisputeSummary> {
        let summary = self
            .store
            .transaction(move |t| {
                let trade = t
                    .trades
                    .get_mut(&trade_id)
                    .ok_or_else(|| TradingError::NotFound(format!("trade {}", trade_id)))?;
                if trade.status != TradeStatus::Disputed {
                    return Err(TradingError::InvalidState(format!(
                        "trade is {}, only disputed trades can be resolved",
                        trade.status
                    )));
                }

                trade.status = match resolution {
                    DisputeResolution::Complete => TradeStatus::Settled,
                    DisputeResolution::Cancel | DisputeResolution::Refund => {
                        TradeStatus::Cancelled
                    }
                };
                let trade_snapshot = trade.clone();

                let settlement = t
                    .settlements
                    .values_mut()
                    .find(|s| s.trade_id == trade_id && !s.status.is_terminal());
                let settlement_snapshot = settlement.map(|s| {
                    match resolution {
                        DisputeResolution::Complete => {
                            s.status = SettlementStatus::Completed;
                            s.settled_at = Some(Utc::now());
                        }
                        DisputeResolution::Cancel | DisputeResolution::Refund => {
                            s.status = SettlementStatus::Failed;
                        }
                    }
                    s.clone()
                });

                Ok(DisputeSummary {
                    trade: trade_snapshot,
                    settlement: settlement_snapshot,
                })
            })
            .await?;

        info!(
            "⚖️ Dispute on trade {} resolved as {:?} by admin {}",
            trade_id, resolution, admin_id
        );
        self.notifier.publish(EngineEvent::DisputeResolved {
            trade_id,
            resolution,
            trade_status: summary.trade.status,
            settlement_status: summary.settlement.as_ref().map(|s| s.status),
        });

        Ok(summary)
    }

    /// All currently disputed trades, newest first
    pub async fn get_disputes(&self) -> Vec<DisputeSummary> {
        let mut disputes = self
            .store
            .read(|t| {
                t.trades
                    .values()
                    .filter(|trade| trade.status == TradeStatus::Disputed)
                    .map(|trade| DisputeSummary {
                        trade: trade.clone(),
                        settlement: t
                            .settlements
                            .values()
                            .find(|s| s.trade_id == trade.id && !s.status.is_terminal())
                            .cloned(),
                    })
                    .collect::<Vec<_>>()
            })
            .await;
        disputes.sort_by(|a, b| b.trade.created_at.cmp(&a.trade.created_at));
        disputes
    }
}
