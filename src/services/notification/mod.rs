//! Outbound event publication.
//!
//! The transport (WebSocket fan-out, webhooks, message bus) lives outside the
//! core. Components get a [`Notifier`] injected at construction and publish
//! fire-and-forget: at-most-once, never blocking, failures only logged.

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::models::{
    DisputeResolution, Order, OrderStatus, Settlement, SettlementStatus, Trade, TradeStatus,
};

/// Event payloads raised by the trading core
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum EngineEvent {
    OrderSubmitted {
        order: Order,
    },
    OrderUpdated {
        order_id: Uuid,
        status: OrderStatus,
        remaining_qty: Decimal,
    },
    OrderCancelled {
        order_id: Uuid,
        owner_id: Uuid,
    },
    TradeExecuted {
        trade: Trade,
    },
    BalanceUpdated {
        user_id: Uuid,
        balance: Decimal,
        locked_balance: Decimal,
    },
    SettlementCreated {
        settlement: Settlement,
    },
    SettlementConfirmed {
        settlement_id: Uuid,
        trade_id: Uuid,
    },
    #[serde(rename = "disputed")]
    TradeDisputed {
        trade_id: Uuid,
        requested_by: Uuid,
        reason: String,
    },
    #[serde(rename = "dispute-resolved")]
    DisputeResolved {
        trade_id: Uuid,
        resolution: DisputeResolution,
        trade_status: TradeStatus,
        settlement_status: Option<SettlementStatus>,
    },
}

/// Fire-and-forget event sink injected into every service.
///
/// Implementations must never block the caller; a slow or dead listener is
/// the listener's problem, not the matching loop's.
pub trait Notifier: Send + Sync {
    fn publish(&self, event: EngineEvent);
}

/// Notifier that discards everything; used for fiat-only embeds and tests
#[derive(Debug, Default, Clone)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn publish(&self, _event: EngineEvent) {}
}

/// Notifier backed by a bounded channel; the consuming side drains events
/// into whatever transport the deployment uses
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<EngineEvent>,
}

impl ChannelNotifier {
    /// Create a notifier with the given buffer capacity, returning the
    /// receiving half for the transport to drain
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn publish(&self, event: EngineEvent) {
        // At-most-once: a full or closed channel drops the event
        if let Err(e) = self.tx.try_send(event) {
            warn!("Dropping engine event, channel unavailable: {}", e);
        }
    }
}
