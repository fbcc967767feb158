//! External ledger mirror seam.
//!
//! Every ledger, trade and settlement mutation is offered to a best-effort
//! external append mirror (a distributed ledger in production deployments).
//! The mirror is consulted, never awaited-on for correctness: an outage is
//! logged and the local operation proceeds regardless.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::models::{LedgerTxType, Settlement, Trade};

/// One mirrored mutation
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MirrorEntry {
    LedgerOp {
        tx_type: LedgerTxType,
        from_id: Option<Uuid>,
        to_id: Option<Uuid>,
        amount: Decimal,
        reason: String,
        ref_id: Option<Uuid>,
    },
    Trade {
        trade: Trade,
    },
    Settlement {
        settlement: Settlement,
    },
}

#[async_trait]
pub trait LedgerMirror: Send + Sync {
    /// Append the entry to the external record, returning an external
    /// reference (e.g., a transaction hash) on success
    async fn record(&self, entry: MirrorEntry) -> anyhow::Result<String>;
}

/// Offer an entry to the mirror, swallowing any failure.
///
/// Returns the external reference when the mirror accepted the entry.
pub async fn mirror_best_effort(
    mirror: &Option<Arc<dyn LedgerMirror>>,
    entry: MirrorEntry,
) -> Option<String> {
    let mirror = mirror.as_ref()?;
    match mirror.record(entry).await {
        Ok(reference) => Some(reference),
        Err(e) => {
            error!("Ledger mirror record failed (ignored): {}", e);
            None
        }
    }
}
