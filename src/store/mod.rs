//! In-memory transactional store for the trading core.
//!
//! Persistence schema and migrations live outside this engine; what the core
//! needs is a unit of work that applies multi-row mutations atomically. Every
//! compound mutation (trade + resting order, settlement + trade, dispute
//! freeze) goes through [`MemoryStore::transaction`], which commits all-or-
//! nothing: the closure works on a copy of the tables and the copy is swapped
//! in only when it returns `Ok`.

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{LedgerTx, Order, Settlement, Trade, Wallet};

/// Backing tables for all engine-owned entities
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub orders: HashMap<Uuid, Order>,
    pub trades: HashMap<Uuid, Trade>,
    pub wallets: HashMap<Uuid, Wallet>,
    pub ledger_log: Vec<LedgerTx>,
    pub settlements: HashMap<Uuid, Settlement>,
    next_sequence: u64,
}

impl Tables {
    /// Monotonic insertion counter for order time-priority tie-breaks
    pub fn next_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    /// Wallets are created lazily with zero balances on first reference
    pub fn wallet_mut(&mut self, user_id: Uuid) -> &mut Wallet {
        self.wallets
            .entry(user_id)
            .or_insert_with(|| Wallet::new(user_id))
    }

    /// The settlement currently attached to a trade, if any non-FAILED one
    /// exists. FAILED rows are audit records and do not block a retry.
    pub fn open_settlement_for_trade(&self, trade_id: Uuid) -> Option<&Settlement> {
        self.settlements
            .values()
            .find(|s| s.trade_id == trade_id && !matches!(s.status, crate::models::SettlementStatus::Failed))
    }
}

/// Shared transactional store
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a read-only query against a consistent view of the tables
    pub async fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Tables) -> R,
    {
        let tables = self.tables.read().await;
        f(&tables)
    }

    /// Run a mutation as one atomic unit.
    ///
    /// The closure receives a working copy of the tables; it is swapped in
    /// only on `Ok`, so partial application is never observable and any error
    /// rolls everything back.
    pub async fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Tables) -> Result<R>,
    {
        let mut tables = self.tables.write().await;
        let mut work = tables.clone();
        let out = f(&mut work)?;
        *tables = work;
        Ok(out)
    }
}
