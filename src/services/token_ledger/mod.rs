//! Token ledger: wallet custody and the append-only transaction log.
//!
//! All mutating operations follow the same shape: validate against a read
//! snapshot (fast fail), offer the operation to the external mirror (best
//! effort), then apply wallet update + ledger append as one atomic unit with
//! the precondition re-checked at write time. Two requests racing on the same
//! wallet can therefore never drive it negative or push `locked_balance` past
//! `balance`.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::constants;
use crate::error::{Result, TradingError};
use crate::models::{BalanceView, LedgerTx, LedgerTxType, TxDirection, TxFilter, Wallet};
use crate::services::mirror::{mirror_best_effort, LedgerMirror, MirrorEntry};
use crate::services::notification::{EngineEvent, Notifier};
use crate::store::MemoryStore;

/// Ledger service custodying token balances
#[derive(Clone)]
pub struct TokenLedger {
    store: Arc<MemoryStore>,
    notifier: Arc<dyn Notifier>,
    mirror: Option<Arc<dyn LedgerMirror>>,
    tx_history_limit: usize,
}

impl TokenLedger {
    pub fn new(store: Arc<MemoryStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            mirror: None,
            tx_history_limit: constants::ledger::TX_HISTORY_LIMIT,
        }
    }

    /// Set the external ledger mirror
    pub fn with_mirror(mut self, mirror: Arc<dyn LedgerMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.tx_history_limit = config.tx_history_limit;
        self
    }

    /// Issue new tokens to a wallet
    pub async fn mint(
        &self,
        user_id: Uuid,
        amount: Decimal,
        reason: &str,
        ref_id: Option<Uuid>,
    ) -> Result<LedgerTx> {
        ensure_positive(amount)?;

        let mirror_ref = self
            .mirror_op(LedgerTxType::Mint, None, Some(user_id), amount, reason, ref_id)
            .await;

        let (tx, wallet) = self
            .store
            .transaction(|t| {
                let wallet = t.wallet_mut(user_id);
                wallet.balance += amount;
                wallet.updated_at = Utc::now();
                let snapshot = wallet.clone();
                let tx = new_tx(
                    LedgerTxType::Mint,
                    None,
                    Some(user_id),
                    amount,
                    reason,
                    ref_id,
                    mirror_ref,
                );
                t.ledger_log.push(tx.clone());
                Ok((tx, snapshot))
            })
            .await?;

        info!("🪙 Minted {} tokens to {} ({})", amount, user_id, reason);
        self.notify_balance(&wallet);
        Ok(tx)
    }

    /// Destroy tokens from a wallet (e.g., settlement fees)
    pub async fn burn(
        &self,
        user_id: Uuid,
        amount: Decimal,
        reason: &str,
        ref_id: Option<Uuid>,
    ) -> Result<LedgerTx> {
        ensure_positive(amount)?;

        // Fast fail before touching the mirror; locked funds cannot be burned
        let available = self.available_of(user_id).await;
        if available < amount {
            return Err(TradingError::InsufficientBalance {
                required: amount,
                available,
            });
        }

        let mirror_ref = self
            .mirror_op(LedgerTxType::Burn, Some(user_id), None, amount, reason, ref_id)
            .await;

        let (tx, wallet) = self
            .store
            .transaction(|t| {
                let wallet = t.wallet_mut(user_id);
                if wallet.available() < amount {
                    return Err(TradingError::InsufficientBalance {
                        required: amount,
                        available: wallet.available(),
                    });
                }
                wallet.balance -= amount;
                wallet.updated_at = Utc::now();
                let snapshot = wallet.clone();
                let tx = new_tx(
                    LedgerTxType::Burn,
                    Some(user_id),
                    None,
                    amount,
                    reason,
                    ref_id,
                    mirror_ref,
                );
                t.ledger_log.push(tx.clone());
                Ok((tx, snapshot))
            })
            .await?;

        info!("🔥 Burned {} tokens from {} ({})", amount, user_id, reason);
        self.notify_balance(&wallet);
        Ok(tx)
    }

    /// Move tokens between two wallets; the destination wallet is created on
    /// the fly if it does not exist yet
    pub async fn transfer(
        &self,
        from_id: Uuid,
        to_id: Uuid,
        amount: Decimal,
        reason: &str,
        ref_id: Option<Uuid>,
    ) -> Result<LedgerTx> {
        ensure_positive(amount)?;
        if from_id == to_id {
            return Err(TradingError::InvalidInput(
                "cannot transfer to the same wallet".to_string(),
            ));
        }

        let available = self.available_of(from_id).await;
        if available < amount {
            return Err(TradingError::InsufficientBalance {
                required: amount,
                available,
            });
        }

        let mirror_ref = self
            .mirror_op(
                LedgerTxType::Transfer,
                Some(from_id),
                Some(to_id),
                amount,
                reason,
                ref_id,
            )
            .await;

        let (tx, from_wallet, to_wallet) = self
            .store
            .transaction(|t| {
                let from = t.wallet_mut(from_id);
                if from.available() < amount {
                    return Err(TradingError::InsufficientBalance {
                        required: amount,
                        available: from.available(),
                    });
                }
                from.balance -= amount;
                from.updated_at = Utc::now();
                let from_snapshot = from.clone();

                let to = t.wallet_mut(to_id);
                to.balance += amount;
                to.updated_at = Utc::now();
                let to_snapshot = to.clone();

                let tx = new_tx(
                    LedgerTxType::Transfer,
                    Some(from_id),
                    Some(to_id),
                    amount,
                    reason,
                    ref_id,
                    mirror_ref,
                );
                t.ledger_log.push(tx.clone());
                Ok((tx, from_snapshot, to_snapshot))
            })
            .await?;

        info!(
            "💸 Transferred {} tokens from {} to {} ({})",
            amount, from_id, to_id, reason
        );
        self.notify_balance(&from_wallet);
        self.notify_balance(&to_wallet);
        Ok(tx)
    }

    /// Reserve part of a wallet's balance against a pending obligation
    pub async fn lock(&self, user_id: Uuid, amount: Decimal, ref_id: Option<Uuid>) -> Result<LedgerTx> {
        ensure_positive(amount)?;

        let available = self.available_of(user_id).await;
        if available < amount {
            return Err(TradingError::InsufficientBalance {
                required: amount,
                available,
            });
        }

        let mirror_ref = self
            .mirror_op(
                LedgerTxType::Lock,
                Some(user_id),
                None,
                amount,
                "trade_lock",
                ref_id,
            )
            .await;

        let (tx, wallet) = self
            .store
            .transaction(|t| {
                let wallet = t.wallet_mut(user_id);
                if wallet.available() < amount {
                    return Err(TradingError::InsufficientBalance {
                        required: amount,
                        available: wallet.available(),
                    });
                }
                wallet.locked_balance += amount;
                wallet.updated_at = Utc::now();
                let snapshot = wallet.clone();
                let tx = new_tx(
                    LedgerTxType::Lock,
                    Some(user_id),
                    None,
                    amount,
                    "trade_lock",
                    ref_id,
                    mirror_ref,
                );
                t.ledger_log.push(tx.clone());
                Ok((tx, snapshot))
            })
            .await?;

        info!("🔒 Locked {} tokens for {}", amount, user_id);
        self.notify_balance(&wallet);
        Ok(tx)
    }

    /// Release a previously locked amount
    pub async fn unlock(
        &self,
        user_id: Uuid,
        amount: Decimal,
        reason: &str,
        ref_id: Option<Uuid>,
    ) -> Result<LedgerTx> {
        ensure_positive(amount)?;

        let mirror_ref = self
            .mirror_op(LedgerTxType::Unlock, None, Some(user_id), amount, reason, ref_id)
            .await;

        let (tx, wallet) = self
            .store
            .transaction(|t| {
                let wallet = t.wallet_mut(user_id);
                // Invariant floor: locked_balance can never go negative
                if wallet.locked_balance < amount {
                    return Err(TradingError::InvalidState(format!(
                        "unlock of {} exceeds locked balance {}",
                        amount, wallet.locked_balance
                    )));
                }
                wallet.locked_balance -= amount;
                wallet.updated_at = Utc::now();
                let snapshot = wallet.clone();
                let tx = new_tx(
                    LedgerTxType::Unlock,
                    None,
                    Some(user_id),
                    amount,
                    reason,
                    ref_id,
                    mirror_ref,
                );
                t.ledger_log.push(tx.clone());
                Ok((tx, snapshot))
            })
            .await?;

        info!("🔓 Unlocked {} tokens for {} ({})", amount, user_id, reason);
        self.notify_balance(&wallet);
        Ok(tx)
    }

    /// Balance view for a user; creates the wallet lazily like every other
    /// ledger touch
    pub async fn get_balance(&self, user_id: Uuid) -> Result<BalanceView> {
        let wallet = self
            .store
            .transaction(|t| Ok(t.wallet_mut(user_id).clone()))
            .await?;
        Ok(BalanceView {
            balance: wallet.balance,
            locked_balance: wallet.locked_balance,
            available: wallet.available(),
        })
    }

    /// Transaction history involving the user, newest first
    pub async fn get_transactions(&self, user_id: Uuid, filter: TxFilter) -> Result<Vec<LedgerTx>> {
        let limit = self.tx_history_limit;
        let txs = self
            .store
            .read(|t| {
                t.ledger_log
                    .iter()
                    .rev()
                    .filter(|tx| tx.from_id == Some(user_id) || tx.to_id == Some(user_id))
                    .filter(|tx| match filter.direction {
                        Some(TxDirection::Incoming) => tx.to_id == Some(user_id),
                        Some(TxDirection::Outgoing) => tx.from_id == Some(user_id),
                        None => true,
                    })
                    .filter(|tx| filter.tx_type.map_or(true, |ty| tx.tx_type == ty))
                    .filter(|tx| filter.from.map_or(true, |from| tx.created_at >= from))
                    .filter(|tx| filter.to.map_or(true, |to| tx.created_at <= to))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .await;
        Ok(txs)
    }

    async fn available_of(&self, user_id: Uuid) -> Decimal {
        self.store
            .read(|t| t.wallets.get(&user_id).map(|w| w.available()))
            .await
            .unwrap_or(Decimal::ZERO)
    }

    async fn mirror_op(
        &self,
        tx_type: LedgerTxType,
        from_id: Option<Uuid>,
        to_id: Option<Uuid>,
        amount: Decimal,
        reason: &str,
        ref_id: Option<Uuid>,
    ) -> Option<String> {
        mirror_best_effort(
            &self.mirror,
            MirrorEntry::LedgerOp {
                tx_type,
                from_id,
                to_id,
                amount,
                reason: reason.to_string(),
                ref_id,
            },
        )
        .await
    }

    fn notify_balance(&self, wallet: &Wallet) {
        self.notifier.publish(EngineEvent::BalanceUpdated {
            user_id: wallet.user_id,
            balance: wallet.balance,
            locked_balance: wallet.locked_balance,
        });
    }
}

fn ensure_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(TradingError::InvalidInput(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

fn new_tx(
    tx_type: LedgerTxType,
    from_id: Option<Uuid>,
    to_id: Option<Uuid>,
    amount: Decimal,
    reason: &str,
    ref_id: Option<Uuid>,
    mirror_ref: Option<String>,
) -> LedgerTx {
    LedgerTx {
        id: Uuid::new_v4(),
        tx_type,
        from_id,
        to_id,
        amount,
        reason: reason.to_string(),
        ref_id,
        mirror_ref,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notification::NullNotifier;
    use proptest::prelude::*;

    fn ledger() -> TokenLedger {
        TokenLedger::new(Arc::new(MemoryStore::new()), Arc::new(NullNotifier))
    }

    #[tokio::test]
    async fn test_mint_and_burn() {
        let ledger = ledger();
        let user = Uuid::new_v4();

        ledger.mint(user, Decimal::from(100), "meter_verified", None).await.unwrap();
        ledger.burn(user, Decimal::from(30), "settlement_fee", None).await.unwrap();

        let view = ledger.get_balance(user).await.unwrap();
        assert_eq!(view.balance, Decimal::from(70));
        assert_eq!(view.available, Decimal::from(70));
    }

    #[tokio::test]
    async fn test_burn_rejects_overdraft() {
        let ledger = ledger();
        let user = Uuid::new_v4();
        ledger.mint(user, Decimal::from(10), "seed", None).await.unwrap();

        let err = ledger.burn(user, Decimal::from(11), "fee", None).await.unwrap_err();
        assert!(matches!(err, TradingError::InsufficientBalance { .. }));
        assert_eq!(ledger.get_balance(user).await.unwrap().balance, Decimal::from(10));
    }

    #[tokio::test]
    async fn test_locked_funds_are_not_transferable() {
        let ledger = ledger();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        ledger.mint(a, Decimal::from(100), "seed", None).await.unwrap();
        ledger.lock(a, Decimal::from(80), None).await.unwrap();

        let err = ledger
            .transfer(a, b, Decimal::from(50), "payment", None)
            .await
            .unwrap_err();
        assert!(matches!(err, TradingError::InsufficientBalance { .. }));

        // Available portion still moves
        ledger.transfer(a, b, Decimal::from(20), "payment", None).await.unwrap();
        assert_eq!(ledger.get_balance(b).await.unwrap().balance, Decimal::from(20));
    }

    #[tokio::test]
    async fn test_self_transfer_rejected() {
        let ledger = ledger();
        let user = Uuid::new_v4();
        ledger.mint(user, Decimal::from(10), "seed", None).await.unwrap();
        let err = ledger
            .transfer(user, user, Decimal::from(5), "noop", None)
            .await
            .unwrap_err();
        assert!(matches!(err, TradingError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_unlock_cannot_exceed_locked() {
        let ledger = ledger();
        let user = Uuid::new_v4();
        ledger.mint(user, Decimal::from(50), "seed", None).await.unwrap();
        ledger.lock(user, Decimal::from(20), None).await.unwrap();

        let err = ledger
            .unlock(user, Decimal::from(21), "trade_cancelled", None)
            .await
            .unwrap_err();
        assert!(matches!(err, TradingError::InvalidState(_)));

        ledger.unlock(user, Decimal::from(20), "trade_cancelled", None).await.unwrap();
        assert_eq!(ledger.get_balance(user).await.unwrap().available, Decimal::from(50));
    }

    #[tokio::test]
    async fn test_transaction_history_newest_first() {
        let ledger = ledger();
        let user = Uuid::new_v4();
        ledger.mint(user, Decimal::from(10), "first", None).await.unwrap();
        ledger.mint(user, Decimal::from(20), "second", None).await.unwrap();

        let txs = ledger.get_transactions(user, TxFilter::default()).await.unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].reason, "second");

        let outgoing = ledger
            .get_transactions(
                user,
                TxFilter {
                    direction: Some(TxDirection::Outgoing),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(outgoing.is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Mint(u32),
        Burn(u32),
        Transfer(u32),
        Lock(u32),
        Unlock(u32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u32..500).prop_map(Op::Mint),
            (1u32..500).prop_map(Op::Burn),
            (1u32..500).prop_map(Op::Transfer),
            (1u32..500).prop_map(Op::Lock),
            (1u32..500).prop_map(Op::Unlock),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// `balance >= locked_balance >= 0` must hold after every operation,
        /// whatever order of (possibly failing) ops the ledger sees.
        #[test]
        fn prop_wallet_invariant_holds(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let ledger = ledger();
                let a = Uuid::new_v4();
                let b = Uuid::new_v4();
                for op in ops {
                    let _ = match op {
                        Op::Mint(n) => ledger.mint(a, Decimal::from(n), "seed", None).await,
                        Op::Burn(n) => ledger.burn(a, Decimal::from(n), "fee", None).await,
                        Op::Transfer(n) => ledger.transfer(a, b, Decimal::from(n), "pay", None).await,
                        Op::Lock(n) => ledger.lock(a, Decimal::from(n), None).await,
                        Op::Unlock(n) => ledger.unlock(a, Decimal::from(n), "release", None).await,
                    };
                    for user in [a, b] {
                        let view = ledger.get_balance(user).await.unwrap();
                        prop_assert!(view.locked_balance >= Decimal::ZERO);
                        prop_assert!(view.balance >= view.locked_balance);
                    }
                }
                Ok(())
            })?;
        }
    }
}
