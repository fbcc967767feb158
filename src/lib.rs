//! Trading and settlement engine for peer-to-peer renewable energy markets.
//!
//! The engine matches buy and sell orders for generated energy under
//! price-time priority, maintains an in-memory token ledger for
//! token-denominated payments, settles executed trades with a platform fee,
//! and supports dispute freezing and operator resolution.
//!
//! Construction goes through [`TradingEngineBuilder`], which wires the
//! services over a shared store and lets deployments inject their own
//! [`Notifier`], [`PriceOracle`] and [`LedgerMirror`] implementations:
//!
//! ```
//! use trading_engine::{EngineConfig, TradingEngineBuilder};
//!
//! let engine = TradingEngineBuilder::new(EngineConfig::default()).build();
//! assert!(engine.ledger().is_some());
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod services;
pub mod store;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

pub use config::EngineConfig;
pub use error::{ErrorCode, Result, TradingError};
pub use services::{
    ChannelNotifier, DisputeService, EngineEvent, LedgerMirror, MatchingEngine, Notifier,
    NullNotifier, PriceOracle, SettlementService, StaticPriceOracle, TokenLedger,
};
pub use store::MemoryStore;

/// The assembled engine: one shared store, one service per concern.
#[derive(Clone)]
pub struct TradingEngine {
    store: Arc<MemoryStore>,
    config: EngineConfig,
    token_ledger: Option<Arc<TokenLedger>>,
    matching: MatchingEngine,
    settlements: SettlementService,
    disputes: DisputeService,
}

impl TradingEngine {
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Token ledger, absent in fiat-only deployments
    pub fn ledger(&self) -> Option<&Arc<TokenLedger>> {
        self.token_ledger.as_ref()
    }

    pub fn matching(&self) -> &MatchingEngine {
        &self.matching
    }

    pub fn settlements(&self) -> &SettlementService {
        &self.settlements
    }

    pub fn disputes(&self) -> &DisputeService {
        &self.disputes
    }
}

/// Builder wiring the engine services over a shared in-memory store.
///
/// Defaults: token ledger enabled, no-op notifier, unavailable price oracle,
/// no external mirror.
pub struct TradingEngineBuilder {
    config: EngineConfig,
    notifier: Arc<dyn Notifier>,
    oracle: Arc<dyn PriceOracle>,
    mirror: Option<Arc<dyn LedgerMirror>>,
    token_ledger_enabled: bool,
}

impl TradingEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            notifier: Arc::new(NullNotifier),
            oracle: Arc::new(StaticPriceOracle::unavailable()),
            mirror: None,
            token_ledger_enabled: true,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Publish events through a bounded channel sized from
    /// `config.event_buffer_size`, returning the receiving half for the
    /// transport to drain
    pub fn with_channel_notifier(mut self) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (notifier, rx) = ChannelNotifier::bounded(self.config.event_buffer_size);
        self.notifier = Arc::new(notifier);
        (self, rx)
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn PriceOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn LedgerMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Disable the token ledger; TOKEN-denominated orders will be rejected
    pub fn fiat_only(mut self) -> Self {
        self.token_ledger_enabled = false;
        self
    }

    pub fn build(self) -> TradingEngine {
        let store = Arc::new(MemoryStore::new());

        let token_ledger = if self.token_ledger_enabled {
            let mut ledger = TokenLedger::new(store.clone(), self.notifier.clone())
                .with_config(&self.config);
            if let Some(mirror) = &self.mirror {
                ledger = ledger.with_mirror(mirror.clone());
            }
            Some(Arc::new(ledger))
        } else {
            None
        };

        let mut matching = MatchingEngine::new(store.clone(), self.notifier.clone());
        let mut settlements = SettlementService::new(
            store.clone(),
            self.notifier.clone(),
            self.oracle.clone(),
            &self.config,
        );
        if let Some(ledger) = &token_ledger {
            matching = matching.with_token_ledger(ledger.clone());
            settlements = settlements.with_token_ledger(ledger.clone());
        }
        if let Some(mirror) = &self.mirror {
            matching = matching.with_mirror(mirror.clone());
            settlements = settlements.with_mirror(mirror.clone());
        }
        let disputes = DisputeService::new(store.clone(), self.notifier.clone());

        info!(
            "🚀 Trading engine initialized (fee rate {}, token ledger {})",
            self.config.fee_rate,
            if token_ledger.is_some() {
                "enabled"
            } else {
                "disabled"
            }
        );

        TradingEngine {
            store,
            config: self.config,
            token_ledger,
            matching,
            settlements,
            disputes,
        }
    }
}
