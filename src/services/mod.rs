//! Engine services: the token ledger, the matching engine, settlement and
//! dispute handling, plus the injectable collaborator seams (notifications,
//! price oracle, external ledger mirror).

pub mod dispute;
pub mod matching_engine;
pub mod mirror;
pub mod notification;
pub mod oracle;
pub mod settlement;
pub mod token_ledger;

pub use dispute::{DisputeService, DisputeSummary};
pub use matching_engine::{MatchingEngine, TradingStats};
pub use mirror::{LedgerMirror, MirrorEntry};
pub use notification::{ChannelNotifier, EngineEvent, Notifier, NullNotifier};
pub use oracle::{PriceOracle, StaticPriceOracle};
pub use settlement::{SettlementService, SettlementStats};
pub use token_ledger::TokenLedger;
