use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Renewable generation source an order trades in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnergySource {
    Solar,
    Wind,
    Hydro,
    Biomass,
    Geothermal,
}

impl std::fmt::Display for EnergySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Solar => write!(f, "solar"),
            Self::Wind => write!(f, "wind"),
            Self::Hydro => write!(f, "hydro"),
            Self::Biomass => write!(f, "biomass"),
            Self::Geothermal => write!(f, "geothermal"),
        }
    }
}

/// How a matched trade gets paid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentCurrency {
    Fiat,
    Token,
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Expired,
}

impl OrderStatus {
    /// Open orders can still match or be cancelled
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::PartiallyFilled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Expired)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::PartiallyFilled => write!(f, "partially_filled"),
            Self::Filled => write!(f, "filled"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Trade status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Matched,
    Settled,
    Disputed,
    Cancelled,
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Matched => write!(f, "matched"),
            Self::Settled => write!(f, "settled"),
            Self::Disputed => write!(f, "disputed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Settlement status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    Pending,
    /// In flight (creation claimed the slot, funds may still be moving) or
    /// frozen by an open dispute; confirmation is blocked either way
    Processing,
    Completed,
    Failed,
}

impl SettlementStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Ledger transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerTxType {
    Mint,
    Burn,
    Transfer,
    Lock,
    Unlock,
}

impl std::fmt::Display for LedgerTxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mint => write!(f, "mint"),
            Self::Burn => write!(f, "burn"),
            Self::Transfer => write!(f, "transfer"),
            Self::Lock => write!(f, "lock"),
            Self::Unlock => write!(f, "unlock"),
        }
    }
}

/// Administrative outcome applied to a disputed trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeResolution {
    Complete,
    Cancel,
    Refund,
}

/// A limit order resting in (or entering) the book
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub side: OrderSide,
    pub energy_source: EnergySource,
    pub quantity: Decimal,
    pub price: Decimal,
    pub remaining_qty: Decimal,
    pub payment_currency: PaymentCurrency,
    pub status: OrderStatus,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Store-assigned insertion counter; breaks time-priority ties when two
    /// orders share a creation timestamp
    pub(crate) sequence: u64,
}

impl Order {
    /// Token-denominated buy orders escrow funds at submission
    pub fn is_token_buy(&self) -> bool {
        self.side == OrderSide::Buy && self.payment_currency == PaymentCurrency::Token
    }
}

/// Parameters for submitting a new order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub owner_id: Uuid,
    pub side: OrderSide,
    pub energy_source: EnergySource,
    pub quantity: Decimal,
    pub price: Decimal,
    pub payment_currency: PaymentCurrency,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

/// The immutable join artifact between two matched orders.
///
/// Only `status` ever changes after creation (settlement / dispute).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub energy_source: EnergySource,
    pub quantity: Decimal,
    pub price: Decimal,
    pub total_amount: Decimal,
    pub payment_currency: PaymentCurrency,
    pub status: TradeStatus,
    pub created_at: DateTime<Utc>,
}

/// Token wallet; invariant: `balance >= locked_balance >= 0`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: Uuid,
    pub balance: Decimal,
    pub locked_balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            balance: Decimal::ZERO,
            locked_balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn available(&self) -> Decimal {
        self.balance - self.locked_balance
    }
}

/// Append-only ledger entry; never mutated or deleted once written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTx {
    pub id: Uuid,
    pub tx_type: LedgerTxType,
    pub from_id: Option<Uuid>,
    pub to_id: Option<Uuid>,
    pub amount: Decimal,
    pub reason: String,
    pub ref_id: Option<Uuid>,
    /// Best-effort external ledger reference, when the mirror accepted the op
    pub mirror_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fee-adjusted payment record produced once a trade is ready to be paid out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub id: Uuid,
    pub trade_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub amount: Decimal,
    pub fee: Decimal,
    pub net_amount: Decimal,
    pub payment_currency: PaymentCurrency,
    /// Externally-sourced reference price, recorded for audit only
    pub price_snapshot: Option<Decimal>,
    pub status: SettlementStatus,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Wallet balance view returned to callers
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BalanceView {
    pub balance: Decimal,
    pub locked_balance: Decimal,
    pub available: Decimal,
}

/// Direction of a ledger transaction relative to the queried user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxDirection {
    Incoming,
    Outgoing,
}

/// Filters for ledger transaction history queries
#[derive(Debug, Clone, Default)]
pub struct TxFilter {
    pub direction: Option<TxDirection>,
    pub tx_type: Option<LedgerTxType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Filters for order book queries
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub side: Option<OrderSide>,
    pub status: Option<OrderStatus>,
    pub owner_id: Option<Uuid>,
    pub energy_source: Option<EnergySource>,
    pub payment_currency: Option<PaymentCurrency>,
}
