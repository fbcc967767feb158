//! Price oracle seam.
//!
//! The real oracle aggregates external market feeds; the core only consumes a
//! best-effort snapshot for audit annotation on settlements. A missing or
//! stale price never fails an operation.

use async_trait::async_trait;
use rust_decimal::Decimal;

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Current reference price, or `None` when no fresh data is available
    async fn latest_snapshot(&self) -> Option<Decimal>;
}

/// Oracle returning a fixed snapshot; doubles as the "oracle unavailable"
/// implementation when constructed without a price
#[derive(Debug, Clone, Default)]
pub struct StaticPriceOracle {
    price: Option<Decimal>,
}

impl StaticPriceOracle {
    pub fn fixed(price: Decimal) -> Self {
        Self { price: Some(price) }
    }

    pub fn unavailable() -> Self {
        Self { price: None }
    }
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn latest_snapshot(&self) -> Option<Decimal> {
        self.price
    }
}
