//! Engine constants and configuration values.
//!
//! This module centralizes all hardcoded values and magic numbers
//! to improve maintainability and make it easy to adjust settings.

/// Energy trading constants
pub mod trading {
    use rust_decimal::Decimal;

    /// Platform fee rate applied to every settlement (0.02 = 2%)
    pub const DEFAULT_FEE_RATE: Decimal = Decimal::from_parts(2, 0, 0, false, 2);

    /// Minimum order quantity in kWh
    pub const MIN_ORDER_KWH: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

    /// Maximum order quantity in a single order
    pub const MAX_ORDER_KWH: Decimal = Decimal::from_parts(10_000_000, 0, 0, false, 0);

    /// Minimum price per kWh
    pub const MIN_PRICE_PER_KWH: Decimal = Decimal::from_parts(1, 0, 0, false, 4);
}

/// Token ledger constants
pub mod ledger {
    /// Maximum transaction history entries returned per query
    pub const TX_HISTORY_LIMIT: usize = 100;
}

/// Event publication constants
pub mod events {
    /// Default bounded-channel capacity for outbound engine events
    pub const DEFAULT_BUFFER_SIZE: usize = 256;
}
