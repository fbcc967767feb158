use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::constants;

/// Engine configuration
///
/// Everything has a sane default so the engine can be constructed without any
/// environment at all (tests, embedded use). `from_env` layers overrides on
/// top, one variable per field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Platform fee rate deducted from every settlement (e.g., 0.02 = 2%)
    pub fee_rate: Decimal,
    /// Maximum ledger transaction history entries returned per query
    pub tx_history_limit: usize,
    /// Bounded-channel capacity for outbound engine events
    pub event_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_rate: constants::trading::DEFAULT_FEE_RATE,
            tx_history_limit: constants::ledger::TX_HISTORY_LIMIT,
            event_buffer_size: constants::events::DEFAULT_BUFFER_SIZE,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let mut config = Self::default();

        if let Ok(val) = env::var("SETTLEMENT_FEE_RATE") {
            if let Ok(rate) = Decimal::from_str(&val) {
                config.fee_rate = rate;
                tracing::info!("Using custom settlement fee rate: {}", rate);
            }
        }

        if let Ok(val) = env::var("LEDGER_TX_HISTORY_LIMIT") {
            if let Ok(limit) = val.parse::<usize>() {
                config.tx_history_limit = limit;
            }
        }

        if let Ok(val) = env::var("EVENT_BUFFER_SIZE") {
            if let Ok(size) = val.parse::<usize>() {
                config.event_buffer_size = size;
            }
        }

        config
    }
}
