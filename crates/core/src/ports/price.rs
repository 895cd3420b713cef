//! Port trait for USD valuation.

use async_trait::async_trait;

use crate::error::PriceResult;

/// Values an amount of a token in USD.
///
/// Callers treat every failure as non-fatal and record zero.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// `amount` is a decimal string in whole token units.
    async fn value_in_usd(&self, amount: &str, symbol: &str) -> PriceResult<f64>;
}
