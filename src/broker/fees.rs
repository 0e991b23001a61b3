//! Regulatory fees charged on US equity sales.
//!
//! Buys are free. Sells pay the SEC Section 31 fee on principal and the
//! FINRA Trading Activity Fee per share, each rounded up to the cent.
//! Business accounts pay more; not modelled.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::types::OrderSide;
use crate::utils::decimal::ceil_to_cent;

#[derive(Debug, Clone)]
pub struct FeeSchedule {
    /// USD per USD of sell principal
    pub sec_rate: Decimal,
    /// USD per share sold
    pub taf_per_share: Decimal,
    /// Cap on the TAF per trade
    pub taf_max: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            sec_rate: dec!(22.90) / dec!(1_000_000),
            taf_per_share: dec!(0.000119),
            taf_max: dec!(5.95),
        }
    }
}

impl FeeSchedule {
    /// Fees for a sale of `shares` worth `principal` in total.
    pub fn sell_fees(&self, principal: Decimal, shares: Decimal) -> Decimal {
        let sec_fee = ceil_to_cent(principal * self.sec_rate);
        let taf = ceil_to_cent(shares * self.taf_per_share).min(self.taf_max);
        sec_fee + taf
    }

    pub fn fees_for(&self, side: OrderSide, price: Decimal, shares: Decimal) -> Decimal {
        match side {
            OrderSide::Buy => Decimal::ZERO,
            OrderSide::Sell => self.sell_fees(price * shares, shares),
        }
    }
}
