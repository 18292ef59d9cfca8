use rust_decimal::{Decimal, RoundingStrategy};

use crate::common::traits::RiskManager;

/// Decimal places quantities are truncated to
pub const QUANTITY_SCALE: u32 = 8;

/// Commits a fixed fraction of the account balance to every order
///
/// `quantity = trunc8(balance * percent / price)`, truncated toward zero so a
/// sized order never exceeds the budget. Sizes that overflow the decimal
/// range come back as zero.
#[derive(Debug, Clone)]
pub struct FixedPercentRisk {
    percent: Decimal,
}

impl FixedPercentRisk {
    pub fn new(percent: Decimal) -> Self {
        Self { percent }
    }

    pub fn percent(&self) -> Decimal {
        self.percent
    }
}

impl RiskManager for FixedPercentRisk {
    fn size(&self, _symbol: &str, price: Decimal, account_balance: Decimal) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        // an order too large to represent is not placed
        account_balance
            .checked_mul(self.percent)
            .and_then(|budget| budget.checked_div(price))
            .map_or(Decimal::ZERO, |quantity| {
                quantity.round_dp_with_strategy(QUANTITY_SCALE, RoundingStrategy::ToZero)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_invalid_price_sizes_zero() {
        let risk = FixedPercentRisk::new(dec!(0.1));
        assert_eq!(risk.size("X", dec!(0), dec!(1000)), Decimal::ZERO);
        assert_eq!(risk.size("X", dec!(-5), dec!(1000)), Decimal::ZERO);
    }

    #[test]
    fn test_truncates_never_rounds_up() {
        let risk = FixedPercentRisk::new(dec!(1));
        // 1 / 3 = 0.333333333... -> 0.33333333
        assert_eq!(risk.size("X", dec!(3), dec!(1)), dec!(0.33333333));
        // 2 / 3 = 0.666666666... -> 0.66666666, not 0.66666667
        assert_eq!(risk.size("X", dec!(3), dec!(2)), dec!(0.66666666));
    }

    #[test]
    fn test_fixed_percent_of_balance() {
        let risk = FixedPercentRisk::new(dec!(0.005));
        // 300 * 0.005 = 1.5 USD at 30000 -> 0.00005
        assert_eq!(risk.size("BTCUSD", dec!(30000), dec!(300)), dec!(0.00005));
    }

    #[test]
    fn test_tiny_budget_truncates_to_zero() {
        let risk = FixedPercentRisk::new(dec!(0.001));
        assert_eq!(risk.size("BTCUSD", dec!(1000000000), dec!(1)), Decimal::ZERO);
    }

    #[test]
    fn test_unrepresentable_size_is_zero() {
        let risk = FixedPercentRisk::new(dec!(1));
        assert_eq!(
            risk.size("X", dec!(0.0000000000000000000000000001), Decimal::MAX),
            Decimal::ZERO
        );
        let leveraged = FixedPercentRisk::new(dec!(2));
        assert_eq!(leveraged.size("X", dec!(1), Decimal::MAX), Decimal::ZERO);
    }
}
