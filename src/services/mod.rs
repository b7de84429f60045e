// Core services
pub mod catalog;
pub mod orders;
pub mod payments;
pub mod refunds;
pub mod webhooks;

use rust_decimal::Decimal;

/// Restores the two-decimal scale on stored amounts; SQLite drops
/// trailing zeros on the round trip.
pub(crate) fn to_money(mut amount: Decimal) -> Decimal {
    amount.rescale(2);
    amount
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn to_money_restores_two_decimal_scale() {
        assert_eq!(to_money(dec!(4)).to_string(), "4.00");
        assert_eq!(to_money(dec!(19.9)).to_string(), "19.90");
        assert_eq!(to_money(dec!(25.00)).to_string(), "25.00");
    }
}
