//! Pure pricing: shipping fee step function and order total.

use rust_decimal::Decimal;

/// Shipping fee by subtotal band, inclusive upper bounds.
pub fn shipping_fee(subtotal: Decimal) -> Decimal {
    let fee = if subtotal <= Decimal::ZERO {
        0
    } else if subtotal <= Decimal::from(500) {
        50
    } else if subtotal <= Decimal::from(2500) {
        100
    } else if subtotal <= Decimal::from(3500) {
        200
    } else if subtotal <= Decimal::from(5000) {
        300
    } else if subtotal <= Decimal::from(7000) {
        400
    } else {
        500
    };
    Decimal::from(fee)
}

pub fn order_total(subtotal: Decimal) -> Decimal {
    subtotal + shipping_fee(subtotal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shipping_fee_boundaries() {
        let cases = [
            (0, 0),
            (500, 50),
            (501, 100),
            (2500, 100),
            (2501, 200),
            (3500, 200),
            (3501, 300),
            (5000, 300),
            (5001, 400),
            (7000, 400),
            (7001, 500),
        ];
        for (subtotal, expected) in cases {
            assert_eq!(
                shipping_fee(Decimal::from(subtotal)),
                Decimal::from(expected),
                "subtotal {subtotal}"
            );
        }
    }

    #[test]
    fn test_negative_subtotal_ships_free() {
        assert_eq!(shipping_fee(Decimal::from(-10)), Decimal::ZERO);
    }

    #[test]
    fn test_fractional_subtotal_band() {
        // 500.01 falls in the (500, 2500] band.
        assert_eq!(shipping_fee(Decimal::new(50001, 2)), Decimal::from(100));
    }

    #[test]
    fn test_order_total() {
        assert_eq!(order_total(Decimal::from(300)), Decimal::from(350));
        assert_eq!(order_total(Decimal::from(8000)), Decimal::from(8500));
    }
}
