use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Rounds half away from zero to two decimals and pins the scale, so that
/// `1000` serializes as `"1000.00"`.
pub fn money(value: Decimal) -> Decimal {
    let mut value = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    value.rescale(2);
    value
}

/// `part / whole * 100`, or zero when `whole` is zero or the ratio overflows.
pub fn percent_of(part: Decimal, whole: Decimal) -> Decimal {
    part.checked_div(whole)
        .and_then(|ratio| ratio.checked_mul(dec!(100)))
        .map(money)
        .unwrap_or_else(|| money(Decimal::ZERO))
}

pub fn percent_change(old: Decimal, new: Decimal) -> Decimal {
    percent_of(new - old, old)
}
