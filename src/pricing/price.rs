//! Undercut price calculation.

use rand::Rng;
use rust_decimal::prelude::*;

/// Pick a new price just under `compare_price`.
///
/// The undercut lands uniformly in
/// `[compare - discount_max, compare - discount_min]`, rounded half away
/// from zero to `digits` places. When that window reaches below
/// `min_price` it collapses and the result is exactly `min_price`.
pub fn calculate_price_change<R: Rng + ?Sized>(
    compare_price: Decimal,
    min_price: Decimal,
    discount_min: Decimal,
    discount_max: Decimal,
    digits: u32,
    rng: &mut R,
) -> Decimal {
    let low = compare_price - discount_max;
    let high = compare_price - discount_min;
    if low < min_price || high <= min_price {
        return min_price;
    }

    let fraction = Decimal::from_f64(rng.random::<f64>()).unwrap_or_default();
    let raw = low + (high - low) * fraction;
    raw.round_dp_with_strategy(digits, RoundingStrategy::MidpointAwayFromZero)
        .max(min_price)
}
