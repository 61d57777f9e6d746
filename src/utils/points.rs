//! Price and volume arithmetic helpers.

use rust_decimal::Decimal;

/// Round a price to the instrument's decimal precision.
pub fn round_price(value: Decimal, digits: u32) -> Decimal {
    value.round_dp(digits)
}

/// Absolute price distance between two quotes.
pub fn distance(a: Decimal, b: Decimal) -> Decimal {
    (a - b).abs()
}

/// Convert a price delta to points.
pub fn to_points(price_delta: Decimal, point: Decimal) -> Decimal {
    if point == Decimal::ZERO {
        return Decimal::ZERO;
    }
    price_delta / point
}

/// Convert points to a price delta.
pub fn from_points(points: Decimal, point: Decimal) -> Decimal {
    points * point
}

/// Snap a volume to the instrument's step, clamped to the minimum.
pub fn snap_volume(volume: Decimal, step: Decimal, min_volume: Decimal) -> Decimal {
    if step == Decimal::ZERO {
        return volume.max(min_volume);
    }
    let snapped = (volume / step).round() * step;
    snapped.max(min_volume)
}

/// Division that returns zero instead of panicking on a zero divisor.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}
