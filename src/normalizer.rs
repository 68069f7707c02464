use serde::{Deserialize, Serialize};

use crate::utils::{clamp, decimal_places, round_to_decimals, round_to_tick};

pub const DEFAULT_TICK_SIZE: &str = "0.01";
pub const FALLBACK_PRICE: f64 = 0.5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// Immediate-execution semantics for market orders.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum OrderType {
    #[default]
    Fak,
    Fok,
}

impl OrderType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FAK" => Some(OrderType::Fak),
            "FOK" => Some(OrderType::Fok),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Fak => "FAK",
            OrderType::Fok => "FOK",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeIntent {
    pub token_id: String,
    pub side: Side,
    pub amount: f64,
    pub price: Option<f64>,
    pub order_type: OrderType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedOrder {
    pub token_id: String,
    pub side: Side,
    /// USDC for buys, shares for sells.
    pub size: f64,
    pub price: f64,
    pub tick_size: String,
    pub order_type: OrderType,
}

impl NormalizedOrder {
    pub fn tick(&self) -> f64 {
        parse_tick(&self.tick_size).unwrap_or(0.01)
    }
}

/// Parses a market tick; anything outside (0, 1) is unusable.
pub fn parse_tick(tick_size: &str) -> Option<f64> {
    let t = tick_size.trim().parse::<f64>().ok()?;
    (t.is_finite() && t > 0.0 && t < 1.0).then_some(t)
}

/// `clamp(round(price / tick) * tick, tick, 1 - tick)`, snapped to the tick's
/// decimal places so the result prints without binary noise.
pub fn normalize_price(price: f64, tick: f64) -> f64 {
    let decimals = decimal_places(tick);
    let rounded = round_to_decimals(round_to_tick(price, tick), decimals);
    let hi = round_to_decimals(1.0 - tick, decimals);
    clamp(rounded, tick, hi)
}

pub fn round_amount(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Builds the submittable order. `tick_size` and `midpoint` are the results
/// of the two market lookups; `None` means the lookup failed.
pub fn normalize(
    intent: &TradeIntent,
    tick_size: Option<&str>,
    midpoint: Option<f64>,
) -> NormalizedOrder {
    let (tick_size, tick) = match tick_size.and_then(|t| parse_tick(t).map(|v| (t, v))) {
        Some((s, v)) => (s.trim().to_string(), v),
        None => (DEFAULT_TICK_SIZE.to_string(), 0.01),
    };

    let raw_price = intent
        .price
        .filter(|p| p.is_finite() && *p != 0.0)
        .or(midpoint.filter(|m| m.is_finite()))
        .unwrap_or(FALLBACK_PRICE);

    NormalizedOrder {
        token_id: intent.token_id.clone(),
        side: intent.side,
        size: round_amount(intent.amount),
        price: normalize_price(raw_price, tick),
        tick_size,
        order_type: intent.order_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(price: Option<f64>, amount: f64) -> TradeIntent {
        TradeIntent {
            token_id: "123".to_string(),
            side: Side::Buy,
            amount,
            price,
            order_type: OrderType::Fak,
        }
    }

    fn is_multiple_of(x: f64, tick: f64) -> bool {
        let q = x / tick;
        (q - q.round()).abs() < 1e-6
    }

    #[test]
    fn price_stays_inside_tick_band() {
        for tick in [0.01, 0.001] {
            let mut p = 0.0001;
            while p < 1.0 {
                let n = normalize_price(p, tick);
                assert!(n >= tick - 1e-12, "p={p} tick={tick} n={n}");
                assert!(n <= 1.0 - tick + 1e-12, "p={p} tick={tick} n={n}");
                assert!(is_multiple_of(n, tick), "p={p} tick={tick} n={n}");
                p += 0.0007;
            }
        }
    }

    #[test]
    fn extreme_prices_clamp_to_band_edges() {
        assert_eq!(normalize_price(0.0001, 0.01), 0.01);
        assert_eq!(normalize_price(0.9999, 0.01), 0.99);
        assert_eq!(normalize_price(0.0001, 0.001), 0.001);
        assert_eq!(normalize_price(0.99999, 0.001), 0.999);
    }

    #[test]
    fn price_has_no_binary_noise() {
        assert_eq!(normalize_price(0.57, 0.01), 0.57);
        assert_eq!(normalize_price(0.574, 0.01), 0.57);
        assert_eq!(normalize_price(0.576, 0.01), 0.58);
        assert_eq!(normalize_price(0.5555, 0.001), 0.556);
    }

    #[test]
    fn amount_rounding_is_idempotent() {
        for a in [0.001, 0.005, 1.0, 1.234, 1.235, 10.999, 42.42, 1234.5678] {
            let once = round_amount(a);
            assert_eq!(round_amount(once), once, "a={a}");
        }
        assert_eq!(round_amount(1.234), 1.23);
        assert_eq!(round_amount(10.999), 11.0);
    }

    #[test]
    fn missing_price_and_failed_midpoint_uses_half() {
        let n = normalize(&intent(None, 5.0), Some("0.01"), None);
        assert_eq!(n.price, 0.5);
        let n = normalize(&intent(None, 5.0), Some("0.001"), None);
        assert_eq!(n.price, 0.5);
    }

    #[test]
    fn missing_price_uses_midpoint() {
        let n = normalize(&intent(None, 5.0), Some("0.01"), Some(0.634));
        assert_eq!(n.price, 0.63);
    }

    #[test]
    fn explicit_price_wins_over_midpoint() {
        let n = normalize(&intent(Some(0.42), 5.0), Some("0.01"), Some(0.9));
        assert_eq!(n.price, 0.42);
    }

    #[test]
    fn zero_price_counts_as_absent() {
        let n = normalize(&intent(Some(0.0), 5.0), Some("0.01"), Some(0.3));
        assert_eq!(n.price, 0.3);
    }

    #[test]
    fn failed_or_bogus_tick_defaults_to_cent() {
        for tick in [None, Some("abc"), Some("0"), Some("1.5")] {
            let n = normalize(&intent(Some(0.123), 1.0), tick, None);
            assert_eq!(n.tick_size, "0.01");
            assert_eq!(n.price, 0.12);
        }
    }

    #[test]
    fn size_rounds_to_cents() {
        let n = normalize(&intent(Some(0.5), 12.3456), Some("0.01"), None);
        assert_eq!(n.size, 12.35);
    }

    #[test]
    fn parses_side_and_order_type_case_insensitively() {
        assert_eq!(Side::parse("buy"), Some(Side::Buy));
        assert_eq!(Side::parse("SELL"), Some(Side::Sell));
        assert_eq!(Side::parse("hold"), None);
        assert_eq!(OrderType::parse("fok"), Some(OrderType::Fok));
        assert_eq!(OrderType::parse("FAK"), Some(OrderType::Fak));
        assert_eq!(OrderType::parse("GTC"), None);
    }
}
