pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn now_secs() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

pub fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    x.max(lo).min(hi)
}

pub fn round_to_tick(price: f64, tick: f64) -> f64 {
    if tick <= 0.0 {
        return price;
    }
    (price / tick).round() * tick
}

pub fn round_to_decimals(x: f64, decimals: u32) -> f64 {
    let f = 10f64.powi(decimals as i32);
    (x * f).round() / f
}

/// Floor to `decimals` places, tolerating binary artifacts like `0.29 * 100 = 28.999..`.
pub fn round_down(x: f64, decimals: u32) -> f64 {
    let f = 10f64.powi(decimals as i32);
    ((x * f) + 1e-9).floor() / f
}

/// Number of decimal places needed to print `x` exactly (capped at 10).
pub fn decimal_places(x: f64) -> u32 {
    let abs_x = x.abs();
    for p in 0..=10u32 {
        let shifted = abs_x * 10f64.powi(p as i32);
        if (shifted - shifted.round()).abs() < 1e-9 {
            return p;
        }
    }
    10
}

/// JSON number or numeric string.
pub fn value_as_f64(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|x| x.is_finite())
}

/// Body as JSON, or `{ "raw": text }` when it does not parse.
pub fn json_or_raw(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| serde_json::json!({ "raw": String::from_utf8_lossy(body) }))
}

/// Char-boundary safe prefix for log lines.
pub fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
