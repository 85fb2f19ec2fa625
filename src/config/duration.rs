// src/config/duration.rs

use std::time::Duration;

/// Parse a duration string like `"250ms"`, `"5s"`, `"10m"` or `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' is missing a unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;

    let secs = |mul: u64| {
        value
            .checked_mul(mul)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' is too large"))
    };

    match unit_part.trim().to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => secs(1),
        "m" => secs(60),
        "h" => secs(60 * 60),
        unit => Err(format!(
            "unsupported duration unit '{unit}'; expected ms, s, m, or h"
        )),
    }
}
