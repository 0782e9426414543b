use std::time::Duration;

/// Parse a duration given as whole seconds (`90`) or with an `s`, `m` or `h` suffix (`30m`).
pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, unit) = match s.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((i, _)) => s.split_at(i),
        None => (s, "s"),
    };
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{}'", s))?;
    let seconds = match unit {
        "s" => Some(n),
        "m" => n.checked_mul(60),
        "h" => n.checked_mul(60 * 60),
        _ => return Err(format!("invalid duration '{}', expected a unit of s, m or h", s)),
    };
    seconds
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{}' is too long", s))
}
