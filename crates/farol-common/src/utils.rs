//! Small shared helpers.

use chrono::Utc;

/// Current unix time in seconds.
pub fn now_sec() -> i64 {
    Utc::now().timestamp()
}

/// Current unix time in seconds, rendered the way the wire format expects
/// timestamps (decimal string).
pub fn now_sec_string() -> String {
    now_sec().to_string()
}

/// Parse a duration written either as bare seconds ("30") or with a unit
/// suffix ("30s", "5m", "12h", "1d").
pub fn parse_duration(s: &str) -> Option<std::time::Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (digits, multiplier) = match s.as_bytes()[s.len() - 1] {
        b's' => (&s[..s.len() - 1], 1),
        b'm' => (&s[..s.len() - 1], 60),
        b'h' => (&s[..s.len() - 1], 3600),
        b'd' => (&s[..s.len() - 1], 86400),
        _ => (s, 1),
    };
    digits
        .parse::<u64>()
        .ok()
        .map(|n| std::time::Duration::from_secs(n * multiplier))
}
