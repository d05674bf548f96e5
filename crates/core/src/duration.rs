//! Compact duration strings (`45s`, `10m`, `1h30m`, bare seconds) used by timeout overrides.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

pub const MIN_TIMEOUT_OVERRIDE: Duration = Duration::from_secs(1);
pub const MAX_TIMEOUT_OVERRIDE: Duration = Duration::from_secs(24 * 60 * 60);

fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(?P<h>\d+)h)?(?:(?P<m>\d+)m)?(?:(?P<s>\d+)s)?$").expect("duration pattern compiles")
    })
}

pub fn parse_duration(raw: &str) -> Option<Duration> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return s.parse::<u64>().ok().map(Duration::from_secs);
    }
    let caps = duration_re().captures(s)?;
    let part = |name: &str| -> Option<u64> {
        match caps.name(name) {
            Some(m) => m.as_str().parse::<u64>().ok(),
            None => Some(0),
        }
    };
    let secs = part("h")?.checked_mul(3600)?
        .checked_add(part("m")?.checked_mul(60)?)?
        .checked_add(part("s")?)?;
    Some(Duration::from_secs(secs))
}

/// Parse and bound a timeout override; the error string is user facing.
pub fn parse_timeout_override(raw: &str) -> Result<Duration, String> {
    let d = parse_duration(raw).ok_or_else(|| "expected a duration like 90s, 10m or 1h30m".to_string())?;
    if d < MIN_TIMEOUT_OVERRIDE || d > MAX_TIMEOUT_OVERRIDE {
        return Err("must be between 1s and 24h".to_string());
    }
    Ok(d)
}

/// Human rendering, e.g. `2m5s`.
pub fn humanize(d: Duration) -> String {
    let mut secs = d.as_secs();
    if secs == 0 {
        return format!("{}ms", d.as_millis());
    }
    let hours = secs / 3600;
    secs %= 3600;
    let mins = secs / 60;
    secs %= 60;
    let mut out = String::new();
    if hours > 0 { out.push_str(&format!("{}h", hours)); }
    if mins > 0 { out.push_str(&format!("{}m", mins)); }
    if secs > 0 || out.is_empty() { out.push_str(&format!("{}s", secs)); }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compound_durations() {
        assert_eq!(parse_duration("45s"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("10m"), Some(Duration::from_secs(600)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1d"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn timeout_override_is_bounded() {
        assert!(parse_timeout_override("0s").is_err());
        assert!(parse_timeout_override("25h").is_err());
        assert_eq!(parse_timeout_override("5m"), Ok(Duration::from_secs(300)));
    }

    #[test]
    fn humanize_compacts() {
        assert_eq!(humanize(Duration::from_secs(125)), "2m5s");
        assert_eq!(humanize(Duration::from_secs(3600)), "1h");
        assert_eq!(humanize(Duration::from_millis(250)), "250ms");
    }
}
