//! Parses the admin API's `"<integer><unit>"` duration encoding (§6), unit
//! one of `s`, `m`, `h`.

use std::time::Duration;

pub fn parse(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (digits, unit) = raw.split_at(raw.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    let seconds = match unit {
        "s" => amount,
        "m" => amount.checked_mul(60)?,
        "h" => amount.checked_mul(3600)?,
        _ => return None,
    };
    Some(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seconds() {
        assert_eq!(parse("30s"), Some(Duration::from_secs(30)));
    }

    #[test]
    fn parses_minutes() {
        assert_eq!(parse("5m"), Some(Duration::from_secs(300)));
    }

    #[test]
    fn parses_hours() {
        assert_eq!(parse("1h"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn rejects_unknown_unit() {
        assert_eq!(parse("5d"), None);
    }

    #[test]
    fn rejects_non_numeric() {
        assert_eq!(parse("xs"), None);
    }
}
