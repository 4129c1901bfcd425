use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

/// Provider retry hints, highest priority first. New formats are appended here.
static RETRY_DELAY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // structured payload: retryDelay: "30s", 'retryDelay'='7s', "retryDelay": "1.5s"
        r#"retryDelay['"]?\s*[:=]\s*['"]?([0-9]+(?:\.[0-9]+)?)s"#,
        // prose: "Please retry in 12.5s"
        r"(?i)retry in ([0-9]+(?:\.[0-9]+)?)\s*s",
        // header: Retry-After: 42
        r"(?i)Retry-After:\s*([0-9]+)",
    ]
    .into_iter()
    .filter_map(|pattern| match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(err) => {
            log::error!("invalid retry-delay pattern {pattern:?}: {err}");
            None
        }
    })
    .collect()
});

/// Extracts the retry delay a provider asked for, first matching pattern wins.
///
/// Fractional seconds are truncated and the result is never shorter than one second.
pub fn parse_retry_delay(error_text: &str) -> Option<Duration> {
    RETRY_DELAY_PATTERNS.iter().find_map(|regex| {
        let raw = regex.captures(error_text)?.get(1)?.as_str();
        let secs: f64 = raw.parse().ok()?;
        if !secs.is_finite() {
            return None;
        }
        Some(Duration::from_secs((secs as u64).max(1)))
    })
}
