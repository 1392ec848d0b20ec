/// Coarse relative timestamp for message bubbles.
///
/// Future timestamps (clock skew between client and server) render as
/// "just now" rather than going negative.
pub fn time_ago(now_unix_seconds: u64, sent_at_unix_seconds: u64) -> String {
    let elapsed = now_unix_seconds.saturating_sub(sent_at_unix_seconds);
    if elapsed < 60 {
        return "just now".to_string();
    }
    let minutes = elapsed / 60;
    if minutes < 60 {
        return format!("{minutes}m ago");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h ago");
    }
    let days = hours / 24;
    format!("{days}d ago")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_switch_at_exact_boundaries() {
        assert_eq!(time_ago(1_000, 1_000), "just now");
        assert_eq!(time_ago(1_059, 1_000), "just now");
        assert_eq!(time_ago(1_060, 1_000), "1m ago");
        assert_eq!(time_ago(4_599, 1_000), "59m ago");
        assert_eq!(time_ago(4_600, 1_000), "1h ago");
        assert_eq!(time_ago(87_399, 1_000), "23h ago");
        assert_eq!(time_ago(87_400, 1_000), "1d ago");
        assert_eq!(time_ago(1_000 + 86_400 * 9, 1_000), "9d ago");
    }

    #[test]
    fn future_timestamps_degrade_to_just_now() {
        assert_eq!(time_ago(1_000, 2_000), "just now");
    }
}
