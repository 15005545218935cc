//! Countdown badge formatting.

/// Render the remaining delay as short badge text.
///
/// Zero clears the badge; under a minute the seconds are shown bare, under
/// an hour as `m:ss`, and anything longer collapses to whole hours
/// (rounded up).
pub fn badge_text(remaining_ms: u64) -> String {
    let seconds = remaining_ms / 1000;
    if seconds == 0 {
        return String::new();
    }
    if seconds < 60 {
        return format!("{seconds} s");
    }
    if seconds < 3600 {
        let remainder = seconds % 60;
        let minutes = seconds / 60;
        format!("{minutes}:{remainder:02}")
    } else {
        format!("{}h", seconds.div_ceil(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::badge_text;

    #[test]
    fn zero_clears_the_badge() {
        assert_eq!(badge_text(0), "");
    }

    #[test]
    fn under_a_minute_shows_bare_seconds() {
        assert_eq!(badge_text(1_000), "1 s");
        assert_eq!(badge_text(45_000), "45 s");
        assert_eq!(badge_text(59_000), "59 s");
    }

    #[test]
    fn under_an_hour_shows_minutes_and_padded_seconds() {
        assert_eq!(badge_text(60_000), "1:00");
        assert_eq!(badge_text(125_000), "2:05");
        assert_eq!(badge_text(3_599_000), "59:59");
    }

    #[test]
    fn an_hour_and_up_rounds_up_to_whole_hours() {
        assert_eq!(badge_text(3_600_000), "1h");
        assert_eq!(badge_text(3_700_000), "2h");
        assert_eq!(badge_text(7_200_000), "2h");
    }
}
