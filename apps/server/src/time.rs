//! Clock arithmetic shared by the business-hours table, the availability
//! resolver and booking submission.
//!
//! Everything works in minutes since midnight (`u32`). Customers see 12-hour
//! labels ("9:00 AM"); configuration and time-off rows use 24-hour clock
//! strings ("13:00" or "13:00:00").

use thiserror::Error;

/// Minutes in one day.
pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Duration assumed when a free-text duration label has no usable number.
pub const DEFAULT_DURATION_MINUTES: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeParseError {
    #[error("invalid time \"{0}\", expected something like \"9:00 AM\"")]
    Display(String),
    #[error("invalid clock time \"{0}\", expected HH:MM")]
    Clock(String),
}

/// Parse a 12-hour label ("h:mm AM" / "h:mm PM") into minutes since midnight.
pub fn parse_display_time(display: &str) -> Result<u32, TimeParseError> {
    let invalid = || TimeParseError::Display(display.to_string());

    let (clock, period) = display.trim().split_once(' ').ok_or_else(invalid)?;
    let (hour, minute) = clock.split_once(':').ok_or_else(invalid)?;

    let hour: u32 = parse_digits(hour, 1..=2).ok_or_else(invalid)?;
    let minute: u32 = parse_digits(minute, 2..=2).ok_or_else(invalid)?;
    if !(1..=12).contains(&hour) || minute > 59 {
        return Err(invalid());
    }

    let offset = match period.trim().to_ascii_uppercase().as_str() {
        "AM" => 0,
        "PM" => 12,
        _ => return Err(invalid()),
    };

    Ok(((hour % 12) + offset) * 60 + minute)
}

/// Format minutes since midnight as a 12-hour label. Wraps past midnight.
pub fn minutes_to_display_time(minutes: u32) -> String {
    let minutes = minutes % MINUTES_PER_DAY;
    let hour = minutes / 60;
    let period = if hour >= 12 { "PM" } else { "AM" };
    let hour = match hour % 12 {
        0 => 12,
        h => h,
    };
    format!("{}:{:02} {}", hour, minutes % 60, period)
}

/// Parse a 24-hour clock value ("06:00", "13:30:00") into minutes since midnight.
pub fn parse_clock_time(clock: &str) -> Result<u32, TimeParseError> {
    let invalid = || TimeParseError::Clock(clock.to_string());

    let mut parts = clock.trim().split(':');
    let hour: u32 = parts
        .next()
        .and_then(|h| parse_digits(h, 1..=2))
        .ok_or_else(invalid)?;
    let minute: u32 = parts
        .next()
        .and_then(|m| parse_digits(m, 2..=2))
        .ok_or_else(invalid)?;
    // Postgres-style "HH:MM:SS"; seconds are ignored.
    if let Some(seconds) = parts.next() {
        parse_digits(seconds, 2..=2).ok_or_else(invalid)?;
    }
    if parts.next().is_some() || minute > 59 {
        return Err(invalid());
    }
    // 24:00 is accepted as end of day.
    let total = hour * 60 + minute;
    if total > MINUTES_PER_DAY {
        return Err(invalid());
    }
    Ok(total)
}

/// Half-open interval overlap: `[a, a+da)` and `[b, b+db)` intersect.
///
/// Back-to-back ranges (one ends exactly when the other starts) do not overlap.
pub fn ranges_overlap(start_a: u32, duration_a: u32, start_b: u32, duration_b: u32) -> bool {
    start_a < start_b.saturating_add(duration_b) && start_a.saturating_add(duration_a) > start_b
}

/// Minutes from a free-text duration label such as "90 min" or "1 hr".
///
/// Takes the first run of digits. Labels without one, or with a number that
/// is zero or longer than a day, get [`DEFAULT_DURATION_MINUTES`].
pub fn extract_duration_minutes(label: &str) -> u32 {
    let digits: String = label
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();

    match digits.parse::<u32>() {
        Ok(minutes @ 1..=MINUTES_PER_DAY) => minutes,
        _ => DEFAULT_DURATION_MINUTES,
    }
}

fn parse_digits(s: &str, len: std::ops::RangeInclusive<usize>) -> Option<u32> {
    if !len.contains(&s.len()) || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
