//! Free-text time estimates ("1h 30m", "2 hours", "45") to whole minutes.

use std::sync::OnceLock;

use regex::Regex;

/// Used whenever an estimate can't be read.
pub const DEFAULT_ESTIMATE_MINUTES: u32 = 30;

fn component_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+(?:\.\d+)?)\s*([a-z]+)").expect("duration pattern is valid")
    })
}

fn unit_minutes(unit: &str) -> Option<f64> {
    match unit {
        "h" | "hr" | "hrs" | "hour" | "hours" => Some(60.0),
        "m" | "min" | "mins" | "minute" | "minutes" => Some(1.0),
        _ => None,
    }
}

/// Parses an estimate into minutes. A bare integer is minutes; otherwise
/// every `<number><unit>` pair with an hour or minute unit is summed.
/// Anything unreadable, or a zero total, yields [`DEFAULT_ESTIMATE_MINUTES`].
pub fn parse_estimate(input: &str) -> u32 {
    let text = input.trim().to_ascii_lowercase();

    if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
        return match text.parse::<u32>() {
            Ok(minutes) if minutes > 0 => minutes,
            _ => DEFAULT_ESTIMATE_MINUTES,
        };
    }

    let total: f64 = component_regex()
        .captures_iter(&text)
        .filter_map(|caps| {
            let amount: f64 = caps[1].parse().ok()?;
            Some(amount * unit_minutes(&caps[2])?)
        })
        .sum();

    let minutes = total.round();
    if minutes >= 1.0 && minutes <= f64::from(u32::MAX) {
        minutes as u32
    } else {
        DEFAULT_ESTIMATE_MINUTES
    }
}
