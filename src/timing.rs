//! Stage timing helpers.
//!
//! Stage durations travel through the result envelopes and the audit trail as
//! `H:MM:SS` strings, with a `.ffffff` microsecond suffix when the fraction is
//! non-zero. The quality gate parses them back into seconds.

use chrono::Local;
use std::time::{Duration, Instant};

/// Format a duration as `H:MM:SS(.ffffff)`.
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let micros = duration.subsec_micros();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if micros == 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}:{:02}.{:06}", hours, minutes, seconds, micros)
    }
}

/// Parse an `H:MM:SS(.ffffff)` duration into seconds.
///
/// Returns `None` for anything that is not exactly three numeric parts, or
/// whose hour field overflows.
pub fn parse_duration_seconds(value: &str) -> Option<f64> {
    let parts: Vec<&str> = value.trim().split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: u64 = parts[0].trim().parse().ok()?;
    let minutes: u64 = parts[1].trim().parse().ok()?;
    let seconds: f64 = parts[2].trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    let whole = hours.checked_mul(3600)?.checked_add(minutes.checked_mul(60)?)?;
    Some(whole as f64 + seconds)
}

/// Time-based run identifier, e.g. `20260214_230638`.
pub fn generate_run_id() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Wall-clock stopwatch for a stage.
pub struct StageTimer {
    start: Instant,
}

impl StageTimer {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_formatted(&self) -> String {
        format_duration(self.elapsed())
    }
}

/// Round to two decimals, the precision used in outward-facing results.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_like_a_timedelta() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0:00:00");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1:02:05");
        assert_eq!(format_duration(Duration::from_micros(1_234_567)), "0:00:01.234567");
    }

    #[test]
    fn parses_formatted_durations_back() {
        assert_eq!(parse_duration_seconds("0:00:01.500000"), Some(1.5));
        assert_eq!(parse_duration_seconds("1:02:05"), Some(3725.0));
        let roundtrip = parse_duration_seconds(&format_duration(Duration::from_millis(250))).unwrap();
        assert!((roundtrip - 0.25).abs() < 1e-9);
    }

    #[test]
    fn rejects_malformed_durations() {
        assert_eq!(parse_duration_seconds(""), None);
        assert_eq!(parse_duration_seconds("12.5"), None);
        assert_eq!(parse_duration_seconds("a:b:c"), None);
        assert_eq!(parse_duration_seconds("1 day, 2:00:00"), None);
        assert_eq!(parse_duration_seconds("99999999999999999:00:00"), None);
        assert_eq!(parse_duration_seconds("0:99999999999999999999:00"), None);
    }

    #[test]
    fn rounds_to_two_decimals() {
        assert_eq!(round2(100.0 / 3.0), 33.33);
        assert_eq!(round2(200.0 / 3.0), 66.67);
        assert_eq!(round2(0.0), 0.0);
    }

    #[test]
    fn run_ids_are_timestamp_shaped() {
        let id = generate_run_id();
        assert_eq!(id.len(), 15);
        assert_eq!(&id[8..9], "_");
    }
}
