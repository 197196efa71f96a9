//! Human-readable sizes and relative timestamps.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

const KB: f64 = 1024.0;
const MB: f64 = KB * 1024.0;
const GB: f64 = MB * 1024.0;

/// Formats a byte count as `B`, `KB`, `MB` or `GB`. Values under 100 of a
/// unit keep two decimals, larger ones are truncated to an integer.
pub fn calculate_file_size(size_bytes: i64) -> String {
    if size_bytes < 0 {
        return "0 B".to_string();
    }
    let bytes = size_bytes as f64;
    if bytes < KB {
        return format!("{size_bytes} B");
    }

    let (value, unit) = if bytes < MB {
        (bytes / KB, "KB")
    } else if bytes < GB {
        (bytes / MB, "MB")
    } else {
        (bytes / GB, "GB")
    };

    if value < 100.0 {
        format!("{value:.2} {unit}")
    } else {
        format!("{} {unit}", value.trunc() as i64)
    }
}

/// Formats seconds as `HH:MM:SS`; hours grow past 24 instead of wrapping.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3_600,
        (seconds % 3_600) / 60,
        seconds % 60
    )
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("{count} {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}

/// Relative "time ago" text. Anything a year or older is rendered as an
/// absolute timestamp in `timezone` (unknown zones fall back to UTC).
pub fn calculate_time_ago(created_at: DateTime<Utc>, timezone: &str) -> String {
    calculate_time_ago_at(created_at, Utc::now(), timezone)
}

pub(crate) fn calculate_time_ago_at(
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    timezone: &str,
) -> String {
    let elapsed = (now - created_at).max(chrono::Duration::zero());
    let seconds = elapsed.num_seconds();
    let days = elapsed.num_days();

    if seconds < 60 {
        format!("{seconds} seconds ago")
    } else if seconds < 3_600 {
        plural(seconds / 60, "minute")
    } else if seconds < 86_400 {
        plural(seconds / 3_600, "hour")
    } else if days < 30 {
        plural(days, "day")
    } else if days < 365 {
        plural(days / 30, "month")
    } else {
        let zone: Tz = timezone.parse().unwrap_or(Tz::UTC);
        created_at
            .with_timezone(&zone)
            .format("%d %b %Y %H:%M")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn file_sizes() {
        assert_eq!(calculate_file_size(-5), "0 B");
        assert_eq!(calculate_file_size(512), "512 B");
        assert_eq!(calculate_file_size(1536), "1.50 KB");
        assert_eq!(calculate_file_size(150 * 1024), "150 KB");
        assert_eq!(calculate_file_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(calculate_file_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(0), "00:00:00");
        assert_eq!(format_duration(-3), "00:00:00");
        assert_eq!(format_duration(3_723), "01:02:03");
        assert_eq!(format_duration(90_000), "25:00:00");
    }

    #[test]
    fn relative_times() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let ago = |d: Duration| calculate_time_ago_at(now - d, now, "UTC");

        assert_eq!(ago(Duration::seconds(5)), "5 seconds ago");
        assert_eq!(ago(Duration::minutes(1)), "1 minute ago");
        assert_eq!(ago(Duration::minutes(45)), "45 minutes ago");
        assert_eq!(ago(Duration::hours(2)), "2 hours ago");
        assert_eq!(ago(Duration::days(1)), "1 day ago");
        assert_eq!(ago(Duration::days(65)), "2 months ago");
    }

    #[test]
    fn future_timestamps_clamp_to_zero() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(
            calculate_time_ago_at(now + Duration::minutes(3), now, "UTC"),
            "0 seconds ago"
        );
    }

    #[test]
    fn old_timestamps_render_in_viewer_zone() {
        let created = Utc.with_ymd_and_hms(2023, 3, 10, 8, 30, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

        assert_eq!(
            calculate_time_ago_at(created, now, "Asia/Tokyo"),
            "10 Mar 2023 17:30"
        );
        assert_eq!(
            calculate_time_ago_at(created, now, "Not/AZone"),
            "10 Mar 2023 08:30"
        );
    }
}
