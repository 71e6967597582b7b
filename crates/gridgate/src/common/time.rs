use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serializer;

/// Request timestamps are milliseconds since the Unix epoch.
pub type EpochMillis = u64;

pub fn millis_to_datetime(millis: EpochMillis) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis as i64).unwrap_or_default()
}

/// Time elapsed between `since` and `now`, zero if `since` lies in the future.
pub fn elapsed_between(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

pub fn serialize_duration_millis<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

pub fn serialize_duration_millis_opt<S: Serializer>(
    duration: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match duration {
        Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
        None => serializer.serialize_none(),
    }
}

/// Format a duration as a Grid Engine time string, e.g. 01:05:02
pub fn format_hms_duration(duration: &Duration) -> String {
    let mut seconds = duration.as_secs();
    let hours = seconds / 3600;
    seconds %= 3600;
    let minutes = seconds / 60;
    seconds %= 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// Parses dates printed by `qacct` and `qstat -j`, e.g. `Thu Jan  2 10:00:00 2020`.
pub fn parse_accounting_datetime(datetime: &str) -> anyhow::Result<NaiveDateTime> {
    let normalized = datetime.split_whitespace().collect::<Vec<_>>().join(" ");
    Ok(NaiveDateTime::parse_from_str(
        &normalized,
        "%a %b %d %H:%M:%S %Y",
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_hms_duration(&Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_hms_duration(&Duration::from_secs(61)), "00:01:01");
        assert_eq!(format_hms_duration(&Duration::from_secs(3661)), "01:01:01");
    }

    #[test]
    fn test_parse_accounting_datetime_padded_day() {
        let date = parse_accounting_datetime("Thu Jan  2 10:00:00 2020").unwrap();
        assert_eq!(
            date.format("%d.%m.%Y %H:%M:%S").to_string(),
            "02.01.2020 10:00:00"
        );
    }

    #[test]
    fn test_elapsed_never_negative() {
        let earlier = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 30).unwrap();
        assert_eq!(elapsed_between(earlier, later), Duration::from_secs(30));
        assert_eq!(elapsed_between(later, earlier), Duration::ZERO);
    }

    #[test]
    fn test_millis_roundtrip() {
        let date = millis_to_datetime(1_000);
        assert_eq!(date.timestamp_millis(), 1_000);
    }
}
