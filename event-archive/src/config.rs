//! Run parameters of the `event-writer` binary

use archive_common::{ArchiveError, Result, TimeRange, WriteMode};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::env;

use crate::streams::StreamKind;

/// End time used when none is given: far enough out to mean "up to now"
pub const OPEN_END: &str = "20991231";

/// Which part of a stream one run ingests
#[derive(Debug, Clone, PartialEq)]
pub enum RunWindow {
    Range(TimeRange),
    FetchNew,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub stream: StreamKind,
    pub window: RunWindow,
    /// Sub-range width; `None` falls back to the archive default
    pub batch_freq: Option<chrono::Duration>,
    pub write_mode: WriteMode,
    /// Touch both tokens of every new pair (pair-creation stream only)
    pub touch_tokens: bool,
    /// Column receiving interpolated block timestamps, if any
    pub timestamp_column: Option<String>,
}

impl RunConfig {
    /// Keys: `stream`, `stime`, `etime`, `fetch_new`, `batch_freq`,
    /// `write_mode`, `touch_tokens`, `timestamp_column`.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let stream: StreamKind = props
            .get("stream")
            .ok_or_else(|| ArchiveError::ConfigError("stream is required".to_string()))?
            .parse()?;

        let fetch_new = props.get("fetch_new").map(|v| parse_flag(v)).unwrap_or(false);
        let window = if fetch_new {
            RunWindow::FetchNew
        } else {
            let stime = props
                .get("stime")
                .ok_or_else(|| ArchiveError::ConfigError("stime is required unless fetch_new is set".to_string()))?;
            let etime = props.get("etime").map(String::as_str).unwrap_or(OPEN_END);
            RunWindow::Range(TimeRange::new(parse_time(stime)?, parse_time(etime)?)?)
        };

        let batch_freq = props.get("batch_freq").map(|v| parse_duration(v)).transpose()?;
        let write_mode = match props.get("write_mode") {
            Some(v) => v.parse()?,
            None => WriteMode::default(),
        };

        Ok(Self {
            stream,
            window,
            batch_freq,
            write_mode,
            touch_tokens: props.get("touch_tokens").map(|v| parse_flag(v)).unwrap_or(false),
            timestamp_column: props.get("timestamp_column").filter(|c| !c.is_empty()).cloned(),
        })
    }

    /// Reads `ARCHIVE_STREAM`, `ARCHIVE_STIME`, `ARCHIVE_ETIME`, and so on.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let props: HashMap<String, String> = env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix(archive_common::config::ENV_PREFIX)
                    .map(|rest| (rest.to_ascii_lowercase(), value))
            })
            .collect();

        Self::from_properties(&props)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// RFC 3339, or a UTC date / date-time such as `20240101`, `2024-01-01`
/// or `2024-01-01 12:00:00`.
pub fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    for format in ["%Y%m%d", "%Y-%m-%d"] {
        if let Some(naive) = NaiveDate::parse_from_str(value, format)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
        {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(ArchiveError::ConfigError(format!("unparseable time: {}", value)))
}

/// Frequencies like `5min`, `30min`, `1h`, `90s`, `1d`.
pub fn parse_duration(value: &str) -> Result<chrono::Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (amount, unit) = value.split_at(split);
    let amount: i64 = amount
        .parse()
        .map_err(|_| ArchiveError::ConfigError(format!("unparseable frequency: {}", value)))?;

    let duration = match unit.trim() {
        "s" | "sec" | "secs" => chrono::Duration::seconds(amount),
        "m" | "min" | "mins" | "T" => chrono::Duration::minutes(amount),
        "h" | "hr" | "hour" | "hours" | "H" => chrono::Duration::hours(amount),
        "d" | "day" | "days" | "D" => chrono::Duration::days(amount),
        other => {
            return Err(ArchiveError::ConfigError(format!(
                "unknown frequency unit '{}' in {}",
                other, value
            )))
        }
    };
    if duration <= chrono::Duration::zero() {
        return Err(ArchiveError::ConfigError(format!("frequency must be positive: {}", value)));
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_parse_time_formats() {
        let midnight = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_time("20240101").unwrap(), midnight);
        assert_eq!(parse_time("2024-01-01").unwrap(), midnight);
        assert_eq!(parse_time("2024-01-01T00:00:00Z").unwrap(), midnight);
        assert_eq!(
            parse_time("2024-01-01 12:30:00").unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap()
        );
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5min").unwrap(), chrono::Duration::minutes(5));
        assert_eq!(parse_duration("1h").unwrap(), chrono::Duration::hours(1));
        assert_eq!(parse_duration("90s").unwrap(), chrono::Duration::seconds(90));
        assert!(parse_duration("0h").is_err());
        assert!(parse_duration("1w").is_err());
        assert!(parse_duration("h").is_err());
    }

    #[test]
    fn test_range_run() {
        let config = RunConfig::from_properties(&props(&[
            ("stream", "weth_deposit"),
            ("stime", "20240101"),
            ("batch_freq", "30min"),
        ]))
        .unwrap();

        assert_eq!(config.stream, StreamKind::WethDeposit);
        assert_eq!(config.batch_freq, Some(chrono::Duration::minutes(30)));
        assert_eq!(config.write_mode, WriteMode::InsertOrUpdate);
        match config.window {
            RunWindow::Range(range) => {
                assert_eq!(range.start, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
                assert_eq!(range.end, Utc.with_ymd_and_hms(2099, 12, 31, 0, 0, 0).unwrap());
            }
            other => panic!("expected a range, got {:?}", other),
        }
    }

    #[test]
    fn test_fetch_new_needs_no_start() {
        let config = RunConfig::from_properties(&props(&[
            ("stream", "uniswap_v2_pair_created"),
            ("fetch_new", "true"),
            ("touch_tokens", "1"),
        ]))
        .unwrap();
        assert_eq!(config.window, RunWindow::FetchNew);
        assert!(config.touch_tokens);
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(RunConfig::from_properties(&props(&[("stime", "20240101")])).is_err());
        assert!(RunConfig::from_properties(&props(&[("stream", "weth_deposit")])).is_err());
        assert!(RunConfig::from_properties(&props(&[
            ("stream", "weth_deposit"),
            ("stime", "20240102"),
            ("etime", "20240101"),
        ]))
        .is_err());
    }
}
