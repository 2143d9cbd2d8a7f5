//! Time string codec.
//!
//! Readings arrive as `H:MM:SS`, `H:MM` (seconds assumed zero) or the legacy
//! `N day(s), H:MM:SS` form. Output always uses the canonical duration form:
//! total hours, two-digit minutes and seconds, no day prefix, no fraction.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::rollover::DayLabels;
use crate::table::{Table, TimesTable};
use crate::SplitsError;

pub const SECONDS_PER_DAY: i64 = 24 * 3600;

/// Largest magnitude a parsed value may take. Keeps the sums and differences
/// taken downstream well inside `i64`.
const MAX_CLOCK_SECONDS: i64 = i32::MAX as i64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("empty time string")]
    Empty,
    #[error("malformed time '{0}'")]
    Malformed(String),
    #[error("value out of range in '{0}'")]
    OutOfRange(String),
}

/// Parse a duration or time-of-day string into whole seconds.
pub fn parse_clock(input: &str) -> Result<i64, ClockError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ClockError::Empty);
    }

    if let Some((day_part, clock)) = trimmed.split_once(',') {
        let days = parse_day_count(day_part.trim())
            .ok_or_else(|| ClockError::Malformed(trimmed.to_string()))?;
        let seconds = parse_hms(clock.trim(), trimmed)?;
        return days
            .checked_mul(SECONDS_PER_DAY)
            .and_then(|d| d.checked_add(seconds))
            .filter(|total| total.abs() <= MAX_CLOCK_SECONDS)
            .ok_or_else(|| ClockError::OutOfRange(trimmed.to_string()));
    }

    match trimmed.strip_prefix('-') {
        Some(rest) => Ok(-parse_hms(rest.trim_start(), trimmed)?),
        None => parse_hms(trimmed, trimmed),
    }
}

fn parse_day_count(token: &str) -> Option<i64> {
    let (count, unit) = token.split_once(char::is_whitespace)?;
    match unit.trim() {
        "day" | "days" => count.parse().ok(),
        _ => None,
    }
}

fn parse_hms(clock: &str, whole: &str) -> Result<i64, ClockError> {
    let fields: Vec<&str> = clock.split(':').collect();
    let (h, m, s) = match fields.as_slice() {
        [h, m] => (*h, *m, "0"),
        [h, m, s] => (*h, *m, *s),
        _ => return Err(ClockError::Malformed(whole.to_string())),
    };
    let field = |token: &str| -> Result<i64, ClockError> {
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ClockError::Malformed(whole.to_string()));
        }
        token
            .parse::<i64>()
            .map_err(|_| ClockError::Malformed(whole.to_string()))
    };
    let hours = field(h)?;
    let minutes = field(m)?;
    let seconds = field(s)?;
    if minutes >= 60 || seconds >= 60 {
        return Err(ClockError::OutOfRange(whole.to_string()));
    }
    hours
        .checked_mul(3600)
        .and_then(|h| h.checked_add(minutes * 60 + seconds))
        .filter(|&total| total <= MAX_CLOCK_SECONDS)
        .ok_or_else(|| ClockError::OutOfRange(whole.to_string()))
}

/// Canonical duration string (`0:04:28`, `63:45:20`, `-0:00:10`).
pub fn format_duration(seconds: i64) -> String {
    let sign = if seconds < 0 { "-" } else { "" };
    let total = seconds.unsigned_abs();
    format!(
        "{}{}:{:02}:{:02}",
        sign,
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Wall-clock reading modulo one day (`01:36:00`).
pub fn format_time_of_day(seconds: i64) -> String {
    let of_day = seconds.rem_euclid(SECONDS_PER_DAY);
    format!(
        "{:02}:{:02}:{:02}",
        of_day / 3600,
        (of_day % 3600) / 60,
        of_day % 60
    )
}

/// Codec bound to a race's resolved start offset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeCodec {
    offset_s: i64,
}

impl TimeCodec {
    pub fn new(offset_s: i64) -> Self {
        Self { offset_s }
    }

    pub fn offset_s(&self) -> i64 {
        self.offset_s
    }

    /// Parse `input`; with `subtract_offset` the result is elapsed race time.
    pub fn parse(&self, input: &str, subtract_offset: bool) -> Result<i64, ClockError> {
        let seconds = parse_clock(input)?;
        if subtract_offset {
            Ok(seconds - self.offset_s)
        } else {
            Ok(seconds)
        }
    }

    pub fn format(&self, seconds: i64) -> String {
        format_duration(seconds)
    }
}

/// Official race start, as seconds since midnight or a clock string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "JsonValue", into = "JsonValue")]
pub enum Offset {
    Seconds(i64),
    Clock(String),
}

impl Default for Offset {
    fn default() -> Self {
        Offset::Seconds(0)
    }
}

impl Offset {
    pub fn resolve(&self) -> Result<i64, SplitsError> {
        let seconds = match self {
            Offset::Seconds(s) => *s,
            Offset::Clock(text) => parse_clock(text)
                .map_err(|e| SplitsError::InvalidOffset(format!("'{}': {}", text, e)))?,
        };
        if seconds < 0 {
            return Err(SplitsError::InvalidOffset(format!(
                "offset must not be negative, got {}",
                seconds
            )));
        }
        Ok(seconds)
    }

    pub fn codec(&self) -> Result<TimeCodec, SplitsError> {
        self.resolve().map(TimeCodec::new)
    }
}

impl TryFrom<JsonValue> for Offset {
    type Error = SplitsError;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        match value {
            JsonValue::Number(n) => n.as_i64().map(Offset::Seconds).ok_or_else(|| {
                SplitsError::InvalidOffset(format!("expected integer seconds, got {}", n))
            }),
            JsonValue::String(s) => Ok(Offset::Clock(s)),
            other => Err(SplitsError::InvalidOffset(format!(
                "expected integer seconds or a time string, got {}",
                other
            ))),
        }
    }
}

impl From<Offset> for JsonValue {
    fn from(offset: Offset) -> Self {
        match offset {
            Offset::Seconds(s) => JsonValue::from(s),
            Offset::Clock(text) => JsonValue::String(text),
        }
    }
}

/// Parse every cell of the raw table into wall-clock seconds (no offset).
pub fn parse_times(times: &TimesTable, labels: Option<&DayLabels>) -> Result<Table, SplitsError> {
    let columns = times.columns();
    let runners = times.runners();
    let mut values = ndarray::Array2::from_elem((runners.len(), columns.len()), None);
    for ((row, col), cell) in times.cells().indexed_iter() {
        let Some(raw) = cell.as_deref() else {
            continue;
        };
        let parsed = match labels {
            Some(labels) => labels.decode(raw),
            None => parse_clock(raw).map(Some),
        };
        values[[row, col]] = parsed.map_err(|source| SplitsError::Parse {
            runner: runners[row].clone(),
            checkpoint: columns[col].clone(),
            source,
        })?;
    }
    Ok(Table::new(columns.to_vec(), runners.to_vec(), values))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clock_forms() {
        assert_eq!(parse_clock("1:30:00"), Ok(5400));
        assert_eq!(parse_clock("00:51:13"), Ok(3073));
        assert_eq!(parse_clock("25:36:00"), Ok(92_160));
        assert_eq!(parse_clock("1:00"), Ok(3600));
        assert_eq!(parse_clock(" 2:00 "), Ok(7200));
        assert_eq!(parse_clock("1 day, 2:00:00"), Ok(93_600));
        assert_eq!(parse_clock("2 days, 15:45:20"), Ok(2 * 86_400 + 56_720));
        assert_eq!(parse_clock("-0:00:10"), Ok(-10));
    }

    #[test]
    fn test_parse_clock_rejects_garbage() {
        assert_eq!(parse_clock(""), Err(ClockError::Empty));
        assert!(matches!(
            parse_clock("invalid time"),
            Err(ClockError::Malformed(_))
        ));
        assert!(matches!(parse_clock("1:2:3:4"), Err(ClockError::Malformed(_))));
        assert!(matches!(parse_clock("1:+2:03"), Err(ClockError::Malformed(_))));
        assert!(matches!(parse_clock("1:75:00"), Err(ClockError::OutOfRange(_))));
        assert!(matches!(
            parse_clock("3 weeks, 1:00:00"),
            Err(ClockError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_clock_huge_values_out_of_range() {
        for input in [
            "9999999999999999:00:00",
            "-9999999999999999:00:00",
            "9999999999999999 days, 1:00:00",
            "-9999999999999999 days, 1:00:00",
            "600000:00:00",
        ] {
            assert!(
                matches!(parse_clock(input), Err(ClockError::OutOfRange(_))),
                "{}",
                input
            );
        }
        assert_eq!(parse_clock("500000:00:00"), Ok(1_800_000_000));
    }

    #[test]
    fn test_two_field_form_is_minutes_not_seconds() {
        // "H:MM" must read as H:MM:00
        assert_eq!(parse_clock("4:00"), parse_clock("4:00:00"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(3600), "1:00:00");
        assert_eq!(format_duration(9920), "2:45:20");
        assert_eq!(format_duration(268), "0:04:28");
        assert_eq!(format_duration(2 * 86_400 + 56_720), "63:45:20");
        assert_eq!(format_duration(-10), "-0:00:10");
    }

    #[test]
    fn test_format_parse_is_canonical() {
        for (input, canonical) in [
            ("00:51:13", "0:51:13"),
            ("1:00", "1:00:00"),
            ("1 day, 2:00:00", "26:00:00"),
            ("63:45:20", "63:45:20"),
            ("0:04:28", "0:04:28"),
        ] {
            assert_eq!(format_duration(parse_clock(input).unwrap()), canonical);
        }
    }

    #[test]
    fn test_format_time_of_day() {
        assert_eq!(format_time_of_day(92_160), "01:36:00");
        assert_eq!(format_time_of_day(3073), "00:51:13");
    }

    #[test]
    fn test_codec_offset_subtraction() {
        let codec = TimeCodec::new(3);
        assert_eq!(codec.parse("1:30:00", true), Ok(5397));
        assert_eq!(codec.parse("1:30:00", false), Ok(5400));
        assert_eq!(codec.format(5397), "1:29:57");
    }

    #[test]
    fn test_offset_resolve() {
        assert_eq!(Offset::Seconds(3600).resolve().unwrap(), 3600);
        assert_eq!(Offset::Clock("01:00:00".into()).resolve().unwrap(), 3600);
        assert!(matches!(
            Offset::Clock("invalid time".into()).resolve(),
            Err(SplitsError::InvalidOffset(_))
        ));
        assert!(matches!(
            Offset::Seconds(-1).resolve(),
            Err(SplitsError::InvalidOffset(_))
        ));
    }

    #[test]
    fn test_offset_from_json() {
        assert_eq!(
            Offset::try_from(serde_json::json!(3)).unwrap(),
            Offset::Seconds(3)
        );
        assert_eq!(
            Offset::try_from(serde_json::json!("00:00:03")).unwrap(),
            Offset::Clock("00:00:03".into())
        );
        for bad in [
            serde_json::json!(true),
            serde_json::json!(1.5),
            serde_json::json!(null),
        ] {
            assert!(matches!(
                Offset::try_from(bad),
                Err(SplitsError::InvalidOffset(_))
            ));
        }
    }

    #[test]
    fn test_parse_times_names_cell() {
        let times = TimesTable::from_rows(
            vec!["A".into(), "B".into()],
            vec![("7".to_string(), vec![Some("0:10:00".into()), Some("x".into())])],
        )
        .unwrap();
        match parse_times(&times, None) {
            Err(SplitsError::Parse {
                runner, checkpoint, ..
            }) => {
                assert_eq!(runner, "7");
                assert_eq!(checkpoint, "B");
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
