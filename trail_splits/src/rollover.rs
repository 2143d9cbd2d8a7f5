//! Midnight rollover repair.
//!
//! Timing sites usually publish passage times as a bare time of day. A runner
//! on course overnight therefore shows readings that jump backwards; each such
//! reading is moved forward by whole days until the sequence is monotonic.

use chrono::Weekday;

use crate::table::Table;
use crate::timecode::{parse_clock, ClockError, SECONDS_PER_DAY};
use crate::SplitsError;

/// Upper bound on day wraps applied to a single reading.
pub const MAX_DAY_WRAPS: u32 = 3;

/// Correct every row; corrected rows are non-decreasing.
pub fn correct_rollover(table: &Table) -> Result<Table, SplitsError> {
    let mut values = table.values().clone();
    for (row, mut readings) in values.rows_mut().into_iter().enumerate() {
        let corrected = correct_sequence(&readings.to_vec()).map_err(|col| {
            SplitsError::Rollover {
                runner: table.index()[row].clone(),
                checkpoint: table.columns()[col].clone(),
                max_wraps: MAX_DAY_WRAPS,
            }
        })?;
        for (cell, value) in readings.iter_mut().zip(corrected) {
            *cell = value;
        }
    }
    Ok(Table::new(
        table.columns().to_vec(),
        table.index().to_vec(),
        values,
    ))
}

/// Returns the offending column when a reading needs more than
/// [`MAX_DAY_WRAPS`] wraps.
pub fn correct_sequence(readings: &[Option<i64>]) -> Result<Vec<Option<i64>>, usize> {
    let mut previous: Option<i64> = None;
    let mut out = Vec::with_capacity(readings.len());
    for (col, reading) in readings.iter().enumerate() {
        let Some(mut value) = *reading else {
            out.push(None);
            continue;
        };
        if let Some(prev) = previous {
            let mut wraps = 0;
            while value < prev {
                if wraps == MAX_DAY_WRAPS {
                    return Err(col);
                }
                value += SECONDS_PER_DAY;
                wraps += 1;
            }
        }
        previous = Some(value);
        out.push(Some(value));
    }
    Ok(out)
}

/// Decoder for readings prefixed with a weekday label, e.g. `Sa. 01:36`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DayLabels {
    /// Index is the day offset from the race start.
    by_offset: Vec<String>,
}

impl DayLabels {
    /// `labels` are Monday first; they are rotated so `start` is day 0.
    pub fn new(labels: &[String], start: Weekday) -> Result<Self, SplitsError> {
        if labels.len() != 7 {
            return Err(SplitsError::InvalidParameter(format!(
                "expected 7 weekday labels, got {}",
                labels.len()
            )));
        }
        if labels.iter().any(|l| l.trim().is_empty()) {
            return Err(SplitsError::InvalidParameter(
                "weekday labels must not be empty".into(),
            ));
        }
        let mut by_offset = Vec::with_capacity(7);
        let mut day = start;
        for _ in 0..7 {
            by_offset.push(labels[day.num_days_from_monday() as usize].trim().to_string());
            day = day.succ();
        }
        Ok(Self { by_offset })
    }

    /// Decode one cell: first line only, `.` is missing, a leading label adds
    /// its day offset.
    pub fn decode(&self, raw: &str) -> Result<Option<i64>, ClockError> {
        let line = raw.lines().next().unwrap_or("").trim();
        if line.is_empty() || line == "." {
            return Ok(None);
        }
        for (offset, label) in self.by_offset.iter().enumerate() {
            if let Some(rest) = line.strip_prefix(label.as_str()) {
                let seconds = parse_clock(rest.trim())?;
                return Ok(Some(offset as i64 * SECONDS_PER_DAY + seconds));
            }
        }
        parse_clock(line).map(Some)
    }
}
