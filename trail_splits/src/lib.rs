//! Checkpoint timing reconstruction and pace analytics for trail races.
//!
//! A [`RaceAnalysis`] is built once from a [`Course`] and a raw [`TimesTable`].
//! Construction runs a fixed pipeline of pure stages:
//!
//! 1. parse cells (optionally decoding weekday-labelled readings),
//! 2. drop non-finishers and fill interior gaps ([`clean`]),
//! 3. repair midnight rollover ([`rollover`]),
//! 4. normalize wave starts ([`wave`]) and rank runners by finish time,
//! 5. derive segment deltas ([`segments`]) and paces ([`pace`]).
//!
//! Field statistics ([`stats`]) and objective queries ([`objective`]) are
//! answered from the stored tables.

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod clean;
pub mod engine;
pub mod objective;
pub mod pace;
pub mod rollover;
pub mod segments;
pub mod stats;
pub mod table;
pub mod timecode;
pub mod wave;

pub use engine::RaceAnalysis;
pub use pace::PaceKind;
pub use rollover::{DayLabels, MAX_DAY_WRAPS};
pub use segments::Segment;
pub use table::{
    ChartSeries, Checkpoint, Course, DurationStyle, FormattedRow, FormattedTable, Table,
    TimesTable,
};
pub use timecode::{
    format_duration, format_time_of_day, parse_clock, ClockError, Offset, TimeCodec,
    SECONDS_PER_DAY,
};

#[derive(Error, Debug)]
pub enum SplitsError {
    #[error("malformed time for runner {runner} at {checkpoint}: {source}")]
    Parse {
        runner: String,
        checkpoint: String,
        #[source]
        source: ClockError,
    },
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error("invalid offset: {0}")]
    InvalidOffset(String),
    #[error("no finishers to analyse")]
    EmptyResultSet,
    #[error("undefined pace for runner {runner} at {checkpoint}")]
    UndefinedPace { runner: String, checkpoint: String },
    #[error("runner {runner} wraps past midnight more than {max_wraps} times at {checkpoint}")]
    Rollover {
        runner: String,
        checkpoint: String,
        max_wraps: u32,
    },
    #[error("invalid schema: {0}")]
    Schema(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("objective row {index} out of range ({rows} finishers)")]
    ObjectiveOutOfRange { index: usize, rows: usize },
}

/// How missing readings are filled for retained runners.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FillPolicy {
    /// Carry the previous reading forward.
    Previous,
    /// Carry the next reading backward.
    Next,
    /// Mean of the surrounding readings.
    Mean,
}

impl Default for FillPolicy {
    fn default() -> Self {
        FillPolicy::Previous
    }
}

/// Pre-pass for sources that prefix readings with a weekday label.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DayCleaning {
    Off,
    WeekdayLabels {
        /// Seven labels, Monday first.
        #[serde(default = "default_weekday_labels")]
        labels: Vec<String>,
    },
}

impl Default for DayCleaning {
    fn default() -> Self {
        DayCleaning::Off
    }
}

/// Weekday abbreviations used by French timing sites, Monday first.
pub fn default_weekday_labels() -> Vec<String> {
    ["Lu.", "Ma.", "Me.", "Je.", "Ve.", "Sa.", "Di."]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    pub offset: Offset,
    pub waves: bool,
    /// 1 = Monday .. 7 = Sunday.
    pub start_weekday: u8,
    pub day_cleaning: DayCleaning,
    pub fill: FillPolicy,
    pub stats_n1: usize,
    pub stats_n2: usize,
    pub peer_window: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            offset: Offset::Seconds(0),
            waves: false,
            start_weekday: 7,
            day_cleaning: DayCleaning::Off,
            fill: FillPolicy::Previous,
            stats_n1: 4,
            stats_n2: 20,
            peer_window: 5,
        }
    }
}

impl Params {
    pub fn weekday(&self) -> Result<Weekday, SplitsError> {
        if !(1..=7).contains(&self.start_weekday) {
            return Err(SplitsError::InvalidParameter(format!(
                "start weekday must be between 1 and 7, got {}",
                self.start_weekday
            )));
        }
        Weekday::try_from(self.start_weekday - 1)
            .map_err(|e| SplitsError::InvalidParameter(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), SplitsError> {
        self.weekday()?;
        if self.stats_n1 == 0 || self.stats_n2 == 0 {
            return Err(SplitsError::InvalidParameter(
                "stats windows must be at least 1".into(),
            ));
        }
        if self.peer_window == 0 {
            return Err(SplitsError::InvalidParameter(
                "peer window must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Day-label decoder for this race, if the pre-pass is enabled.
    pub fn day_labels(&self) -> Result<Option<DayLabels>, SplitsError> {
        match &self.day_cleaning {
            DayCleaning::Off => Ok(None),
            DayCleaning::WeekdayLabels { labels } => {
                DayLabels::new(labels, self.weekday()?).map(Some)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = Params::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.weekday().unwrap(), Weekday::Sun);
        assert_eq!(params.fill, FillPolicy::Previous);
        assert_eq!((params.stats_n1, params.stats_n2), (4, 20));
    }

    #[test]
    fn test_weekday_out_of_range() {
        let params = Params {
            start_weekday: 0,
            ..Params::default()
        };
        assert!(matches!(
            params.weekday(),
            Err(SplitsError::InvalidParameter(_))
        ));
        let params = Params {
            start_weekday: 8,
            ..Params::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_params_from_json() {
        let params: Params = serde_json::from_str(
            r#"{
                "offset": "00:00:03",
                "waves": true,
                "start_weekday": 6,
                "day_cleaning": {"mode": "weekday_labels"},
                "fill": "mean"
            }"#,
        )
        .unwrap();
        assert_eq!(params.offset, Offset::Clock("00:00:03".into()));
        assert!(params.waves);
        assert_eq!(params.weekday().unwrap(), Weekday::Sat);
        assert_eq!(params.fill, FillPolicy::Mean);
        assert_eq!(
            params.day_cleaning,
            DayCleaning::WeekdayLabels {
                labels: default_weekday_labels()
            }
        );
        assert_eq!(params.peer_window, 5);
    }

    #[test]
    fn test_params_reject_boolean_offset() {
        let err = serde_json::from_str::<Params>(r#"{"offset": true}"#).unwrap_err();
        assert!(err.to_string().contains("invalid offset"));
    }

    #[test]
    fn test_zero_windows_rejected() {
        let params = Params {
            stats_n1: 0,
            ..Params::default()
        };
        assert!(params.validate().is_err());
        let params = Params {
            peer_window: 0,
            ..Params::default()
        };
        assert!(params.validate().is_err());
    }
}
