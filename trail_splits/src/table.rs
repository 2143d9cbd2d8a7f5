//! Course schema and the runner × checkpoint tables that flow through the
//! pipeline.

use std::collections::HashSet;

use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::timecode::{format_duration, format_time_of_day};
use crate::SplitsError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub code: String,
    #[serde(default)]
    pub name: String,
    /// Cumulative distance from the start, km.
    pub distance_km: f64,
    /// Cumulative elevation gain, m.
    pub gain_m: i64,
    /// Cumulative elevation loss, m, signed as recorded by the source.
    pub loss_m: i64,
}

impl Checkpoint {
    pub fn new(code: &str, distance_km: f64, gain_m: i64, loss_m: i64) -> Self {
        Self {
            code: code.to_string(),
            name: code.to_string(),
            distance_km,
            gain_m,
            loss_m,
        }
    }
}

/// Ordered checkpoint list, validated once.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "Vec<Checkpoint>", into = "Vec<Checkpoint>")]
pub struct Course {
    checkpoints: Vec<Checkpoint>,
}

impl Course {
    pub fn new(checkpoints: Vec<Checkpoint>) -> Result<Self, SplitsError> {
        if checkpoints.is_empty() {
            return Err(SplitsError::Schema("course has no checkpoints".into()));
        }
        let mut seen = HashSet::new();
        for cp in &checkpoints {
            if cp.code.trim().is_empty() {
                return Err(SplitsError::Schema("checkpoint with empty code".into()));
            }
            if !seen.insert(cp.code.as_str()) {
                return Err(SplitsError::Schema(format!(
                    "duplicate checkpoint code '{}'",
                    cp.code
                )));
            }
            if !cp.distance_km.is_finite() {
                return Err(SplitsError::Schema(format!(
                    "checkpoint '{}' has non-finite distance",
                    cp.code
                )));
            }
        }
        Ok(Self { checkpoints })
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn codes(&self) -> Vec<String> {
        self.checkpoints.iter().map(|cp| cp.code.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    /// True when the first checkpoint is the start line itself.
    pub fn starts_at_line(&self) -> bool {
        self.checkpoints[0].distance_km == 0.0
    }
}

impl TryFrom<Vec<Checkpoint>> for Course {
    type Error = SplitsError;

    fn try_from(checkpoints: Vec<Checkpoint>) -> Result<Self, Self::Error> {
        Course::new(checkpoints)
    }
}

impl From<Course> for Vec<Checkpoint> {
    fn from(course: Course) -> Self {
        course.checkpoints
    }
}

/// Raw readings as delivered by the loader; blank cells are stored as `None`.
#[derive(Clone, Debug, PartialEq)]
pub struct TimesTable {
    columns: Vec<String>,
    runners: Vec<String>,
    cells: Array2<Option<String>>,
}

impl TimesTable {
    pub fn from_rows<I>(columns: Vec<String>, rows: I) -> Result<Self, SplitsError>
    where
        I: IntoIterator<Item = (String, Vec<Option<String>>)>,
    {
        let width = columns.len();
        let mut runners = Vec::new();
        let mut flat = Vec::new();
        for (runner, cells) in rows {
            if cells.len() != width {
                return Err(SplitsError::Schema(format!(
                    "runner {} has {} readings, expected {}",
                    runner,
                    cells.len(),
                    width
                )));
            }
            flat.extend(cells.into_iter().map(|cell| match cell {
                Some(text) if text.trim().is_empty() => None,
                other => other,
            }));
            runners.push(runner);
        }
        let cells = Array2::from_shape_vec((runners.len(), width), flat)
            .map_err(|e| SplitsError::Schema(e.to_string()))?;
        Ok(Self {
            columns,
            runners,
            cells,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn runners(&self) -> &[String] {
        &self.runners
    }

    pub fn cells(&self) -> &Array2<Option<String>> {
        &self.cells
    }

    pub fn nrows(&self) -> usize {
        self.runners.len()
    }

    /// Columns must match the course codes one-to-one and in order.
    pub fn check_schema(&self, course: &Course) -> Result<(), SplitsError> {
        let codes = course.codes();
        if self.columns != codes {
            return Err(SplitsError::Schema(format!(
                "times columns [{}] do not match checkpoints [{}]",
                self.columns.join(", "),
                codes.join(", ")
            )));
        }
        Ok(())
    }
}

/// Rendering of time values in formatted tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DurationStyle {
    /// Canonical `H:MM:SS` duration.
    Elapsed,
    /// Passage clock `HH:MM:SS`, modulo one day.
    TimeOfDay,
}

impl Default for DurationStyle {
    fn default() -> Self {
        DurationStyle::Elapsed
    }
}

impl DurationStyle {
    pub fn format(self, seconds: i64) -> String {
        match self {
            DurationStyle::Elapsed => format_duration(seconds),
            DurationStyle::TimeOfDay => format_time_of_day(seconds),
        }
    }
}

/// Derived table of whole seconds (times, deltas, or seconds per km for
/// paces). `None` marks an undefined value.
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    index: Vec<String>,
    values: Array2<Option<i64>>,
}

impl Table {
    pub fn new(columns: Vec<String>, index: Vec<String>, values: Array2<Option<i64>>) -> Self {
        debug_assert_eq!(values.dim(), (index.len(), columns.len()));
        Self {
            columns,
            index,
            values,
        }
    }

    /// Single labelled row over the given columns.
    pub fn from_row(columns: &[String], label: &str, row: Vec<Option<i64>>) -> Self {
        Self::from_rows(columns, vec![(label.to_string(), row)])
    }

    pub fn from_rows(columns: &[String], rows: Vec<(String, Vec<Option<i64>>)>) -> Self {
        let width = columns.len();
        let mut index = Vec::with_capacity(rows.len());
        let mut values = Array2::from_elem((rows.len(), width), None);
        for (i, (label, row)) in rows.into_iter().enumerate() {
            for (j, value) in row.into_iter().take(width).enumerate() {
                values[[i, j]] = value;
            }
            index.push(label);
        }
        Self::new(columns.to_vec(), index, values)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn index(&self) -> &[String] {
        &self.index
    }

    pub fn values(&self) -> &Array2<Option<i64>> {
        &self.values
    }

    pub fn nrows(&self) -> usize {
        self.index.len()
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn row(&self, row: usize) -> ArrayView1<'_, Option<i64>> {
        self.values.row(row)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<i64> {
        self.values.get((row, col)).copied().flatten()
    }

    pub fn row_position(&self, label: &str) -> Option<usize> {
        self.index.iter().position(|r| r == label)
    }

    pub fn column_position(&self, code: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == code)
    }

    pub fn lookup(&self, label: &str, code: &str) -> Option<i64> {
        self.get(self.row_position(label)?, self.column_position(code)?)
    }

    /// Value in the last column, the finish for course-shaped tables.
    pub fn last(&self, row: usize) -> Option<i64> {
        self.ncols().checked_sub(1).and_then(|col| self.get(row, col))
    }

    /// New table with the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> Table {
        let index = rows.iter().map(|&r| self.index[r].clone()).collect();
        let values = self.values.select(Axis(0), rows);
        Table::new(self.columns.clone(), index, values)
    }

    pub fn formatted(&self, style: DurationStyle) -> FormattedTable {
        let rows = self
            .index
            .iter()
            .zip(self.values.rows())
            .map(|(id, values)| FormattedRow {
                id: id.clone(),
                values: values
                    .iter()
                    .map(|v| v.map(|s| style.format(s)).unwrap_or_default())
                    .collect(),
            })
            .collect();
        FormattedTable {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// One series per row: `(checkpoint code, duration)` for every defined
    /// value, in checkpoint order.
    pub fn chart_series(&self) -> Vec<ChartSeries> {
        self.index
            .iter()
            .zip(self.values.rows())
            .map(|(label, values)| ChartSeries {
                label: label.clone(),
                points: self
                    .columns
                    .iter()
                    .zip(values.iter())
                    .filter_map(|(code, v)| v.map(|s| (code.clone(), format_duration(s))))
                    .collect(),
            })
            .collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FormattedRow {
    pub id: String,
    pub values: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FormattedTable {
    pub columns: Vec<String>,
    pub rows: Vec<FormattedRow>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChartSeries {
    pub label: String,
    pub points: Vec<(String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_course_rejects_duplicates() {
        let err = Course::new(vec![
            Checkpoint::new("A", 1.0, 10, 0),
            Checkpoint::new("A", 2.0, 20, 0),
        ])
        .unwrap_err();
        assert!(matches!(err, SplitsError::Schema(_)));
        assert!(Course::new(Vec::new()).is_err());
    }

    #[test]
    fn test_course_from_json() {
        let course: Course = serde_json::from_str(
            r#"[{"code": "S", "distance_km": 0.0, "gain_m": 0, "loss_m": 0},
                {"code": "T", "name": "Tenoya", "distance_km": 11.43, "gain_m": 348, "loss_m": -188}]"#,
        )
        .unwrap();
        assert_eq!(course.len(), 2);
        assert!(course.starts_at_line());
        assert_eq!(course.checkpoints()[1].name, "Tenoya");
        assert!(serde_json::from_str::<Course>("[]").is_err());
    }

    #[test]
    fn test_times_table_blank_is_missing() {
        let times = TimesTable::from_rows(
            cols(&["A", "B"]),
            vec![("1".to_string(), vec![Some("  ".into()), Some("1:00:00".into())])],
        )
        .unwrap();
        assert_eq!(times.cells()[[0, 0]], None);
        assert_eq!(times.cells()[[0, 1]].as_deref(), Some("1:00:00"));
    }

    #[test]
    fn test_times_table_width_checked() {
        let err = TimesTable::from_rows(
            cols(&["A", "B"]),
            vec![("1".to_string(), vec![Some("1:00:00".into())])],
        )
        .unwrap_err();
        assert!(matches!(err, SplitsError::Schema(_)));
    }

    #[test]
    fn test_check_schema() {
        let course = Course::new(vec![
            Checkpoint::new("A", 1.0, 0, 0),
            Checkpoint::new("B", 2.0, 0, 0),
        ])
        .unwrap();
        let good = TimesTable::from_rows(cols(&["A", "B"]), Vec::new()).unwrap();
        assert!(good.check_schema(&course).is_ok());
        let swapped = TimesTable::from_rows(cols(&["B", "A"]), Vec::new()).unwrap();
        assert!(swapped.check_schema(&course).is_err());
    }

    #[test]
    fn test_table_select_and_format() {
        let table = Table::from_rows(
            &cols(&["A", "B"]),
            vec![
                ("x".into(), vec![Some(60), None]),
                ("y".into(), vec![Some(3600), Some(90_000)]),
            ],
        );
        let swapped = table.select_rows(&[1, 0]);
        assert_eq!(swapped.index(), &["y".to_string(), "x".to_string()]);
        assert_eq!(swapped.lookup("x", "A"), Some(60));
        assert_eq!(swapped.last(0), Some(90_000));

        let formatted = swapped.formatted(DurationStyle::Elapsed);
        assert_eq!(formatted.rows[0].values, vec!["1:00:00", "25:00:00"]);
        assert_eq!(formatted.rows[1].values, vec!["0:01:00", ""]);

        let clock = swapped.formatted(DurationStyle::TimeOfDay);
        assert_eq!(clock.rows[0].values[1], "01:00:00");
    }

    #[test]
    fn test_chart_series_skips_undefined() {
        let table = Table::from_row(&cols(&["A", "B", "C"]), "mins", vec![Some(259), None, Some(331)]);
        let series = table.chart_series();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].label, "mins");
        assert_eq!(
            series[0].points,
            vec![
                ("A".to_string(), "0:04:19".to_string()),
                ("C".to_string(), "0:05:31".to_string())
            ]
        );
    }
}
