//! Per-checkpoint deltas: time per runner, distance and elevation per course.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::table::{Checkpoint, Course, Table};

/// Course section ending at `code`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub code: String,
    pub distance_km: f64,
    pub gain_m: i64,
    pub loss_m: i64,
}

impl Segment {
    /// Flat-equivalent distance: 100 m of elevation counts as 1 km.
    pub fn effort_distance_km(&self) -> f64 {
        self.distance_km + (self.gain_m + self.loss_m) as f64 / 100.0
    }
}

/// Distance and elevation deltas. The first segment carries the first
/// checkpoint's cumulative values. Negative deltas are kept as-is.
pub fn segment_deltas(course: &Course) -> Vec<Segment> {
    let mut out = Vec::with_capacity(course.len());
    let mut prev: Option<&Checkpoint> = None;
    for cp in course.checkpoints() {
        let segment = match prev {
            None => Segment {
                code: cp.code.clone(),
                distance_km: cp.distance_km,
                gain_m: cp.gain_m,
                loss_m: cp.loss_m,
            },
            Some(p) => Segment {
                code: cp.code.clone(),
                distance_km: cp.distance_km - p.distance_km,
                gain_m: cp.gain_m - p.gain_m,
                loss_m: cp.loss_m - p.loss_m,
            },
        };
        if segment.distance_km < 0.0 {
            warn!(
                "checkpoint {} is {:.2} km before its predecessor",
                cp.code, -segment.distance_km
            );
        }
        out.push(segment);
        prev = Some(cp);
    }
    out
}

/// Time spent on each segment, from corrected readings. The first column is
/// measured from the race offset, or `None` when that checkpoint is the
/// start line.
pub fn time_deltas(corrected: &Table, offset_s: i64, course: &Course) -> Table {
    let (rows, cols) = corrected.values().dim();
    let mut values = Array2::from_elem((rows, cols), None);
    for row in 0..rows {
        for col in 0..cols {
            values[[row, col]] = if col == 0 {
                if course.starts_at_line() {
                    None
                } else {
                    corrected.get(row, 0).map(|t| t - offset_s)
                }
            } else {
                match (corrected.get(row, col), corrected.get(row, col - 1)) {
                    (Some(t), Some(p)) => Some(t - p),
                    _ => None,
                }
            };
        }
    }
    Table::new(corrected.columns().to_vec(), corrected.index().to_vec(), values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tgc_course() -> Course {
        Course::new(vec![
            Checkpoint::new("Tenoya", 11.43, 348, -188),
            Checkpoint::new("Arucas", 19.44, 704, -482),
            Checkpoint::new("Teror", 31.95, 1509, -922),
        ])
        .unwrap()
    }

    #[test]
    fn test_segment_deltas() {
        let segments = segment_deltas(&tgc_course());
        assert_eq!(segments[0].distance_km, 11.43);
        assert_eq!((segments[0].gain_m, segments[0].loss_m), (348, -188));
        assert!((segments[1].distance_km - 8.01).abs() < 1e-9);
        assert_eq!((segments[1].gain_m, segments[1].loss_m), (356, -294));
        assert!((segments[2].distance_km - 12.51).abs() < 1e-9);
        assert_eq!((segments[2].gain_m, segments[2].loss_m), (805, -440));
    }

    #[test]
    fn test_non_monotonic_metadata_is_not_clamped() {
        let course = Course::new(vec![
            Checkpoint::new("A", 10.0, 100, 0),
            Checkpoint::new("B", 9.5, 90, 0),
        ])
        .unwrap();
        let segments = segment_deltas(&course);
        assert!((segments[1].distance_km + 0.5).abs() < 1e-9);
        assert_eq!(segments[1].gain_m, -10);
    }

    #[test]
    fn test_effort_distance() {
        let segment = Segment {
            code: "X".into(),
            distance_km: 10.0,
            gain_m: 500,
            loss_m: 0,
        };
        assert!((segment.effort_distance_km() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_time_deltas_first_from_offset() {
        let course = tgc_course();
        let corrected =
            Table::from_row(&course.codes(), "1", vec![Some(3073), Some(5802), Some(10_338)]);
        let deltas = time_deltas(&corrected, 3, &course);
        assert_eq!(deltas.row(0).to_vec(), vec![Some(3070), Some(2729), Some(4536)]);
    }

    #[test]
    fn test_time_deltas_start_line_undefined() {
        let course = Course::new(vec![
            Checkpoint::new("Start", 0.0, 0, 0),
            Checkpoint::new("CP1", 5.0, 200, -50),
        ])
        .unwrap();
        let corrected = Table::from_row(&course.codes(), "1", vec![Some(28_800), Some(30_600)]);
        let deltas = time_deltas(&corrected, 28_800, &course);
        assert_eq!(deltas.row(0).to_vec(), vec![None, Some(1800)]);
    }
}
