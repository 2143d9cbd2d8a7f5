//! Segment paces in seconds per kilometre.

use ndarray::Array2;

use crate::segments::Segment;
use crate::table::Table;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaceKind {
    /// Time over horizontal distance.
    Raw,
    /// Time over effort distance (distance + elevation / 100).
    Effort,
}

impl PaceKind {
    pub fn distance_km(self, segment: &Segment) -> f64 {
        match self {
            PaceKind::Raw => segment.distance_km,
            PaceKind::Effort => segment.effort_distance_km(),
        }
    }
}

/// Whole seconds per km, truncated. Undefined unless the distance is
/// strictly positive.
pub fn pace_per_km(delta_s: i64, distance_km: f64) -> Option<i64> {
    if !distance_km.is_finite() || distance_km <= 0.0 {
        return None;
    }
    Some((delta_s as f64 / distance_km).trunc() as i64)
}

pub fn pace_table(deltas: &Table, segments: &[Segment], kind: PaceKind) -> Table {
    let (rows, cols) = deltas.values().dim();
    debug_assert_eq!(cols, segments.len());
    let distances: Vec<f64> = segments.iter().map(|s| kind.distance_km(s)).collect();
    let values = Array2::from_shape_fn((rows, cols), |(row, col)| {
        deltas
            .get(row, col)
            .and_then(|delta| pace_per_km(delta, distances[col]))
    });
    Table::new(deltas.columns().to_vec(), deltas.index().to_vec(), values)
}
