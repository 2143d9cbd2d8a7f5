//! Objective lookup and the peer window around it.

use std::ops::Range;

use crate::table::Table;
use crate::SplitsError;

/// Row whose finish is closest to `target_s`. Ties go to the earlier row.
pub fn nearest_finish(real: &Table, target_s: i64) -> Result<usize, SplitsError> {
    let mut best: Option<(usize, i64)> = None;
    for row in 0..real.nrows() {
        let Some(finish) = real.last(row) else {
            continue;
        };
        let diff = (finish - target_s).abs();
        if best.map_or(true, |(_, d)| diff < d) {
            best = Some((row, diff));
        }
    }
    best.map(|(row, _)| row).ok_or(SplitsError::EmptyResultSet)
}

/// Rows averaged around `objective`: `n - 1` others, the larger half before.
/// Near an edge the window slides inward and keeps `min(n, rows)` rows.
pub fn peer_window(rows: usize, objective: usize, n: usize) -> Range<usize> {
    let size = n.min(rows);
    if size == 0 {
        return 0..0;
    }
    let before = (n - 1) - (n - 1) / 2;
    let mut start = objective.saturating_sub(before);
    if start + size > rows {
        start = rows - size;
    }
    start..start + size
}
