//! Field-wide pace summaries.

use std::ops::Range;

use crate::table::Table;
use crate::SplitsError;

/// Per-column mean of the defined values in `rows`, truncated to whole
/// seconds. Columns with no defined value stay undefined.
pub fn mean_row(table: &Table, rows: Range<usize>) -> Vec<Option<i64>> {
    let rows = rows.start.min(table.nrows())..rows.end.min(table.nrows());
    (0..table.ncols())
        .map(|col| {
            let (sum, count) = rows
                .clone()
                .filter_map(|row| table.get(row, col))
                .fold((0i64, 0i64), |(s, c), v| (s + v, c + 1));
            (count > 0).then(|| sum / count)
        })
        .collect()
}

/// Per-column minimum over every row.
pub fn min_row(table: &Table) -> Vec<Option<i64>> {
    (0..table.ncols())
        .map(|col| (0..table.nrows()).filter_map(|row| table.get(row, col)).min())
        .collect()
}

/// `mins`, `first`, `mean_{n1}` and `mean_{n2}` rows over a ranked pace
/// table.
pub fn summarize(paces: &Table, n1: usize, n2: usize) -> Result<Table, SplitsError> {
    if paces.is_empty() {
        return Err(SplitsError::EmptyResultSet);
    }
    Ok(Table::from_rows(
        paces.columns(),
        vec![
            ("mins".to_string(), min_row(paces)),
            ("first".to_string(), paces.row(0).to_vec()),
            (format!("mean_{}", n1), mean_row(paces, 0..n1)),
            (format!("mean_{}", n2), mean_row(paces, 0..n2)),
        ],
    ))
}
