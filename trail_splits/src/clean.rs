//! Finisher filtering and gap filling.

use ndarray::Array1;
use tracing::debug;

use crate::table::Table;
use crate::timecode::SECONDS_PER_DAY;
use crate::FillPolicy;

/// Keep only runners with a finish reading.
pub fn drop_non_finishers(table: &Table) -> Table {
    let keep: Vec<usize> = (0..table.nrows())
        .filter(|&row| table.last(row).is_some())
        .collect();
    let dropped = table.nrows() - keep.len();
    if dropped > 0 {
        debug!("dropped {} non-finishers of {}", dropped, table.nrows());
    }
    table.select_rows(&keep)
}

/// Fill missing readings per runner. Finishers are never dropped here: a
/// leading gap that the policy cannot fill from behind takes the next
/// reading, which always exists since the finish is present.
pub fn fill_gaps(table: &Table, policy: FillPolicy) -> Table {
    let mut values = table.values().clone();
    let mut filled_cells = 0;
    for mut row in values.rows_mut() {
        filled_cells += row.iter().filter(|v| v.is_none()).count();
        let filled = fill_row(&row.to_owned(), policy);
        row.assign(&filled);
    }
    if filled_cells > 0 {
        debug!("filled {} missing readings ({:?})", filled_cells, policy);
    }
    Table::new(table.columns().to_vec(), table.index().to_vec(), values)
}

fn fill_row(row: &Array1<Option<i64>>, policy: FillPolicy) -> Array1<Option<i64>> {
    let len = row.len();
    let previous = |i: usize| (0..i).rev().find_map(|j| row[j]);
    let next = |i: usize| (i + 1..len).find_map(|j| row[j]);
    Array1::from_iter((0..len).map(|i| {
        if row[i].is_some() {
            return row[i];
        }
        match policy {
            FillPolicy::Previous => previous(i).or_else(|| next(i)),
            FillPolicy::Next => next(i).or_else(|| previous(i)),
            FillPolicy::Mean => match (previous(i), next(i)) {
                (Some(before), Some(after)) => Some(midpoint(before, after)),
                (before, after) => before.or(after),
            },
        }
    }))
}

/// Midpoint of two wall-clock readings; a smaller `next` is read as being
/// after midnight.
fn midpoint(prev: i64, next: i64) -> i64 {
    let next = if next < prev { next + SECONDS_PER_DAY } else { next };
    (prev + next) / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: Vec<(&str, Vec<Option<i64>>)>) -> Table {
        let columns: Vec<String> = ["A", "B", "C", "D"].iter().map(|c| c.to_string()).collect();
        Table::from_rows(
            &columns,
            rows.into_iter().map(|(r, v)| (r.to_string(), v)).collect(),
        )
    }

    #[test]
    fn test_drop_non_finishers() {
        let t = table(vec![
            ("1", vec![Some(1), Some(2), Some(3), Some(4)]),
            ("2", vec![Some(1), Some(2), None, Some(5)]),
            ("3", vec![Some(1), Some(2), Some(3), Some(6)]),
            ("500", vec![Some(1), Some(2), Some(3), None]),
        ]);
        let kept = drop_non_finishers(&t);
        assert_eq!(kept.nrows(), 3);
        assert!(kept.row_position("500").is_none());
    }

    #[test]
    fn test_fill_previous() {
        let t = table(vec![("1", vec![Some(10), None, None, Some(40)])]);
        let filled = fill_gaps(&t, FillPolicy::Previous);
        assert_eq!(
            filled.row(0).to_vec(),
            vec![Some(10), Some(10), Some(10), Some(40)]
        );
    }

    #[test]
    fn test_fill_next() {
        let t = table(vec![("1", vec![None, Some(20), None, Some(40)])]);
        let filled = fill_gaps(&t, FillPolicy::Next);
        assert_eq!(
            filled.row(0).to_vec(),
            vec![Some(20), Some(20), Some(40), Some(40)]
        );
    }

    #[test]
    fn test_fill_mean() {
        let t = table(vec![("1", vec![Some(10), None, Some(21), Some(40)])]);
        let filled = fill_gaps(&t, FillPolicy::Mean);
        assert_eq!(filled.row(0).to_vec(), vec![Some(10), Some(15), Some(21), Some(40)]);
    }

    #[test]
    fn test_fill_mean_across_midnight() {
        let before = 23 * 3600 + 50 * 60;
        let after = 10 * 60;
        let t = table(vec![("1", vec![Some(before), None, Some(after), Some(after + 60)])]);
        let filled = fill_gaps(&t, FillPolicy::Mean);
        assert_eq!(filled.get(0, 1), Some(SECONDS_PER_DAY));
    }

    #[test]
    fn test_leading_gap_keeps_finisher() {
        let t = table(vec![
            ("1", vec![Some(10), Some(20), Some(30), Some(40)]),
            ("2", vec![None, Some(20), None, Some(40)]),
        ]);
        for policy in [FillPolicy::Previous, FillPolicy::Next, FillPolicy::Mean] {
            let filled = fill_gaps(&t, policy);
            assert_eq!(filled.index(), &["1", "2"], "{:?}", policy);
            assert_eq!(filled.get(1, 0), Some(20), "{:?}", policy);
            assert!(filled.row(1).iter().all(Option::is_some));
        }
        let filled = fill_gaps(&drop_non_finishers(&t), FillPolicy::Previous);
        assert_eq!(filled.row(1).to_vec(), vec![Some(20), Some(20), Some(20), Some(40)]);
    }
}
