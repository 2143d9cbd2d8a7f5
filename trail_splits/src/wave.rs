//! Real elapsed time per runner.
//!
//! With wave starts each runner is timed from their own first reading, so
//! runners released in later waves are not penalised by the gap between the
//! official start and their gun.

use ndarray::Array2;

use crate::table::Table;

pub fn real_times(corrected: &Table, offset_s: i64, waves: bool) -> Table {
    let mut values: Array2<Option<i64>> = corrected.values().clone();
    for mut row in values.rows_mut() {
        let reference = if waves { row[0] } else { Some(offset_s) };
        for cell in row.iter_mut() {
            *cell = match (*cell, reference) {
                (Some(t), Some(start)) => Some(t - start),
                _ => None,
            };
        }
    }
    Table::new(
        corrected.columns().to_vec(),
        corrected.index().to_vec(),
        values,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corrected() -> Table {
        let columns: Vec<String> = ["Start", "CP1", "Finish"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        let gun = 8 * 3600;
        Table::from_rows(
            &columns,
            vec![
                ("on_gun".into(), vec![Some(gun), Some(gun + 3000), Some(gun + 9000)]),
                (
                    "late".into(),
                    vec![Some(gun + 1800), Some(gun + 4500), Some(gun + 10_000)],
                ),
            ],
        )
    }

    #[test]
    fn test_without_waves_uses_offset() {
        let real = real_times(&corrected(), 8 * 3600, false);
        assert_eq!(real.row(1).to_vec(), vec![Some(1800), Some(4500), Some(10_000)]);
    }

    #[test]
    fn test_runner_on_gun_matches_global_elapsed() {
        let global = real_times(&corrected(), 8 * 3600, false);
        let real = real_times(&corrected(), 8 * 3600, true);
        assert_eq!(real.row(0), global.row(0));
    }

    #[test]
    fn test_late_wave_runner_is_thirty_minutes_less() {
        let global = real_times(&corrected(), 8 * 3600, false);
        let real = real_times(&corrected(), 8 * 3600, true);
        for col in 0..real.ncols() {
            assert_eq!(real.get(1, col), global.get(1, col).map(|t| t - 1800));
        }
    }
}
