use std::ops::Range;

use tracing::{debug, info};

use crate::clean::{drop_non_finishers, fill_gaps};
use crate::objective::{nearest_finish, peer_window};
use crate::pace::{pace_table, PaceKind};
use crate::rollover::correct_rollover;
use crate::segments::{segment_deltas, time_deltas, Segment};
use crate::stats::{mean_row, summarize};
use crate::table::{Course, DurationStyle, FormattedTable, Table, TimesTable};
use crate::timecode::{parse_clock, parse_times, TimeCodec};
use crate::wave::real_times;
use crate::{Params, SplitsError};

/// Every derived table for one race, computed once at construction.
///
/// The objective row is the only state that changes afterwards; it is set
/// through `&mut self`, so a shared analysis needs external locking.
#[derive(Clone, Debug)]
pub struct RaceAnalysis {
    course: Course,
    params: Params,
    codec: TimeCodec,
    corrected: Table,
    real: Table,
    time_deltas: Table,
    segments: Vec<Segment>,
    paces: Table,
    effort_paces: Table,
    objective: Option<usize>,
}

impl RaceAnalysis {
    pub fn new(course: Course, times: &TimesTable, params: Params) -> Result<Self, SplitsError> {
        params.validate()?;
        times.check_schema(&course)?;
        let codec = params.offset.codec()?;
        let labels = params.day_labels()?;

        let parsed = parse_times(times, labels.as_ref())?;
        let finishers = drop_non_finishers(&parsed);
        let filled = fill_gaps(&finishers, params.fill);
        let corrected = correct_rollover(&filled)?;
        let real = real_times(&corrected, codec.offset_s(), params.waves);

        let mut order: Vec<usize> = (0..real.nrows()).collect();
        order.sort_by_key(|&row| real.last(row));
        let corrected = corrected.select_rows(&order);
        let real = real.select_rows(&order);

        let segments = segment_deltas(&course);
        let time_deltas = time_deltas(&corrected, codec.offset_s(), &course);
        let paces = pace_table(&time_deltas, &segments, PaceKind::Raw);
        let effort_paces = pace_table(&time_deltas, &segments, PaceKind::Effort);

        info!(
            "analysed {} finishers of {} runners over {} checkpoints",
            real.nrows(),
            times.nrows(),
            course.len()
        );

        Ok(Self {
            course,
            params,
            codec,
            corrected,
            real,
            time_deltas,
            segments,
            paces,
            effort_paces,
            objective: None,
        })
    }

    pub fn course(&self) -> &Course {
        &self.course
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn codec(&self) -> &TimeCodec {
        &self.codec
    }

    /// Wall-clock readings, monotonic per runner (may exceed 24 h).
    pub fn corrected_times(&self) -> &Table {
        &self.corrected
    }

    /// Corrected readings as passage clocks.
    pub fn hours(&self) -> FormattedTable {
        self.corrected.formatted(DurationStyle::TimeOfDay)
    }

    /// Elapsed time from the official start, or from each runner's own first
    /// reading with wave starts.
    pub fn real_times(&self) -> &Table {
        &self.real
    }

    pub fn time_deltas(&self) -> &Table {
        &self.time_deltas
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn paces(&self) -> &Table {
        &self.paces
    }

    pub fn effort_paces(&self) -> &Table {
        &self.effort_paces
    }

    pub fn pace_table(&self, kind: PaceKind) -> &Table {
        match kind {
            PaceKind::Raw => &self.paces,
            PaceKind::Effort => &self.effort_paces,
        }
    }

    pub fn finishers(&self) -> usize {
        self.real.nrows()
    }

    /// Raw pace of one runner at one checkpoint.
    pub fn pace(&self, runner: &str, checkpoint: &str) -> Result<i64, SplitsError> {
        strict_lookup(&self.paces, runner, checkpoint)
    }

    pub fn effort_pace(&self, runner: &str, checkpoint: &str) -> Result<i64, SplitsError> {
        strict_lookup(&self.effort_paces, runner, checkpoint)
    }

    pub fn stats(&self) -> Result<Table, SplitsError> {
        self.stats_with(PaceKind::Raw, self.params.stats_n1, self.params.stats_n2)
    }

    pub fn effort_stats(&self) -> Result<Table, SplitsError> {
        self.stats_with(PaceKind::Effort, self.params.stats_n1, self.params.stats_n2)
    }

    pub fn stats_with(&self, kind: PaceKind, n1: usize, n2: usize) -> Result<Table, SplitsError> {
        if n1 == 0 || n2 == 0 {
            return Err(SplitsError::InvalidParameter(
                "stats windows must be at least 1".into(),
            ));
        }
        summarize(self.pace_table(kind), n1, n2)
    }

    /// Select the finisher whose real finish is closest to `target` and make
    /// it the objective.
    pub fn find_nearest(&mut self, target: &str) -> Result<usize, SplitsError> {
        let target_s = parse_clock(target)?;
        let row = nearest_finish(&self.real, target_s)?;
        debug!(
            "objective {} -> runner {} (row {})",
            target, self.real.index()[row], row
        );
        self.objective = Some(row);
        Ok(row)
    }

    pub fn set_objective(&mut self, index: usize) -> Result<(), SplitsError> {
        if index >= self.real.nrows() {
            return Err(SplitsError::ObjectiveOutOfRange {
                index,
                rows: self.real.nrows(),
            });
        }
        self.objective = Some(index);
        Ok(())
    }

    pub fn objective(&self) -> Option<usize> {
        self.objective
    }

    pub fn objective_runner(&self) -> Option<&str> {
        self.objective.map(|row| self.real.index()[row].as_str())
    }

    pub fn objective_times(&self) -> Result<Table, SplitsError> {
        self.objective_row(&self.real)
    }

    pub fn objective_paces(&self) -> Result<Table, SplitsError> {
        self.objective_row(&self.paces)
    }

    pub fn objective_effort_paces(&self) -> Result<Table, SplitsError> {
        self.objective_row(&self.effort_paces)
    }

    /// Ranked rows averaged around the objective.
    pub fn peer_window(&self, n: usize) -> Result<Range<usize>, SplitsError> {
        if n == 0 {
            return Err(SplitsError::InvalidParameter(
                "peer window must be at least 1".into(),
            ));
        }
        let objective = self.require_objective()?;
        Ok(peer_window(self.real.nrows(), objective, n))
    }

    pub fn peer_mean_paces(&self, n: usize) -> Result<Table, SplitsError> {
        self.peer_mean(&self.paces, n)
    }

    pub fn peer_mean_effort_paces(&self, n: usize) -> Result<Table, SplitsError> {
        self.peer_mean(&self.effort_paces, n)
    }

    pub fn peer_mean_times(&self, n: usize) -> Result<Table, SplitsError> {
        self.peer_mean(&self.real, n)
    }

    fn require_objective(&self) -> Result<usize, SplitsError> {
        if self.real.is_empty() {
            return Err(SplitsError::EmptyResultSet);
        }
        self.objective
            .ok_or_else(|| SplitsError::InvalidParameter("no objective selected".into()))
    }

    fn objective_row(&self, table: &Table) -> Result<Table, SplitsError> {
        let row = self.require_objective()?;
        Ok(table.select_rows(&[row]))
    }

    fn peer_mean(&self, table: &Table, n: usize) -> Result<Table, SplitsError> {
        let window = self.peer_window(n)?;
        Ok(Table::from_row(
            table.columns(),
            &format!("peer_mean_{}", n),
            mean_row(table, window),
        ))
    }
}

fn strict_lookup(table: &Table, runner: &str, checkpoint: &str) -> Result<i64, SplitsError> {
    let row = table
        .row_position(runner)
        .ok_or_else(|| SplitsError::InvalidParameter(format!("unknown runner '{}'", runner)))?;
    let col = table.column_position(checkpoint).ok_or_else(|| {
        SplitsError::InvalidParameter(format!("unknown checkpoint '{}'", checkpoint))
    })?;
    table.get(row, col).ok_or_else(|| SplitsError::UndefinedPace {
        runner: runner.to_string(),
        checkpoint: checkpoint.to_string(),
    })
}
