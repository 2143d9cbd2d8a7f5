use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::panic;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use trail_splits::{
    format_duration, parse_clock, Course, DurationStyle, FillPolicy, FormattedTable, Offset,
    Params, RaceAnalysis, Table, TimesTable,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Trail race split and pace analysis CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild splits, paces and field stats for one or more race files
    Analyze(AnalyzeArgs),
    /// Find the finisher closest to a target time and average their peers
    Objective(ObjectiveArgs),
}

#[derive(Parser, Debug)]
struct AnalyzeArgs {
    /// Race description files (JSON)
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output directory; each race gets its own subdirectory
    #[arg(short, long, default_value = "splits", value_hint = ValueHint::DirPath)]
    out_dir: PathBuf,

    /// Render charts as SVG instead of PNG
    #[arg(long, action = ArgAction::SetTrue)]
    svg: bool,

    /// Skip chart rendering
    #[arg(long = "no-chart", action = ArgAction::SetTrue)]
    no_chart: bool,

    /// Plot faster paces higher up
    #[arg(long = "faster-up", action = ArgAction::SetTrue)]
    faster_up: bool,

    #[command(flatten)]
    overrides: ParamOverrides,

    /// Verbose logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct ObjectiveArgs {
    /// Race description file (JSON)
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Target finish time, e.g. 14:07:28
    #[arg(short, long)]
    target: String,

    /// Peer window size (defaults to the race's `peer_window`)
    #[arg(long)]
    peers: Option<usize>,

    /// Print JSON instead of CSV
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Chart objective vs. peer-mean paces to this path (.png or .svg)
    #[arg(long, value_hint = ValueHint::FilePath)]
    chart: Option<PathBuf>,

    /// Plot faster paces higher up
    #[arg(long = "faster-up", action = ArgAction::SetTrue)]
    faster_up: bool,

    #[command(flatten)]
    overrides: ParamOverrides,

    /// Verbose logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

/// Command-line overrides for the race file's `params`.
#[derive(Args, Debug, Default)]
struct ParamOverrides {
    /// Official start: integer seconds or H:MM:SS
    #[arg(long)]
    offset: Option<String>,

    /// Time each runner from their own first reading
    #[arg(long, action = ArgAction::SetTrue)]
    waves: bool,

    /// Time every runner from the official start
    #[arg(long = "no-waves", action = ArgAction::SetTrue, conflicts_with = "waves")]
    no_waves: bool,

    /// Gap fill policy
    #[arg(long, value_enum)]
    fill: Option<FillOpt>,

    /// Start weekday, 1 = Monday .. 7 = Sunday
    #[arg(long)]
    start_weekday: Option<u8>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FillOpt {
    Previous,
    Next,
    Mean,
}

impl From<FillOpt> for FillPolicy {
    fn from(value: FillOpt) -> Self {
        match value {
            FillOpt::Previous => FillPolicy::Previous,
            FillOpt::Next => FillPolicy::Next,
            FillOpt::Mean => FillPolicy::Mean,
        }
    }
}

impl ParamOverrides {
    fn apply(&self, params: &mut Params) {
        if let Some(offset) = self.offset.as_ref() {
            params.offset = parse_offset_arg(offset);
        }
        if self.waves {
            params.waves = true;
        } else if self.no_waves {
            params.waves = false;
        }
        if let Some(fill) = self.fill {
            params.fill = fill.into();
        }
        if let Some(day) = self.start_weekday {
            params.start_weekday = day;
        }
    }
}

fn parse_offset_arg(input: &str) -> Offset {
    let trimmed = input.trim();
    match trimmed.parse::<i64>() {
        Ok(seconds) => Offset::Seconds(seconds),
        Err(_) => Offset::Clock(trimmed.to_string()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Analyze(args) => args.verbose,
        Command::Objective(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Analyze(args) => handle_analyze(args),
        Command::Objective(args) => handle_objective(args),
    }
}

/// On-disk race description.
#[derive(Deserialize, Debug)]
struct RaceFile {
    #[serde(default)]
    name: Option<String>,
    /// Times CSV, relative to the race file.
    times: PathBuf,
    checkpoints: Course,
    #[serde(default)]
    params: Params,
}

#[derive(Debug)]
struct Race {
    name: String,
    slug: String,
    course: Course,
    times: TimesTable,
    params: Params,
}

fn load_race(path: &Path) -> Result<Race> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file: RaceFile = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse race file {}", path.display()))?;
    let times_path = match path.parent() {
        Some(dir) if file.times.is_relative() => dir.join(&file.times),
        _ => file.times.clone(),
    };
    let times = load_times_csv(&times_path)?;
    let slug = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(slugify)
        .unwrap_or_else(|| "race".to_string());
    Ok(Race {
        name: file.name.unwrap_or_else(|| slug.clone()),
        slug,
        course: file.checkpoints,
        times,
        params: file.params,
    })
}

/// Header `id,<codes...>`, one runner per row, blank cells for missing
/// readings.
fn load_times_csv(path: &Path) -> Result<TimesTable> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = csv::Reader::from_reader(file);
    let headers = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .clone();
    if headers.len() < 2 {
        return Err(anyhow!(
            "{}: expected an id column and at least one checkpoint",
            path.display()
        ));
    }
    let columns: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("{}: bad row {}", path.display(), line + 2))?;
        let id = record.get(0).unwrap_or_default().trim().to_string();
        let cells = record
            .iter()
            .skip(1)
            .map(|cell| Some(cell.to_string()))
            .collect();
        rows.push((id, cells));
    }
    debug!("{}: {} runners", path.display(), rows.len());
    Ok(TimesTable::from_rows(columns, rows)?)
}

fn slugify(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    slug.trim_matches('_').to_string()
}

fn build_analysis(race: Race, overrides: &ParamOverrides) -> Result<(String, String, RaceAnalysis)> {
    let mut params = race.params;
    overrides.apply(&mut params);
    let analysis = RaceAnalysis::new(race.course, &race.times, params)
        .with_context(|| format!("failed to analyse {}", race.name))?;
    Ok((race.name, race.slug, analysis))
}

fn handle_analyze(args: AnalyzeArgs) -> Result<()> {
    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;
    let kind = if args.svg { ChartKind::Svg } else { ChartKind::Png };

    let t_start = Instant::now();
    let written: Vec<(String, usize)> = args
        .inputs
        .par_iter()
        .map(|path| -> Result<(String, usize)> {
            let race = load_race(path)?;
            let (name, slug, analysis) = build_analysis(race, &args.overrides)?;
            let dir = args.out_dir.join(&slug);
            write_race_outputs(&analysis, &dir)?;
            if !args.no_chart {
                write_stats_charts(&analysis, &name, &dir, kind, args.faster_up);
            }
            Ok((name, analysis.finishers()))
        })
        .collect::<Result<Vec<_>>>()?;

    for (name, finishers) in &written {
        info!("{}: {} finishers", name, finishers);
    }
    info!(
        "Analysed {} races in {:.1} ms",
        written.len(),
        t_start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

fn write_race_outputs(analysis: &RaceAnalysis, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let elapsed = |table: &Table| table.formatted(DurationStyle::Elapsed);

    write_table_csv(&elapsed(analysis.corrected_times()), &dir.join("corrected.csv"))?;
    write_table_csv(&analysis.hours(), &dir.join("hours.csv"))?;
    write_table_csv(&elapsed(analysis.real_times()), &dir.join("real.csv"))?;
    write_table_csv(&elapsed(analysis.time_deltas()), &dir.join("deltas.csv"))?;
    write_table_csv(&elapsed(analysis.paces()), &dir.join("paces.csv"))?;
    write_table_csv(&elapsed(analysis.effort_paces()), &dir.join("effort_paces.csv"))?;
    write_segments_csv(analysis, &dir.join("segments.csv"))?;

    match (analysis.stats(), analysis.effort_stats()) {
        (Ok(stats), Ok(effort)) => {
            write_table_csv(&elapsed(&stats), &dir.join("stats.csv"))?;
            write_table_csv(&elapsed(&effort), &dir.join("effort_stats.csv"))?;
        }
        (Err(err), _) | (_, Err(err)) => warn!("{}: skipping stats ({})", dir.display(), err),
    }
    Ok(())
}

fn write_table_csv(table: &FormattedTable, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_table_rows(table, &mut writer)?;
    writer.flush()?;
    Ok(())
}

fn write_table_rows<W: Write>(table: &FormattedTable, writer: &mut csv::Writer<W>) -> Result<()> {
    let mut header = vec!["id"];
    header.extend(table.columns.iter().map(String::as_str));
    writer.write_record(&header)?;
    write_table_body(table, None, writer)
}

/// One record per row, prefixed with the table name when given.
fn write_table_body<W: Write>(
    table: &FormattedTable,
    name: Option<&str>,
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    for row in &table.rows {
        let mut record: Vec<&str> = Vec::with_capacity(row.values.len() + 2);
        if let Some(name) = name {
            record.push(name);
        }
        record.push(&row.id);
        record.extend(row.values.iter().map(String::as_str));
        writer.write_record(&record)?;
    }
    Ok(())
}

fn write_segments_csv(analysis: &RaceAnalysis, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    for segment in analysis.segments() {
        writer.serialize(SegmentRow {
            code: &segment.code,
            distance_km: format!("{:.2}", segment.distance_km),
            gain_m: segment.gain_m,
            loss_m: segment.loss_m,
            effort_km: format!("{:.2}", segment.effort_distance_km()),
        })?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct SegmentRow<'a> {
    code: &'a str,
    distance_km: String,
    gain_m: i64,
    loss_m: i64,
    effort_km: String,
}

fn write_stats_charts(
    analysis: &RaceAnalysis,
    name: &str,
    dir: &Path,
    kind: ChartKind,
    faster_up: bool,
) {
    let codes = analysis.course().codes();
    let charts = [
        ("stats", "pace", analysis.stats()),
        ("effort_stats", "effort pace", analysis.effort_stats()),
    ];
    for (file, what, stats) in charts {
        let stats = match stats {
            Ok(stats) => stats,
            Err(err) => {
                warn!("{}: no {} chart ({})", name, what, err);
                continue;
            }
        };
        let path = dir.join(format!("{}.{}", file, kind.extension()));
        let chart = match PaceChart::from_table(format!("{} - {}", name, what), &codes, &stats, faster_up) {
            Ok(chart) => chart,
            Err(err) => {
                warn!("{}: no {} chart ({})", name, what, err);
                continue;
            }
        };
        match render_chart_guard(&chart, &path, kind) {
            Ok(()) => info!("Wrote {}", path.display()),
            Err(err) => warn!("Failed to render {}: {}", path.display(), err),
        }
    }
}

/// Objective row and peer means, formatted for output.
#[derive(Serialize, Debug)]
struct ObjectiveReport {
    race: String,
    target: String,
    runner: String,
    rank: usize,
    peers: usize,
    window: (usize, usize),
    times: FormattedTable,
    paces: FormattedTable,
    effort_paces: FormattedTable,
    peer_times: FormattedTable,
    peer_paces: FormattedTable,
    peer_effort_paces: FormattedTable,
}

fn handle_objective(args: ObjectiveArgs) -> Result<()> {
    let race = load_race(&args.input)?;
    let (name, _, mut analysis) = build_analysis(race, &args.overrides)?;
    let row = analysis
        .find_nearest(&args.target)
        .with_context(|| format!("no objective for {}", args.target))?;
    let n = args.peers.unwrap_or(analysis.params().peer_window);
    let window = analysis.peer_window(n)?;
    let runner = analysis.objective_runner().unwrap_or_default().to_string();
    info!(
        "{}: target {} -> runner {} (rank {}), peers {}..{}",
        name,
        args.target,
        runner,
        row + 1,
        window.start + 1,
        window.end
    );

    let elapsed = |table: Table| table.formatted(DurationStyle::Elapsed);
    let report = ObjectiveReport {
        race: name.clone(),
        target: args.target.clone(),
        runner,
        rank: row + 1,
        peers: n,
        window: (window.start, window.end),
        times: elapsed(analysis.objective_times()?),
        paces: elapsed(analysis.objective_paces()?),
        effort_paces: elapsed(analysis.objective_effort_paces()?),
        peer_times: elapsed(analysis.peer_mean_times(n)?),
        peer_paces: elapsed(analysis.peer_mean_paces(n)?),
        peer_effort_paces: elapsed(analysis.peer_mean_effort_paces(n)?),
    };

    if args.json {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        serde_json::to_writer_pretty(&mut handle, &report)?;
        writeln!(handle)?;
    } else {
        write_report_csv(&report, io::stdout().lock())?;
    }

    if let Some(path) = args.chart.as_ref() {
        let kind = ChartKind::from_path(path);
        let codes = analysis.course().codes();
        let objective = analysis.objective_paces()?;
        let peers = analysis.peer_mean_paces(n)?;
        let mut chart = PaceChart::from_table(
            format!("{} - objective {}", name, args.target),
            &codes,
            &objective,
            args.faster_up,
        )?;
        chart.extend(&PaceChart::from_table(String::new(), &codes, &peers, args.faster_up)?);
        match render_chart_guard(&chart, path, kind) {
            Ok(()) => info!("Wrote {}", path.display()),
            Err(err) => warn!("Failed to render {}: {}", path.display(), err),
        }
    }
    Ok(())
}

fn write_report_csv<W: Write>(report: &ObjectiveReport, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    let tables = [
        ("times", &report.times),
        ("paces", &report.paces),
        ("effort_paces", &report.effort_paces),
        ("peer_times", &report.peer_times),
        ("peer_paces", &report.peer_paces),
        ("peer_effort_paces", &report.peer_effort_paces),
    ];
    // Every table shares the checkpoint columns, so one header covers them.
    let mut header = vec!["table", "id"];
    header.extend(report.times.columns.iter().map(String::as_str));
    writer.write_record(&header)?;
    for (name, table) in tables {
        write_table_body(table, Some(name), &mut writer)?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChartKind {
    Png,
    Svg,
}

impl ChartKind {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("svg") => ChartKind::Svg,
            _ => ChartKind::Png,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ChartKind::Png => "png",
            ChartKind::Svg => "svg",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
struct PlotSeries {
    label: String,
    /// (checkpoint position, seconds per km); negated when faster is up.
    points: Vec<(f64, f64)>,
}

#[derive(Clone, Debug, PartialEq)]
struct PaceChart {
    title: String,
    codes: Vec<String>,
    series: Vec<PlotSeries>,
}

impl PaceChart {
    fn from_table(title: String, codes: &[String], table: &Table, faster_up: bool) -> Result<Self> {
        let sign = if faster_up { -1.0 } else { 1.0 };
        let mut series = Vec::new();
        for line in table.chart_series() {
            let mut points = Vec::with_capacity(line.points.len());
            for (code, duration) in &line.points {
                let x = codes
                    .iter()
                    .position(|c| c == code)
                    .ok_or_else(|| anyhow!("unknown checkpoint {}", code))?;
                let seconds = parse_clock(duration)
                    .with_context(|| format!("bad chart value {} at {}", duration, code))?;
                points.push((x as f64, sign * seconds as f64));
            }
            series.push(PlotSeries {
                label: line.label,
                points,
            });
        }
        Ok(Self {
            title,
            codes: codes.to_vec(),
            series,
        })
    }

    fn extend(&mut self, other: &PaceChart) {
        self.series.extend(other.series.iter().cloned());
    }

    fn y_range(&self) -> (f64, f64) {
        let values = self.series.iter().flat_map(|s| s.points.iter().map(|p| p.1));
        let (lo, hi) = values.fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
        if lo > hi {
            return (0.0, 600.0);
        }
        let pad = ((hi - lo) * 0.05).max(30.0);
        (lo - pad, hi + pad)
    }
}

fn render_chart_guard(chart: &PaceChart, path: &Path, kind: ChartKind) -> Result<(), String> {
    let render = || -> Result<(), String> {
        render_pace_chart(chart, path, kind).map_err(|e| format!("plotting error: {}", e))
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn render_pace_chart(chart: &PaceChart, path: &Path, kind: ChartKind) -> Result<()> {
    if chart.series.iter().all(|s| s.points.is_empty()) {
        return Err(anyhow!("no defined paces to plot for {}", chart.title));
    }
    match kind {
        ChartKind::Png => {
            let root = BitMapBackend::new(path, (1280, 720)).into_drawing_area();
            draw_pace_chart(root, chart)?;
        }
        ChartKind::Svg => {
            let root = SVGBackend::new(path, (1280, 720)).into_drawing_area();
            draw_pace_chart(root, chart)?;
        }
    }
    Ok(())
}

fn draw_pace_chart<DB>(root: DrawingArea<DB, plotters::coord::Shift>, chart: &PaceChart) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let area = root;
    area.fill(&WHITE)?;

    let x_max = chart.codes.len().saturating_sub(1).max(1) as f64;
    let (y_lo, y_hi) = chart.y_range();
    let codes = &chart.codes;
    let title_font = FontDesc::new(FontFamily::SansSerif, 24.0, FontStyle::Normal);
    let axis_font = FontDesc::new(FontFamily::SansSerif, 16.0, FontStyle::Normal);

    let mut plot = ChartBuilder::on(&area)
        .caption(&chart.title, title_font)
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 80)
        .set_label_area_size(LabelAreaPosition::Bottom, 50)
        .build_cartesian_2d(-0.2..x_max + 0.2, y_lo..y_hi)?;

    plot.configure_mesh()
        .light_line_style(&TRANSPARENT)
        .x_labels(codes.len())
        .x_label_formatter(&|v| checkpoint_label(codes, *v))
        .y_label_formatter(&|v| format_duration(v.abs().round() as i64))
        .y_desc("pace / km")
        .label_style(axis_font.color(&BLACK.mix(0.85)))
        .draw()?;

    let palette = [
        RGBColor(200, 0, 100),
        RGBColor(50, 50, 50),
        RGBColor(30, 144, 255),
        RGBColor(34, 139, 34),
        RGBColor(255, 140, 0),
    ];
    for (idx, series) in chart.series.iter().enumerate() {
        let color = palette[idx % palette.len()];
        let style = ShapeStyle {
            color: color.to_rgba(),
            filled: false,
            stroke_width: 2,
        };
        plot.draw_series(LineSeries::new(series.points.iter().copied(), style))?
            .label(series.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], color));
    }

    let legend_font = FontDesc::new(FontFamily::SansSerif, 18.0, FontStyle::Normal);
    plot.configure_series_labels()
        .background_style(&WHITE.mix(0.7))
        .border_style(&BLACK.mix(0.3))
        .label_font(legend_font.color(&BLACK))
        .position(SeriesLabelPosition::UpperRight)
        .draw()?;

    area.present()?;
    Ok(())
}

/// Checkpoint code for integral x positions, blank between them.
fn checkpoint_label(codes: &[String], x: f64) -> String {
    let idx = x.round();
    if (x - idx).abs() > 1e-6 || idx < 0.0 {
        return String::new();
    }
    codes.get(idx as usize).cloned().unwrap_or_default()
}
