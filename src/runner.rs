//! Backtest runner
//!
//! Runs every configured detector over one series, keeps a failing detector
//! from taking the others down, merges the ledgers and summarises them.

use std::any::Any;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::series::{CandleSeries, Indicator};
use crate::simulator::{TieBreak, TradeSimulator};
use crate::{BacktestError, BuiltinDetector, PatternKind, Result, ScanContext, Trade};

// ============================================================
// CONFIGURATION
// ============================================================

/// Runner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Only the most recent N bars are scanned; `None` scans the full history
    pub lookback: Option<usize>,
    pub tie_break: TieBreak,
    /// Run detectors on the rayon pool
    pub parallel: bool,
    /// Number of patterns ranked in [`Summary::top`]
    pub top_patterns: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            lookback: Some(3000),
            tie_break: TieBreak::default(),
            parallel: false,
            top_patterns: 3,
        }
    }
}

impl RunnerConfig {
    fn validate(&self) -> Result<()> {
        if self.lookback == Some(0) {
            return Err(BacktestError::InvalidConfig("lookback must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Everything needed to build a runner, as read from JSON
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub runner: RunnerConfig,
    /// Computed up front in addition to what the detectors declare
    pub indicators: Vec<Indicator>,
    /// Empty means every builtin detector with its defaults
    pub detectors: Vec<BuiltinDetector>,
}

impl BacktestConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| BacktestError::ConfigParse(e.to_string()))
    }
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating BacktestRunner instances
#[derive(Debug, Clone)]
pub struct RunnerBuilder {
    detectors: Vec<BuiltinDetector>,
    indicators: Vec<Indicator>,
    config: RunnerConfig,
}

impl Default for RunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RunnerBuilder {
    pub fn new() -> Self {
        Self {
            detectors: Vec::new(),
            indicators: Vec::new(),
            config: RunnerConfig::default(),
        }
    }

    /// Builder preloaded from a parsed config
    pub fn from_config(config: BacktestConfig) -> Self {
        let builder = Self {
            detectors: config.detectors,
            indicators: config.indicators,
            config: config.runner,
        };
        if builder.detectors.is_empty() {
            builder.with_all_defaults()
        } else {
            builder
        }
    }

    /// Add all builtin patterns with default configurations
    pub fn with_all_defaults(mut self) -> Self {
        self.detectors.extend(BuiltinDetector::all_defaults());
        self
    }

    /// Add a builtin detector
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, detector: BuiltinDetector) -> Self {
        self.detectors.push(detector);
        self
    }

    /// Add with config validation
    pub fn add_checked(mut self, detector: BuiltinDetector) -> Result<Self> {
        detector.validate_config()?;
        self.detectors.push(detector);
        Ok(self)
    }

    /// Scan only the most recent `bars` bars
    pub fn lookback(mut self, bars: usize) -> Self {
        self.config.lookback = Some(bars);
        self
    }

    /// Scan the whole series
    pub fn full_history(mut self) -> Self {
        self.config.lookback = None;
        self
    }

    pub fn tie_break(mut self, tie_break: TieBreak) -> Self {
        self.config.tie_break = tie_break;
        self
    }

    pub fn parallel(mut self, enable: bool) -> Self {
        self.config.parallel = enable;
        self
    }

    pub fn top_patterns(mut self, n: usize) -> Self {
        self.config.top_patterns = n;
        self
    }

    /// Compute an extra indicator with the series
    pub fn indicator(mut self, indicator: Indicator) -> Self {
        self.indicators.push(indicator);
        self
    }

    /// Build the runner. Detector parameters are checked per run, so one bad
    /// detector shows up in its own report instead of failing the build.
    pub fn build(self) -> Result<BacktestRunner> {
        self.config.validate()?;
        if let Some(bad) = self.indicators.iter().find(|i| i.period() == 0) {
            return Err(BacktestError::InvalidConfig(format!("{bad} has a zero period")));
        }
        Ok(BacktestRunner {
            detectors: self.detectors,
            indicators: self.indicators,
            config: self.config,
        })
    }
}

// ============================================================
// RUNNER
// ============================================================

/// Runs a fixed set of detectors over candle series
#[derive(Debug, Clone)]
pub struct BacktestRunner {
    detectors: Vec<BuiltinDetector>,
    indicators: Vec<Indicator>,
    config: RunnerConfig,
}

impl BacktestRunner {
    #[inline]
    pub fn detectors(&self) -> &[BuiltinDetector] {
        &self.detectors
    }

    #[inline]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Every indicator a detector reads, plus the configured extras
    pub fn requirements(&self) -> Vec<Indicator> {
        let mut all: Vec<Indicator> = self
            .indicators
            .iter()
            .copied()
            .chain(self.detectors.iter().flat_map(|d| d.indicators()))
            .collect();
        all.sort_unstable();
        all.dedup();
        all
    }

    pub fn run(&self, series: &CandleSeries) -> Result<BacktestReport> {
        let series = series.require(self.requirements())?;
        let start = self.config.lookback.map_or(0, |n| series.tail(n));
        let ctx = ScanContext::new(&series)
            .starting_at(start)
            .with_simulator(TradeSimulator::new(self.config.tie_break));

        info!(
            "Backtest started: {} bars ({} scanned), {} detectors",
            series.len(),
            series.len() - start,
            self.detectors.len()
        );

        let outcomes: Vec<(PatternKind, Result<Vec<Trade>>)> = if self.config.parallel {
            self.detectors
                .par_iter()
                .map(|d| (d.kind(), run_detector(d, &ctx)))
                .collect()
        } else {
            self.detectors
                .iter()
                .map(|d| (d.kind(), run_detector(d, &ctx)))
                .collect()
        };

        let report = BacktestReport::from_outcomes(outcomes, self.config.top_patterns);
        info!(
            "Backtest finished: {} trades, total profit {:.5}, {} failed detectors",
            report.trades.len(),
            report.summary.overall.total_profit,
            report.summary.failed_patterns
        );
        Ok(report)
    }

    /// Run, then hand the report to `sink`
    pub fn run_and_publish<S: ReportSink + ?Sized>(
        &self,
        series: &CandleSeries,
        sink: &mut S,
    ) -> Result<BacktestReport> {
        let report = self.run(series)?;
        sink.publish(&report)?;
        Ok(report)
    }
}

/// One detector, isolated: config and length checks, then the scan with any
/// panic turned into an error.
fn run_detector(detector: &BuiltinDetector, ctx: &ScanContext<'_>) -> Result<Vec<Trade>> {
    detector.validate_config()?;
    let (need, got) = (detector.min_bars(), ctx.series.len());
    if got < need {
        return Err(BacktestError::InsufficientData { need, got });
    }
    panic::catch_unwind(AssertUnwindSafe(|| detector.scan(ctx))).unwrap_or_else(|payload| {
        Err(BacktestError::DetectorPanicked {
            kind: detector.kind(),
            message: panic_message(payload.as_ref()),
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ============================================================
// REPORT
// ============================================================

/// Aggregate figures over a set of trades
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatternStats {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Fraction of trades with profit > 0; zero without trades
    pub win_rate: f64,
    pub total_profit: f64,
    pub average_profit: f64,
    pub best: Option<f64>,
    pub worst: Option<f64>,
}

impl PatternStats {
    pub fn from_trades<'a>(trades: impl IntoIterator<Item = &'a Trade>) -> Self {
        let mut stats = Self::default();
        for trade in trades {
            stats.trades += 1;
            stats.wins += usize::from(trade.is_win());
            stats.losses += usize::from(trade.is_loss());
            stats.total_profit += trade.profit;
            stats.best = Some(stats.best.map_or(trade.profit, |b| b.max(trade.profit)));
            stats.worst = Some(stats.worst.map_or(trade.profit, |w| w.min(trade.profit)));
        }
        if stats.trades > 0 {
            stats.win_rate = stats.wins as f64 / stats.trades as f64;
            stats.average_profit = stats.total_profit / stats.trades as f64;
        }
        stats
    }
}

/// One detector's outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternReport {
    pub kind: PatternKind,
    pub stats: PatternStats,
    /// Set when the detector failed; its stats are then empty
    pub error: Option<String>,
}

impl PatternReport {
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub overall: PatternStats,
    /// Detectors that ran, split by the sign of their total profit
    pub profitable_patterns: usize,
    pub losing_patterns: usize,
    pub break_even_patterns: usize,
    pub failed_patterns: usize,
    /// Patterns with trades, best total profit first
    pub top: Vec<PatternKind>,
}

impl Summary {
    fn new(trades: &[Trade], patterns: &[PatternReport], top_n: usize) -> Self {
        let mut summary = Summary {
            overall: PatternStats::from_trades(trades),
            ..Default::default()
        };
        for pattern in patterns {
            if !pattern.is_ok() {
                summary.failed_patterns += 1;
            } else if pattern.stats.total_profit > 0.0 {
                summary.profitable_patterns += 1;
            } else if pattern.stats.total_profit < 0.0 {
                summary.losing_patterns += 1;
            } else {
                summary.break_even_patterns += 1;
            }
        }

        summary.top = rank_by_profit(patterns, top_n).into_iter().map(|p| p.kind).collect();
        summary
    }
}

/// Patterns with trades, best total profit first, cut to `n`
fn rank_by_profit(patterns: &[PatternReport], n: usize) -> Vec<&PatternReport> {
    let mut ranked: Vec<&PatternReport> =
        patterns.iter().filter(|p| p.stats.trades > 0).collect();
    // Stable: equal totals keep detector order
    ranked.sort_by(|a, b| b.stats.total_profit.total_cmp(&a.stats.total_profit));
    ranked.truncate(n);
    ranked
}

/// Merged ledger plus per-pattern and overall statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BacktestReport {
    /// All trades, ordered by entry date; ties keep detector order
    pub trades: Vec<Trade>,
    /// One entry per detector, in detector order
    pub patterns: Vec<PatternReport>,
    pub summary: Summary,
}

impl BacktestReport {
    fn from_outcomes(outcomes: Vec<(PatternKind, Result<Vec<Trade>>)>, top_n: usize) -> Self {
        let mut trades = Vec::new();
        let mut patterns = Vec::with_capacity(outcomes.len());

        for (kind, outcome) in outcomes {
            match outcome {
                Ok(ledger) => {
                    debug!("{kind}: {} trades", ledger.len());
                    patterns.push(PatternReport {
                        kind,
                        stats: PatternStats::from_trades(&ledger),
                        error: None,
                    });
                    trades.extend(ledger);
                }
                Err(err) => {
                    warn!("{kind} detector failed: {err}");
                    patterns.push(PatternReport {
                        kind,
                        stats: PatternStats::default(),
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        trades.sort_by_key(|t| t.entry_date);
        let summary = Summary::new(&trades, &patterns, top_n);
        Self {
            trades,
            patterns,
            summary,
        }
    }

    /// First report for `kind`
    pub fn pattern(&self, kind: PatternKind) -> Option<&PatternReport> {
        self.patterns.iter().find(|p| p.kind == kind)
    }

    pub fn trades_for(&self, kind: PatternKind) -> impl Iterator<Item = &Trade> + '_ {
        self.trades.iter().filter(move |t| t.kind == kind)
    }

    /// The `n` best patterns by total profit
    pub fn top_patterns(&self, n: usize) -> Vec<&PatternReport> {
        rank_by_profit(&self.patterns, n)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| BacktestError::Report(e.to_string()))
    }
}

// ============================================================
// SINKS
// ============================================================

/// Destination for finished reports
pub trait ReportSink {
    fn publish(&mut self, report: &BacktestReport) -> Result<()>;
}

/// Collects reports in memory
impl ReportSink for Vec<BacktestReport> {
    fn publish(&mut self, report: &BacktestReport) -> Result<()> {
        self.push(report.clone());
        Ok(())
    }
}

/// Writes each report as one pretty-printed JSON document
#[derive(Debug)]
pub struct JsonSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ReportSink for JsonSink<W> {
    fn publish(&mut self, report: &BacktestReport) -> Result<()> {
        serde_json::to_writer_pretty(&mut self.writer, report)
            .map_err(|e| BacktestError::Report(e.to_string()))?;
        self.writer
            .write_all(b"\n")
            .and_then(|()| self.writer.flush())
            .map_err(|e| BacktestError::Report(e.to_string()))
    }
}

// ============================================================
// PARALLEL BACKTESTS
// ============================================================

/// Report for a single instrument
#[derive(Debug)]
pub struct InstrumentReport {
    pub symbol: String,
    pub report: BacktestReport,
}

/// Error from backtesting a single instrument
#[derive(Debug)]
pub struct InstrumentError {
    pub symbol: String,
    pub error: BacktestError,
}

/// Run one runner over many instruments in parallel
pub fn backtest_parallel<'a, I>(
    runner: &BacktestRunner,
    instruments: I,
) -> (Vec<InstrumentReport>, Vec<InstrumentError>)
where
    I: IntoParallelIterator<Item = (&'a str, &'a CandleSeries)>,
{
    let results: Vec<_> = instruments
        .into_par_iter()
        .map(|(symbol, series)| {
            runner
                .run(series)
                .map(|report| InstrumentReport {
                    symbol: symbol.to_string(),
                    report,
                })
                .map_err(|error| InstrumentError {
                    symbol: symbol.to_string(),
                    error,
                })
        })
        .collect();

    let mut successes = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(r) => successes.push(r),
            Err(e) => errors.push(e),
        }
    }

    (successes, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::BroadeningBottomsDetector;
    use crate::series::Candle;
    use crate::simulator::ExitReason;
    use crate::Period;
    use chrono::{Days, NaiveDate};
    use std::collections::BTreeMap;

    fn day(offset: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 6, 1).unwrap() + Days::new(offset)
    }

    fn series(bars: &[(f64, f64, f64, f64)]) -> CandleSeries {
        let candles = bars
            .iter()
            .enumerate()
            .map(|(i, &(o, h, l, c))| Candle::new(day(i as u64), o, h, l, c))
            .collect();
        CandleSeries::new(candles).unwrap()
    }

    /// Broadening run over bars 0..=3, then quiet bars
    fn broadening_series() -> CandleSeries {
        let mut bars = vec![
            (100.0, 101.0, 99.0, 100.5),
            (100.5, 101.5, 98.5, 100.0),
            (100.0, 102.0, 98.0, 101.0),
            (101.0, 102.5, 97.5, 102.0),
        ];
        bars.extend(std::iter::repeat((102.0, 102.3, 101.8, 102.1)).take(8));
        series(&bars)
    }

    fn trade(kind: PatternKind, offset: u64, profit: f64) -> Trade {
        Trade {
            kind,
            direction: kind.direction(),
            pattern_date: day(offset),
            entry_date: day(offset + 1),
            entry_price: 100.0,
            exit_date: day(offset + 2),
            exit_price: 100.0 + profit,
            exit_reason: ExitReason::Timeout,
            profit,
            anchors: BTreeMap::new(),
            measurements: BTreeMap::new(),
        }
    }

    #[test]
    fn test_pattern_stats() {
        let trades = [
            trade(PatternKind::BullishHammer, 0, 2.0),
            trade(PatternKind::BullishHammer, 3, -1.0),
            trade(PatternKind::BullishHammer, 6, 0.0),
            trade(PatternKind::BullishHammer, 9, 3.0),
        ];
        let stats = PatternStats::from_trades(&trades);
        assert_eq!(stats.trades, 4);
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.win_rate, 0.5);
        assert_eq!(stats.total_profit, 4.0);
        assert_eq!(stats.average_profit, 1.0);
        assert_eq!(stats.best, Some(3.0));
        assert_eq!(stats.worst, Some(-1.0));

        let empty = PatternStats::from_trades(std::iter::empty());
        assert_eq!(empty.win_rate, 0.0);
        assert_eq!(empty.best, None);
    }

    #[test]
    fn test_report_merges_and_ranks() {
        let outcomes = vec![
            (
                PatternKind::DoubleTops,
                Ok(vec![trade(PatternKind::DoubleTops, 5, -2.0)]),
            ),
            (
                PatternKind::CupWithHandle,
                Err(BacktestError::InsufficientData { need: 9, got: 3 }),
            ),
            (
                PatternKind::BullishHammer,
                Ok(vec![
                    trade(PatternKind::BullishHammer, 0, 1.0),
                    trade(PatternKind::BullishHammer, 5, 0.5),
                ]),
            ),
            (PatternKind::ShootingStar, Ok(Vec::new())),
        ];
        let report = BacktestReport::from_outcomes(outcomes, 3);

        let kinds: Vec<_> = report.trades.iter().map(|t| t.kind).collect();
        // Same entry date keeps detector order
        assert_eq!(
            kinds,
            vec![
                PatternKind::BullishHammer,
                PatternKind::DoubleTops,
                PatternKind::BullishHammer
            ]
        );
        assert_eq!(report.summary.profitable_patterns, 1);
        assert_eq!(report.summary.losing_patterns, 1);
        assert_eq!(report.summary.break_even_patterns, 1);
        assert_eq!(report.summary.failed_patterns, 1);
        assert_eq!(
            report.summary.top,
            vec![PatternKind::BullishHammer, PatternKind::DoubleTops]
        );
        assert!(report.pattern(PatternKind::CupWithHandle).unwrap().error.is_some());
        assert_eq!(report.trades_for(PatternKind::BullishHammer).count(), 2);
        assert_eq!(report.top_patterns(1)[0].kind, PatternKind::BullishHammer);
    }

    #[test]
    fn test_top_patterns_match_summary() {
        let outcomes = vec![
            (
                PatternKind::DoubleTops,
                Ok(vec![trade(PatternKind::DoubleTops, 1, 0.5)]),
            ),
            (
                PatternKind::FlagsHighTight,
                Ok(vec![trade(PatternKind::FlagsHighTight, 2, 0.5)]),
            ),
            (
                PatternKind::ShootingStar,
                Ok(vec![trade(PatternKind::ShootingStar, 3, 2.0)]),
            ),
        ];
        let report = BacktestReport::from_outcomes(outcomes, 2);

        let ranked: Vec<_> = report.top_patterns(2).iter().map(|p| p.kind).collect();
        assert_eq!(ranked, report.summary.top);
        // Equal totals keep detector order
        assert_eq!(ranked, vec![PatternKind::ShootingStar, PatternKind::DoubleTops]);
        assert_eq!(report.top_patterns(10).len(), 3);
        assert!(report.top_patterns(0).is_empty());
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "runner": {"lookback": null, "parallel": true, "tie_break": "stop_loss_first"},
            "indicators": [{"sma": 30}],
            "detectors": [{"pattern": "broadening_bottoms", "run_length": 5}]
        }"#;
        let config = BacktestConfig::from_json(json).unwrap();
        assert_eq!(config.runner.lookback, None);
        assert_eq!(config.runner.top_patterns, 3);
        let runner = RunnerBuilder::from_config(config).build().unwrap();
        assert_eq!(runner.detectors().len(), 1);
        assert_eq!(runner.config().tie_break, TieBreak::StopLossFirst);
        assert!(runner.requirements().contains(&Indicator::Sma(30)));
    }

    #[test]
    fn test_config_parse_error() {
        let err = BacktestConfig::from_json(r#"{"detectors": [{"pattern": "nope"}]}"#).unwrap_err();
        assert!(matches!(err, BacktestError::ConfigParse(_)));
    }

    #[test]
    fn test_empty_detector_list_means_all() {
        let runner = RunnerBuilder::from_config(BacktestConfig::default())
            .build()
            .unwrap();
        assert_eq!(runner.detectors().len(), PatternKind::ALL.len());
    }

    #[test]
    fn test_build_rejects_zero_lookback() {
        assert!(RunnerBuilder::new().lookback(0).build().is_err());
        assert!(RunnerBuilder::new().indicator(Indicator::Rsi(0)).build().is_err());
    }

    #[test]
    fn test_add_checked_rejects_bad_detector() {
        let bad = BuiltinDetector::BroadeningBottoms(BroadeningBottomsDetector {
            take_profit: 0.9,
            ..Default::default()
        });
        assert!(RunnerBuilder::new().add_checked(bad).is_err());
    }

    #[test]
    fn test_run_isolates_failing_detector() {
        let s = broadening_series();
        let runner = RunnerBuilder::new()
            .add(BuiltinDetector::BroadeningBottoms(BroadeningBottomsDetector {
                run_length: Period::new(500).unwrap(),
                ..Default::default()
            }))
            .add(BuiltinDetector::BroadeningBottoms(Default::default()))
            .build()
            .unwrap();
        let report = runner.run(&s).unwrap();
        assert_eq!(report.patterns.len(), 2);
        assert!(report.patterns[0].error.is_some());
        assert_eq!(report.patterns[0].stats.trades, 0);
        assert!(report.patterns[1].is_ok());
        assert_eq!(report.patterns[1].stats.trades, 1);
        assert_eq!(report.trades[0].entry_date, day(3));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let s = broadening_series();
        let sequential = RunnerBuilder::new().with_all_defaults().build().unwrap();
        let parallel = RunnerBuilder::new()
            .with_all_defaults()
            .parallel(true)
            .build()
            .unwrap();
        assert_eq!(sequential.run(&s).unwrap(), parallel.run(&s).unwrap());
    }

    #[test]
    fn test_lookback_skips_old_patterns() {
        let s = broadening_series();
        let runner = RunnerBuilder::new()
            .add(BuiltinDetector::BroadeningBottoms(Default::default()))
            .lookback(6)
            .build()
            .unwrap();
        assert!(runner.run(&s).unwrap().trades.is_empty());
    }

    #[test]
    fn test_sinks() {
        let s = broadening_series();
        let runner = RunnerBuilder::new()
            .add(BuiltinDetector::BroadeningBottoms(Default::default()))
            .build()
            .unwrap();

        let mut memory: Vec<BacktestReport> = Vec::new();
        let report = runner.run_and_publish(&s, &mut memory).unwrap();
        assert_eq!(memory, vec![report]);

        let mut sink = JsonSink::new(Vec::new());
        runner.run_and_publish(&s, &mut sink).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&sink.into_inner()).unwrap();
        assert_eq!(value["trades"][0]["kind"], "broadening_bottoms");
        assert_eq!(value["trades"][0]["direction"], "long");
        assert_eq!(value["trades"][0]["entry_date"], "2021-06-04");
    }

    #[test]
    fn test_backtest_parallel_splits_errors() {
        let good = broadening_series();
        let short = series(&[(100.0, 101.0, 99.0, 100.5)]);
        let runner = RunnerBuilder::new()
            .add(BuiltinDetector::BroadeningBottoms(Default::default()))
            .build()
            .unwrap();
        let instruments = vec![("GOOD", &good), ("SHORT", &short)];
        let (reports, errors) = backtest_parallel(&runner, instruments);
        assert_eq!(reports.len(), 2);
        assert!(errors.is_empty());
        let short_report = reports.iter().find(|r| r.symbol == "SHORT").unwrap();
        assert!(short_report.report.patterns[0].error.is_some());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
