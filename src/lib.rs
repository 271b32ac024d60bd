//! # YAPBT - Yet Another Pattern BackTester
//!
//! Chart pattern detection over daily bars, with every detected pattern traded
//! through a bounded-horizon stop-loss / take-profit simulator.
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{Days, NaiveDate};
//! use yapbt::prelude::*;
//!
//! # fn main() -> yapbt::Result<()> {
//! let first = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
//! let candles: Vec<Candle> = (0..120u64)
//!     .map(|i| {
//!         let base = 100.0 + (i as f64 * 0.3).sin() * 5.0;
//!         Candle::new(first + Days::new(i), base, base + 1.0, base - 1.0, base + 0.2)
//!     })
//!     .collect();
//!
//! // Indicators are computed once, here
//! let series = CandleSeries::new(candles)?;
//!
//! // Runner with all 12 pattern detectors
//! let runner = RunnerBuilder::new().with_all_defaults().build()?;
//! let report = runner.run(&series)?;
//!
//! for pattern in &report.patterns {
//!     println!("{}: {} trades", pattern.kind, pattern.stats.trades);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub mod detectors;
pub mod runner;
pub mod series;
pub mod simulator;

pub mod prelude {
    pub use crate::{
        // Detectors
        detectors::*,
        // Runner
        runner::{
            backtest_parallel, BacktestConfig, BacktestReport, BacktestRunner, InstrumentError,
            InstrumentReport, JsonSink, PatternReport, PatternStats, ReportSink, RunnerBuilder,
            RunnerConfig, Summary,
        },
        // Series
        series::{BarRecord, Candle, CandleSeries, Indicator, Indicators, OHLCExt, OHLC},
        // Simulator
        simulator::{Entry, Exit, ExitReason, ExitRule, Fill, TieBreak, TradeSimulator},
        // Errors
        BacktestError,
        // Engine
        BuiltinDetector,
        // Types
        Direction,
        PatternDetector,
        PatternKind,
        PatternMatch,
        Period,
        Result,
        ScanContext,
        Trade,
    };
}

use series::{Candle, CandleSeries, Indicator};
use simulator::{ExitReason, TradeSimulator};

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, BacktestError>;

/// Errors that can occur while building a series or running a backtest
#[derive(Debug, Clone, thiserror::Error)]
pub enum BacktestError {
    #[error("Missing field `{field}` in bar record {index}")]
    MissingField { index: usize, field: &'static str },

    #[error("Invalid bar at index {index}: {reason}")]
    InvalidBar { index: usize, reason: &'static str },

    #[error("Bar {index} is not dated strictly after the previous bar")]
    UnorderedDate { index: usize },

    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: need {need} bars, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("Indicator {0} was not computed for this series")]
    MissingIndicator(Indicator),

    #[error("{kind} detector panicked: {message}")]
    DetectorPanicked { kind: PatternKind, message: String },

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Report error: {0}")]
    Report(String),
}

/// Checks a finite parameter against an inclusive range.
pub(crate) fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<()> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(BacktestError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Bar count (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(BacktestError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// PATTERNS AND TRADES
// ============================================================

/// The twelve chart geometries this crate knows how to trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    BullishHammer,
    InvertedHammer,
    ShootingStar,
    TweezerBottoms,
    BroadeningBottoms,
    FlagsHighTight,
    DoubleTops,
    DoubleBottoms,
    HeadAndShoulders,
    BroadeningFormations,
    CupWithHandle,
    InvertedCupWithHandle,
}

impl PatternKind {
    pub const ALL: [PatternKind; 12] = [
        PatternKind::BullishHammer,
        PatternKind::InvertedHammer,
        PatternKind::ShootingStar,
        PatternKind::TweezerBottoms,
        PatternKind::BroadeningBottoms,
        PatternKind::FlagsHighTight,
        PatternKind::DoubleTops,
        PatternKind::DoubleBottoms,
        PatternKind::HeadAndShoulders,
        PatternKind::BroadeningFormations,
        PatternKind::CupWithHandle,
        PatternKind::InvertedCupWithHandle,
    ];

    /// Human-readable pattern name
    pub fn as_str(self) -> &'static str {
        match self {
            PatternKind::BullishHammer => "Bullish Hammer",
            PatternKind::InvertedHammer => "Inverted Hammer",
            PatternKind::ShootingStar => "Shooting Star",
            PatternKind::TweezerBottoms => "Tweezer Bottoms",
            PatternKind::BroadeningBottoms => "Broadening Bottoms",
            PatternKind::FlagsHighTight => "Flags High & Tight",
            PatternKind::DoubleTops => "Double Tops",
            PatternKind::DoubleBottoms => "Double Bottoms",
            PatternKind::HeadAndShoulders => "Head and Shoulders Top",
            PatternKind::BroadeningFormations => "Broadening Formations",
            PatternKind::CupWithHandle => "Cup with Handle",
            PatternKind::InvertedCupWithHandle => "Inverted Cup with Handle",
        }
    }

    /// Side every trade of this pattern is taken on
    pub fn direction(self) -> Direction {
        match self {
            PatternKind::ShootingStar
            | PatternKind::DoubleTops
            | PatternKind::HeadAndShoulders
            | PatternKind::InvertedCupWithHandle => Direction::Short,
            _ => Direction::Long,
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trade side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    #[inline]
    pub fn is_long(self) -> bool {
        matches!(self, Direction::Long)
    }

    #[inline]
    pub fn is_short(self) -> bool {
        matches!(self, Direction::Short)
    }

    /// Profit of a round trip: exit - entry for longs, entry - exit for shorts
    #[inline]
    pub fn profit(self, entry_price: f64, exit_price: f64) -> f64 {
        match self {
            Direction::Long => exit_price - entry_price,
            Direction::Short => entry_price - exit_price,
        }
    }
}

/// A geometry accepted by a detector, before it is traded.
///
/// `pattern_index` is the bar at which the geometry was first identifiable;
/// it becomes the trade's pattern date. Anchors name the bars that define the
/// shape (shoulders, tops, breakout); measurements are copied onto the trade.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub kind: PatternKind,
    pub pattern_index: usize,
    pub anchors: Vec<(&'static str, usize)>,
    pub measurements: BTreeMap<&'static str, f64>,
}

impl PatternMatch {
    pub fn new(kind: PatternKind, pattern_index: usize) -> Self {
        Self {
            kind,
            pattern_index,
            anchors: Vec::new(),
            measurements: BTreeMap::new(),
        }
    }

    pub fn anchor(mut self, name: &'static str, index: usize) -> Self {
        self.anchors.push((name, index));
        self
    }

    pub fn measure(mut self, name: &'static str, value: f64) -> Self {
        self.measurements.insert(name, value);
        self
    }

    pub fn anchor_index(&self, name: &str) -> Option<usize> {
        self.anchors
            .iter()
            .find(|(anchor, _)| *anchor == name)
            .map(|&(_, index)| index)
    }
}

/// One simulated round trip in the ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub kind: PatternKind,
    pub direction: Direction,
    pub pattern_date: NaiveDate,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub exit_date: NaiveDate,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub profit: f64,
    /// Dates of the bars that define the geometry
    pub anchors: BTreeMap<&'static str, NaiveDate>,
    pub measurements: BTreeMap<&'static str, f64>,
}

impl Trade {
    #[inline]
    pub fn is_win(&self) -> bool {
        self.profit > 0.0
    }

    #[inline]
    pub fn is_loss(&self) -> bool {
        self.profit < 0.0
    }
}

// ============================================================
// PATTERN DETECTOR TRAIT
// ============================================================

/// Everything a detector scan reads: the series, where scanning begins and
/// how trades are simulated.
#[derive(Debug, Clone, Copy)]
pub struct ScanContext<'a> {
    pub series: &'a CandleSeries,
    /// First candidate index (indicators still see the full history)
    pub start: usize,
    pub simulator: TradeSimulator,
}

impl<'a> ScanContext<'a> {
    pub fn new(series: &'a CandleSeries) -> Self {
        Self {
            series,
            start: 0,
            simulator: TradeSimulator::default(),
        }
    }

    pub fn starting_at(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    pub fn with_simulator(mut self, simulator: TradeSimulator) -> Self {
        self.simulator = simulator;
        self
    }

    #[inline]
    pub fn bars(&self) -> &'a [Candle] {
        self.series.candles()
    }

    /// Indicator value at `index`; `None` while its window is still filling
    #[inline]
    pub fn value(&self, indicator: Indicator, index: usize) -> Result<Option<f64>> {
        self.series.value(indicator, index)
    }
}

/// Pattern detector trait
pub trait PatternDetector: Send + Sync {
    fn kind(&self) -> PatternKind;

    /// Shortest series the detector can scan
    fn min_bars(&self) -> usize;

    /// Indicators the scan reads through [`ScanContext::value`]
    fn indicators(&self) -> Vec<Indicator> {
        Vec::new()
    }

    fn validate_config(&self) -> Result<()> {
        Ok(())
    }

    /// Scan the series and return this detector's trade ledger
    fn scan(&self, ctx: &ScanContext<'_>) -> Result<Vec<Trade>>;
}

// ============================================================
// BUILTIN DETECTORS - generated via macro
// ============================================================

use detectors::*;

/// Macro to generate BuiltinDetector enum without boilerplate
macro_rules! define_builtin_detectors {
    (
        $(
            $variant:ident($detector:ty)
        ),* $(,)?
    ) => {
        /// All builtin detectors - enum dispatch, tagged by `pattern` in configs
        #[derive(Debug, Clone, Serialize, Deserialize)]
        #[serde(tag = "pattern", rename_all = "snake_case")]
        pub enum BuiltinDetector {
            $($variant($detector)),*
        }

        impl BuiltinDetector {
            /// Every builtin detector with its default parameters
            pub fn all_defaults() -> Vec<Self> {
                vec![$(Self::$variant(<$detector>::default())),*]
            }

            #[inline]
            pub fn kind(&self) -> PatternKind {
                match self {
                    $(Self::$variant(d) => PatternDetector::kind(d)),*
                }
            }

            #[inline]
            pub fn min_bars(&self) -> usize {
                match self {
                    $(Self::$variant(d) => PatternDetector::min_bars(d)),*
                }
            }

            pub fn indicators(&self) -> Vec<Indicator> {
                match self {
                    $(Self::$variant(d) => PatternDetector::indicators(d)),*
                }
            }

            pub fn validate_config(&self) -> Result<()> {
                match self {
                    $(Self::$variant(d) => PatternDetector::validate_config(d)),*
                }
            }

            pub fn scan(&self, ctx: &ScanContext<'_>) -> Result<Vec<Trade>> {
                match self {
                    $(Self::$variant(d) => PatternDetector::scan(d, ctx)),*
                }
            }
        }
    };
}

// Declaration order is the reporting order
define_builtin_detectors! {
    // Candlesticks
    BullishHammer(BullishHammerDetector),
    // Runs
    FlagsHighTight(FlagsHighTightDetector),
    BroadeningBottoms(BroadeningBottomsDetector),
    // Support / resistance
    BroadeningFormations(BroadeningFormationsDetector),
    // Local extrema
    HeadAndShoulders(HeadAndShouldersDetector),
    DoubleBottoms(DoubleBottomsDetector),
    DoubleTops(DoubleTopsDetector),
    // Cups
    InvertedCupWithHandle(InvertedCupWithHandleDetector),
    CupWithHandle(CupWithHandleDetector),
    // Candlesticks
    InvertedHammer(InvertedHammerDetector),
    ShootingStar(ShootingStarDetector),
    TweezerBottoms(TweezerBottomsDetector),
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunnerBuilder;
    use chrono::Days;

    fn day(offset: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 1, 4).unwrap() + Days::new(offset)
    }

    fn make_sideways(n: u64) -> CandleSeries {
        let candles = (0..n)
            .map(|i| Candle::new(day(i), 100.0, 101.0, 99.0, 100.5))
            .collect();
        CandleSeries::new(candles).unwrap()
    }

    #[test]
    fn test_period_validation() {
        assert!(Period::new(1).is_ok());
        assert!(Period::new(100).is_ok());
        assert!(Period::new(0).is_err());
    }

    #[test]
    fn test_period_deserialize_rejects_zero() {
        assert!(serde_json::from_str::<Period>("0").is_err());
        assert_eq!(serde_json::from_str::<Period>("7").unwrap().get(), 7);
    }

    #[test]
    fn test_check_range() {
        assert!(check_range("x", 0.5, 0.0, 1.0).is_ok());
        assert!(check_range("x", 1.0, 0.0, 1.0).is_ok());
        assert!(check_range("x", 1.5, 0.0, 1.0).is_err());
        assert!(check_range("x", f64::NAN, 0.0, 1.0).is_err());
    }

    #[test]
    fn test_direction_profit() {
        assert_eq!(Direction::Long.profit(100.0, 103.0), 3.0);
        assert_eq!(Direction::Short.profit(100.0, 103.0), -3.0);
        assert_eq!(Direction::Short.profit(100.0, 97.0), 3.0);
    }

    #[test]
    fn test_pattern_kind_directions() {
        let shorts: Vec<_> = PatternKind::ALL
            .iter()
            .filter(|k| k.direction().is_short())
            .collect();
        assert_eq!(shorts.len(), 4);
        assert_eq!(PatternKind::DoubleTops.direction(), Direction::Short);
        assert_eq!(PatternKind::CupWithHandle.direction(), Direction::Long);
    }

    #[test]
    fn test_pattern_kind_names() {
        assert_eq!(
            PatternKind::HeadAndShoulders.to_string(),
            "Head and Shoulders Top"
        );
        assert_eq!(PatternKind::FlagsHighTight.as_str(), "Flags High & Tight");
    }

    #[test]
    fn test_pattern_match_builder() {
        let m = PatternMatch::new(PatternKind::DoubleTops, 3)
            .anchor("first_top", 3)
            .anchor("second_top", 13)
            .measure("drop", 0.05);
        assert_eq!(m.anchor_index("second_top"), Some(13));
        assert_eq!(m.anchor_index("missing"), None);
        assert_eq!(m.measurements["drop"], 0.05);
    }

    #[test]
    fn test_all_defaults_cover_every_kind() {
        let detectors = BuiltinDetector::all_defaults();
        assert_eq!(detectors.len(), PatternKind::ALL.len());
        for kind in PatternKind::ALL {
            assert!(detectors.iter().any(|d| d.kind() == kind), "{kind} missing");
        }
    }

    #[test]
    fn test_default_configs_are_valid() {
        for detector in BuiltinDetector::all_defaults() {
            assert!(
                detector.validate_config().is_ok(),
                "{} default config rejected",
                detector.kind()
            );
        }
    }

    #[test]
    fn test_detector_tagged_config() {
        let json = r#"{"pattern": "double_tops", "max_days": 15}"#;
        let detector: BuiltinDetector = serde_json::from_str(json).unwrap();
        match detector {
            BuiltinDetector::DoubleTops(d) => {
                assert_eq!(d.max_days.get(), 15);
                // Omitted fields keep their defaults
                assert_eq!(d.price_tolerance, DoubleTopsDetector::default().price_tolerance);
            }
            other => panic!("unexpected detector {other:?}"),
        }
    }

    #[test]
    fn test_detector_config_rejects_zero_period() {
        let json = r#"{"pattern": "broadening_bottoms", "run_length": 0}"#;
        assert!(serde_json::from_str::<BuiltinDetector>(json).is_err());
    }

    #[test]
    fn test_scan_empty_series() {
        let series = CandleSeries::new(Vec::new()).unwrap();
        let ctx = ScanContext::new(&series);
        for detector in BuiltinDetector::all_defaults() {
            assert!(detector.scan(&ctx).unwrap().is_empty());
        }
    }

    #[test]
    fn test_sideways_produces_no_trades() {
        let series = make_sideways(120);
        let runner = RunnerBuilder::new().with_all_defaults().build().unwrap();
        let report = runner.run(&series).unwrap();
        assert!(report.trades.is_empty());
        assert!(report.patterns.iter().all(|p| p.error.is_none()));
    }
}
