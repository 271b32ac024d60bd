//! Run detectors
//!
//! Broadening Bottoms, Flags High & Tight.
//!
//! Both look at a fixed number of consecutive bars and need no indicators.

use serde::{Deserialize, Serialize};

use super::helpers::{check_exit, check_fraction, check_non_negative, Signal, TradeEmitter};
use crate::series::OHLCExt;
use crate::simulator::{Entry, ExitRule};
use crate::{
    BacktestError, Direction, PatternDetector, PatternKind, PatternMatch, Period, Result,
    ScanContext, Trade,
};

impl_with_defaults!(BroadeningBottomsDetector, FlagsHighTightDetector);

// ============================================================
// BROADENING BOTTOMS
// ============================================================

/// `run_length` bars with strictly rising highs and strictly falling lows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadeningBottomsDetector {
    pub take_profit: f64,
    pub stop_loss: f64,
    pub max_days: Period,
    pub run_length: Period,
}

impl Default for BroadeningBottomsDetector {
    fn default() -> Self {
        Self {
            take_profit: 1.02,
            stop_loss: 0.997,
            max_days: Period::new_const(25),
            run_length: Period::new_const(4),
        }
    }
}

impl PatternDetector for BroadeningBottomsDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::BroadeningBottoms
    }

    fn min_bars(&self) -> usize {
        self.run_length.get()
    }

    fn validate_config(&self) -> Result<()> {
        check_exit(Direction::Long, self.take_profit, self.stop_loss, self.max_days.get())?;
        if self.run_length.get() < 2 {
            return Err(BacktestError::InvalidValue("run_length must be >= 2"));
        }
        Ok(())
    }

    fn scan(&self, ctx: &ScanContext<'_>) -> Result<Vec<Trade>> {
        let bars = ctx.bars();
        let n = self.run_length.get();
        let rule = ExitRule::new(self.take_profit, self.stop_loss, self.max_days.get());
        let mut emitter = TradeEmitter::new(ctx, self.kind());

        for i in ctx.start..(bars.len() + 1).saturating_sub(n) {
            let run = &bars[i..i + n];
            let broadening = run
                .windows(2)
                .all(|w| w[1].high > w[0].high && w[1].low < w[0].low);
            if !broadening {
                continue;
            }
            let last = i + n - 1;
            let Some(entry) = Entry::at_open(bars, last, Direction::Long) else {
                continue;
            };

            let mut pattern = PatternMatch::new(self.kind(), i)
                .anchor("run_start", i)
                .anchor("run_end", last);
            // A zero-range first bar has no finite expansion
            let first_range = bars[i].range();
            if first_range > 0.0 {
                pattern = pattern.measure("expansion", bars[last].range() / first_range);
            }
            emitter.emit(Signal {
                pattern,
                entry,
                rule,
            })?;
        }

        Ok(emitter.finish())
    }
}

// ============================================================
// FLAGS HIGH & TIGHT
// ============================================================

/// One-bar pole followed by a tight consolidation around the pole's close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagsHighTightDetector {
    pub take_profit: f64,
    pub stop_loss: f64,
    pub max_days: Period,
    /// Pole close-to-close gain, inclusive bounds
    pub min_pole_gain: f64,
    pub max_pole_gain: f64,
    /// Flag bars stay within this fraction of the pole-end close
    pub flag_tolerance: f64,
    pub flag_bars: Period,
}

impl Default for FlagsHighTightDetector {
    fn default() -> Self {
        Self {
            take_profit: 1.04,
            stop_loss: 0.984,
            max_days: Period::new_const(12),
            min_pole_gain: 0.02,
            max_pole_gain: 0.05,
            flag_tolerance: 0.01,
            flag_bars: Period::new_const(2),
        }
    }
}

impl FlagsHighTightDetector {
    /// Offset of the entry bar from the pole start: pole, flag, one bar of pause
    #[inline]
    fn entry_offset(&self) -> usize {
        self.flag_bars.get() + 3
    }
}

impl PatternDetector for FlagsHighTightDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::FlagsHighTight
    }

    fn min_bars(&self) -> usize {
        self.entry_offset() + 1
    }

    fn validate_config(&self) -> Result<()> {
        check_exit(Direction::Long, self.take_profit, self.stop_loss, self.max_days.get())?;
        check_non_negative("min_pole_gain", self.min_pole_gain)?;
        check_non_negative("max_pole_gain", self.max_pole_gain)?;
        check_fraction("flag_tolerance", self.flag_tolerance)?;
        if self.min_pole_gain > self.max_pole_gain {
            return Err(BacktestError::InvalidValue("min_pole_gain must be <= max_pole_gain"));
        }
        Ok(())
    }

    fn scan(&self, ctx: &ScanContext<'_>) -> Result<Vec<Trade>> {
        let bars = ctx.bars();
        let offset = self.entry_offset();
        let flag_end = 2 + self.flag_bars.get();
        let rule = ExitRule::new(self.take_profit, self.stop_loss, self.max_days.get());
        let mut emitter = TradeEmitter::new(ctx, self.kind());

        for i in ctx.start..bars.len().saturating_sub(offset) {
            let pole_end = bars[i + 1].close;
            let gain = pole_end / bars[i].close;
            if gain < 1.0 + self.min_pole_gain || gain > 1.0 + self.max_pole_gain {
                continue;
            }
            let upper = pole_end * (1.0 + self.flag_tolerance);
            let lower = pole_end * (1.0 - self.flag_tolerance);
            let tight = bars[i + 2..i + flag_end]
                .iter()
                .all(|b| b.high <= upper && b.low >= lower);
            if !tight {
                continue;
            }
            let Some(entry) = Entry::at_open(bars, i + offset, Direction::Long) else {
                continue;
            };

            let pattern = PatternMatch::new(self.kind(), i)
                .anchor("pole_start", i)
                .anchor("pole_end", i + 1)
                .anchor("flag_end", i + flag_end - 1)
                .measure("pole_gain", gain - 1.0);
            emitter.emit(Signal {
                pattern,
                entry,
                rule,
            })?;
        }

        Ok(emitter.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{Candle, CandleSeries};
    use chrono::{Days, NaiveDate};

    fn day(offset: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2018, 3, 5).unwrap() + Days::new(offset)
    }

    fn series(bars: &[(f64, f64, f64, f64)]) -> CandleSeries {
        let candles = bars
            .iter()
            .enumerate()
            .map(|(i, &(o, h, l, c))| Candle::new(day(i as u64), o, h, l, c))
            .collect();
        CandleSeries::new(candles).unwrap()
    }

    #[test]
    fn test_broadening_bottom_run() {
        let s = series(&[
            (100.0, 101.0, 99.0, 100.5),
            (100.5, 101.5, 98.5, 100.0),
            (100.0, 102.0, 98.0, 101.0),
            (101.0, 102.5, 97.5, 102.0),
            // Narrow bar breaks the run
            (102.0, 102.3, 101.8, 102.1),
            (102.1, 102.4, 101.9, 102.2),
        ]);
        let ctx = ScanContext::new(&s);
        let trades = BroadeningBottomsDetector::default().scan(&ctx).unwrap();
        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.pattern_date, day(0));
        assert_eq!(trade.entry_date, day(3));
        assert_eq!(trade.entry_price, 101.0);
        assert_eq!(trade.anchors["run_end"], day(3));
        assert_eq!(trade.measurements["expansion"], 2.5);
    }

    #[test]
    fn test_broadening_bottom_from_flat_bar() {
        let s = series(&[
            (100.0, 100.0, 100.0, 100.0),
            (100.0, 100.5, 99.5, 100.0),
            (100.0, 101.0, 99.0, 100.5),
            (100.5, 101.5, 98.5, 101.0),
        ]);
        let ctx = ScanContext::new(&s);
        let trades = BroadeningBottomsDetector::default().scan(&ctx).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].entry_price, 100.5);
        assert!(!trades[0].measurements.contains_key("expansion"));
        assert!(trades[0].measurements.values().all(|v| v.is_finite()));
    }

    #[test]
    fn test_broadening_bottom_needs_strict_expansion() {
        let s = series(&[
            (100.0, 101.0, 99.0, 100.5),
            (100.5, 101.0, 98.5, 100.0),
            (100.0, 102.0, 98.0, 101.0),
            (101.0, 102.5, 97.5, 102.0),
        ]);
        let ctx = ScanContext::new(&s);
        assert!(BroadeningBottomsDetector::default().scan(&ctx).unwrap().is_empty());
    }

    #[test]
    fn test_run_length_validation() {
        let detector = BroadeningBottomsDetector {
            run_length: Period::new(1).unwrap(),
            ..Default::default()
        };
        assert!(detector.validate_config().is_err());
        assert!(BroadeningBottomsDetector::default().validate_config().is_ok());
    }

    #[test]
    fn test_flag_entry_after_consolidation() {
        let s = series(&[
            (99.5, 100.2, 99.4, 100.0),
            // Pole +3%
            (100.0, 103.2, 99.9, 103.0),
            (103.0, 103.5, 102.5, 103.1),
            (103.1, 103.6, 102.4, 102.9),
            (102.9, 103.4, 102.6, 103.2),
            (103.3, 104.0, 103.0, 103.8),
            (103.8, 108.0, 103.5, 107.5),
        ]);
        let ctx = ScanContext::new(&s);
        let trades = FlagsHighTightDetector::default().scan(&ctx).unwrap();
        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.pattern_date, day(0));
        assert_eq!(trade.entry_date, day(5));
        assert_eq!(trade.entry_price, 103.3);
        assert_eq!(trade.exit_date, day(6));
        assert_eq!(trade.exit_price, 103.3 * 1.04);
    }

    #[test]
    fn test_flag_rejects_loose_consolidation() {
        let s = series(&[
            (99.5, 100.2, 99.4, 100.0),
            (100.0, 103.2, 99.9, 103.0),
            // High beyond 1% of the pole close
            (103.0, 104.5, 102.5, 103.1),
            (103.1, 103.6, 102.4, 102.9),
            (102.9, 103.4, 102.6, 103.2),
            (103.3, 104.0, 103.0, 103.8),
        ]);
        let ctx = ScanContext::new(&s);
        assert!(FlagsHighTightDetector::default().scan(&ctx).unwrap().is_empty());
    }
}
