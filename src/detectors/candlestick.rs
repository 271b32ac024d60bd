//! Single and two-bar candlestick detectors
//!
//! Bullish Hammer, Inverted Hammer, Shooting Star, Tweezer Bottoms.
//!
//! All four enter at the open of the bar after the signal is confirmed.

use serde::{Deserialize, Serialize};

use super::helpers::{check_exit, check_fraction, check_non_negative, mean, Signal, TradeEmitter};
use crate::series::{Candle, Indicator, OHLCExt};
use crate::simulator::{Entry, ExitRule};
use crate::{
    Direction, PatternDetector, PatternKind, PatternMatch, Period, Result, ScanContext, Trade,
};

impl_with_defaults!(
    BullishHammerDetector,
    InvertedHammerDetector,
    ShootingStarDetector,
    TweezerBottomsDetector,
);

// ============================================================
// BULLISH HAMMER
// ============================================================

/// Long lower wick after a decline; stops tightened to the recent ATR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BullishHammerDetector {
    pub take_profit: f64,
    pub stop_loss: f64,
    pub max_days: Period,
    /// Lower shadow must be at least this many bodies long
    pub body_to_wick: f64,
    /// Body as a fraction of the range, upper bound
    pub max_body_pct: f64,
    /// Upper shadow relative to the lower shadow, upper bound
    pub max_upper_to_lower: f64,
    /// Lower shadow as a fraction of the range, lower bound
    pub min_lower_pct: f64,
    /// Range relative to the open, lower bound
    pub min_hammer_size: f64,
    /// Range relative to ATR, lower bound
    pub min_atr_multiple: f64,
    pub atr_period: Period,
    pub fast_sma: Period,
    pub slow_sma: Period,
    pub atr_stop: f64,
    pub atr_take: f64,
    /// Bars of history before the first candidate
    pub warmup: usize,
}

impl Default for BullishHammerDetector {
    fn default() -> Self {
        Self {
            take_profit: 1.006,
            stop_loss: 0.999,
            max_days: Period::new_const(5),
            body_to_wick: 2.5,
            max_body_pct: 0.30,
            max_upper_to_lower: 0.25,
            min_lower_pct: 0.65,
            min_hammer_size: 0.005,
            min_atr_multiple: 0.5,
            atr_period: Period::new_const(14),
            fast_sma: Period::new_const(10),
            slow_sma: Period::new_const(20),
            atr_stop: 1.5,
            atr_take: 2.5,
            warmup: 20,
        }
    }
}

impl BullishHammerDetector {
    fn is_hammer(&self, bar: &Candle) -> bool {
        let body = bar.body();
        let range = bar.range();
        let lower = bar.lower_shadow();
        bar.is_bullish()
            && body <= range * self.max_body_pct
            && lower >= body * self.body_to_wick
            && bar.upper_shadow() <= lower * self.max_upper_to_lower
            && lower >= range * self.min_lower_pct
            && range >= bar.open * self.min_hammer_size
    }

    /// Falling closes, fast SMA under slow SMA, close under slow SMA
    fn in_downtrend(&self, ctx: &ScanContext<'_>, i: usize) -> Result<bool> {
        let bars = ctx.bars();
        if i < 6 {
            return Ok(false);
        }
        let recent = mean(bars[i - 3..i].iter().map(|b| b.close));
        let earlier = mean(bars[i - 6..i - 3].iter().map(|b| b.close));
        let falling = matches!((recent, earlier), (Some(r), Some(e)) if r < e);

        let fast = ctx.value(Indicator::Sma(self.fast_sma.get()), i)?;
        let slow = ctx.value(Indicator::Sma(self.slow_sma.get()), i)?;
        Ok(match (fast, slow) {
            (Some(fast), Some(slow)) => falling && fast < slow && bars[i].close < slow,
            _ => false,
        })
    }
}

impl PatternDetector for BullishHammerDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::BullishHammer
    }

    fn min_bars(&self) -> usize {
        self.warmup.max(6) + 2
    }

    fn indicators(&self) -> Vec<Indicator> {
        vec![
            Indicator::Sma(self.fast_sma.get()),
            Indicator::Sma(self.slow_sma.get()),
            Indicator::RangeAtr(self.atr_period.get()),
        ]
    }

    fn validate_config(&self) -> Result<()> {
        check_exit(Direction::Long, self.take_profit, self.stop_loss, self.max_days.get())?;
        check_fraction("max_body_pct", self.max_body_pct)?;
        check_fraction("min_lower_pct", self.min_lower_pct)?;
        check_non_negative("body_to_wick", self.body_to_wick)?;
        check_non_negative("max_upper_to_lower", self.max_upper_to_lower)?;
        check_non_negative("min_hammer_size", self.min_hammer_size)?;
        check_non_negative("min_atr_multiple", self.min_atr_multiple)?;
        check_non_negative("atr_stop", self.atr_stop)?;
        check_non_negative("atr_take", self.atr_take)
    }

    fn scan(&self, ctx: &ScanContext<'_>) -> Result<Vec<Trade>> {
        let bars = ctx.bars();
        let atr_indicator = Indicator::RangeAtr(self.atr_period.get());
        let rule = ExitRule::new(self.take_profit, self.stop_loss, self.max_days.get());
        let mut emitter = TradeEmitter::new(ctx, self.kind());

        for i in ctx.start.max(self.warmup)..bars.len().saturating_sub(1) {
            let bar = &bars[i];
            let Some(atr) = ctx.value(atr_indicator, i)? else {
                continue;
            };
            if bar.range() < atr * self.min_atr_multiple || !self.is_hammer(bar) {
                continue;
            }
            if !self.in_downtrend(ctx, i)? {
                continue;
            }
            let Some(entry) = Entry::at_open(bars, i + 1, Direction::Long) else {
                continue;
            };

            let pattern = PatternMatch::new(self.kind(), i)
                .anchor("hammer", i)
                .measure("hammer_size", bar.range() / bar.open)
                .measure("wick_ratio", bar.lower_shadow() / bar.body())
                .measure("atr", atr);
            emitter.emit(Signal {
                pattern,
                entry,
                rule: rule.with_atr_bands(
                    Direction::Long,
                    entry.price,
                    Some(atr),
                    self.atr_stop,
                    self.atr_take,
                ),
            })?;
        }

        Ok(emitter.finish())
    }
}

// ============================================================
// INVERTED HAMMER
// ============================================================

/// Bearish bar with a long upper shadow, confirmed by a bullish bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvertedHammerDetector {
    pub take_profit: f64,
    pub stop_loss: f64,
    pub max_days: Period,
    /// Upper shadow relative to the body, strict lower bound
    pub min_shadow_ratio: f64,
    /// Body as a fraction of the range, strict upper bound
    pub body_pct: f64,
}

impl Default for InvertedHammerDetector {
    fn default() -> Self {
        Self {
            take_profit: 1.003,
            stop_loss: 0.999,
            max_days: Period::new_const(3),
            min_shadow_ratio: 1.003,
            body_pct: 0.5,
        }
    }
}

impl PatternDetector for InvertedHammerDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::InvertedHammer
    }

    fn min_bars(&self) -> usize {
        3
    }

    fn validate_config(&self) -> Result<()> {
        check_exit(Direction::Long, self.take_profit, self.stop_loss, self.max_days.get())?;
        check_non_negative("min_shadow_ratio", self.min_shadow_ratio)?;
        check_fraction("body_pct", self.body_pct)
    }

    fn scan(&self, ctx: &ScanContext<'_>) -> Result<Vec<Trade>> {
        let bars = ctx.bars();
        let rule = ExitRule::new(self.take_profit, self.stop_loss, self.max_days.get());
        let mut emitter = TradeEmitter::new(ctx, self.kind());

        for i in ctx.start..bars.len().saturating_sub(2) {
            let bar = &bars[i];
            let range = bar.range();
            if range <= 0.0 {
                continue;
            }
            let body = bar.body();
            let upper = bar.upper_shadow();
            let shaped = upper > body * self.min_shadow_ratio
                && bar.lower_shadow() < upper
                && body < range * self.body_pct
                && bar.is_bearish();
            if !shaped || !bars[i + 1].is_bullish() {
                continue;
            }
            let Some(entry) = Entry::at_open(bars, i + 2, Direction::Long) else {
                continue;
            };

            let pattern = PatternMatch::new(self.kind(), i)
                .anchor("hammer", i)
                .anchor("confirmation", i + 1)
                .measure("shadow_ratio", upper / body);
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
// SHOOTING STAR
// ============================================================

/// Small body under a long upper shadow after two rising closes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShootingStarDetector {
    pub take_profit: f64,
    pub stop_loss: f64,
    pub max_days: Period,
    /// Upper shadow relative to the body, strict lower bound
    pub min_shadow_ratio: f64,
    /// Body as a fraction of the range, strict upper bound
    pub body_pct: f64,
    /// Lower shadow relative to the upper shadow, strict upper bound
    pub max_lower_to_upper: f64,
    /// Upper shadow as a fraction of the range, strict lower bound
    pub min_upper_pct: f64,
}

impl Default for ShootingStarDetector {
    fn default() -> Self {
        Self {
            take_profit: 0.998,
            stop_loss: 1.001,
            max_days: Period::new_const(5),
            min_shadow_ratio: 1.5,
            body_pct: 0.4,
            max_lower_to_upper: 0.25,
            min_upper_pct: 0.5,
        }
    }
}

impl PatternDetector for ShootingStarDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::ShootingStar
    }

    fn min_bars(&self) -> usize {
        4
    }

    fn validate_config(&self) -> Result<()> {
        check_exit(Direction::Short, self.take_profit, self.stop_loss, self.max_days.get())?;
        check_non_negative("min_shadow_ratio", self.min_shadow_ratio)?;
        check_fraction("body_pct", self.body_pct)?;
        check_non_negative("max_lower_to_upper", self.max_lower_to_upper)?;
        check_fraction("min_upper_pct", self.min_upper_pct)
    }

    fn scan(&self, ctx: &ScanContext<'_>) -> Result<Vec<Trade>> {
        let bars = ctx.bars();
        let rule = ExitRule::new(self.take_profit, self.stop_loss, self.max_days.get());
        let mut emitter = TradeEmitter::new(ctx, self.kind());

        for i in ctx.start.max(2)..bars.len().saturating_sub(1) {
            let bar = &bars[i];
            let range = bar.range();
            if range <= 0.0 {
                continue;
            }
            let body = bar.body();
            let upper = bar.upper_shadow();
            let shaped = upper > body * self.min_shadow_ratio
                && bar.lower_shadow() < upper * self.max_lower_to_upper
                && body < range * self.body_pct
                && upper / range > self.min_upper_pct;
            let rising = bars[i - 2].close < bars[i - 1].close;
            if !shaped || !rising {
                continue;
            }
            let Some(entry) = Entry::at_open(bars, i + 1, Direction::Short) else {
                continue;
            };

            let pattern = PatternMatch::new(self.kind(), i)
                .anchor("star", i)
                .measure("upper_shadow_pct", upper / range);
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
// TWEEZER BOTTOMS
// ============================================================

/// Bearish bar then bullish bar on matching lows, oversold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TweezerBottomsDetector {
    pub take_profit: f64,
    pub stop_loss: f64,
    pub max_days: Period,
    /// Low difference relative to the first low, upper bound
    pub price_tolerance: f64,
    /// Body difference relative to the larger body, upper bound
    pub body_tolerance: f64,
    /// Second body relative to its close, strict lower bound
    pub min_body_pct: f64,
    pub rsi_period: Period,
    /// RSI must be strictly below this
    pub rsi_ceiling: f64,
    pub fast_sma: Period,
    pub slow_sma: Period,
}

impl Default for TweezerBottomsDetector {
    fn default() -> Self {
        Self {
            take_profit: 1.003,
            stop_loss: 0.9998,
            max_days: Period::new_const(4),
            price_tolerance: 0.0033,
            body_tolerance: 0.95,
            min_body_pct: 0.0001,
            rsi_period: Period::new_const(12),
            rsi_ceiling: 45.0,
            fast_sma: Period::new_const(5),
            slow_sma: Period::new_const(10),
        }
    }
}

impl TweezerBottomsDetector {
    fn is_pair(&self, prev: &Candle, curr: &Candle) -> bool {
        let (pb, cb) = (prev.body(), curr.body());
        (prev.low - curr.low).abs() <= prev.low * self.price_tolerance
            && prev.is_bearish()
            && curr.is_bullish()
            && (pb - cb).abs() <= pb.max(cb) * self.body_tolerance
            && cb > curr.close * self.min_body_pct
    }
}

impl PatternDetector for TweezerBottomsDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::TweezerBottoms
    }

    fn min_bars(&self) -> usize {
        4
    }

    fn indicators(&self) -> Vec<Indicator> {
        vec![
            Indicator::Rsi(self.rsi_period.get()),
            Indicator::Sma(self.fast_sma.get()),
            Indicator::Sma(self.slow_sma.get()),
        ]
    }

    fn validate_config(&self) -> Result<()> {
        check_exit(Direction::Long, self.take_profit, self.stop_loss, self.max_days.get())?;
        check_fraction("price_tolerance", self.price_tolerance)?;
        check_fraction("body_tolerance", self.body_tolerance)?;
        check_fraction("min_body_pct", self.min_body_pct)?;
        crate::check_range("rsi_ceiling", self.rsi_ceiling, 0.0, 100.0)
    }

    fn scan(&self, ctx: &ScanContext<'_>) -> Result<Vec<Trade>> {
        let bars = ctx.bars();
        let rule = ExitRule::new(self.take_profit, self.stop_loss, self.max_days.get());
        let rsi_indicator = Indicator::Rsi(self.rsi_period.get());
        let fast_indicator = Indicator::Sma(self.fast_sma.get());
        let slow_indicator = Indicator::Sma(self.slow_sma.get());
        let mut emitter = TradeEmitter::new(ctx, self.kind());

        for i in ctx.start.max(2)..bars.len().saturating_sub(1) {
            let (prev, curr) = (&bars[i - 1], &bars[i]);
            if !self.is_pair(prev, curr) {
                continue;
            }

            let fast = ctx.value(fast_indicator, i)?;
            let slow = ctx.value(slow_indicator, i)?;
            let below = |sma: Option<f64>| sma.is_some_and(|s| curr.close < s);
            let declining = prev.close < bars[i - 2].close || below(fast);
            let oversold = ctx
                .value(rsi_indicator, i)?
                .is_some_and(|rsi| rsi < self.rsi_ceiling);
            if !(declining && oversold && (below(slow) || below(fast))) {
                continue;
            }
            let Some(entry) = Entry::at_open(bars, i + 1, Direction::Long) else {
                continue;
            };

            let pattern = PatternMatch::new(self.kind(), i)
                .anchor("first", i - 1)
                .anchor("second", i)
                .measure("low_difference", (prev.low - curr.low).abs() / prev.low);
            emitter.emit(Signal {
                pattern,
                entry,
                rule,
            })?;
        }

        Ok(emitter.finish())
    }
}
