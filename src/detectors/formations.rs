//! Support / resistance detectors
//!
//! Broadening Formations: flat support under a rising resistance line, bought
//! on a bullish retest of the support.

use serde::{Deserialize, Serialize};

use super::helpers::{
    check_exit, check_fraction, check_non_negative, first_where, mean, Signal, TradeEmitter,
};
use crate::series::{Candle, Indicator, OHLCExt};
use crate::simulator::{Entry, ExitRule};
use crate::{
    Direction, PatternDetector, PatternKind, PatternMatch, Period, Result, ScanContext, Trade,
};

impl_with_defaults!(BroadeningFormationsDetector);

/// Shape of one accepted window
#[derive(Debug, Clone, Copy, PartialEq)]
struct Formation {
    support: f64,
    resistance: f64,
    height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadeningFormationsDetector {
    pub take_profit: f64,
    pub stop_loss: f64,
    pub max_days: Period,
    /// Bars in the formation window
    pub window: Period,
    /// Spread of the lows relative to the lowest low, strict upper bound
    pub support_tolerance: f64,
    /// Each high must exceed the previous by more than this fraction
    pub resistance_step: f64,
    /// ATR relative to the window's mean close, upper bound
    pub max_atr_pct: f64,
    /// Height relative to the support, upper bound
    pub max_height_pct: f64,
    /// Target above the resistance, in heights
    pub target_extension: f64,
    /// Retest must reach within this fraction above the support
    pub retest_tolerance: f64,
    pub atr_period: Period,
    pub fast_sma: Period,
    pub slow_sma: Period,
}

impl Default for BroadeningFormationsDetector {
    fn default() -> Self {
        Self {
            take_profit: 1.008,
            stop_loss: 0.995,
            max_days: Period::new_const(10),
            window: Period::new_const(3),
            support_tolerance: 0.002,
            resistance_step: 0.001,
            max_atr_pct: 0.006,
            max_height_pct: 0.02,
            target_extension: 0.382,
            retest_tolerance: 0.002,
            atr_period: Period::new_const(14),
            fast_sma: Period::new_const(5),
            slow_sma: Period::new_const(20),
        }
    }
}

impl BroadeningFormationsDetector {
    fn formation(&self, window: &[Candle]) -> Option<Formation> {
        let support = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let top_low = window.iter().map(|b| b.low).fold(f64::NEG_INFINITY, f64::max);
        let resistance = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        if support <= 0.0 || (top_low - support) / support >= self.support_tolerance {
            return None;
        }
        let ascending = window
            .windows(2)
            .all(|w| w[1].high > w[0].high * (1.0 + self.resistance_step));
        if !ascending {
            return None;
        }
        let height = resistance - support;
        if height / support > self.max_height_pct {
            return None;
        }
        Some(Formation {
            support,
            resistance,
            height,
        })
    }

    /// Quiet, rising market around the window. Undefined indicators never veto.
    fn market_allows(&self, ctx: &ScanContext<'_>, window: &[Candle], end: usize) -> Result<bool> {
        let atr = ctx.value(Indicator::TrueRangeAtr(self.atr_period.get()), end)?;
        let mean_close = mean(window.iter().map(|b| b.close)).unwrap_or(0.0);
        if atr.is_some_and(|atr| atr > mean_close * self.max_atr_pct) {
            return Ok(false);
        }

        let last = end - 1;
        let fast = ctx.value(Indicator::Sma(self.fast_sma.get()), last)?;
        let slow = ctx.value(Indicator::Sma(self.slow_sma.get()), last)?;
        Ok(match (fast, slow) {
            (Some(fast), Some(slow)) => fast > slow,
            _ => true,
        })
    }
}

impl PatternDetector for BroadeningFormationsDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::BroadeningFormations
    }

    fn min_bars(&self) -> usize {
        self.window.get() + 2
    }

    fn indicators(&self) -> Vec<Indicator> {
        vec![
            Indicator::TrueRangeAtr(self.atr_period.get()),
            Indicator::Sma(self.fast_sma.get()),
            Indicator::Sma(self.slow_sma.get()),
        ]
    }

    fn validate_config(&self) -> Result<()> {
        check_exit(Direction::Long, self.take_profit, self.stop_loss, self.max_days.get())?;
        check_fraction("support_tolerance", self.support_tolerance)?;
        check_fraction("resistance_step", self.resistance_step)?;
        check_fraction("max_atr_pct", self.max_atr_pct)?;
        check_fraction("max_height_pct", self.max_height_pct)?;
        check_non_negative("target_extension", self.target_extension)?;
        check_fraction("retest_tolerance", self.retest_tolerance)
    }

    fn scan(&self, ctx: &ScanContext<'_>) -> Result<Vec<Trade>> {
        let bars = ctx.bars();
        let w = self.window.get();
        let horizon = self.max_days.get();
        let mut emitter = TradeEmitter::new(ctx, self.kind());

        for i in ctx.start..bars.len().saturating_sub(w) {
            let end = i + w;
            let window = &bars[i..end];
            let Some(formation) = self.formation(window) else {
                continue;
            };
            if !self.market_allows(ctx, window, end)? {
                continue;
            }

            let retest = formation.support * (1.0 + self.retest_tolerance);
            let retested = |b: &Candle| b.low <= retest && b.is_bullish();
            let Some(trigger) = first_where(bars, end..end + horizon, retested) else {
                continue;
            };
            let Some(entry) = Entry::at_close(bars, trigger, Direction::Long) else {
                continue;
            };

            let target = formation.resistance + formation.height * self.target_extension;
            let pattern = PatternMatch::new(self.kind(), end - 1)
                .anchor("window_start", i)
                .anchor("window_end", end - 1)
                .anchor("trigger", trigger)
                .measure("support", formation.support)
                .measure("height", formation.height)
                .measure("target", target);
            emitter.emit(Signal {
                pattern,
                entry,
                rule: ExitRule::new(self.take_profit, self.stop_loss, horizon).with_target(target),
            })?;
        }

        Ok(emitter.finish())
    }
}
