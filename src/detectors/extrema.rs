//! Local-extrema detectors
//!
//! Double Tops, Double Bottoms, Head and Shoulders Top.
//!
//! Each scan position looks at a window of +/- `max_pattern_days` bars, takes
//! the strict local maxima (highs) or minima (lows) inside it and tests
//! consecutive pairs, or shoulder/head/shoulder triples, against the geometry.
//! Overlapping windows rediscover the same shapes; the emitter keeps one trade
//! per entry date.

use serde::{Deserialize, Serialize};

use super::helpers::{
  argmax_by, argmin_by, check_exit, check_fraction, check_non_negative, extrema_in, first_where,
  peak_flags, sliding_windows, trough_flags, Signal, TradeEmitter,
};
use crate::series::Indicator;
use crate::simulator::{Entry, ExitRule};
use crate::{
  BacktestError, Direction, PatternDetector, PatternKind, PatternMatch, Period, Result, ScanContext,
  Trade,
};

impl_with_defaults!(DoubleTopsDetector, DoubleBottomsDetector, HeadAndShouldersDetector);

fn check_span(min: usize, max: Period) -> Result<()> {
  if min == 0 || min > max.get() {
    return Err(BacktestError::InvalidValue(
      "min_pattern_days must be in 1..=max_pattern_days",
    ));
  }
  Ok(())
}

// ============================================================
// DOUBLE TOPS
// ============================================================

/// Two similar peaks over a trough, shorted when a close breaks the trough.
///
/// The second top must close at or below `Sma(trend_sma)`. Before that average
/// is defined (the first `trend_sma - 1` bars) no double top is traded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoubleTopsDetector {
  pub take_profit: f64,
  pub stop_loss: f64,
  pub max_days: Period,
  pub min_pattern_days: usize,
  pub max_pattern_days: Period,
  /// Top difference relative to the higher top, upper bound
  pub price_tolerance: f64,
  /// Trough depth below the lower top, lower bound
  pub min_drop: f64,
  pub breakout_days: Period,
  pub trend_sma: Period,
  pub atr_period: Period,
  pub atr_stop: f64,
  pub atr_take: f64,
}

impl Default for DoubleTopsDetector {
  fn default() -> Self {
    Self {
      take_profit: 0.97,
      stop_loss: 1.015,
      max_days: Period::new_const(20),
      min_pattern_days: 3,
      max_pattern_days: Period::new_const(50),
      price_tolerance: 0.05,
      min_drop: 0.006,
      breakout_days: Period::new_const(10),
      trend_sma: Period::new_const(20),
      atr_period: Period::new_const(14),
      atr_stop: 2.0,
      atr_take: 3.0,
    }
  }
}

impl DoubleTopsDetector {
  fn evaluate(&self, ctx: &ScanContext<'_>, first: usize, second: usize) -> Result<Option<Signal>> {
    let bars = ctx.bars();
    let gap = second - first;
    if gap < self.min_pattern_days || gap > self.max_pattern_days.get() {
      return Ok(None);
    }

    let (h1, h2) = (bars[first].high, bars[second].high);
    let difference = (h1 - h2).abs() / h1.max(h2);
    if difference > self.price_tolerance {
      return Ok(None);
    }

    let Some(trough) = argmin_by(bars, first..second, |b| b.low) else {
      return Ok(None);
    };
    let trough_low = bars[trough].low;
    let lower_top = h1.min(h2);
    let drop = (lower_top - trough_low) / lower_top;
    if drop < self.min_drop {
      return Ok(None);
    }

    // Second top must print at or below the trend average
    let sma = ctx.value(Indicator::Sma(self.trend_sma.get()), second)?;
    if !sma.is_some_and(|sma| bars[second].close <= sma) {
      return Ok(None);
    }

    let window = second..second + self.breakout_days.get();
    let Some(breakout) = first_where(bars, window, |b| b.close < trough_low) else {
      return Ok(None);
    };
    let Some(entry) = Entry::at_open(bars, breakout, Direction::Short) else {
      return Ok(None);
    };
    let atr = ctx.value(Indicator::RangeAtr(self.atr_period.get()), breakout)?;

    let pattern = PatternMatch::new(self.kind(), first)
      .anchor("first_top", first)
      .anchor("trough", trough)
      .anchor("second_top", second)
      .anchor("breakout", breakout)
      .measure("top_difference", difference)
      .measure("drop", drop);
    Ok(Some(Signal {
      pattern,
      entry,
      rule: ExitRule::new(self.take_profit, self.stop_loss, self.max_days.get()).with_atr_bands(
        Direction::Short,
        entry.price,
        atr,
        self.atr_stop,
        self.atr_take,
      ),
    }))
  }
}

impl PatternDetector for DoubleTopsDetector {
  fn kind(&self) -> PatternKind {
    PatternKind::DoubleTops
  }

  fn min_bars(&self) -> usize {
    self.min_pattern_days + 3
  }

  fn indicators(&self) -> Vec<Indicator> {
    vec![
      Indicator::Sma(self.trend_sma.get()),
      Indicator::RangeAtr(self.atr_period.get()),
    ]
  }

  fn validate_config(&self) -> Result<()> {
    check_exit(Direction::Short, self.take_profit, self.stop_loss, self.max_days.get())?;
    check_span(self.min_pattern_days, self.max_pattern_days)?;
    check_fraction("price_tolerance", self.price_tolerance)?;
    check_fraction("min_drop", self.min_drop)?;
    check_non_negative("atr_stop", self.atr_stop)?;
    check_non_negative("atr_take", self.atr_take)
  }

  fn scan(&self, ctx: &ScanContext<'_>) -> Result<Vec<Trade>> {
    let bars = ctx.bars();
    let peaks = peak_flags(bars);
    let mut emitter = TradeEmitter::new(ctx, self.kind());

    for (_, window) in sliding_windows(bars.len(), ctx.start, self.max_pattern_days.get()) {
      let tops = extrema_in(&peaks, window);
      for pair in tops.windows(2) {
        if let Some(signal) = self.evaluate(ctx, pair[0], pair[1])? {
          emitter.emit(signal)?;
        }
      }
    }

    Ok(emitter.finish())
  }
}

// ============================================================
// DOUBLE BOTTOMS
// ============================================================

/// Two similar troughs under a peak, bought when a close clears the peak
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoubleBottomsDetector {
  pub take_profit: f64,
  pub stop_loss: f64,
  pub max_days: Period,
  pub min_pattern_days: usize,
  pub max_pattern_days: Period,
  /// Bottom difference relative to the higher bottom, upper bound
  pub price_tolerance: f64,
  /// Peak height above the lower bottom, lower bound
  pub min_rise: f64,
  pub breakout_days: Period,
  /// Only trade breakouts inside an uptrend (slow SMA ordering)
  pub require_uptrend: bool,
  pub fast_sma: Period,
  pub slow_sma: Period,
}

impl Default for DoubleBottomsDetector {
  fn default() -> Self {
    Self {
      take_profit: 1.05,
      stop_loss: 0.97,
      max_days: Period::new_const(20),
      min_pattern_days: 5,
      max_pattern_days: Period::new_const(50),
      price_tolerance: 0.03,
      min_rise: 0.01,
      breakout_days: Period::new_const(10),
      require_uptrend: false,
      fast_sma: Period::new_const(20),
      slow_sma: Period::new_const(50),
    }
  }
}

impl DoubleBottomsDetector {
  fn in_uptrend(&self, ctx: &ScanContext<'_>, index: usize) -> Result<bool> {
    let fast = ctx.value(Indicator::Sma(self.fast_sma.get()), index)?;
    let slow = ctx.value(Indicator::Sma(self.slow_sma.get()), index)?;
    let close = ctx.bars()[index].close;
    Ok(matches!((fast, slow), (Some(f), Some(s)) if f >= s && close >= s))
  }

  fn evaluate(&self, ctx: &ScanContext<'_>, first: usize, second: usize) -> Result<Option<Signal>> {
    let bars = ctx.bars();
    let gap = second - first;
    if gap < self.min_pattern_days || gap > self.max_pattern_days.get() {
      return Ok(None);
    }

    let (l1, l2) = (bars[first].low, bars[second].low);
    let difference = (l1 - l2).abs() / l1.max(l2);
    if difference > self.price_tolerance {
      return Ok(None);
    }

    let Some(peak) = argmax_by(bars, first..second, |b| b.high) else {
      return Ok(None);
    };
    let peak_high = bars[peak].high;
    let lower_bottom = l1.min(l2);
    let rise = (peak_high - lower_bottom) / lower_bottom;
    if rise < self.min_rise {
      return Ok(None);
    }

    let window = second..second + self.breakout_days.get();
    let Some(breakout) = first_where(bars, window, |b| b.close > peak_high) else {
      return Ok(None);
    };
    if self.require_uptrend && !self.in_uptrend(ctx, breakout)? {
      return Ok(None);
    }
    let Some(entry) = Entry::at_open(bars, breakout, Direction::Long) else {
      return Ok(None);
    };

    let pattern = PatternMatch::new(self.kind(), first)
      .anchor("first_bottom", first)
      .anchor("peak", peak)
      .anchor("second_bottom", second)
      .anchor("breakout", breakout)
      .measure("bottom_difference", difference)
      .measure("rise", rise);
    Ok(Some(Signal {
      pattern,
      entry,
      rule: ExitRule::new(self.take_profit, self.stop_loss, self.max_days.get()),
    }))
  }
}

impl PatternDetector for DoubleBottomsDetector {
  fn kind(&self) -> PatternKind {
    PatternKind::DoubleBottoms
  }

  fn min_bars(&self) -> usize {
    self.min_pattern_days + 3
  }

  fn indicators(&self) -> Vec<Indicator> {
    if self.require_uptrend {
      vec![
        Indicator::Sma(self.fast_sma.get()),
        Indicator::Sma(self.slow_sma.get()),
      ]
    } else {
      Vec::new()
    }
  }

  fn validate_config(&self) -> Result<()> {
    check_exit(Direction::Long, self.take_profit, self.stop_loss, self.max_days.get())?;
    check_span(self.min_pattern_days, self.max_pattern_days)?;
    check_fraction("price_tolerance", self.price_tolerance)?;
    check_non_negative("min_rise", self.min_rise)
  }

  fn scan(&self, ctx: &ScanContext<'_>) -> Result<Vec<Trade>> {
    let bars = ctx.bars();
    let troughs = trough_flags(bars);
    let mut emitter = TradeEmitter::new(ctx, self.kind());

    for (_, window) in sliding_windows(bars.len(), ctx.start, self.max_pattern_days.get()) {
      let bottoms = extrema_in(&troughs, window);
      for pair in bottoms.windows(2) {
        if let Some(signal) = self.evaluate(ctx, pair[0], pair[1])? {
          emitter.emit(signal)?;
        }
      }
    }

    Ok(emitter.finish())
  }
}

// ============================================================
// HEAD AND SHOULDERS TOP
// ============================================================

/// Three peaks, the middle one tallest, shorted on a close under the neckline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadAndShouldersDetector {
  pub take_profit: f64,
  pub stop_loss: f64,
  pub max_days: Period,
  /// Shoulder-to-shoulder span, inclusive
  pub min_pattern_days: usize,
  pub max_pattern_days: Period,
  /// Shoulder difference relative to the lower shoulder, upper bound
  pub shoulder_tolerance: f64,
  /// Head height above the higher shoulder, relative to the head, lower bound
  pub min_prominence: f64,
  /// |left span - right span| / longer span, upper bound
  pub time_symmetry: f64,
  pub breakout_days: Period,
  pub fast_sma: Period,
  pub slow_sma: Period,
  pub atr_period: Period,
  pub atr_stop: f64,
  pub atr_take: f64,
}

impl Default for HeadAndShouldersDetector {
  fn default() -> Self {
    Self {
      take_profit: 0.975,
      stop_loss: 1.015,
      max_days: Period::new_const(18),
      min_pattern_days: 15,
      max_pattern_days: Period::new_const(40),
      shoulder_tolerance: 0.03,
      min_prominence: 0.012,
      time_symmetry: 0.3,
      breakout_days: Period::new_const(10),
      fast_sma: Period::new_const(20),
      slow_sma: Period::new_const(50),
      atr_period: Period::new_const(14),
      atr_stop: 2.0,
      atr_take: 3.0,
    }
  }
}

impl HeadAndShouldersDetector {
  /// Shape checks that need no scans, cheapest first
  fn is_shaped(
    &self,
    ctx: &ScanContext<'_>,
    left: usize,
    head: usize,
    right: usize,
  ) -> Option<f64> {
    let bars = ctx.bars();
    let (dl, dr) = ((head - left) as f64, (right - head) as f64);
    if (dl - dr).abs() / dl.max(dr) > self.time_symmetry {
      return None;
    }

    let (hl, hh, hr) = (bars[left].high, bars[head].high, bars[right].high);
    let symmetry = (hl - hr).abs() / hl.min(hr);
    if symmetry > self.shoulder_tolerance {
      return None;
    }
    if (hh - hl).min(hh - hr) / hh < self.min_prominence {
      return None;
    }

    let span = right - left;
    (span >= self.min_pattern_days && span <= self.max_pattern_days.get()).then_some(symmetry)
  }

  fn in_downtrend(&self, ctx: &ScanContext<'_>, index: usize) -> Result<bool> {
    let fast = ctx.value(Indicator::Sma(self.fast_sma.get()), index)?;
    let slow = ctx.value(Indicator::Sma(self.slow_sma.get()), index)?;
    let close = ctx.bars()[index].close;
    Ok(matches!((fast, slow), (Some(f), Some(s)) if f <= s && close < f))
  }

  fn evaluate(
    &self,
    ctx: &ScanContext<'_>,
    emitter: &TradeEmitter<'_>,
    (left, head, right): (usize, usize, usize),
  ) -> Result<Option<Signal>> {
    let bars = ctx.bars();
    let Some(symmetry) = self.is_shaped(ctx, left, head, right) else {
      return Ok(None);
    };

    let troughs = (
      argmin_by(bars, left..head, |b| b.low),
      argmin_by(bars, head..right, |b| b.low),
    );
    let (Some(lt), Some(rt)) = troughs else {
      return Ok(None);
    };
    let neck = if bars[rt].low < bars[lt].low { rt } else { lt };
    let neckline = bars[neck].low;

    let window = right..right + self.breakout_days.get();
    let Some(breakout) = first_where(bars, window, |b| b.close < neckline) else {
      return Ok(None);
    };
    if emitter.is_used(breakout) || !self.in_downtrend(ctx, breakout)? {
      return Ok(None);
    }
    let Some(entry) = Entry::at_open(bars, breakout, Direction::Short) else {
      return Ok(None);
    };
    let atr = ctx.value(Indicator::RangeAtr(self.atr_period.get()), breakout)?;

    let pattern = PatternMatch::new(self.kind(), head)
      .anchor("left_shoulder", left)
      .anchor("head", head)
      .anchor("right_shoulder", right)
      .anchor("neckline", neck)
      .anchor("breakout", breakout)
      .measure("pattern_height", bars[head].high - neckline)
      .measure("shoulder_symmetry", symmetry);
    Ok(Some(Signal {
      pattern,
      entry,
      rule: ExitRule::new(self.take_profit, self.stop_loss, self.max_days.get()).with_atr_bands(
        Direction::Short,
        entry.price,
        atr,
        self.atr_stop,
        self.atr_take,
      ),
    }))
  }
}

impl PatternDetector for HeadAndShouldersDetector {
  fn kind(&self) -> PatternKind {
    PatternKind::HeadAndShoulders
  }

  fn min_bars(&self) -> usize {
    self.min_pattern_days + 3
  }

  fn indicators(&self) -> Vec<Indicator> {
    vec![
      Indicator::Sma(self.fast_sma.get()),
      Indicator::Sma(self.slow_sma.get()),
      Indicator::RangeAtr(self.atr_period.get()),
    ]
  }

  fn validate_config(&self) -> Result<()> {
    check_exit(Direction::Short, self.take_profit, self.stop_loss, self.max_days.get())?;
    check_span(self.min_pattern_days, self.max_pattern_days)?;
    check_fraction("shoulder_tolerance", self.shoulder_tolerance)?;
    check_fraction("min_prominence", self.min_prominence)?;
    check_fraction("time_symmetry", self.time_symmetry)?;
    check_non_negative("atr_stop", self.atr_stop)?;
    check_non_negative("atr_take", self.atr_take)
  }

  fn scan(&self, ctx: &ScanContext<'_>) -> Result<Vec<Trade>> {
    let bars = ctx.bars();
    let flags = peak_flags(bars);
    let mut emitter = TradeEmitter::new(ctx, self.kind());

    for (_, window) in sliding_windows(bars.len(), ctx.start, self.max_pattern_days.get()) {
      let peaks = extrema_in(&flags, window);
      if peaks.len() < 3 {
        continue;
      }
      // Tallest head first; stable, so equal heads keep bar order
      let mut heads = peaks.clone();
      heads.sort_by(|&a, &b| bars[b].high.total_cmp(&bars[a].high));

      for &head in &heads {
        for &left in peaks.iter().filter(|&&p| p < head) {
          for &right in peaks.iter().filter(|&&p| p > head) {
            if let Some(signal) = self.evaluate(ctx, &emitter, (left, head, right))? {
              emitter.emit(signal)?;
            }
          }
        }
      }
    }

    Ok(emitter.finish())
  }
}
