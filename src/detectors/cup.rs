//! Cup detectors
//!
//! Cup with Handle (long) and its mirror image, the Inverted Cup with Handle
//! (short). Both run the same geometry; the orientation decides which side of
//! the bar is the rim and which is the floor.

use serde::{Deserialize, Serialize};

use super::helpers::{
    argmax_by, argmin_by, check_exit, check_non_negative, first_where, sliding_windows, Signal,
    TradeEmitter,
};
use crate::series::Candle;
use crate::simulator::{Entry, ExitRule};
use crate::{
    BacktestError, Direction, PatternDetector, PatternKind, PatternMatch, Period, Result,
    ScanContext, Trade,
};

impl_with_defaults!(CupWithHandleDetector, InvertedCupWithHandleDetector);

/// Bars after the left rim before the cup bottom may form
const MIN_LEFT_SPAN: usize = 2;
/// Extra bars given to the left-rim and handle searches
const SEARCH_SLACK: usize = 5;

// ============================================================
// SHARED GEOMETRY
// ============================================================

#[derive(Debug, Clone, Copy)]
struct CupGeometry {
    kind: PatternKind,
    direction: Direction,
    min_pattern_days: usize,
    max_pattern_days: usize,
    handle_tolerance: f64,
    symmetry_tolerance: f64,
    min_depth: f64,
    max_depth: f64,
    breakout_allowance: f64,
    breakout_days: usize,
}

impl CupGeometry {
    /// +1 for the cup, -1 for the dome
    #[inline]
    fn sign(&self) -> f64 {
        match self.direction {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    /// Price the cup's rims are measured on
    #[inline]
    fn rim(&self, bar: &Candle) -> f64 {
        match self.direction {
            Direction::Long => bar.high,
            Direction::Short => bar.low,
        }
    }

    /// Price the cup's bottom and handle are measured on
    #[inline]
    fn floor(&self, bar: &Candle) -> f64 {
        match self.direction {
            Direction::Long => bar.low,
            Direction::Short => bar.high,
        }
    }

    fn is_breakout(&self, bar: &Candle, rim: f64) -> bool {
        match self.direction {
            Direction::Long => bar.close > rim * (1.0 - self.breakout_allowance),
            Direction::Short => bar.close < rim * (1.0 + self.breakout_allowance),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.min_pattern_days == 0 || self.min_pattern_days > self.max_pattern_days {
            return Err(BacktestError::InvalidValue(
                "min_pattern_days must be in 1..=max_pattern_days",
            ));
        }
        check_non_negative("handle_tolerance", self.handle_tolerance)?;
        check_non_negative("symmetry_tolerance", self.symmetry_tolerance)?;
        crate::check_range("min_depth", self.min_depth, 0.0, self.max_depth)?;
        crate::check_range("breakout_allowance", self.breakout_allowance, 0.0, 1.0)
    }

    /// One candidate per scan position; the window is `cur +/- max_pattern_days`
    fn candidate(
        &self,
        bars: &[Candle],
        cur: usize,
        window: std::ops::Range<usize>,
    ) -> Option<PatternMatch> {
        let s = self.sign();
        let ws = window.start;
        let wlen = window.len();
        if wlen < self.min_pattern_days {
            return None;
        }

        let left_len = (self.min_pattern_days + SEARCH_SLACK).min(wlen / 2);
        let left = argmax_by(bars, ws..ws + left_len, |b| s * self.rim(b))?;

        let bottom_start = (left + MIN_LEFT_SPAN).max(ws + self.min_pattern_days);
        let bottom_end = (cur + self.max_pattern_days / 2).min(bars.len());
        let bottom = argmin_by(bars, bottom_start..bottom_end, |b| s * self.floor(b))?;
        let right_span = bottom + 1..bottom + self.max_pattern_days;
        let right = argmax_by(bars, right_span, |b| s * self.rim(b))?;

        let left_rim = self.rim(&bars[left]);
        let cup_floor = self.floor(&bars[bottom]);
        let depth = s * (left_rim - cup_floor) / left_rim;
        if depth < self.min_depth || depth > self.max_depth {
            return None;
        }

        let (left_time, right_time) = (bottom - left, right - bottom);
        if left_time.min(right_time) < 2 {
            return None;
        }
        let symmetry = left_time.abs_diff(right_time) as f64 / left_time.max(right_time) as f64;
        if symmetry > self.symmetry_tolerance {
            return None;
        }

        let handle_end = right + self.min_pattern_days + SEARCH_SLACK;
        let handle = argmin_by(bars, right + 1..handle_end, |b| s * self.floor(b))?;
        let right_rim = self.rim(&bars[right]);
        let cup_height = s * (right_rim - cup_floor);
        if cup_height <= 0.0 {
            return None;
        }
        let handle_depth = s * (right_rim - self.floor(&bars[handle])) / cup_height;
        if handle_depth > self.handle_tolerance {
            return None;
        }

        let breakout_window = right + 1..right + 1 + self.breakout_days;
        let breakout = first_where(bars, breakout_window, |b| self.is_breakout(b, right_rim))?;

        Some(
            PatternMatch::new(self.kind, left)
                .anchor("left_rim", left)
                .anchor("bottom", bottom)
                .anchor("right_rim", right)
                .anchor("handle", handle)
                .anchor("breakout", breakout)
                .measure("cup_depth", depth)
                .measure("handle_depth", handle_depth)
                .measure("symmetry_ratio", symmetry),
        )
    }

    fn scan(&self, ctx: &ScanContext<'_>, rule: ExitRule) -> Result<Vec<Trade>> {
        let bars = ctx.bars();
        let mut emitter = TradeEmitter::new(ctx, self.kind);

        for (cur, window) in sliding_windows(bars.len(), ctx.start, self.max_pattern_days) {
            let Some(pattern) = self.candidate(bars, cur, window) else {
                continue;
            };
            let Some(breakout) = pattern.anchor_index("breakout") else {
                continue;
            };
            if emitter.is_used(breakout) {
                continue;
            }
            let Some(entry) = Entry::at_open(bars, breakout, self.direction) else {
                continue;
            };
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
// CUP WITH HANDLE
// ============================================================

/// Rounded bottom between two highs, a shallow handle, then a close back at the rim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CupWithHandleDetector {
    pub take_profit: f64,
    pub stop_loss: f64,
    pub max_days: Period,
    pub min_pattern_days: usize,
    pub max_pattern_days: Period,
    /// Handle depth as a fraction of the cup height, upper bound
    pub handle_tolerance: f64,
    /// |left span - right span| / longer span, upper bound
    pub symmetry_tolerance: f64,
    pub min_depth: f64,
    pub max_depth: f64,
    /// Breakout close may sit this fraction short of the right rim
    pub breakout_allowance: f64,
    pub breakout_days: Period,
}

impl Default for CupWithHandleDetector {
    fn default() -> Self {
        Self {
            take_profit: 1.2,
            stop_loss: 0.94,
            max_days: Period::new_const(105),
            min_pattern_days: 4,
            max_pattern_days: Period::new_const(40),
            handle_tolerance: 5.0,
            symmetry_tolerance: 5.0,
            min_depth: 0.005,
            max_depth: 0.95,
            breakout_allowance: 0.005,
            breakout_days: Period::new_const(14),
        }
    }
}

impl CupWithHandleDetector {
    fn geometry(&self) -> CupGeometry {
        CupGeometry {
            kind: self.kind(),
            direction: Direction::Long,
            min_pattern_days: self.min_pattern_days,
            max_pattern_days: self.max_pattern_days.get(),
            handle_tolerance: self.handle_tolerance,
            symmetry_tolerance: self.symmetry_tolerance,
            min_depth: self.min_depth,
            max_depth: self.max_depth,
            breakout_allowance: self.breakout_allowance,
            breakout_days: self.breakout_days.get(),
        }
    }
}

impl PatternDetector for CupWithHandleDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::CupWithHandle
    }

    fn min_bars(&self) -> usize {
        self.min_pattern_days + 2 * MIN_LEFT_SPAN + 1
    }

    fn validate_config(&self) -> Result<()> {
        check_exit(Direction::Long, self.take_profit, self.stop_loss, self.max_days.get())?;
        self.geometry().validate()
    }

    fn scan(&self, ctx: &ScanContext<'_>) -> Result<Vec<Trade>> {
        let rule = ExitRule::new(self.take_profit, self.stop_loss, self.max_days.get());
        self.geometry().scan(ctx, rule)
    }
}

// ============================================================
// INVERTED CUP WITH HANDLE
// ============================================================

/// Dome between two lows, a shallow bounce, then a close back at the rim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvertedCupWithHandleDetector {
    pub take_profit: f64,
    pub stop_loss: f64,
    pub max_days: Period,
    pub min_pattern_days: usize,
    pub max_pattern_days: Period,
    /// Handle height as a fraction of the dome height, upper bound
    pub handle_tolerance: f64,
    /// |left span - right span| / longer span, upper bound
    pub symmetry_tolerance: f64,
    pub min_depth: f64,
    pub max_depth: f64,
    /// Breakout close may sit this fraction above the right rim
    pub breakout_allowance: f64,
    pub breakout_days: Period,
}

impl Default for InvertedCupWithHandleDetector {
    fn default() -> Self {
        Self {
            take_profit: 0.95,
            stop_loss: 1.01,
            max_days: Period::new_const(10),
            min_pattern_days: 5,
            max_pattern_days: Period::new_const(40),
            handle_tolerance: 1.0,
            symmetry_tolerance: 0.3,
            min_depth: 0.005,
            max_depth: 0.95,
            breakout_allowance: 0.005,
            breakout_days: Period::new_const(14),
        }
    }
}

impl InvertedCupWithHandleDetector {
    fn geometry(&self) -> CupGeometry {
        CupGeometry {
            kind: self.kind(),
            direction: Direction::Short,
            min_pattern_days: self.min_pattern_days,
            max_pattern_days: self.max_pattern_days.get(),
            handle_tolerance: self.handle_tolerance,
            symmetry_tolerance: self.symmetry_tolerance,
            min_depth: self.min_depth,
            max_depth: self.max_depth,
            breakout_allowance: self.breakout_allowance,
            breakout_days: self.breakout_days.get(),
        }
    }
}

impl PatternDetector for InvertedCupWithHandleDetector {
    fn kind(&self) -> PatternKind {
        PatternKind::InvertedCupWithHandle
    }

    fn min_bars(&self) -> usize {
        self.min_pattern_days + 2 * MIN_LEFT_SPAN + 1
    }

    fn validate_config(&self) -> Result<()> {
        check_exit(Direction::Short, self.take_profit, self.stop_loss, self.max_days.get())?;
        self.geometry().validate()
    }

    fn scan(&self, ctx: &ScanContext<'_>) -> Result<Vec<Trade>> {
        let rule = ExitRule::new(self.take_profit, self.stop_loss, self.max_days.get());
        self.geometry().scan(ctx, rule)
    }
}
