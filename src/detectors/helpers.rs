//! Common helpers shared across all detector modules
//!
//! Bounded extremum scans, local-extremum flags, sliding windows, parameter
//! checks and the [`TradeEmitter`] every detector feeds its signals through.

use std::collections::{BTreeMap, HashSet};
use std::ops::Range;

use chrono::NaiveDate;

use crate::series::Candle;
use crate::simulator::{Entry, ExitRule};
use crate::{check_range, Direction, PatternKind, PatternMatch, Result, ScanContext, Trade};

// ============================================================
// SIGNALS
// ============================================================

/// An accepted geometry with its entry and exit thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub pattern: PatternMatch,
    pub entry: Entry,
    pub rule: ExitRule,
}

/// Turns signals into trades: dedup by entry date, simulate, append.
///
/// One emitter per detector scan, so the set of used entry dates is private
/// to that detector.
pub struct TradeEmitter<'a> {
    ctx: &'a ScanContext<'a>,
    kind: PatternKind,
    used: HashSet<NaiveDate>,
    trades: Vec<Trade>,
}

impl<'a> TradeEmitter<'a> {
    pub fn new(ctx: &'a ScanContext<'a>, kind: PatternKind) -> Self {
        Self {
            ctx,
            kind,
            used: HashSet::new(),
            trades: Vec::new(),
        }
    }

    /// True if a trade already entered on the date of bar `index`
    pub fn is_used(&self, index: usize) -> bool {
        self.ctx
            .bars()
            .get(index)
            .is_some_and(|bar| self.used.contains(&bar.date))
    }

    /// Simulate and record `signal`; returns false when its entry date was taken.
    pub fn emit(&mut self, signal: Signal) -> Result<bool> {
        let bars = self.ctx.bars();
        let Signal {
            pattern,
            entry,
            rule,
        } = signal;
        debug_assert!(pattern.pattern_index < entry.index);

        let (Some(pattern_bar), Some(entry_bar)) =
            (bars.get(pattern.pattern_index), bars.get(entry.index))
        else {
            return Ok(false);
        };
        if !self.used.insert(entry_bar.date) {
            return Ok(false);
        }

        let exit = self.ctx.simulator.simulate(self.ctx.series, &entry, &rule)?;
        let anchors: BTreeMap<_, _> = pattern
            .anchors
            .iter()
            .filter_map(|&(name, index)| bars.get(index).map(|bar| (name, bar.date)))
            .collect();

        self.trades.push(Trade {
            kind: self.kind,
            direction: entry.direction,
            pattern_date: pattern_bar.date,
            entry_date: entry_bar.date,
            entry_price: entry.price,
            exit_date: exit.date,
            exit_price: exit.price,
            exit_reason: exit.reason,
            profit: entry.direction.profit(entry.price, exit.price),
            anchors,
            measurements: pattern.measurements,
        });
        Ok(true)
    }

    pub fn finish(self) -> Vec<Trade> {
        self.trades
    }
}

// ============================================================
// EXTREMA
// ============================================================

/// First index in `range` with the largest `key`. `None` if the range is empty
/// after clamping to the bars.
pub fn argmax_by<F>(bars: &[Candle], range: Range<usize>, key: F) -> Option<usize>
where
    F: Fn(&Candle) -> f64,
{
    let end = range.end.min(bars.len());
    let mut best: Option<(usize, f64)> = None;
    for (i, bar) in bars.iter().enumerate().take(end).skip(range.start) {
        let value = key(bar);
        if best.map_or(true, |(_, b)| value > b) {
            best = Some((i, value));
        }
    }
    best.map(|(i, _)| i)
}

/// First index in `range` with the smallest `key`
pub fn argmin_by<F>(bars: &[Candle], range: Range<usize>, key: F) -> Option<usize>
where
    F: Fn(&Candle) -> f64,
{
    argmax_by(bars, range, |bar| -key(bar))
}

/// Bars whose high is strictly above both neighbours' highs
pub fn peak_flags(bars: &[Candle]) -> Vec<bool> {
    extremum_flags(bars, |bar| bar.high)
}

/// Bars whose low is strictly below both neighbours' lows
pub fn trough_flags(bars: &[Candle]) -> Vec<bool> {
    extremum_flags(bars, |bar| -bar.low)
}

fn extremum_flags<F>(bars: &[Candle], key: F) -> Vec<bool>
where
    F: Fn(&Candle) -> f64,
{
    let mut flags = vec![false; bars.len()];
    for i in 1..bars.len().saturating_sub(1) {
        let value = key(&bars[i]);
        flags[i] = value > key(&bars[i - 1]) && value > key(&bars[i + 1]);
    }
    flags
}

/// Flagged indices with both neighbours inside `window`
pub fn extrema_in(flags: &[bool], window: Range<usize>) -> Vec<usize> {
    let end = window.end.min(flags.len());
    (window.start + 1..end.saturating_sub(1))
        .filter(|&i| flags[i])
        .collect()
}

/// Windows `[cur - half, cur + half)` clamped to the series, one per scan
/// position from `start`. The sequence ends with the first window that reaches
/// the end of the series.
pub fn sliding_windows(
    len: usize,
    start: usize,
    half: usize,
) -> impl Iterator<Item = (usize, Range<usize>)> {
    (start..len)
        .take_while(move |&cur| cur == start || cur + half <= len)
        .map(move |cur| (cur, cur.saturating_sub(half)..(cur + half).min(len)))
}

#[inline]
pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

/// First index in `range` where `pred` holds
#[inline]
pub fn first_where<F>(bars: &[Candle], range: Range<usize>, pred: F) -> Option<usize>
where
    F: Fn(&Candle) -> bool,
{
    let end = range.end.min(bars.len());
    (range.start..end).find(|&i| pred(&bars[i]))
}

// ============================================================
// PARAMETER CHECKS
// ============================================================

/// Take-profit / stop-loss multipliers must face the right way for `direction`
pub fn check_exit(
    direction: Direction,
    take_profit: f64,
    stop_loss: f64,
    max_days: usize,
) -> Result<()> {
    ExitRule::new(take_profit, stop_loss, max_days).validate(direction)
}

/// A fraction in `[0, 1]`
#[inline]
pub fn check_fraction(field: &'static str, value: f64) -> Result<()> {
    check_range(field, value, 0.0, 1.0)
}

/// A finite, non-negative value
#[inline]
pub fn check_non_negative(field: &'static str, value: f64) -> Result<()> {
    check_range(field, value, 0.0, f64::MAX)
}
