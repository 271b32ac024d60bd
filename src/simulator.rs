//! Bounded-horizon exit simulation.
//!
//! Thresholds are multipliers of the entry price. Exits fill exactly at the
//! threshold price; when nothing triggers inside the horizon the position is
//! closed at the close of the last bar considered.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::series::{Candle, CandleSeries};
use crate::{check_range, BacktestError, Direction, Result};

/// Which price of the entry bar the position is opened at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fill {
    /// Opened at the open, the entry bar itself can trigger an exit
    AtOpen,
    /// Opened at the close, exits are evaluated from the following bar
    AtClose,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entry {
    pub index: usize,
    pub price: f64,
    pub direction: Direction,
    pub fill: Fill,
}

impl Entry {
    /// Enter at the open of `bars[index]`, if that bar exists
    pub fn at_open(bars: &[Candle], index: usize, direction: Direction) -> Option<Self> {
        bars.get(index).map(|bar| Self {
            index,
            price: bar.open,
            direction,
            fill: Fill::AtOpen,
        })
    }

    /// Enter at the close of `bars[index]`, if that bar exists
    pub fn at_close(bars: &[Candle], index: usize, direction: Direction) -> Option<Self> {
        bars.get(index).map(|bar| Self {
            index,
            price: bar.close,
            direction,
            fill: Fill::AtClose,
        })
    }
}

/// Exit thresholds of a single trade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitRule {
    /// Favorable multiplier: above 1 for longs, below 1 for shorts
    pub take_profit: f64,
    /// Adverse multiplier: below 1 for longs, above 1 for shorts
    pub stop_loss: f64,
    /// Absolute price target, checked before the take-profit multiplier
    pub target: Option<f64>,
    /// Maximum number of bars the position is held
    pub max_days: usize,
}

impl ExitRule {
    pub fn new(take_profit: f64, stop_loss: f64, max_days: usize) -> Self {
        Self {
            take_profit,
            stop_loss,
            target: None,
            max_days,
        }
    }

    pub fn with_target(mut self, price: f64) -> Self {
        self.target = Some(price);
        self
    }

    /// Tighten both multipliers to `k` average true ranges from the entry.
    ///
    /// The static multipliers stay in force as the outer bound; an undefined
    /// ATR leaves them untouched.
    pub fn with_atr_bands(
        mut self,
        direction: Direction,
        entry_price: f64,
        atr: Option<f64>,
        stop_k: f64,
        take_k: f64,
    ) -> Self {
        let Some(atr) = atr.filter(|a| a.is_finite()) else {
            return self;
        };
        let unit = atr / entry_price;
        match direction {
            Direction::Long => {
                self.stop_loss = self.stop_loss.max(1.0 - stop_k * unit);
                self.take_profit = self.take_profit.min(1.0 + take_k * unit);
            }
            Direction::Short => {
                self.stop_loss = self.stop_loss.min(1.0 + stop_k * unit);
                self.take_profit = self.take_profit.max(1.0 - take_k * unit);
            }
        }
        self
    }

    /// Multipliers must point the right way for `direction`
    pub fn validate(&self, direction: Direction) -> Result<()> {
        match direction {
            Direction::Long => {
                check_range("take_profit", self.take_profit, 1.0, f64::MAX)?;
                check_range("stop_loss", self.stop_loss, 0.0, 1.0)?;
            }
            Direction::Short => {
                check_range("take_profit", self.take_profit, 0.0, 1.0)?;
                check_range("stop_loss", self.stop_loss, 1.0, f64::MAX)?;
            }
        }
        if self.max_days == 0 {
            return Err(BacktestError::InvalidValue("max_days must be > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Target,
    /// Horizon exhausted, closed at the last bar's close
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Exit {
    pub index: usize,
    pub date: NaiveDate,
    pub price: f64,
    pub reason: ExitReason,
}

/// Resolution order when one bar crosses more than one threshold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Target, then take-profit, then stop-loss (optimistic intrabar ordering)
    #[default]
    TakeProfitFirst,
    /// Stop-loss, then target, then take-profit
    StopLossFirst,
}

/// Deterministic forward walk over a series
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TradeSimulator {
    pub tie_break: TieBreak,
}

impl TradeSimulator {
    pub fn new(tie_break: TieBreak) -> Self {
        Self { tie_break }
    }

    pub fn simulate(&self, series: &CandleSeries, entry: &Entry, rule: &ExitRule) -> Result<Exit> {
        let bars = series.candles();
        let Some(entry_bar) = bars.get(entry.index) else {
            return Err(BacktestError::InsufficientData {
                need: entry.index + 1,
                got: bars.len(),
            });
        };

        let first = match entry.fill {
            Fill::AtOpen => entry.index,
            Fill::AtClose => entry.index + 1,
        };
        if first >= bars.len() {
            // Nothing left to walk: flat at the entry bar's close
            return Ok(Exit {
                index: entry.index,
                date: entry_bar.date,
                price: entry_bar.close,
                reason: ExitReason::Timeout,
            });
        }
        let last = (first + rule.max_days.max(1) - 1).min(bars.len() - 1);

        let take = entry.price * rule.take_profit;
        let stop = entry.price * rule.stop_loss;

        for (index, bar) in bars.iter().enumerate().take(last + 1).skip(first) {
            let hit = self.check_bar(bar, entry.direction, take, stop, rule.target);
            if let Some((price, reason)) = hit {
                return Ok(Exit {
                    index,
                    date: bar.date,
                    price,
                    reason,
                });
            }
        }

        let closing = &bars[last];
        Ok(Exit {
            index: last,
            date: closing.date,
            price: closing.close,
            reason: ExitReason::Timeout,
        })
    }

    fn check_bar(
        &self,
        bar: &Candle,
        direction: Direction,
        take: f64,
        stop: f64,
        target: Option<f64>,
    ) -> Option<(f64, ExitReason)> {
        let favorable = |level: f64| match direction {
            Direction::Long => bar.high >= level,
            Direction::Short => bar.low <= level,
        };
        let adverse = |level: f64| match direction {
            Direction::Long => bar.low <= level,
            Direction::Short => bar.high >= level,
        };

        let target_hit = target
            .filter(|&t| favorable(t))
            .map(|t| (t, ExitReason::Target));
        let take_hit = favorable(take).then_some((take, ExitReason::TakeProfit));
        let stop_hit = adverse(stop).then_some((stop, ExitReason::StopLoss));

        match self.tie_break {
            TieBreak::TakeProfitFirst => target_hit.or(take_hit).or(stop_hit),
            TieBreak::StopLossFirst => stop_hit.or(target_hit).or(take_hit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Days;

    fn day(offset: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 5, 1).unwrap() + Days::new(offset)
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
    fn test_take_profit_hit() {
        let s = series(&[(100.0, 100.5, 99.5, 100.2), (100.2, 103.0, 100.0, 102.0)]);
        let entry = Entry::at_open(s.candles(), 0, Direction::Long).unwrap();
        let exit = TradeSimulator::default()
            .simulate(&s, &entry, &ExitRule::new(1.02, 0.98, 5))
            .unwrap();
        assert_eq!(exit.index, 1);
        assert_eq!(exit.reason, ExitReason::TakeProfit);
        assert_eq!(exit.price, 100.0 * 1.02);
    }

    #[test]
    fn test_both_thresholds_in_one_bar() {
        let s = series(&[(100.0, 105.0, 95.0, 100.0)]);
        let entry = Entry::at_open(s.candles(), 0, Direction::Long).unwrap();
        let rule = ExitRule::new(1.02, 0.98, 3);

        let optimistic = TradeSimulator::default().simulate(&s, &entry, &rule).unwrap();
        assert_eq!(optimistic.reason, ExitReason::TakeProfit);
        assert_eq!(optimistic.price, 100.0 * 1.02);

        let conservative = TradeSimulator::new(TieBreak::StopLossFirst)
            .simulate(&s, &entry, &rule)
            .unwrap();
        assert_eq!(conservative.reason, ExitReason::StopLoss);
        assert_eq!(conservative.price, 100.0 * 0.98);
    }

    #[test]
    fn test_short_thresholds() {
        let s = series(&[(100.0, 100.5, 99.5, 100.0), (100.0, 100.2, 96.0, 97.0)]);
        let entry = Entry::at_open(s.candles(), 0, Direction::Short).unwrap();
        let exit = TradeSimulator::default()
            .simulate(&s, &entry, &ExitRule::new(0.97, 1.015, 5))
            .unwrap();
        assert_eq!(exit.reason, ExitReason::TakeProfit);
        assert_eq!(exit.price, 100.0 * 0.97);
        assert!(Direction::Short.profit(entry.price, exit.price) > 0.0);
    }

    #[test]
    fn test_horizon_timeout() {
        let s = series(&[
            (100.0, 100.5, 99.5, 100.1),
            (100.1, 100.6, 99.6, 100.2),
            (100.2, 100.7, 99.7, 100.3),
            (100.3, 100.8, 99.8, 100.4),
        ]);
        let entry = Entry::at_open(s.candles(), 0, Direction::Long).unwrap();
        let exit = TradeSimulator::default()
            .simulate(&s, &entry, &ExitRule::new(1.05, 0.95, 2))
            .unwrap();
        assert_eq!(exit.index, 1);
        assert_eq!(exit.price, 100.2);
        assert_eq!(exit.reason, ExitReason::Timeout);
    }

    #[test]
    fn test_horizon_clamped_to_series_end() {
        let s = series(&[(100.0, 100.5, 99.5, 100.1), (100.1, 100.6, 99.6, 100.2)]);
        let entry = Entry::at_open(s.candles(), 1, Direction::Long).unwrap();
        let exit = TradeSimulator::default()
            .simulate(&s, &entry, &ExitRule::new(1.05, 0.95, 30))
            .unwrap();
        assert_eq!(exit.index, 1);
        assert_eq!(exit.date, day(1));
        assert_eq!(exit.price, 100.2);
    }

    #[test]
    fn test_fill_at_close_skips_entry_bar() {
        // Entry bar itself would hit the stop; only the next bar counts
        let s = series(&[(100.0, 100.5, 90.0, 100.0), (100.0, 104.0, 99.5, 103.0)]);
        let entry = Entry::at_close(s.candles(), 0, Direction::Long).unwrap();
        let exit = TradeSimulator::default()
            .simulate(&s, &entry, &ExitRule::new(1.03, 0.99, 5))
            .unwrap();
        assert_eq!(exit.index, 1);
        assert_eq!(exit.reason, ExitReason::TakeProfit);
    }

    #[test]
    fn test_fill_at_close_on_last_bar() {
        let s = series(&[(100.0, 100.5, 99.0, 100.2)]);
        let entry = Entry::at_close(s.candles(), 0, Direction::Long).unwrap();
        let exit = TradeSimulator::default()
            .simulate(&s, &entry, &ExitRule::new(1.03, 0.99, 5))
            .unwrap();
        assert_eq!(exit.index, 0);
        assert_eq!(exit.price, entry.price);
        assert_eq!(exit.reason, ExitReason::Timeout);
    }

    #[test]
    fn test_target_precedes_take_profit() {
        let s = series(&[(100.0, 100.2, 99.8, 100.0), (100.0, 101.5, 99.9, 101.0)]);
        let entry = Entry::at_close(s.candles(), 0, Direction::Long).unwrap();
        let rule = ExitRule::new(1.012, 0.99, 5).with_target(101.0);
        let exit = TradeSimulator::default().simulate(&s, &entry, &rule).unwrap();
        assert_eq!(exit.reason, ExitReason::Target);
        assert_eq!(exit.price, 101.0);
    }

    #[test]
    fn test_entry_out_of_range() {
        let s = series(&[(100.0, 100.5, 99.5, 100.1)]);
        let entry = Entry {
            index: 3,
            price: 100.0,
            direction: Direction::Long,
            fill: Fill::AtOpen,
        };
        assert!(TradeSimulator::default()
            .simulate(&s, &entry, &ExitRule::new(1.01, 0.99, 3))
            .is_err());
    }

    #[test]
    fn test_atr_bands() {
        let long = ExitRule::new(1.006, 0.999, 5)
            .with_atr_bands(Direction::Long, 100.0, Some(0.2), 1.5, 2.5);
        assert!((long.stop_loss - 0.999).abs() < 1e-12);
        assert!((long.take_profit - 1.005).abs() < 1e-12);

        let short = ExitRule::new(0.97, 1.015, 5)
            .with_atr_bands(Direction::Short, 100.0, Some(0.5), 2.0, 3.0);
        assert!((short.stop_loss - 1.01).abs() < 1e-12);
        assert!((short.take_profit - 0.985).abs() < 1e-12);

        let unchanged = ExitRule::new(0.97, 1.015, 5)
            .with_atr_bands(Direction::Short, 100.0, None, 2.0, 3.0);
        assert_eq!(unchanged, ExitRule::new(0.97, 1.015, 5));
    }

    #[test]
    fn test_simulate_is_deterministic() {
        let s = series(&[
            (100.0, 102.5, 97.5, 101.0),
            (101.0, 101.8, 99.2, 99.5),
            (99.5, 103.0, 96.0, 102.0),
            (102.0, 102.4, 101.1, 101.6),
            (101.6, 104.0, 98.0, 98.4),
            (98.4, 99.0, 97.9, 98.8),
        ]);
        let rules = [
            ExitRule::new(1.02, 0.98, 3),
            ExitRule::new(0.98, 1.02, 3),
            ExitRule::new(1.01, 0.99, 10).with_target(102.5),
        ];

        for tie_break in [TieBreak::TakeProfitFirst, TieBreak::StopLossFirst] {
            let simulator = TradeSimulator::new(tie_break);
            for index in 0..s.len() {
                for direction in [Direction::Long, Direction::Short] {
                    let entries = [
                        Entry::at_open(s.candles(), index, direction).unwrap(),
                        Entry::at_close(s.candles(), index, direction).unwrap(),
                    ];
                    for entry in &entries {
                        for rule in &rules {
                            let first = simulator.simulate(&s, entry, rule).unwrap();
                            let second = simulator.simulate(&s, entry, rule).unwrap();
                            assert_eq!(first, second, "{tie_break:?} {entry:?} {rule:?}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_rule_validation() {
        assert!(ExitRule::new(1.02, 0.98, 5).validate(Direction::Long).is_ok());
        assert!(ExitRule::new(0.98, 1.02, 5).validate(Direction::Long).is_err());
        assert!(ExitRule::new(0.98, 1.02, 5).validate(Direction::Short).is_ok());
        assert!(ExitRule::new(1.02, 0.98, 0).validate(Direction::Long).is_err());
    }
}
