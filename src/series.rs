//! Daily candles and the indicator table computed alongside them.
//!
//! A [`CandleSeries`] is validated and indicator-complete at construction and
//! never mutated afterwards. Indicator values that are not yet defined (the
//! window is still filling) are stored as NaN and surface as `None`.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{BacktestError, Result};

// ============================================================
// OHLC TRAITS
// ============================================================

/// Core OHLC data trait
pub trait OHLC {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
}

/// Extension trait with computed properties for OHLC data
pub trait OHLCExt: OHLC {
    #[inline]
    fn body(&self) -> f64 {
        (self.close() - self.open()).abs()
    }

    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    #[inline]
    fn upper_shadow(&self) -> f64 {
        self.high() - self.open().max(self.close())
    }

    #[inline]
    fn lower_shadow(&self) -> f64 {
        self.open().min(self.close()) - self.low()
    }

    #[inline]
    fn is_bullish(&self) -> bool {
        self.close() > self.open()
    }

    #[inline]
    fn is_bearish(&self) -> bool {
        self.close() < self.open()
    }

    /// Validate OHLC data consistency
    fn validate(&self) -> Result<()> {
        let prices = [self.open(), self.high(), self.low(), self.close()];
        if prices.iter().any(|p| p.is_nan()) {
            return Err(BacktestError::InvalidBar {
                index: 0,
                reason: "NaN in OHLC",
            });
        }
        if prices.iter().any(|p| p.is_infinite()) {
            return Err(BacktestError::InvalidBar {
                index: 0,
                reason: "Infinite value in OHLC",
            });
        }
        if prices.iter().any(|&p| p <= 0.0) {
            return Err(BacktestError::InvalidBar {
                index: 0,
                reason: "non-positive price",
            });
        }
        if self.high() < self.low() {
            return Err(BacktestError::InvalidBar {
                index: 0,
                reason: "high < low",
            });
        }
        Ok(())
    }
}

impl<T: OHLC> OHLCExt for T {}

// ============================================================
// CANDLES
// ============================================================

/// One trading day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
        }
    }
}

impl OHLC for Candle {
    #[inline]
    fn open(&self) -> f64 {
        self.open
    }

    #[inline]
    fn high(&self) -> f64 {
        self.high
    }

    #[inline]
    fn low(&self) -> f64 {
        self.low
    }

    #[inline]
    fn close(&self) -> f64 {
        self.close
    }
}

/// Row as handed over by the ingestion layer; every column may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BarRecord {
    pub date: Option<NaiveDate>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
}

impl BarRecord {
    /// Converts the record at position `index`, failing on the first absent column
    pub fn into_candle(self, index: usize) -> Result<Candle> {
        let missing = |field: &'static str| BacktestError::MissingField { index, field };
        Ok(Candle {
            date: self.date.ok_or_else(|| missing("date"))?,
            open: self.open.ok_or_else(|| missing("open"))?,
            high: self.high.ok_or_else(|| missing("high"))?,
            low: self.low.ok_or_else(|| missing("low"))?,
            close: self.close.ok_or_else(|| missing("close"))?,
        })
    }
}

impl From<Candle> for BarRecord {
    fn from(c: Candle) -> Self {
        Self {
            date: Some(c.date),
            open: Some(c.open),
            high: Some(c.high),
            low: Some(c.low),
            close: Some(c.close),
        }
    }
}

// ============================================================
// INDICATORS
// ============================================================

/// Precomputable indicator, keyed by its window length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    /// Rolling mean of close
    Sma(usize),
    /// Rolling mean of high - low
    RangeAtr(usize),
    /// Rolling mean of the true range
    TrueRangeAtr(usize),
    /// Relative strength index over simple rolling means of gains and losses
    Rsi(usize),
}

impl Indicator {
    /// Computed for every series
    pub const DEFAULTS: [Indicator; 7] = [
        Indicator::Sma(5),
        Indicator::Sma(10),
        Indicator::Sma(20),
        Indicator::Sma(50),
        Indicator::RangeAtr(14),
        Indicator::TrueRangeAtr(14),
        Indicator::Rsi(12),
    ];

    #[inline]
    pub fn period(self) -> usize {
        match self {
            Indicator::Sma(n)
            | Indicator::RangeAtr(n)
            | Indicator::TrueRangeAtr(n)
            | Indicator::Rsi(n) => n,
        }
    }

    fn compute(self, candles: &[Candle]) -> Vec<f64> {
        match self {
            Indicator::Sma(n) => {
                let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
                rolling_mean(&closes, n)
            }
            Indicator::RangeAtr(n) => {
                let ranges: Vec<f64> = candles.iter().map(|c| c.range()).collect();
                rolling_mean(&ranges, n)
            }
            Indicator::TrueRangeAtr(n) => rolling_mean(&true_range(candles), n),
            Indicator::Rsi(n) => {
                let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
                rsi(&closes, n)
            }
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Indicator::Sma(n) => write!(f, "SMA({n})"),
            Indicator::RangeAtr(n) => write!(f, "ATR({n})"),
            Indicator::TrueRangeAtr(n) => write!(f, "TR-ATR({n})"),
            Indicator::Rsi(n) => write!(f, "RSI({n})"),
        }
    }
}

/// Trailing mean over `period` values; NaN until the window is full.
pub fn rolling_mean(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || period > values.len() {
        return out;
    }
    for (i, window) in values.windows(period).enumerate() {
        out[i + period - 1] = window.iter().sum::<f64>() / period as f64;
    }
    out
}

/// True range; the first bar has no previous close and uses high - low.
pub fn true_range<T: OHLC>(bars: &[T]) -> Vec<f64> {
    let mut out = Vec::with_capacity(bars.len());
    for (i, bar) in bars.iter().enumerate() {
        let hl = bar.high() - bar.low();
        let tr = match i.checked_sub(1).and_then(|p| bars.get(p)) {
            Some(prev) => hl
                .max((bar.high() - prev.close()).abs())
                .max((bar.low() - prev.close()).abs()),
            None => hl,
        };
        out.push(tr);
    }
    out
}

/// RSI with simple rolling means. The first bar contributes a zero change.
/// No losses in the window gives 100, a window with no movement at all is
/// undefined.
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let mut gains = Vec::with_capacity(closes.len());
    let mut losses = Vec::with_capacity(closes.len());
    for (i, close) in closes.iter().enumerate() {
        let change = i.checked_sub(1).map_or(0.0, |p| close - closes[p]);
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let avg_gain = rolling_mean(&gains, period);
    let avg_loss = rolling_mean(&losses, period);

    avg_gain
        .iter()
        .zip(&avg_loss)
        .map(|(&gain, &loss)| {
            if gain.is_nan() || loss.is_nan() {
                f64::NAN
            } else if loss > 0.0 {
                100.0 - 100.0 / (1.0 + gain / loss)
            } else if gain > 0.0 {
                100.0
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// Read-only indicator table
#[derive(Debug, Clone, Default)]
pub struct Indicators {
    table: HashMap<Indicator, Vec<f64>>,
}

impl Indicators {
    /// Compute each requested indicator once
    pub fn compute(
        candles: &[Candle],
        requested: impl IntoIterator<Item = Indicator>,
    ) -> Result<Self> {
        let mut table = HashMap::new();
        for indicator in requested {
            if indicator.period() == 0 {
                return Err(BacktestError::InvalidConfig(format!(
                    "{indicator} has a zero-length window"
                )));
            }
            table
                .entry(indicator)
                .or_insert_with(|| indicator.compute(candles));
        }
        Ok(Self { table })
    }

    #[inline]
    pub fn contains(&self, indicator: Indicator) -> bool {
        self.table.contains_key(&indicator)
    }

    /// Full value column, NaN where undefined
    pub fn series(&self, indicator: Indicator) -> Result<&[f64]> {
        self.table
            .get(&indicator)
            .map(Vec::as_slice)
            .ok_or(BacktestError::MissingIndicator(indicator))
    }

    /// Computed indicators, sorted
    pub fn available(&self) -> Vec<Indicator> {
        let mut keys: Vec<_> = self.table.keys().copied().collect();
        keys.sort();
        keys
    }
}

// ============================================================
// CANDLE SERIES
// ============================================================

/// Validated, date-ordered candles plus their indicators
#[derive(Debug, Clone, Default)]
pub struct CandleSeries {
    candles: Vec<Candle>,
    indicators: Indicators,
}

impl CandleSeries {
    /// Build a series with [`Indicator::DEFAULTS`]
    pub fn new(candles: Vec<Candle>) -> Result<Self> {
        Self::with_indicators(candles, [])
    }

    /// Build a series with the defaults plus `extra`
    pub fn with_indicators(
        candles: Vec<Candle>,
        extra: impl IntoIterator<Item = Indicator>,
    ) -> Result<Self> {
        validate_candles(&candles)?;
        let indicators =
            Indicators::compute(&candles, Indicator::DEFAULTS.into_iter().chain(extra))?;
        Ok(Self {
            candles,
            indicators,
        })
    }

    /// Build from ingestion records; any absent column fails the whole series
    pub fn from_records(records: Vec<BarRecord>) -> Result<Self> {
        let candles = records
            .into_iter()
            .enumerate()
            .map(|(index, record)| record.into_candle(index))
            .collect::<Result<Vec<_>>>()?;
        Self::new(candles)
    }

    /// This series, or a copy with the missing indicators added
    pub fn require(
        &self,
        indicators: impl IntoIterator<Item = Indicator>,
    ) -> Result<Cow<'_, CandleSeries>> {
        let missing: Vec<Indicator> = indicators
            .into_iter()
            .filter(|i| !self.indicators.contains(*i))
            .collect();
        if missing.is_empty() {
            return Ok(Cow::Borrowed(self));
        }
        let all = self.indicators.available().into_iter().chain(missing);
        Ok(Cow::Owned(CandleSeries {
            candles: self.candles.clone(),
            indicators: Indicators::compute(&self.candles, all)?,
        }))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    #[inline]
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    #[inline]
    pub fn indicators(&self) -> &Indicators {
        &self.indicators
    }

    /// Index of the bar dated `date`
    pub fn position_of(&self, date: NaiveDate) -> Option<usize> {
        self.candles.binary_search_by_key(&date, |c| c.date).ok()
    }

    /// First index of the most recent `n` bars
    #[inline]
    pub fn tail(&self, n: usize) -> usize {
        self.candles.len().saturating_sub(n)
    }

    /// Indicator value at `index`.
    ///
    /// Errors if the indicator was never computed; `None` if it is not yet
    /// defined at `index` or `index` is past the end.
    pub fn value(&self, indicator: Indicator, index: usize) -> Result<Option<f64>> {
        let column = self.indicators.series(indicator)?;
        Ok(column.get(index).copied().filter(|v| !v.is_nan()))
    }
}

fn validate_candles(candles: &[Candle]) -> Result<()> {
    for (i, candle) in candles.iter().enumerate() {
        candle.validate().map_err(|e| match e {
            BacktestError::InvalidBar { reason, .. } => {
                BacktestError::InvalidBar { index: i, reason }
            }
            other => other,
        })?;
        if i > 0 && candle.date <= candles[i - 1].date {
            return Err(BacktestError::UnorderedDate { index: i });
        }
    }
    Ok(())
}
