//! Chart pattern detectors
//!
//! Every detector scans a [`crate::series::CandleSeries`] for one geometry and trades
//! each match through the [`crate::simulator::TradeSimulator`].
//!
//! # Pattern Families
//!
//! - **Candlesticks (4)**: Bullish Hammer, Inverted Hammer, Shooting Star, Tweezer Bottoms
//! - **Runs (2)**: Broadening Bottoms, Flags High & Tight
//! - **Support / resistance (1)**: Broadening Formations
//! - **Local extrema (3)**: Double Tops, Double Bottoms, Head and Shoulders Top
//! - **Cups (2)**: Cup with Handle, Inverted Cup with Handle

pub mod helpers;

/// Generate `with_defaults()` -> `Self::default()` for multiple detector types.
macro_rules! impl_with_defaults {
  ($($detector:ty),* $(,)?) => {
    $(impl $detector {
      pub fn with_defaults() -> Self { Self::default() }
    })*
  };
}

pub mod candlestick;
pub mod cup;
pub mod extrema;
pub mod formations;
pub mod runs;

// Re-export all detectors for convenience
pub use candlestick::*;
pub use cup::*;
pub use extrema::*;
pub use formations::*;
pub use runs::*;
