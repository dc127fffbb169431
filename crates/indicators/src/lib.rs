//! Incremental technical indicators and the per-timeframe indicator engine.
//!
//! Every indicator owns its recurrence state and is fed candles one at a time.
//! A candle revised in place (same timestamp as the previous one) arrives as
//! [`Revision::Replace`] and must overwrite the last sample rather than add a
//! new one.

pub mod atr;
pub mod candle_pct;
pub mod engine;
pub mod ema;
pub mod kdj;
pub mod macd;
pub mod registry;
pub mod rsi;
pub mod sma;
mod state;

pub use atr::Atr;
pub use candle_pct::CandlePct;
pub use engine::{IndicatorEngine, IngestError};
pub use ema::Ema;
pub use kdj::Kdj;
pub use macd::Macd;
pub use registry::{build_indicator, build_indicators, default_indicators};
pub use rsi::{Rsi, Smoothing};
pub use sma::{PriceField, Sma};

use common::Candle;
use thiserror::Error;

/// How a candle relates to the previous sample an indicator has seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revision {
    /// A new interval.
    Append,
    /// The latest interval, revised.
    Replace,
}

#[derive(Debug, Error)]
pub enum IndicatorError {
    #[error("non-finite output for '{0}'")]
    NonFinite(String),

    #[error("{0}")]
    Compute(String),
}

/// One named output of an indicator; `None` while warming up.
pub type Reading = (String, Option<f64>);

/// All indicator implementations must satisfy this trait.
pub trait Indicator: Send {
    /// Instance name; prefix of every output key.
    fn name(&self) -> &str;

    /// Feed one candle.
    fn update(&mut self, candle: &Candle, revision: Revision);

    /// Current outputs. An `Err` drops every key of this indicator for the
    /// cycle without affecting the others.
    fn values(&self) -> Result<Vec<Reading>, IndicatorError>;
}

/// Round to six decimals, the precision percentages are reported at.
pub(crate) fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}
