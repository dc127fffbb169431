use common::Candle;

use crate::ema::{alpha, EmaState};
use crate::state::Checkpointed;
use crate::{Indicator, IndicatorError, Reading, Revision};

/// MACD (Moving Average Convergence/Divergence) indicator.
///
/// MACD line = EMA(fast) − EMA(slow), signal = EMA(macd_line, signal),
/// histogram = macd − signal. The three averages advance together from one
/// checkpoint, so a revised close re-derives all of them consistently.
#[derive(Debug, Clone)]
pub struct Macd {
    name: String,
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
    alphas: (f64, f64, f64),
    state: Checkpointed<MacdState>,
}

#[derive(Debug, Clone, Copy, Default)]
struct MacdState {
    fast: EmaState,
    slow: EmaState,
    signal: EmaState,
}

/// Latest MACD readings, all available together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

impl Macd {
    pub fn new(name: impl Into<String>, fast: usize, slow: usize, signal: usize) -> Self {
        assert!(fast >= 1 && signal >= 1, "MACD periods must be >= 1");
        assert!(
            fast < slow,
            "MACD fast period must be less than slow period"
        );
        Self {
            name: name.into(),
            fast,
            slow,
            signal,
            alphas: (alpha(fast), alpha(slow), alpha(signal)),
            state: Checkpointed::default(),
        }
    }

    /// `None` until `slow` closes have been seen.
    pub fn current(&self) -> Option<MacdValue> {
        let s = self.state.current();
        if s.slow.samples < self.slow {
            return None;
        }
        let macd = s.fast.value? - s.slow.value?;
        let signal = s.signal.value?;
        Some(MacdValue {
            macd,
            signal,
            histogram: macd - signal,
        })
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}_{suffix}", self.name)
    }
}

impl Indicator for Macd {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, candle: &Candle, revision: Revision) {
        let (af, asl, asig) = self.alphas;
        let close = candle.close;
        self.state.apply(revision, |prev| {
            let fast = prev.fast.step(af, close);
            let slow = prev.slow.step(asl, close);
            let line = fast.value.unwrap_or(close) - slow.value.unwrap_or(close);
            MacdState {
                fast,
                slow,
                signal: prev.signal.step(asig, line),
            }
        });
    }

    fn values(&self) -> Result<Vec<Reading>, IndicatorError> {
        let v = self.current();
        Ok(vec![
            (self.key("macd"), v.map(|v| v.macd)),
            (self.key("signal"), v.map(|v| v.signal)),
            (self.key("histogram"), v.map(|v| v.histogram)),
        ])
    }
}
