use common::Candle;

use crate::state::Checkpointed;
use crate::{Indicator, IndicatorError, Reading, Revision};

/// Smoothing factor `2 / (period + 1)`.
pub(crate) fn alpha(period: usize) -> f64 {
    2.0 / (period as f64 + 1.0)
}

/// One exponential average: the running value and how many samples built it.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EmaState {
    pub value: Option<f64>,
    pub samples: usize,
}

impl EmaState {
    /// Seeded by the first sample, then `α·x + (1-α)·prev`.
    pub fn step(&self, alpha: f64, x: f64) -> Self {
        let value = match self.value {
            None => x,
            Some(prev) => alpha * x + (1.0 - alpha) * prev,
        };
        Self {
            value: Some(value),
            samples: self.samples + 1,
        }
    }
}

/// Exponential moving average of closes.
///
/// The recurrence starts at the first close; the value is reported once
/// `period` intervals have been folded in.
#[derive(Debug, Clone)]
pub struct Ema {
    name: String,
    pub period: usize,
    alpha: f64,
    state: Checkpointed<EmaState>,
}

impl Ema {
    pub fn new(name: impl Into<String>, period: usize) -> Self {
        assert!(period >= 1, "EMA period must be >= 1");
        Self {
            name: name.into(),
            period,
            alpha: alpha(period),
            state: Checkpointed::default(),
        }
    }

    pub fn current(&self) -> Option<f64> {
        let s = self.state.current();
        if s.samples < self.period {
            return None;
        }
        s.value
    }
}

impl Indicator for Ema {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, candle: &Candle, revision: Revision) {
        let (alpha, close) = (self.alpha, candle.close);
        self.state.apply(revision, |prev| prev.step(alpha, close));
    }

    fn values(&self) -> Result<Vec<Reading>, IndicatorError> {
        Ok(vec![(self.name.clone(), self.current())])
    }
}
