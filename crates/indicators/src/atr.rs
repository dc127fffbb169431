use common::Candle;

use crate::state::RollingWindow;
use crate::{Indicator, IndicatorError, Reading, Revision};

/// Average True Range over `period` candles.
///
/// True range is `max(h − l, |h − prev_close|, |l − prev_close|)`; the oldest
/// retained candle has no predecessor and contributes `h − l`.
#[derive(Debug, Clone)]
pub struct Atr {
    name: String,
    pub period: usize,
    bars: RollingWindow<(f64, f64, f64)>,
}

impl Atr {
    pub fn new(name: impl Into<String>, period: usize) -> Self {
        assert!(period >= 1, "ATR period must be >= 1");
        Self {
            name: name.into(),
            period,
            bars: RollingWindow::new(period + 1),
        }
    }

    pub fn current(&self) -> Option<f64> {
        if self.bars.len() < self.period {
            return None;
        }
        let mut prev_close: Option<f64> = None;
        let mut ranges = Vec::with_capacity(self.bars.len());
        for &(high, low, close) in self.bars.iter() {
            let tr = match prev_close {
                None => high - low,
                Some(p) => (high - low).max((high - p).abs()).max((low - p).abs()),
            };
            ranges.push(tr);
            prev_close = Some(close);
        }
        let recent = &ranges[ranges.len() - self.period..];
        Some(recent.iter().sum::<f64>() / self.period as f64)
    }
}

impl Indicator for Atr {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, candle: &Candle, revision: Revision) {
        self.bars
            .apply(revision, (candle.high, candle.low, candle.close));
    }

    fn values(&self) -> Result<Vec<Reading>, IndicatorError> {
        Ok(vec![(self.name.clone(), self.current())])
    }
}
