use common::Candle;

use crate::state::RollingWindow;
use crate::{Indicator, IndicatorError, Reading, Revision};

/// Extra candles retained beyond the RSV period so the K/D replay has room
/// to settle.
const DEFAULT_REPLAY: usize = 10;

/// Neutral readings reported while warming up.
const WARMUP: KdjValue = KdjValue {
    k: 50.0,
    d: 50.0,
    j: 0.0,
};

/// KDJ stochastic oscillator.
///
/// K and D are recomputed on every read by replaying the retained buffer
/// from the first index with a full RSV window, which keeps them correct
/// after an in-place revision of the newest candle.
#[derive(Debug, Clone)]
pub struct Kdj {
    name: String,
    pub period: usize,
    buffer: RollingWindow<Bar>,
}

#[derive(Debug, Clone, Copy)]
struct Bar {
    high: f64,
    low: f64,
    close: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KdjValue {
    pub k: f64,
    pub d: f64,
    pub j: f64,
}

/// Raw stochastic value of the newest close within `window`.
/// 50 for a flat window; always within 0..=100.
fn rsv(window: &[Bar]) -> f64 {
    let Some(last) = window.last() else {
        return 50.0;
    };
    let high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    if high <= low {
        return 50.0;
    }
    ((last.close - low) / (high - low) * 100.0).clamp(0.0, 100.0)
}

impl Kdj {
    pub fn new(name: impl Into<String>, period: usize) -> Self {
        Self::with_replay(name, period, DEFAULT_REPLAY)
    }

    pub fn with_replay(name: impl Into<String>, period: usize, replay: usize) -> Self {
        assert!(period >= 2, "KDJ period must be >= 2");
        Self {
            name: name.into(),
            period,
            buffer: RollingWindow::new(period + replay),
        }
    }

    /// Latest K/D/J; the neutral 50/50/0 until `period` candles exist.
    pub fn current(&self) -> KdjValue {
        let bars: Vec<Bar> = self.buffer.iter().copied().collect();
        if bars.len() < self.period {
            return WARMUP;
        }
        let mut k = 0.0;
        let mut d = 0.0;
        for end in self.period..=bars.len() {
            let r = rsv(&bars[end - self.period..end]);
            if end == self.period {
                k = r;
                d = k;
            } else {
                k = 2.0 / 3.0 * k + r / 3.0;
                d = 2.0 / 3.0 * d + k / 3.0;
            }
        }
        KdjValue {
            k,
            d,
            j: 3.0 * k - 2.0 * d,
        }
    }
}

impl Indicator for Kdj {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, candle: &Candle, revision: Revision) {
        self.buffer.apply(
            revision,
            Bar {
                high: candle.high,
                low: candle.low,
                close: candle.close,
            },
        );
    }

    fn values(&self) -> Result<Vec<Reading>, IndicatorError> {
        let v = self.current();
        Ok(vec![
            (format!("{}_k", self.name), Some(v.k)),
            (format!("{}_d", self.name), Some(v.d)),
            (format!("{}_j", self.name), Some(v.j)),
        ])
    }
}
