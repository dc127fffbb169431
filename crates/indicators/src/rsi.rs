use common::Candle;

use crate::state::{Checkpointed, RollingWindow};
use crate::{Indicator, IndicatorError, Reading, Revision};

/// How gains and losses are averaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Smoothing {
    /// Arithmetic mean of the last `period` transitions.
    Simple,
    /// Wilder's smoothed average, seeded with the arithmetic mean of the
    /// first `period` transitions.
    #[default]
    Wilder,
}

impl Smoothing {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "simple" | "sma" => Some(Smoothing::Simple),
            "wilder" | "rma" => Some(Smoothing::Wilder),
            _ => None,
        }
    }
}

/// RSI (Relative Strength Index) indicator.
///
/// Unavailable until `period` transitions (`period + 1` closes) exist.
#[derive(Debug, Clone)]
pub struct Rsi {
    name: String,
    pub period: usize,
    smoothing: Smoothing,
    closes: RollingWindow<f64>,
    wilder: Checkpointed<WilderState>,
}

#[derive(Debug, Clone, Copy, Default)]
struct WilderState {
    prev_close: Option<f64>,
    transitions: usize,
    avg_gain: f64,
    avg_loss: f64,
}

impl WilderState {
    fn step(&self, period: usize, close: f64) -> Self {
        let Some(prev) = self.prev_close else {
            return Self {
                prev_close: Some(close),
                ..*self
            };
        };
        let change = close - prev;
        let (gain, loss) = (change.max(0.0), (-change).max(0.0));
        let n = period as f64;
        let transitions = self.transitions + 1;
        // Until the seed is complete the averages hold running sums.
        let (avg_gain, avg_loss) = if transitions < period {
            (self.avg_gain + gain, self.avg_loss + loss)
        } else if transitions == period {
            ((self.avg_gain + gain) / n, (self.avg_loss + loss) / n)
        } else {
            (
                (self.avg_gain * (n - 1.0) + gain) / n,
                (self.avg_loss * (n - 1.0) + loss) / n,
            )
        };
        Self {
            prev_close: Some(close),
            transitions,
            avg_gain,
            avg_loss,
        }
    }
}

/// Map average gain/loss to the 0..100 scale.
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_gain <= 0.0 && avg_loss <= 0.0 {
        return 50.0;
    }
    if avg_loss <= 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    (100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0)
}

impl Rsi {
    pub fn new(name: impl Into<String>, period: usize, smoothing: Smoothing) -> Self {
        assert!(period >= 2, "RSI period must be >= 2");
        Self {
            name: name.into(),
            period,
            smoothing,
            closes: RollingWindow::new(period + 1),
            wilder: Checkpointed::default(),
        }
    }

    pub fn current(&self) -> Option<f64> {
        match self.smoothing {
            Smoothing::Simple => {
                if self.closes.len() < self.period + 1 {
                    return None;
                }
                let (mut gains, mut losses) = (0.0, 0.0);
                let closes: Vec<f64> = self.closes.iter().copied().collect();
                for w in closes.windows(2) {
                    let change = w[1] - w[0];
                    if change > 0.0 {
                        gains += change;
                    } else {
                        losses -= change;
                    }
                }
                let n = self.period as f64;
                Some(rsi_from_averages(gains / n, losses / n))
            }
            Smoothing::Wilder => {
                let s = self.wilder.current();
                if s.transitions < self.period {
                    return None;
                }
                Some(rsi_from_averages(s.avg_gain, s.avg_loss))
            }
        }
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, candle: &Candle, revision: Revision) {
        let close = candle.close;
        match self.smoothing {
            Smoothing::Simple => self.closes.apply(revision, close),
            Smoothing::Wilder => {
                let period = self.period;
                self.wilder.apply(revision, |prev| prev.step(period, close));
            }
        }
    }

    fn values(&self) -> Result<Vec<Reading>, IndicatorError> {
        Ok(vec![(self.name.clone(), self.current())])
    }
}
