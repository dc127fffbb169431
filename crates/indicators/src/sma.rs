use common::Candle;

use crate::state::RollingWindow;
use crate::{Indicator, IndicatorError, Reading, Revision};

/// Which candle field a moving average tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceField {
    Close,
    Volume,
}

impl PriceField {
    fn of(self, candle: &Candle) -> f64 {
        match self {
            PriceField::Close => candle.close,
            PriceField::Volume => candle.volume,
        }
    }
}

/// Simple moving average over the last `period` samples of one field.
///
/// Unavailable until `period` intervals have been seen.
#[derive(Debug, Clone)]
pub struct Sma {
    name: String,
    pub period: usize,
    field: PriceField,
    window: RollingWindow<f64>,
}

impl Sma {
    pub fn new(name: impl Into<String>, period: usize, field: PriceField) -> Self {
        assert!(period >= 1, "SMA period must be >= 1");
        Self {
            name: name.into(),
            period,
            field,
            window: RollingWindow::new(period),
        }
    }

    pub fn current(&self) -> Option<f64> {
        if self.window.len() < self.period {
            return None;
        }
        Some(self.window.iter().sum::<f64>() / self.period as f64)
    }
}

impl Indicator for Sma {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, candle: &Candle, revision: Revision) {
        self.window.apply(revision, self.field.of(candle));
    }

    fn values(&self) -> Result<Vec<Reading>, IndicatorError> {
        Ok(vec![(self.name.clone(), self.current())])
    }
}
