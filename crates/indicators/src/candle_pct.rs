use common::Candle;

use crate::state::RollingWindow;
use crate::{round6, Indicator, IndicatorError, Reading, Revision};

const MAX_WINDOW: usize = 20;
const SUM_SPANS: [usize; 3] = [3, 5, 10];
const CLOSED_CAPACITY: usize = 10;

/// Percentage-change family.
///
/// * `{name}_1..{name}_W`: close-to-close % change of each of the last W bars,
///   newest first, the live bar included.
/// * `{name}_abs_avg`: running mean of |% change| over every closed bar seen.
/// * `{name}_sum_3/5/10`: signed sums over the most recent closed bars.
///
/// A bar counts as closed once a newer timestamp arrives, so revisions of the
/// live bar never reach the running mean or the sums.
#[derive(Debug, Clone)]
pub struct CandlePct {
    name: String,
    pub window: usize,
    closes: RollingWindow<f64>,
    closed: RollingWindow<f64>,
    abs_avg: f64,
    abs_count: u64,
}

/// `(current − prev) / prev · 100` at six decimals; `None` when `prev` is 0.
fn pct(current: f64, prev: f64) -> Option<f64> {
    if prev == 0.0 {
        return None;
    }
    Some(round6((current - prev) / prev * 100.0))
}

impl CandlePct {
    /// `window` is clamped to 1..=20.
    pub fn new(name: impl Into<String>, window: usize) -> Self {
        let window = window.clamp(1, MAX_WINDOW);
        Self {
            name: name.into(),
            window,
            closes: RollingWindow::new((window + 1).max(3)),
            closed: RollingWindow::new(CLOSED_CAPACITY),
            abs_avg: 0.0,
            abs_count: 0,
        }
    }

    /// % change of the bar `lag` positions back (1 = newest).
    pub fn lag(&self, lag: usize) -> Option<f64> {
        let current = self.closes.get_back(lag - 1)?;
        let prev = self.closes.get_back(lag)?;
        pct(*current, *prev)
    }

    pub fn abs_avg(&self) -> Option<f64> {
        (self.abs_count > 0).then(|| round6(self.abs_avg))
    }

    pub fn closed_sum(&self, span: usize) -> Option<f64> {
        if self.closed.len() < span {
            return None;
        }
        Some(round6(self.closed.iter().rev().take(span).sum()))
    }
}

impl Indicator for CandlePct {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, candle: &Candle, revision: Revision) {
        self.closes.apply(revision, candle.close);
        if revision != Revision::Append {
            return;
        }
        // The bar just superseded is final: fold its change in once.
        let (Some(closed), Some(before)) = (self.closes.get_back(1), self.closes.get_back(2)) else {
            return;
        };
        if let Some(change) = pct(*closed, *before) {
            self.closed.apply(Revision::Append, change);
            let abs = round6(change.abs());
            let n = self.abs_count as f64;
            self.abs_avg = (n * self.abs_avg + abs) / (n + 1.0);
            self.abs_count += 1;
        }
    }

    fn values(&self) -> Result<Vec<Reading>, IndicatorError> {
        let mut out = Vec::with_capacity(self.window + 1 + SUM_SPANS.len());
        for lag in 1..=self.window {
            out.push((format!("{}_{lag}", self.name), self.lag(lag)));
        }
        out.push((format!("{}_abs_avg", self.name), self.abs_avg()));
        for span in SUM_SPANS {
            out.push((format!("{}_sum_{span}", self.name), self.closed_sum(span)));
        }
        Ok(out)
    }
}
