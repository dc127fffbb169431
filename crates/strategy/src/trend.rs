//! Higher-timeframe trend judgement and position exit evaluation.
//!
//! Both are traits so an external analysis backend can replace the
//! rule-based versions shipped here.

use std::fmt;

use common::{MarketSnapshot, Metadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendDirection {
    /// Peaks and troughs keep rising.
    Uptrend,
    /// Peaks and troughs keep falling.
    Downtrend,
    Sideways,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrendDirection::Uptrend => "uptrend",
            TrendDirection::Downtrend => "downtrend",
            TrendDirection::Sideways => "sideways",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendResult {
    pub direction: TrendDirection,
    /// 0.0 ..= 1.0
    pub confidence: f64,
    pub reason: String,
    pub metadata: Metadata,
}

impl TrendResult {
    fn sideways(confidence: f64, reason: &str) -> Self {
        Self {
            direction: TrendDirection::Sideways,
            confidence,
            reason: reason.to_string(),
            metadata: Metadata::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSide {
    Long,
    Short,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        })
    }
}

pub trait TrendAnalyzer: Send {
    /// Judge the trend of `bars`, oldest first, the current bar last.
    fn analyze(&self, bars: &[&MarketSnapshot]) -> TrendResult;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitEvaluation {
    pub should_close: bool,
    pub reason: String,
    pub confidence: f64,
}

pub trait ExitEvaluator: Send {
    /// Decide whether an open position should be closed. `higher` and `lower`
    /// hold each timeframe's bars, oldest first, the current bar last.
    fn evaluate(
        &self,
        side: PositionSide,
        higher: &[&MarketSnapshot],
        lower: &[&MarketSnapshot],
    ) -> ExitEvaluation;
}

/// Compares the average highs and lows of the older and newer half of the
/// last `lookback` bars.
#[derive(Debug, Clone)]
pub struct RuleBasedTrendAnalyzer {
    pub lookback: usize,
    /// Minimum relative move between halves, e.g. 0.005 for 0.5 %.
    pub threshold_pct: f64,
}

impl Default for RuleBasedTrendAnalyzer {
    fn default() -> Self {
        Self {
            lookback: 5,
            threshold_pct: 0.005,
        }
    }
}

impl RuleBasedTrendAnalyzer {
    pub const TREND_CONFIDENCE: f64 = 0.7;
    pub const SIDEWAYS_CONFIDENCE: f64 = 0.5;

    pub fn new(lookback: usize, threshold_pct: f64) -> Self {
        Self {
            lookback: lookback.max(2),
            threshold_pct,
        }
    }
}

fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = values.len().max(1) as f64;
    values.sum::<f64>() / n
}

impl TrendAnalyzer for RuleBasedTrendAnalyzer {
    fn analyze(&self, bars: &[&MarketSnapshot]) -> TrendResult {
        if bars.len() < self.lookback {
            return TrendResult::sideways(0.0, "insufficient_data");
        }
        let recent = &bars[bars.len() - self.lookback..];
        let (older, newer) = recent.split_at(self.lookback / 2);

        let h1 = mean(older.iter().map(|s| s.high));
        let h2 = mean(newer.iter().map(|s| s.high));
        let l1 = mean(older.iter().map(|s| s.low));
        let l2 = mean(newer.iter().map(|s| s.low));

        let up = 1.0 + self.threshold_pct;
        let down = 1.0 - self.threshold_pct;
        let (direction, reason) = if h2 > h1 * up && l2 > l1 * up {
            (TrendDirection::Uptrend, "higher_highs_higher_lows")
        } else if h2 < h1 * down && l2 < l1 * down {
            (TrendDirection::Downtrend, "lower_highs_lower_lows")
        } else {
            return TrendResult::sideways(Self::SIDEWAYS_CONFIDENCE, "no_clear_trend");
        };

        let mut metadata = Metadata::new();
        for (key, value) in [("h1", h1), ("h2", h2), ("l1", l1), ("l2", l2)] {
            metadata.insert(key.to_string(), value.into());
        }
        TrendResult {
            direction,
            confidence: Self::TREND_CONFIDENCE,
            reason: reason.to_string(),
            metadata,
        }
    }
}

/// Closes a position once the higher-timeframe trend turns against it.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedExitEvaluator {
    pub analyzer: RuleBasedTrendAnalyzer,
}

impl ExitEvaluator for RuleBasedExitEvaluator {
    fn evaluate(
        &self,
        side: PositionSide,
        higher: &[&MarketSnapshot],
        _lower: &[&MarketSnapshot],
    ) -> ExitEvaluation {
        let trend = self.analyzer.analyze(higher);
        let against = matches!(
            (side, trend.direction),
            (PositionSide::Long, TrendDirection::Downtrend)
                | (PositionSide::Short, TrendDirection::Uptrend)
        );
        if against {
            ExitEvaluation {
                should_close: true,
                reason: "trend_flip".to_string(),
                confidence: trend.confidence,
            }
        } else {
            ExitEvaluation {
                should_close: false,
                reason: trend.reason,
                confidence: trend.confidence,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testutil::bar;

    fn series(step: f64) -> Vec<MarketSnapshot> {
        (0..5)
            .map(|i| {
                let base = 100.0 + step * i as f64;
                bar("candle4H", i * 240, base, base + 1.0)
            })
            .collect()
    }

    #[test]
    fn rising_highs_and_lows_are_uptrend() {
        let bars = series(2.0);
        let refs: Vec<&MarketSnapshot> = bars.iter().collect();
        let r = RuleBasedTrendAnalyzer::default().analyze(&refs);
        assert_eq!(r.direction, TrendDirection::Uptrend);
        assert_eq!(r.confidence, 0.7);
    }

    #[test]
    fn falling_series_is_downtrend_and_flat_is_sideways() {
        let down = series(-2.0);
        let refs: Vec<&MarketSnapshot> = down.iter().collect();
        assert_eq!(
            RuleBasedTrendAnalyzer::default().analyze(&refs).direction,
            TrendDirection::Downtrend
        );
        let flat = series(0.0);
        let refs: Vec<&MarketSnapshot> = flat.iter().collect();
        let r = RuleBasedTrendAnalyzer::default().analyze(&refs);
        assert_eq!(r.direction, TrendDirection::Sideways);
        assert_eq!(r.confidence, 0.5);
    }

    #[test]
    fn too_few_bars_is_sideways_without_confidence() {
        let bars = series(2.0);
        let refs: Vec<&MarketSnapshot> = bars.iter().take(3).collect();
        let r = RuleBasedTrendAnalyzer::default().analyze(&refs);
        assert_eq!(r.direction, TrendDirection::Sideways);
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn exit_on_trend_flip_only() {
        let down = series(-2.0);
        let refs: Vec<&MarketSnapshot> = down.iter().collect();
        let eval = RuleBasedExitEvaluator::default();
        assert!(eval.evaluate(PositionSide::Long, &refs, &[]).should_close);
        assert!(!eval.evaluate(PositionSide::Short, &refs, &[]).should_close);
    }
}
