use chrono::{DateTime, Utc};
use common::{ComponentConfig, MarketSnapshot, Signal, SignalAction, Timeframe};

use crate::cross::{detect_macd_cross, MacdCross};
use crate::trend::{
    ExitEvaluator, PositionSide, RuleBasedExitEvaluator, RuleBasedTrendAnalyzer, TrendAnalyzer,
    TrendDirection,
};
use crate::{Phase, Strategy, StrategyContext, StrategyError};

#[derive(Debug, Clone)]
pub struct TrendMacdParams {
    pub higher_timeframe: Timeframe,
    pub lower_timeframe: Timeframe,
    pub higher_macd: String,
    pub lower_macd: String,
    /// A trend weaker than this never allows an entry.
    pub min_trend_confidence: f64,
    /// Exit evaluations below this confidence are ignored.
    pub exit_confidence: f64,
    pub trend_lookback: usize,
    pub trend_threshold_pct: f64,
}

impl Default for TrendMacdParams {
    fn default() -> Self {
        Self {
            higher_timeframe: Timeframe::from("candle4H"),
            lower_timeframe: Timeframe::from("candle15m"),
            higher_macd: "macd".into(),
            lower_macd: "macd".into(),
            min_trend_confidence: 0.6,
            exit_confidence: 0.7,
            trend_lookback: 5,
            trend_threshold_pct: 0.005,
        }
    }
}

impl TrendMacdParams {
    pub fn from_config(cfg: &ComponentConfig) -> Self {
        let d = Self::default();
        Self {
            higher_timeframe: Timeframe::from(cfg.param_str("higher_timeframe", d.higher_timeframe.as_str())),
            lower_timeframe: Timeframe::from(cfg.param_str("lower_timeframe", d.lower_timeframe.as_str())),
            higher_macd: cfg.param_str("higher_macd", &d.higher_macd).to_string(),
            lower_macd: cfg.param_str("lower_macd", &d.lower_macd).to_string(),
            min_trend_confidence: cfg.param_f64("min_trend_confidence", d.min_trend_confidence),
            exit_confidence: cfg.param_f64("exit_confidence", d.exit_confidence),
            trend_lookback: cfg.param_usize("trend_lookback", d.trend_lookback).max(2),
            trend_threshold_pct: cfg.param_f64("trend_threshold_pct", d.trend_threshold_pct),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Position {
    Flat,
    Open {
        side: PositionSide,
        entry_price: f64,
        /// Higher-timeframe bar current at entry. Crosses on it or earlier
        /// bars never close the position.
        entry_higher_ts: DateTime<Utc>,
    },
}

/// Higher-timeframe trend plus lower-timeframe MACD cross.
///
/// * Entry: uptrend + lower golden cross → long (buy); downtrend + lower
///   death cross → short (sell). The trend must clear `min_trend_confidence`.
/// * Exit: the opposite MACD cross on the higher timeframe, or the exit
///   evaluator calling for a close.
///
/// Composed views keep reusing a timeframe's latest bar; a cross counts once,
/// on the evaluation that first sees its bar.
pub struct TrendMacd {
    name: String,
    params: TrendMacdParams,
    analyzer: Box<dyn TrendAnalyzer>,
    exit: Box<dyn ExitEvaluator>,
    position: Position,
    seen_higher: Option<DateTime<Utc>>,
    seen_lower: Option<DateTime<Utc>>,
}

impl TrendMacd {
    pub fn new(name: impl Into<String>, params: TrendMacdParams) -> Self {
        let analyzer = RuleBasedTrendAnalyzer::new(params.trend_lookback, params.trend_threshold_pct);
        let exit = RuleBasedExitEvaluator {
            analyzer: analyzer.clone(),
        };
        Self {
            name: name.into(),
            params,
            analyzer: Box::new(analyzer),
            exit: Box::new(exit),
            position: Position::Flat,
            seen_higher: None,
            seen_lower: None,
        }
    }

    /// Swap in other trend and exit judgement.
    pub fn with_judgement(
        mut self,
        analyzer: Box<dyn TrendAnalyzer>,
        exit: Box<dyn ExitEvaluator>,
    ) -> Self {
        self.analyzer = analyzer;
        self.exit = exit;
        self
    }

    /// Whether `bar` is new to this strategy: its timeframe triggered the
    /// current view, or its timestamp differs from the last one evaluated.
    fn is_fresh(ctx: &StrategyContext<'_>, bar: &MarketSnapshot, seen: Option<DateTime<Utc>>) -> bool {
        ctx.snapshot().trigger == bar.timeframe || seen != Some(bar.timestamp)
    }

    /// Earlier bars of `tf` followed by the current one.
    fn bars_with_current<'c>(
        ctx: &'c StrategyContext<'_>,
        tf: &Timeframe,
        current: &'c MarketSnapshot,
        lookback: usize,
    ) -> Vec<&'c MarketSnapshot> {
        let mut bars = ctx.recent_bars(tf, lookback.saturating_sub(1));
        bars.push(current);
        bars
    }

    fn evaluate_exit(
        &mut self,
        ctx: &StrategyContext<'_>,
        higher: &MarketSnapshot,
        lower: &MarketSnapshot,
        side: PositionSide,
        entry_price: f64,
        entry_higher_ts: DateTime<Utc>,
    ) -> Signal {
        let p = &self.params;
        let cross = if higher.timestamp > entry_higher_ts && Self::is_fresh(ctx, higher, self.seen_higher) {
            detect_macd_cross(higher, ctx.previous_bar(&p.higher_timeframe), &p.higher_macd)
        } else {
            MacdCross::Neutral
        };
        let close_action = match side {
            PositionSide::Long => SignalAction::Sell,
            PositionSide::Short => SignalAction::Buy,
        };
        match (side, cross) {
            (PositionSide::Long, MacdCross::Death) => {
                self.position = Position::Flat;
                return Signal::new(close_action, 0.9, "higher_death_cross_close_long")
                    .with("entry_price", entry_price)
                    .with("close", higher.close);
            }
            (PositionSide::Short, MacdCross::Golden) => {
                self.position = Position::Flat;
                return Signal::new(close_action, 0.9, "higher_golden_cross_close_short")
                    .with("entry_price", entry_price)
                    .with("close", higher.close);
            }
            _ => {}
        }

        let lookback = ctx.history_len() + 1;
        let higher_bars = Self::bars_with_current(ctx, &p.higher_timeframe, higher, lookback);
        let lower_bars = Self::bars_with_current(ctx, &p.lower_timeframe, lower, lookback);
        let verdict = self.exit.evaluate(side, &higher_bars, &lower_bars);
        if verdict.should_close && verdict.confidence >= p.exit_confidence {
            self.position = Position::Flat;
            return Signal::new(close_action, verdict.confidence, format!("exit_{}", verdict.reason))
                .with("entry_price", entry_price)
                .with("side", side.to_string());
        }
        Signal::hold("in_position_holding")
            .with("entry_price", entry_price)
            .with("side", side.to_string())
    }

    fn evaluate_entry(
        &mut self,
        ctx: &StrategyContext<'_>,
        higher: &MarketSnapshot,
        lower: &MarketSnapshot,
    ) -> Signal {
        let p = &self.params;
        let bars = Self::bars_with_current(ctx, &p.higher_timeframe, higher, p.trend_lookback);
        let trend = self.analyzer.analyze(&bars);
        let cross = if Self::is_fresh(ctx, lower, self.seen_lower) {
            detect_macd_cross(lower, ctx.previous_bar(&p.lower_timeframe), &p.lower_macd)
        } else {
            MacdCross::Neutral
        };

        let side = match (trend.direction, cross) {
            (TrendDirection::Uptrend, MacdCross::Golden) => Some(PositionSide::Long),
            (TrendDirection::Downtrend, MacdCross::Death) => Some(PositionSide::Short),
            _ => None,
        };
        let Some(side) = side.filter(|_| trend.confidence >= p.min_trend_confidence) else {
            return Signal::hold("waiting_for_entry")
                .with("trend", trend.direction.to_string())
                .with("trend_confidence", trend.confidence)
                .with("macd_cross", format!("{cross:?}").to_lowercase());
        };

        let (action, reason) = match side {
            PositionSide::Long => (SignalAction::Buy, "uptrend_lower_golden_cross"),
            PositionSide::Short => (SignalAction::Sell, "downtrend_lower_death_cross"),
        };
        self.position = Position::Open {
            side,
            entry_price: lower.close,
            entry_higher_ts: higher.timestamp,
        };
        Signal::new(action, trend.confidence * 0.9, reason)
            .with("entry_price", lower.close)
            .with("side", side.to_string())
            .with("trend", trend.reason)
    }
}

impl Strategy for TrendMacd {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "trend_macd"
    }

    fn phase(&self) -> Phase {
        match self.position {
            Position::Flat => Phase::Idle,
            Position::Open { .. } => Phase::InPosition,
        }
    }

    fn evaluate(&mut self, ctx: &StrategyContext<'_>) -> Result<Signal, StrategyError> {
        let (Some(higher), Some(lower)) = (
            ctx.get(&self.params.higher_timeframe),
            ctx.get(&self.params.lower_timeframe),
        ) else {
            return Ok(Signal::hold("missing_timeframe"));
        };
        let signal = match self.position {
            Position::Open {
                side,
                entry_price,
                entry_higher_ts,
            } => self.evaluate_exit(ctx, higher, lower, side, entry_price, entry_higher_ts),
            Position::Flat => self.evaluate_entry(ctx, higher, lower),
        };
        self.seen_higher = Some(higher.timestamp);
        self.seen_lower = Some(lower.timestamp);
        Ok(signal)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use common::{AnnotatedSnapshot, MultiTimeframeSnapshot};

    use super::*;
    use crate::context::testutil::{bar, view, with};
    use crate::trend::{ExitEvaluation, TrendResult};

    const HI: &str = "candle4H";
    const LO: &str = "candle15m";

    fn macd(snap: MarketSnapshot, line: f64, signal: f64) -> MarketSnapshot {
        with(with(snap, "macd_macd", line), "macd_signal", signal)
    }

    struct FixedTrend(TrendDirection, f64);

    impl TrendAnalyzer for FixedTrend {
        fn analyze(&self, _bars: &[&MarketSnapshot]) -> TrendResult {
            TrendResult {
                direction: self.0,
                confidence: self.1,
                reason: "fixed".into(),
                metadata: Default::default(),
            }
        }
    }

    struct NeverExit;

    impl ExitEvaluator for NeverExit {
        fn evaluate(
            &self,
            _side: PositionSide,
            _higher: &[&MarketSnapshot],
            _lower: &[&MarketSnapshot],
        ) -> ExitEvaluation {
            ExitEvaluation {
                should_close: false,
                reason: "never".into(),
                confidence: 1.0,
            }
        }
    }

    fn strategy(direction: TrendDirection, confidence: f64) -> TrendMacd {
        TrendMacd::new("tm", TrendMacdParams::default())
            .with_judgement(Box::new(FixedTrend(direction, confidence)), Box::new(NeverExit))
    }

    fn step(
        s: &mut TrendMacd,
        history: &mut VecDeque<Arc<MultiTimeframeSnapshot>>,
        bars: Vec<MarketSnapshot>,
    ) -> Signal {
        step_on(s, history, LO, bars)
    }

    /// Evaluate a view composed when `ingested` received a candle.
    fn step_on(
        s: &mut TrendMacd,
        history: &mut VecDeque<Arc<MultiTimeframeSnapshot>>,
        ingested: &str,
        bars: Vec<MarketSnapshot>,
    ) -> Signal {
        let trigger = Timeframe::from(LO);
        let current = AnnotatedSnapshot::pass_through(view(ingested, bars));
        let ctx = StrategyContext::new(&trigger, &current, history);
        let signal = s.evaluate(&ctx).unwrap();
        history.push_back(Arc::clone(&current.snapshot));
        signal
    }

    #[test]
    fn uptrend_and_golden_cross_opens_long() {
        let mut s = strategy(TrendDirection::Uptrend, 0.7);
        let mut h = VecDeque::new();
        let hi = macd(bar(HI, 0, 100.0, 101.0), 1.0, 0.5);
        assert!(step(&mut s, &mut h, vec![hi.clone(), macd(bar(LO, 0, 1.0, 1.0), -1.0, 0.0)]).is_hold());
        let sig = step(&mut s, &mut h, vec![hi, macd(bar(LO, 15, 1.0, 2.0), 1.0, 0.0)]);
        assert_eq!(sig.action, SignalAction::Buy);
        assert!((sig.confidence - 0.63).abs() < 1e-9);
        assert_eq!(sig.entry_price(), Some(2.0));
        assert_eq!(s.phase(), Phase::InPosition);
    }

    #[test]
    fn weak_trend_blocks_entry() {
        let mut s = strategy(TrendDirection::Uptrend, 0.5);
        let mut h = VecDeque::new();
        let hi = bar(HI, 0, 100.0, 101.0);
        step(&mut s, &mut h, vec![hi.clone(), macd(bar(LO, 0, 1.0, 1.0), -1.0, 0.0)]);
        let sig = step(&mut s, &mut h, vec![hi, macd(bar(LO, 15, 1.0, 2.0), 1.0, 0.0)]);
        assert!(sig.is_hold());
    }

    #[test]
    fn higher_death_cross_closes_long() {
        let mut s = strategy(TrendDirection::Uptrend, 0.7);
        let mut h = VecDeque::new();
        let hi0 = macd(bar(HI, 0, 100.0, 101.0), 1.0, 0.5);
        step(&mut s, &mut h, vec![hi0.clone(), macd(bar(LO, 0, 1.0, 1.0), -1.0, 0.0)]);
        step(&mut s, &mut h, vec![hi0, macd(bar(LO, 15, 1.0, 2.0), 1.0, 0.0)]);
        assert_eq!(s.phase(), Phase::InPosition);

        let hi1 = macd(bar(HI, 240, 101.0, 99.0), -0.5, 0.2);
        let sig = step(&mut s, &mut h, vec![hi1, macd(bar(LO, 240, 1.0, 2.0), 1.0, 0.0)]);
        assert_eq!(sig.action, SignalAction::Sell);
        assert_eq!(sig.reason, "higher_death_cross_close_long");
        assert_eq!(s.phase(), Phase::Idle);
    }

    #[test]
    fn higher_cross_before_entry_does_not_close_long() {
        let mut s = strategy(TrendDirection::Uptrend, 0.7);
        let mut h = VecDeque::new();
        let hi0 = macd(bar(HI, 0, 100.0, 101.0), 1.0, 0.5);
        step(&mut s, &mut h, vec![hi0, macd(bar(LO, 225, 1.0, 1.0), -1.0, 0.0)]);

        // the 4H death cross prints while the 15m MACD is still below signal
        let hi1 = macd(bar(HI, 240, 101.0, 99.0), -0.5, 0.2);
        let a = step(&mut s, &mut h, vec![hi1.clone(), macd(bar(LO, 240, 1.0, 1.0), -1.0, 0.0)]);
        assert_eq!(a.reason, "waiting_for_entry");

        let b = step(&mut s, &mut h, vec![hi1.clone(), macd(bar(LO, 255, 1.0, 2.0), 1.0, 0.0)]);
        assert_eq!(b.action, SignalAction::Buy);

        // same 4H bar reused across later 15m triggers
        for minute in [270, 285, 300] {
            let c = step(&mut s, &mut h, vec![hi1.clone(), macd(bar(LO, minute, 2.0, 2.0), 1.2, 0.0)]);
            assert!(c.is_hold(), "stale 4H cross closed the long at {minute}: {}", c.reason);
            assert_eq!(c.reason, "in_position_holding");
        }
        assert_eq!(s.phase(), Phase::InPosition);

        // a new 4H bar with no cross of its own keeps the position
        let hi2 = macd(bar(HI, 480, 99.0, 98.0), -0.6, 0.1);
        let d = step(&mut s, &mut h, vec![hi2, macd(bar(LO, 480, 2.0, 2.0), 1.2, 0.0)]);
        assert!(d.is_hold());
        assert_eq!(s.phase(), Phase::InPosition);
    }

    #[test]
    fn reused_lower_cross_does_not_reenter() {
        let mut s = strategy(TrendDirection::Uptrend, 0.7);
        let mut h = VecDeque::new();
        let hi0 = macd(bar(HI, 0, 100.0, 101.0), 1.0, 0.5);
        let lo1 = macd(bar(LO, 15, 1.0, 2.0), 1.0, 0.0);
        step(&mut s, &mut h, vec![hi0.clone(), macd(bar(LO, 0, 1.0, 1.0), -1.0, 0.0)]);
        assert_eq!(step(&mut s, &mut h, vec![hi0, lo1.clone()]).action, SignalAction::Buy);

        // views composed on 4H candles reuse the 15m bar that crossed
        let hi1 = macd(bar(HI, 240, 101.0, 99.0), -0.5, 0.2);
        let exit = step_on(&mut s, &mut h, HI, vec![hi1, lo1.clone()]);
        assert_eq!(exit.reason, "higher_death_cross_close_long");

        let hi2 = macd(bar(HI, 480, 99.0, 98.0), -0.6, 0.1);
        let again = step_on(&mut s, &mut h, HI, vec![hi2, lo1]);
        assert_eq!(again.reason, "waiting_for_entry");
        assert_eq!(s.phase(), Phase::Idle);
    }

    #[test]
    fn downtrend_death_cross_opens_short_and_trend_flip_exits() {
        let mut s = TrendMacd::new("tm", TrendMacdParams::default())
            .with_judgement(Box::new(FixedTrend(TrendDirection::Downtrend, 0.7)), Box::new(RuleBasedExitEvaluator::default()));
        let mut h = VecDeque::new();
        let hi = bar(HI, 0, 100.0, 99.0);
        step(&mut s, &mut h, vec![hi.clone(), macd(bar(LO, 0, 2.0, 2.0), 1.0, 0.0)]);
        let sig = step(&mut s, &mut h, vec![hi, macd(bar(LO, 15, 2.0, 1.0), -1.0, 0.0)]);
        assert_eq!(sig.action, SignalAction::Sell);
        assert_eq!(s.phase(), Phase::InPosition);

        // higher timeframe now rising bar after bar
        let mut last = Signal::hold("");
        for i in 1..=5 {
            let base = 100.0 + 3.0 * i as f64;
            let hi = bar(HI, 240 * i, base, base + 1.0);
            last = step(&mut s, &mut h, vec![hi, bar(LO, 240 * i, 1.0, 1.0)]);
            if !last.is_hold() {
                break;
            }
        }
        assert_eq!(last.action, SignalAction::Buy);
        assert_eq!(last.reason, "exit_trend_flip");
        assert_eq!(s.phase(), Phase::Idle);
    }

    #[test]
    fn missing_timeframe_holds() {
        let mut s = strategy(TrendDirection::Uptrend, 0.9);
        let mut h = VecDeque::new();
        let sig = step(&mut s, &mut h, vec![bar(LO, 0, 1.0, 2.0)]);
        assert_eq!(sig.reason, "missing_timeframe");
    }
}
