use chrono::{TimeZone, Utc};
use common::{AnnotatedSnapshot, Candle, ComponentConfig, SignalAction, Timeframe};
use indicators::{Indicator, IndicatorEngine, Revision, Rsi, Smoothing};
use proptest::prelude::*;
use strategy::strategies::reversal_rsi::{ReversalRsi, ReversalRsiParams};
use strategy::{build_strategy, StrategyEngine};

fn candle(tf: &str, minute: i64, open: f64, close: f64) -> Candle {
    Candle {
        timeframe: Timeframe::from(tf),
        timestamp: Utc
            .timestamp_millis_opt(1_700_000_000_000 + minute * 60_000)
            .unwrap(),
        open,
        high: open.max(close),
        low: open.min(close),
        close,
        volume: 1.0,
    }
}

/// The reversal scenario's bars as (open, close): four bearish, one bullish.
const BARS: [(f64, f64); 5] = [
    (100.5, 100.0),
    (99.5, 99.0),
    (98.5, 98.0),
    (97.5, 97.0),
    (97.0, 98.5),
];

proptest! {
    /// History never exceeds its bound, whatever mix of new intervals,
    /// revisions and timeframes arrives.
    #[test]
    fn history_stays_bounded(
        size in 1usize..12,
        steps in prop::collection::vec((any::<bool>(), any::<bool>(), 90.0f64..110.0), 1..120),
    ) {
        let tfs = [Timeframe::from("candle1m"), Timeframe::from("candle5m")];
        let mut indicators = IndicatorEngine::new(&tfs, tfs[0].clone(), 50, &[]).unwrap();
        let hold = build_strategy(&ComponentConfig::hold()).unwrap();
        let mut engine = StrategyEngine::new(hold, "X", tfs[0].clone(), size);

        let mut minute = 0i64;
        for (advance, slow, close) in steps {
            if advance {
                minute += 5;
            }
            let tf = if slow { "candle5m" } else { "candle1m" };
            let view = indicators.ingest(candle(tf, minute, close, close)).unwrap();
            let out = engine.evaluate(AnnotatedSnapshot::pass_through(view));
            prop_assert!(engine.history_len() <= size);
            prop_assert_eq!(out.signal.action, SignalAction::Hold);
        }
    }

    /// Any ordering of the scenario bars buys at most once, only on the last
    /// bar, and only when that ordering still forms the pattern.
    #[test]
    fn reversal_only_fires_on_the_pattern(order in Just(BARS.to_vec()).prop_shuffle()) {
        let tf = Timeframe::from("candle1m");
        let rsi_cfg = [ComponentConfig::new("rsi", "rsi_3").param("period", 3)];
        let mut indicators = IndicatorEngine::new(&[tf.clone()], tf.clone(), 50, &rsi_cfg).unwrap();
        let params = ReversalRsiParams { rsi_name: "rsi_3".into(), ..ReversalRsiParams::default() };
        let mut engine = StrategyEngine::new(Box::new(ReversalRsi::new("rev", params)), "X", tf, 50);

        let mut rsi = Rsi::new("rsi_3", 3, Smoothing::Wilder);
        let mut rsi_path = Vec::new();
        let mut actions = Vec::new();
        for (i, (open, close)) in order.iter().enumerate() {
            let c = candle("candle1m", i as i64, *open, *close);
            rsi.update(&c, Revision::Append);
            rsi_path.push(rsi.current());
            let view = indicators.ingest(c).unwrap();
            actions.push(engine.evaluate(AnnotatedSnapshot::pass_through(view)).signal.action);
        }

        let first_four_bearish = order[..4].iter().all(|(o, c)| c < o);
        let last_bullish = order[4].1 > order[4].0;
        let crosses = matches!(
            (rsi_path[3], rsi_path[4]),
            (Some(prev), Some(cur)) if prev < 30.0 && cur >= 30.0
        );
        let expected_buy = first_four_bearish && last_bullish && crosses;

        prop_assert!(actions[..4].iter().all(|a| *a == SignalAction::Hold));
        if expected_buy {
            prop_assert_eq!(actions[4], SignalAction::Buy);
        } else {
            prop_assert_eq!(actions[4], SignalAction::Hold);
        }
    }
}

#[test]
fn scenario_ordering_buys_and_reversed_ordering_holds() {
    let tf = Timeframe::from("candle1m");
    let rsi_cfg = [ComponentConfig::new("rsi", "rsi_3").param("period", 3)];
    for (bars, expect_buy) in [(BARS.to_vec(), true), (BARS.iter().rev().copied().collect(), false)] {
        let mut indicators = IndicatorEngine::new(&[tf.clone()], tf.clone(), 50, &rsi_cfg).unwrap();
        let params = ReversalRsiParams { rsi_name: "rsi_3".into(), ..ReversalRsiParams::default() };
        let mut engine =
            StrategyEngine::new(Box::new(ReversalRsi::new("rev", params)), "X", tf.clone(), 50);
        let buys = bars
            .iter()
            .enumerate()
            .map(|(i, (o, c))| {
                let view = indicators.ingest(candle("candle1m", i as i64, *o, *c)).unwrap();
                engine.evaluate(AnnotatedSnapshot::pass_through(view)).signal.action
            })
            .filter(|a| *a == SignalAction::Buy)
            .count();
        assert_eq!(buys, usize::from(expect_buy));
    }
}
