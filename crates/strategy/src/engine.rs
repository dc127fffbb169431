use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use common::{
    AnnotatedSnapshot, Error, MultiTimeframeSnapshot, OutboundSignal, PipelineConfig, Pop, Push,
    QueueReceiver, QueueSender, Result, Signal, StopFlag, Timeframe,
};

use crate::{build_strategy, Strategy, StrategyContext};

const COMPONENT: &str = "strategy_engine";
const PREALLOCATE_MAX: usize = 1024;

/// Runs one strategy over the stream of composed snapshots, keeping the
/// bounded history it sees.
pub struct StrategyEngine {
    strategy: Box<dyn Strategy>,
    symbol: String,
    trigger: Timeframe,
    history: VecDeque<Arc<MultiTimeframeSnapshot>>,
    history_size: usize,
}

impl StrategyEngine {
    pub fn new(
        strategy: Box<dyn Strategy>,
        symbol: impl Into<String>,
        trigger: Timeframe,
        history_size: usize,
    ) -> Self {
        let history_size = history_size.max(1);
        Self {
            strategy,
            symbol: symbol.into(),
            trigger,
            history: VecDeque::with_capacity(history_size.min(PREALLOCATE_MAX)),
            history_size,
        }
    }

    pub fn from_config(cfg: &PipelineConfig) -> Result<Self> {
        let strategy = build_strategy(&cfg.strategy)?;
        let need = strategy.min_history();
        if need > cfg.pipeline.history_size {
            return Err(Error::Config(format!(
                "strategy '{}' needs {need} earlier bars but history_size is {}",
                strategy.name(),
                cfg.pipeline.history_size
            )));
        }
        Ok(Self::new(
            strategy,
            cfg.pipeline.symbol.clone(),
            cfg.trigger_timeframe(),
            cfg.pipeline.history_size,
        ))
    }

    pub fn strategy(&self) -> &dyn Strategy {
        self.strategy.as_ref()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Evaluate the strategy on one snapshot, then record it in history.
    ///
    /// A revision of the interval already at the back of the history replaces
    /// it, so history stays free of the current interval. Strategy errors and
    /// panics degrade to a hold.
    pub fn evaluate(&mut self, current: AnnotatedSnapshot) -> OutboundSignal {
        let view = Arc::clone(&current.snapshot);
        if self
            .history
            .back()
            .is_some_and(|last| last.trigger == view.trigger && last.timestamp == view.timestamp)
        {
            self.history.pop_back();
        }

        let signal = {
            let ctx = StrategyContext::new(&self.trigger, &current, &self.history);
            let strategy = &mut self.strategy;
            match panic::catch_unwind(AssertUnwindSafe(|| strategy.evaluate(&ctx))) {
                Ok(Ok(signal)) => signal,
                Ok(Err(e)) => {
                    warn!(
                        component = COMPONENT,
                        strategy = %strategy.name(),
                        timeframe = %self.trigger,
                        ts = %view.timestamp,
                        reason = %e,
                        "Strategy fault, holding"
                    );
                    Signal::hold("strategy_fault").with("error", e.to_string())
                }
                Err(_) => {
                    error!(
                        component = COMPONENT,
                        strategy = %strategy.name(),
                        timeframe = %self.trigger,
                        ts = %view.timestamp,
                        reason = "panic",
                        "Strategy fault, holding"
                    );
                    Signal::hold("strategy_fault")
                }
            }
        };

        self.history.push_back(Arc::clone(&view));
        while self.history.len() > self.history_size {
            self.history.pop_front();
        }

        let snapshot_ts = view
            .get(&self.trigger)
            .map_or(view.timestamp, |s| s.timestamp);
        OutboundSignal::new(&self.symbol, self.strategy.name(), snapshot_ts, signal)
    }

    /// Run the strategy stage. Call from `tokio::spawn`.
    pub async fn run(
        mut self,
        mut input: QueueReceiver<AnnotatedSnapshot>,
        out: QueueSender<OutboundSignal>,
        stop: StopFlag,
        poll: Duration,
    ) {
        info!(
            strategy = %self.strategy.name(),
            kind = self.strategy.kind(),
            symbol = %self.symbol,
            "StrategyEngine running"
        );
        loop {
            if stop.is_stopped() {
                info!("StrategyEngine stopping");
                return;
            }
            let current = match input.pop(poll).await {
                Pop::Item(current) => current,
                Pop::Idle => continue,
                Pop::Closed => {
                    info!(queue = input.name(), "Snapshot queue closed, StrategyEngine done");
                    return;
                }
            };

            let outbound = self.evaluate(current);
            let signal = &outbound.signal;
            if signal.is_hold() {
                debug!(reason = %signal.reason, phase = %self.strategy.phase(), "Hold");
            } else {
                info!(
                    strategy = %outbound.strategy,
                    action = %signal.action,
                    confidence = signal.confidence,
                    ts = %outbound.snapshot_ts,
                    phase = %self.strategy.phase(),
                    reason = %signal.reason,
                    "Signal"
                );
            }
            if out.push(outbound).await == Push::Closed {
                warn!(queue = out.name(), "Signal consumer gone, stopping StrategyEngine");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testutil::{bar, view};
    use crate::strategies::reversal_rsi::{ReversalRsi, ReversalRsiParams};
    use crate::{Phase, StrategyError};
    use chrono::TimeZone;
    use common::{Candle, ComponentConfig, SignalAction};
    use indicators::IndicatorEngine;

    struct Faulty {
        panic: bool,
    }

    impl Strategy for Faulty {
        fn name(&self) -> &str {
            "faulty"
        }
        fn kind(&self) -> &'static str {
            "faulty"
        }
        fn phase(&self) -> Phase {
            Phase::Idle
        }
        fn evaluate(&mut self, _ctx: &StrategyContext<'_>) -> std::result::Result<Signal, StrategyError> {
            if self.panic {
                panic!("boom");
            }
            Err(StrategyError::Evaluation("bad input".into()))
        }
    }

    fn one_minute(minute: i64) -> AnnotatedSnapshot {
        AnnotatedSnapshot::pass_through(view("candle1m", vec![bar("candle1m", minute, 1.0, 2.0)]))
    }

    #[test]
    fn history_is_bounded_and_ordered() {
        let hold = build_strategy(&ComponentConfig::hold()).unwrap();
        let mut engine = StrategyEngine::new(hold, "BTC-USDT", Timeframe::from("candle1m"), 3);
        for m in 0..10 {
            let out = engine.evaluate(one_minute(m));
            assert!(out.signal.is_hold());
            assert_eq!(out.symbol, "BTC-USDT");
            assert!(engine.history_len() <= 3);
        }
        let ts: Vec<_> = engine.history.iter().map(|v| v.timestamp).collect();
        assert!(ts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn revision_replaces_history_tail() {
        let hold = build_strategy(&ComponentConfig::hold()).unwrap();
        let mut engine = StrategyEngine::new(hold, "X", Timeframe::from("candle1m"), 10);
        engine.evaluate(one_minute(0));
        engine.evaluate(one_minute(1));
        engine.evaluate(one_minute(1));
        assert_eq!(engine.history_len(), 2);
    }

    fn breakout_config(consolidation_bars: i64, history_size: usize) -> PipelineConfig {
        let toml = format!(
            r#"
            [pipeline]
            symbol = "X"
            timeframes = ["candle1m"]
            history_size = {history_size}

            [strategy]
            type = "breakout"

            [strategy.params]
            consolidation_bars = {consolidation_bars}
            "#
        );
        PipelineConfig::from_toml_str(&toml).unwrap()
    }

    #[test]
    fn history_too_short_for_strategy_is_config_error() {
        let err = StrategyEngine::from_config(&breakout_config(30, 20)).err();
        assert!(matches!(err, Some(Error::Config(_))));
        assert!(StrategyEngine::from_config(&breakout_config(20, 20)).is_ok());
    }

    #[test]
    fn huge_history_bound_allocates_lazily() {
        let hold = build_strategy(&ComponentConfig::hold()).unwrap();
        let mut engine = StrategyEngine::new(hold, "X", Timeframe::from("candle1m"), usize::MAX);
        engine.evaluate(one_minute(0));
        assert_eq!(engine.history_len(), 1);
    }

    #[test]
    fn errors_and_panics_degrade_to_hold() {
        for panic in [false, true] {
            let mut engine = StrategyEngine::new(
                Box::new(Faulty { panic }),
                "X",
                Timeframe::from("candle1m"),
                5,
            );
            let out = engine.evaluate(one_minute(0));
            assert_eq!(out.signal.action, SignalAction::Hold);
            assert_eq!(out.signal.reason, "strategy_fault");
            assert_eq!(out.signal.confidence, 0.0);
            // the faulted snapshot still enters history
            assert_eq!(engine.history_len(), 1);
        }
    }

    fn candle(minute: i64, open: f64, close: f64) -> Candle {
        Candle {
            timeframe: Timeframe::from("candle1m"),
            timestamp: chrono::Utc
                .timestamp_millis_opt(1_700_000_000_000 + minute * 60_000)
                .unwrap(),
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: 1.0,
        }
    }

    /// Four bearish one-minute bars then a bullish bar lifting RSI(3) from 0
    /// to about 43.
    #[test]
    fn reversal_scenario_through_indicator_engine() {
        let tf = Timeframe::from("candle1m");
        let rsi = [ComponentConfig::new("rsi", "rsi_3").param("period", 3)];
        let mut indicators = IndicatorEngine::new(&[tf.clone()], tf.clone(), 100, &rsi).unwrap();
        let params = ReversalRsiParams {
            rsi_name: "rsi_3".into(),
            ..ReversalRsiParams::default()
        };
        let mut engine =
            StrategyEngine::new(Box::new(ReversalRsi::new("rev", params)), "BTC-USDT", tf, 100);

        let bars = [
            candle(0, 100.5, 100.0),
            candle(1, 99.5, 99.0),
            candle(2, 98.5, 98.0),
            candle(3, 97.5, 97.0),
            candle(4, 97.0, 98.5),
        ];
        let mut actions = Vec::new();
        for c in bars {
            let view = indicators.ingest(c).unwrap();
            let out = engine.evaluate(AnnotatedSnapshot::pass_through(view));
            actions.push(out.signal);
        }
        assert!(actions[..4].iter().all(Signal::is_hold));
        assert_eq!(actions[4].action, SignalAction::Buy);
        assert_eq!(actions[4].entry_price(), Some(98.5));
    }
}
