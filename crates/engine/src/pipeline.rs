use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use common::{
    bounded, AnnotatedSnapshot, Candle, MultiTimeframeSnapshot, OrderSink, OutboundSignal,
    PipelineConfig, QueueSettings, Result, StopFlag,
};
use indicators::IndicatorEngine;
use strategy::StrategyEngine;

use crate::agent::{AgentBridge, Annotator, Cadence};
use crate::sink::SignalDispatcher;
use crate::source::CandleSource;

/// Every stage of the candle-to-signal pipeline, constructed but not running.
pub struct Pipeline {
    indicators: IndicatorEngine,
    bridge: AgentBridge,
    strategy: StrategyEngine,
    dispatcher: SignalDispatcher,
    queues: QueueSettings,
    poll: Duration,
}

/// Cloneable control over a running pipeline.
#[derive(Clone)]
pub struct PipelineControl {
    stop: StopFlag,
}

impl PipelineControl {
    /// Ask every stage to finish. Each notices within one poll interval.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }
}

pub struct PipelineHandle {
    control: PipelineControl,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl PipelineHandle {
    pub fn control(&self) -> PipelineControl {
        self.control.clone()
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    /// Wait for every stage task to finish, source first.
    pub async fn join(self) {
        for (stage, task) in self.tasks {
            if let Err(e) = task.await {
                error!(stage, error = %e, "Pipeline stage aborted");
            }
        }
        info!("Pipeline finished");
    }
}

impl Pipeline {
    /// Resolve every configured component. Unknown indicator or strategy
    /// types fail here, before any task starts.
    pub fn build(
        cfg: &PipelineConfig,
        annotator: Arc<dyn Annotator>,
        sink: Arc<dyn OrderSink>,
    ) -> Result<Self> {
        cfg.validate()?;
        let indicators = IndicatorEngine::from_config(cfg)?;
        let strategy = StrategyEngine::from_config(cfg)?;
        let bridge = AgentBridge::new(
            annotator,
            cfg.pipeline.symbol.clone(),
            Cadence::from_settings(&cfg.agent),
        );
        info!(
            symbol = %cfg.pipeline.symbol,
            timeframes = ?cfg.pipeline.timeframes,
            trigger = %cfg.trigger_timeframe(),
            strategy = %strategy.strategy().name(),
            "Pipeline built"
        );
        Ok(Self {
            indicators,
            bridge,
            strategy,
            dispatcher: SignalDispatcher::new(sink),
            queues: cfg.queues.clone(),
            poll: cfg.poll_interval(),
        })
    }

    /// Start one task per stage and feed it from `source`.
    ///
    /// When the source returns, its queue closes and each downstream stage
    /// drains its input and exits in turn.
    pub fn spawn(self, source: Box<dyn CandleSource>) -> PipelineHandle {
        let stop = StopFlag::new();
        let q = &self.queues;
        let policy = q.backpressure;
        let (candle_tx, candle_rx) = bounded::<Candle>("candles", q.candles, policy);
        let (snap_tx, snap_rx) = bounded::<MultiTimeframeSnapshot>("snapshots", q.snapshots, policy);
        let (ann_tx, ann_rx) = bounded::<AnnotatedSnapshot>("annotated", q.annotated, policy);
        let (sig_tx, sig_rx) = bounded::<OutboundSignal>("signals", q.signals, policy);

        let source_task = {
            let stop = stop.clone();
            tokio::spawn(async move {
                if let Err(e) = source.run(candle_tx, stop).await {
                    warn!(component = "source", reason = %e, "Candle source failed");
                }
            })
        };

        let tasks = vec![
            ("source", source_task),
            (
                "indicators",
                tokio::spawn(self.indicators.run(candle_rx, snap_tx, stop.clone(), self.poll)),
            ),
            (
                "agent",
                tokio::spawn(self.bridge.run(snap_rx, ann_tx, stop.clone(), self.poll)),
            ),
            (
                "strategy",
                tokio::spawn(self.strategy.run(ann_rx, sig_tx, stop.clone(), self.poll)),
            ),
            (
                "dispatch",
                tokio::spawn(self.dispatcher.run(sig_rx, stop.clone(), self.poll)),
            ),
        ];
        info!(stages = tasks.len(), "Pipeline started");

        PipelineHandle {
            control: PipelineControl { stop },
            tasks,
        }
    }
}
