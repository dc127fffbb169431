use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use common::{
    AgentAnnotation, AgentSettings, AnnotatedSnapshot, Metadata, MultiTimeframeSnapshot, Pop,
    Push, QueueReceiver, QueueSender, Result, SignalAction, StopFlag,
};

const COMPONENT: &str = "agent_bridge";

/// External analysis layer consulted between indicators and strategy.
///
/// Its output is advisory: it rides next to the snapshot and never replaces
/// the strategy's decision.
#[async_trait]
pub trait Annotator: Send + Sync {
    async fn annotate(&self, symbol: &str, snapshot: &MultiTimeframeSnapshot) -> Result<AgentAnnotation>;
}

/// Logs what it was shown and always hints `hold`.
pub struct DefaultAnnotator;

#[async_trait]
impl Annotator for DefaultAnnotator {
    async fn annotate(&self, symbol: &str, snapshot: &MultiTimeframeSnapshot) -> Result<AgentAnnotation> {
        if let Some(s) = snapshot.trigger_snapshot() {
            info!(
                symbol,
                timeframe = %s.timeframe,
                ts = %s.timestamp,
                close = s.close,
                indicators = s.indicators.len(),
                "Agent snapshot"
            );
        }
        Ok(AgentAnnotation {
            action_hint: SignalAction::Hold,
            rationale: "default".into(),
            confidence: 0.0,
            snapshot_ts: snapshot.timestamp,
            metadata: Metadata::new(),
        })
    }
}

/// When the bridge asks the annotator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cadence {
    /// Forward everything unannotated.
    Off,
    EverySnapshot,
    /// At most once per interval, on the first snapshot after it elapses.
    Every(Duration),
}

impl Cadence {
    pub fn from_settings(settings: &AgentSettings) -> Self {
        if !settings.enabled {
            Cadence::Off
        } else if settings.trigger_on_candle {
            Cadence::EverySnapshot
        } else {
            let secs = settings.trigger_interval_secs;
            let secs = if secs.is_finite() { secs.max(0.1) } else { 60.0 };
            Cadence::Every(Duration::from_secs_f64(secs))
        }
    }
}

/// Stage between the indicator and strategy queues. Every snapshot is
/// forwarded exactly once, annotated when the cadence says so and the
/// annotator succeeds.
pub struct AgentBridge {
    annotator: Arc<dyn Annotator>,
    symbol: String,
    cadence: Cadence,
    last_run: Option<Instant>,
}

impl AgentBridge {
    pub fn new(annotator: Arc<dyn Annotator>, symbol: impl Into<String>, cadence: Cadence) -> Self {
        Self {
            annotator,
            symbol: symbol.into(),
            cadence,
            last_run: None,
        }
    }

    fn due(&mut self) -> bool {
        match self.cadence {
            Cadence::Off => false,
            Cadence::EverySnapshot => true,
            Cadence::Every(interval) => {
                let now = Instant::now();
                if self.last_run.is_some_and(|t| now.duration_since(t) < interval) {
                    return false;
                }
                self.last_run = Some(now);
                true
            }
        }
    }

    pub async fn process(&mut self, snapshot: MultiTimeframeSnapshot) -> AnnotatedSnapshot {
        let snapshot = Arc::new(snapshot);
        let annotation = if self.due() {
            match self.annotator.annotate(&self.symbol, &snapshot).await {
                Ok(annotation) => Some(annotation),
                Err(e) => {
                    warn!(
                        component = COMPONENT,
                        timeframe = %snapshot.trigger,
                        ts = %snapshot.timestamp,
                        reason = %e,
                        "Annotator failed, forwarding unannotated"
                    );
                    None
                }
            }
        } else {
            None
        };
        AnnotatedSnapshot { snapshot, annotation }
    }

    /// Run the bridge stage. Call from `tokio::spawn`.
    pub async fn run(
        mut self,
        mut input: QueueReceiver<MultiTimeframeSnapshot>,
        out: QueueSender<AnnotatedSnapshot>,
        stop: StopFlag,
        poll: Duration,
    ) {
        info!(symbol = %self.symbol, cadence = ?self.cadence, "AgentBridge running");
        loop {
            if stop.is_stopped() {
                info!("AgentBridge stopping");
                return;
            }
            let snapshot = match input.pop(poll).await {
                Pop::Item(snapshot) => snapshot,
                Pop::Idle => continue,
                Pop::Closed => {
                    info!(queue = input.name(), "Snapshot queue closed, AgentBridge done");
                    return;
                }
            };
            let annotated = self.process(snapshot).await;
            if let Some(a) = &annotated.annotation {
                debug!(hint = %a.action_hint, confidence = a.confidence, "Annotated");
            }
            if out.push(annotated).await == Push::Closed {
                warn!(queue = out.name(), "Strategy stage gone, stopping AgentBridge");
                return;
            }
        }
    }
}
