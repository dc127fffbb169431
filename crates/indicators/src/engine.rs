use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use common::{
    Candle, ComponentConfig, IndicatorValues, MarketSnapshot, MultiTimeframeSnapshot,
    PipelineConfig, Pop, Push, QueueReceiver, QueueSender, Result, StopFlag, Timeframe,
};

use crate::{build_indicators, Indicator, Revision};

const COMPONENT: &str = "indicator_engine";

/// Why a candle was not ingested. Never fatal: the candle is dropped and the
/// stage moves on.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("timeframe '{0}' is not tracked")]
    UnknownTimeframe(Timeframe),

    #[error("malformed candle: {0}")]
    Malformed(&'static str),

    #[error("timestamp {ts} is older than the buffered {last}")]
    OutOfOrder {
        ts: DateTime<Utc>,
        last: DateTime<Utc>,
    },
}

/// Everything owned for a single timeframe.
struct TimeframeBook {
    buffer: VecDeque<Candle>,
    capacity: usize,
    /// Last raw candle as received, before merging.
    last_raw: Option<Candle>,
    indicators: Vec<Box<dyn Indicator>>,
    latest: Option<Arc<MarketSnapshot>>,
}

impl TimeframeBook {
    /// Buffer the candle, merging it into the newest interval when the
    /// timestamps match. Returns the stored candle and how it was applied.
    fn absorb(&mut self, candle: Candle) -> std::result::Result<(Candle, Revision), IngestError> {
        match self.buffer.back_mut() {
            Some(last) if candle.timestamp < last.timestamp => Err(IngestError::OutOfOrder {
                ts: candle.timestamp,
                last: last.timestamp,
            }),
            Some(last) if candle.timestamp == last.timestamp => {
                *last = last.merge(&candle);
                Ok((last.clone(), Revision::Replace))
            }
            _ => {
                self.buffer.push_back(candle.clone());
                while self.buffer.len() > self.capacity {
                    self.buffer.pop_front();
                }
                Ok((candle, Revision::Append))
            }
        }
    }

    fn recompute(&mut self, timeframe: &Timeframe, candle: &Candle, revision: Revision) {
        let mut values = IndicatorValues::new();
        for indicator in self.indicators.iter_mut() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                indicator.update(candle, revision);
                indicator.values()
            }));
            match outcome {
                Ok(Ok(readings)) => {
                    for (key, value) in readings {
                        match value {
                            Some(v) if !v.is_finite() => warn!(
                                component = COMPONENT,
                                timeframe = %timeframe,
                                ts = %candle.timestamp,
                                indicator = %key,
                                reason = "non-finite output",
                                "Indicator value omitted"
                            ),
                            _ => {
                                values.insert(key, value);
                            }
                        }
                    }
                }
                Ok(Err(e)) => warn!(
                    component = COMPONENT,
                    timeframe = %timeframe,
                    ts = %candle.timestamp,
                    indicator = %indicator.name(),
                    reason = %e,
                    "Indicator fault, outputs omitted"
                ),
                Err(_) => warn!(
                    component = COMPONENT,
                    timeframe = %timeframe,
                    ts = %candle.timestamp,
                    indicator = %indicator.name(),
                    reason = "panic",
                    "Indicator fault, outputs omitted"
                ),
            }
        }
        self.latest = Some(Arc::new(MarketSnapshot::from_candle(candle, values)));
    }
}

/// Per-timeframe candle buffers and indicator state, composing a
/// [`MultiTimeframeSnapshot`] on every ingested candle.
///
/// Owned by a single worker; nothing in here is shared.
pub struct IndicatorEngine {
    books: BTreeMap<Timeframe, TimeframeBook>,
    trigger: Timeframe,
    emit_on_every_timeframe: bool,
}

impl IndicatorEngine {
    /// Build one indicator set per timeframe from `indicators` (the default
    /// set when empty). Fails on any unknown or invalid indicator entry.
    pub fn new(
        timeframes: &[Timeframe],
        trigger: Timeframe,
        max_candle_buffer: usize,
        indicators: &[ComponentConfig],
    ) -> Result<Self> {
        let mut books = BTreeMap::new();
        for tf in timeframes {
            books.insert(
                tf.clone(),
                TimeframeBook {
                    buffer: VecDeque::new(),
                    capacity: max_candle_buffer.max(1),
                    last_raw: None,
                    indicators: build_indicators(indicators)?,
                    latest: None,
                },
            );
        }
        info!(
            timeframes = books.len(),
            trigger = %trigger,
            "IndicatorEngine ready"
        );
        Ok(Self {
            books,
            trigger,
            emit_on_every_timeframe: false,
        })
    }

    pub fn from_config(cfg: &PipelineConfig) -> Result<Self> {
        let engine = Self::new(
            &cfg.pipeline.timeframes,
            cfg.trigger_timeframe(),
            cfg.pipeline.max_candle_buffer,
            &cfg.indicators,
        )?;
        Ok(engine.with_emit_on_every_timeframe(cfg.pipeline.emit_on_every_timeframe))
    }

    pub fn with_emit_on_every_timeframe(mut self, enabled: bool) -> Self {
        self.emit_on_every_timeframe = enabled;
        self
    }

    /// Ingest one candle and compose the current view of every timeframe
    /// that has data. The ingesting timeframe becomes the view's trigger.
    ///
    /// A candle identical to the previous raw candle changes nothing.
    pub fn ingest(
        &mut self,
        candle: Candle,
    ) -> std::result::Result<MultiTimeframeSnapshot, IngestError> {
        let timeframe = candle.timeframe.clone();
        let book = self
            .books
            .get_mut(&timeframe)
            .ok_or_else(|| IngestError::UnknownTimeframe(timeframe.clone()))?;
        if let Some(reason) = candle.defect() {
            return Err(IngestError::Malformed(reason));
        }

        if book.last_raw.as_ref() == Some(&candle) && book.latest.is_some() {
            debug!(timeframe = %timeframe, ts = %candle.timestamp, "Duplicate candle ignored");
        } else {
            let raw = candle.clone();
            let (stored, revision) = book.absorb(candle)?;
            book.last_raw = Some(raw);
            book.recompute(&timeframe, &stored, revision);
        }

        Ok(self.compose(&timeframe))
    }

    /// Whether a view triggered by `timeframe` goes downstream.
    pub fn should_emit(&self, timeframe: &Timeframe) -> bool {
        self.emit_on_every_timeframe || *timeframe == self.trigger
    }

    pub fn latest(&self, timeframe: &Timeframe) -> Option<Arc<MarketSnapshot>> {
        self.books.get(timeframe).and_then(|b| b.latest.clone())
    }

    pub fn buffered(&self, timeframe: &Timeframe) -> usize {
        self.books.get(timeframe).map_or(0, |b| b.buffer.len())
    }

    fn compose(&self, trigger: &Timeframe) -> MultiTimeframeSnapshot {
        let snapshots: BTreeMap<Timeframe, Arc<MarketSnapshot>> = self
            .books
            .iter()
            .filter_map(|(tf, book)| book.latest.clone().map(|s| (tf.clone(), s)))
            .collect();
        let timestamp = snapshots
            .get(trigger)
            .map(|s| s.timestamp)
            .unwrap_or_default();
        MultiTimeframeSnapshot {
            trigger: trigger.clone(),
            timestamp,
            snapshots,
        }
    }

    /// Run the indicator stage. Call from `tokio::spawn`.
    ///
    /// Returns when the stop flag is raised, the candle queue closes, or the
    /// snapshot consumer goes away. Dropping `out` on return lets the next
    /// stage drain and finish.
    pub async fn run(
        mut self,
        mut candles: QueueReceiver<Candle>,
        out: QueueSender<MultiTimeframeSnapshot>,
        stop: StopFlag,
        poll: Duration,
    ) {
        info!("IndicatorEngine running");
        let mut emitted: u64 = 0;
        loop {
            if stop.is_stopped() {
                info!(emitted, "IndicatorEngine stopping");
                return;
            }
            let candle = match candles.pop(poll).await {
                Pop::Item(candle) => candle,
                Pop::Idle => continue,
                Pop::Closed => {
                    info!(emitted, queue = candles.name(), "Candle queue closed, IndicatorEngine done");
                    return;
                }
            };

            let timeframe = candle.timeframe.clone();
            let ts = candle.timestamp;
            match self.ingest(candle) {
                Ok(view) => {
                    if !self.should_emit(&timeframe) {
                        continue;
                    }
                    match out.push(view).await {
                        Push::Sent => emitted += 1,
                        Push::Dropped => {}
                        Push::Closed => {
                            warn!(queue = out.name(), "Snapshot consumer gone, stopping IndicatorEngine");
                            return;
                        }
                    }
                }
                Err(e) => warn!(
                    component = COMPONENT,
                    timeframe = %timeframe,
                    ts = %ts,
                    reason = %e,
                    "Candle dropped"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{candle_at, ohlc_at};
    use common::{bounded, Backpressure};

    fn tf(name: &str) -> Timeframe {
        Timeframe::from(name)
    }

    fn sma(name: &str, period: i64) -> ComponentConfig {
        ComponentConfig::new("sma", name).param("period", period)
    }

    fn engine() -> IndicatorEngine {
        IndicatorEngine::new(
            &[tf("candle1m"), tf("candle5m")],
            tf("candle1m"),
            10,
            &[sma("ma_2", 2)],
        )
        .unwrap()
    }

    fn five_minute(i: i64, close: f64) -> Candle {
        let mut c = candle_at(i * 5, close);
        c.timeframe = tf("candle5m");
        c
    }

    #[test]
    fn unknown_timeframe_rejected() {
        let mut e = engine();
        let mut c = candle_at(0, 10.0);
        c.timeframe = tf("candle1H");
        assert!(matches!(e.ingest(c), Err(IngestError::UnknownTimeframe(_))));
    }

    #[test]
    fn malformed_and_out_of_order_rejected() {
        let mut e = engine();
        let bad = ohlc_at(0, 10.0, 9.0, 11.0, 10.0);
        assert!(matches!(e.ingest(bad), Err(IngestError::Malformed(_))));
        e.ingest(candle_at(5, 10.0)).unwrap();
        assert!(matches!(
            e.ingest(candle_at(4, 10.0)),
            Err(IngestError::OutOfOrder { .. })
        ));
        assert_eq!(e.buffered(&tf("candle1m")), 1);
    }

    #[test]
    fn same_timestamp_merges_in_place() {
        let mut e = engine();
        e.ingest(ohlc_at(0, 10.0, 11.0, 9.0, 10.5)).unwrap();
        let view = e.ingest(ohlc_at(0, 10.2, 12.0, 9.5, 11.0)).unwrap();
        let s = view.get(&tf("candle1m")).unwrap();
        assert_eq!(e.buffered(&tf("candle1m")), 1);
        assert_eq!((s.open, s.high, s.low, s.close, s.volume), (10.0, 12.0, 9.0, 11.0, 2.0));
    }

    #[test]
    fn exact_duplicate_is_idempotent() {
        let mut once = engine();
        let mut twice = engine();
        for i in 0..3 {
            once.ingest(candle_at(i, 10.0 + i as f64)).unwrap();
            twice.ingest(candle_at(i, 10.0 + i as f64)).unwrap();
        }
        twice.ingest(candle_at(2, 12.0)).unwrap();
        assert_eq!(
            once.latest(&tf("candle1m")),
            twice.latest(&tf("candle1m"))
        );
    }

    #[test]
    fn unavailable_until_enough_history() {
        let mut e = engine();
        let first = e.ingest(candle_at(0, 10.0)).unwrap();
        let s = first.trigger_snapshot().unwrap();
        assert_eq!(s.indicators.get("ma_2"), Some(&None));
        let second = e.ingest(candle_at(1, 12.0)).unwrap();
        assert_eq!(second.trigger_snapshot().unwrap().indicator("ma_2"), Some(11.0));
    }

    #[test]
    fn composition_reuses_latest_of_other_timeframes() {
        let mut e = engine();
        let early = e.ingest(candle_at(0, 10.0)).unwrap();
        assert!(early.get(&tf("candle5m")).is_none());

        e.ingest(five_minute(0, 50.0)).unwrap();
        let view = e.ingest(candle_at(3, 11.0)).unwrap();
        let slow = view.get(&tf("candle5m")).unwrap();
        assert_eq!(slow.close, 50.0);
        assert_eq!(view.staleness(&tf("candle5m")), Some(chrono::Duration::minutes(3)));
        // one timeframe's indicators never see the other's candles
        assert_eq!(slow.indicator("ma_2"), None);
        assert_eq!(view.trigger_snapshot().unwrap().indicator("ma_2"), Some(10.5));
    }

    #[test]
    fn only_trigger_timeframe_emits_by_default() {
        let e = engine();
        assert!(e.should_emit(&tf("candle1m")));
        assert!(!e.should_emit(&tf("candle5m")));
        assert!(engine()
            .with_emit_on_every_timeframe(true)
            .should_emit(&tf("candle5m")));
    }

    #[test]
    fn unknown_indicator_fails_construction() {
        let cfgs = [ComponentConfig::new("nope", "x")];
        assert!(IndicatorEngine::new(&[tf("candle1m")], tf("candle1m"), 10, &cfgs).is_err());
    }

    struct Faulty;

    impl Indicator for Faulty {
        fn name(&self) -> &str {
            "faulty"
        }
        fn update(&mut self, _candle: &Candle, _revision: Revision) {}
        fn values(&self) -> std::result::Result<Vec<crate::Reading>, crate::IndicatorError> {
            Err(crate::IndicatorError::Compute("boom".into()))
        }
    }

    struct Exploding;

    impl Indicator for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }
        fn update(&mut self, _candle: &Candle, _revision: Revision) {
            panic!("exploded");
        }
        fn values(&self) -> std::result::Result<Vec<crate::Reading>, crate::IndicatorError> {
            Ok(vec![("exploding".into(), Some(1.0))])
        }
    }

    #[test]
    fn faulty_indicator_only_loses_its_own_keys() {
        let mut e = engine();
        if let Some(book) = e.books.get_mut(&tf("candle1m")) {
            book.indicators.push(Box::new(Faulty));
            book.indicators.push(Box::new(Exploding));
        }
        e.ingest(candle_at(0, 10.0)).unwrap();
        let view = e.ingest(candle_at(1, 12.0)).unwrap();
        let s = view.trigger_snapshot().unwrap();
        assert_eq!(s.indicator("ma_2"), Some(11.0));
        assert!(!s.indicators.contains_key("faulty"));
        assert!(!s.indicators.contains_key("exploding"));
    }

    #[tokio::test]
    async fn run_emits_trigger_views_and_finishes_on_close() {
        let (candle_tx, candle_rx) = bounded("candles", 8, Backpressure::Block);
        let (snap_tx, mut snap_rx) = bounded("snapshots", 8, Backpressure::Block);
        let stage = tokio::spawn(engine().run(
            candle_rx,
            snap_tx,
            StopFlag::new(),
            Duration::from_millis(10),
        ));

        candle_tx.push(five_minute(0, 50.0)).await;
        candle_tx.push(candle_at(0, 10.0)).await;
        let mut unknown = candle_at(1, 10.0);
        unknown.timeframe = tf("candle1D");
        candle_tx.push(unknown).await;
        candle_tx.push(candle_at(1, 11.0)).await;
        drop(candle_tx);
        stage.await.unwrap();

        let mut views = Vec::new();
        while let Pop::Item(v) = snap_rx.pop(Duration::from_millis(10)).await {
            views.push(v);
        }
        assert_eq!(views.len(), 2);
        assert!(views.iter().all(|v| v.trigger == tf("candle1m")));
        assert_eq!(views[1].snapshots.len(), 2);
    }
}
