use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sampling interval / subscription identity of a candle stream, e.g. `candle1m`
/// or `candle4H`. Kept as the feed spells it; ordering is lexicographic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timeframe(String);

impl Timeframe {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Timeframe {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One interval's OHLCV for a timeframe, as normalized by the candle source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Returns the first structural defect of this candle, if any.
    pub fn defect(&self) -> Option<&'static str> {
        let fields = [self.open, self.high, self.low, self.close, self.volume];
        if fields.iter().any(|v| !v.is_finite()) {
            return Some("non-finite field");
        }
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Some("non-positive price");
        }
        if self.high < self.low {
            return Some("high below low");
        }
        if self.open > self.high || self.open < self.low || self.close > self.high || self.close < self.low
        {
            return Some("open/close outside high-low range");
        }
        if self.volume < 0.0 {
            return Some("negative volume");
        }
        None
    }

    /// Fold a revision of the same interval into this candle.
    ///
    /// Open is kept, high/low are unioned, close is replaced and volume is
    /// accumulated.
    pub fn merge(&self, revision: &Candle) -> Candle {
        Candle {
            timeframe: self.timeframe.clone(),
            timestamp: self.timestamp,
            open: self.open,
            high: self.high.max(revision.high),
            low: self.low.min(revision.low),
            close: revision.close,
            volume: self.volume + revision.volume,
        }
    }
}

/// Indicator readings keyed by output name. `None` marks a value that is not
/// available yet; a missing key means the indicator faulted this cycle.
pub type IndicatorValues = BTreeMap<String, Option<f64>>;

/// Point-in-time readout of price and indicator values for one timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub indicators: IndicatorValues,
}

impl MarketSnapshot {
    pub fn from_candle(candle: &Candle, indicators: IndicatorValues) -> Self {
        Self {
            timeframe: candle.timeframe.clone(),
            timestamp: candle.timestamp,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
            indicators,
        }
    }

    /// Value of an indicator output, `None` when unavailable or missing.
    pub fn indicator(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).copied().flatten()
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Latest snapshot of every known timeframe, composed when the trigger
/// timeframe ingests a candle.
///
/// Non-trigger entries may be older than `timestamp`; each entry keeps its own
/// timestamp so callers can measure the skew with [`Self::staleness`].
#[derive(Debug, Clone)]
pub struct MultiTimeframeSnapshot {
    pub trigger: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub snapshots: BTreeMap<Timeframe, Arc<MarketSnapshot>>,
}

impl MultiTimeframeSnapshot {
    pub fn get(&self, timeframe: &Timeframe) -> Option<&MarketSnapshot> {
        self.snapshots.get(timeframe).map(Arc::as_ref)
    }

    pub fn trigger_snapshot(&self) -> Option<&MarketSnapshot> {
        self.get(&self.trigger)
    }

    /// How far a timeframe's snapshot lags behind the trigger timestamp.
    pub fn staleness(&self, timeframe: &Timeframe) -> Option<chrono::Duration> {
        self.get(timeframe).map(|s| self.timestamp - s.timestamp)
    }
}

/// Trading signal actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    Hold,
    Buy,
    Sell,
    StopLoss,
    TakeProfit,
    AddPosition,
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignalAction::Hold => "hold",
            SignalAction::Buy => "buy",
            SignalAction::Sell => "sell",
            SignalAction::StopLoss => "stop_loss",
            SignalAction::TakeProfit => "take_profit",
            SignalAction::AddPosition => "add_position",
        };
        f.write_str(s)
    }
}

pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Output of one strategy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub action: SignalAction,
    /// 0.0 ..= 1.0; always 0.0 for `Hold`.
    pub confidence: f64,
    pub reason: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Signal {
    pub fn new(action: SignalAction, confidence: f64, reason: impl Into<String>) -> Self {
        let confidence = match action {
            SignalAction::Hold => 0.0,
            _ if confidence.is_nan() => 0.0,
            _ => confidence.clamp(0.0, 1.0),
        };
        Self {
            action,
            confidence,
            reason: reason.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn hold(reason: impl Into<String>) -> Self {
        Self::new(SignalAction::Hold, 0.0, reason)
    }

    /// Attach one metadata entry.
    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn is_hold(&self) -> bool {
        self.action == SignalAction::Hold
    }

    pub fn entry_price(&self) -> Option<f64> {
        self.metadata.get("entry_price").and_then(|v| v.as_f64())
    }
}

/// Result of the external analysis layer, attached next to a snapshot.
/// Advisory only: strategies may read it, the engine never acts on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAnnotation {
    pub action_hint: SignalAction,
    pub rationale: String,
    pub confidence: f64,
    pub snapshot_ts: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A composed snapshot plus its optional annotation, as consumed by the
/// strategy stage.
#[derive(Debug, Clone)]
pub struct AnnotatedSnapshot {
    pub snapshot: Arc<MultiTimeframeSnapshot>,
    pub annotation: Option<AgentAnnotation>,
}

impl AnnotatedSnapshot {
    pub fn pass_through(snapshot: MultiTimeframeSnapshot) -> Self {
        Self {
            snapshot: Arc::new(snapshot),
            annotation: None,
        }
    }
}

/// A signal on its way to the order sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundSignal {
    pub id: String,
    pub symbol: String,
    pub strategy: String,
    pub snapshot_ts: DateTime<Utc>,
    pub signal: Signal,
}

impl OutboundSignal {
    pub fn new(
        symbol: impl Into<String>,
        strategy: impl Into<String>,
        snapshot_ts: DateTime<Utc>,
        signal: Signal,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            strategy: strategy.into(),
            snapshot_ts,
            signal,
        }
    }
}
