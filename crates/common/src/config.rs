use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::Backpressure;
use crate::{Error, Result, Timeframe};

/// Process-level settings loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the TOML pipeline description.
    pub pipeline_config_path: String,
    /// JSON-lines feed replayed through the pipeline.
    pub replay_path: String,
    /// Optional delay between replayed lines, to mimic a live feed.
    pub replay_pace_ms: Option<u64>,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        Config {
            pipeline_config_path: optional_env("PIPELINE_CONFIG_PATH")
                .unwrap_or_else(|| "config/pipeline.toml".to_string()),
            replay_path: required_env("CANDLE_REPLAY_PATH"),
            replay_pace_ms: optional_env("CANDLE_REPLAY_PACE_MS").and_then(|v| v.parse().ok()),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Pipeline description file (TOML).
///
/// Example `config/pipeline.toml`:
/// ```toml
/// [pipeline]
/// symbol = "BTC-USDT"
/// timeframes = ["candle4H", "candle15m"]
/// history_size = 100
///
/// [queues]
/// backpressure = "drop"
///
/// [strategy]
/// type = "trend_macd"
/// name = "BTC trend"
///
/// [strategy.params]
/// higher_timeframe = "candle4H"
/// lower_timeframe = "candle15m"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub queues: QueueSettings,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default = "ComponentConfig::hold")]
    pub strategy: ComponentConfig,
    /// Indicators computed for every timeframe. Empty means the built-in set.
    #[serde(default, rename = "indicator")]
    pub indicators: Vec<ComponentConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineSettings {
    /// Instrument the pipeline trades, e.g. "BTC-USDT".
    pub symbol: String,
    /// Tracked timeframes. Candles for any other timeframe are dropped.
    pub timeframes: Vec<Timeframe>,
    /// Timeframe whose candles trigger composition. Defaults to the last entry
    /// of `timeframes`.
    #[serde(default)]
    pub trigger_timeframe: Option<Timeframe>,
    #[serde(default = "default_max_candle_buffer")]
    pub max_candle_buffer: usize,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Forward a composed snapshot for every timeframe, not just the trigger.
    #[serde(default)]
    pub emit_on_every_timeframe: bool,
}

fn default_max_candle_buffer() -> usize {
    500
}

fn default_history_size() -> usize {
    100
}

fn default_poll_interval_ms() -> u64 {
    500
}

/// Capacities of the inter-stage queues.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueSettings {
    pub candles: usize,
    pub snapshots: usize,
    pub annotated: usize,
    pub signals: usize,
    pub backpressure: Backpressure,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            candles: 10_000,
            snapshots: 1_000,
            annotated: 1_000,
            signals: 1_000,
            backpressure: Backpressure::Block,
        }
    }
}

/// Cadence of the analysis layer sitting between indicators and strategy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentSettings {
    pub enabled: bool,
    /// Annotate every snapshot instead of once per interval.
    pub trigger_on_candle: bool,
    pub trigger_interval_secs: f64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            trigger_on_candle: false,
            trigger_interval_secs: 60.0,
        }
    }
}

/// A registry entry: type identifier, instance name and free-form parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ComponentConfig {
    /// Type identifier, e.g. "rsi" or "breakout".
    #[serde(rename = "type")]
    pub kind: String,
    /// Instance name used in logs and as indicator output prefix.
    /// Falls back to the type identifier when empty.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

impl ComponentConfig {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            params: HashMap::new(),
        }
    }

    pub fn hold() -> Self {
        Self::new("hold", "hold")
    }

    /// Builder-style parameter insertion.
    pub fn param(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.kind
        } else {
            &self.name
        }
    }

    pub fn param_f64(&self, key: &str, default: f64) -> f64 {
        match self.params.get(key) {
            Some(toml::Value::Float(v)) => *v,
            Some(toml::Value::Integer(v)) => *v as f64,
            _ => default,
        }
    }

    pub fn param_usize(&self, key: &str, default: usize) -> usize {
        self.params
            .get(key)
            .and_then(|v| v.as_integer())
            .filter(|v| *v >= 0)
            .map(|v| v as usize)
            .unwrap_or(default)
    }

    pub fn param_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
    }

}

impl PipelineConfig {
    /// Load and validate a pipeline description from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read pipeline config at '{path}': {e}"))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let cfg: PipelineConfig = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if p.timeframes.is_empty() {
            return Err(Error::Config("at least one timeframe is required".into()));
        }
        let mut seen = HashSet::new();
        for tf in &p.timeframes {
            if !seen.insert(tf) {
                return Err(Error::Config(format!("timeframe '{tf}' listed twice")));
            }
        }
        if let Some(trigger) = &p.trigger_timeframe {
            if !seen.contains(trigger) {
                return Err(Error::Config(format!(
                    "trigger timeframe '{trigger}' is not a tracked timeframe"
                )));
            }
        }
        if p.max_candle_buffer == 0 || p.history_size == 0 {
            return Err(Error::Config(
                "max_candle_buffer and history_size must be positive".into(),
            ));
        }
        let q = &self.queues;
        if [q.candles, q.snapshots, q.annotated, q.signals].contains(&0) {
            return Err(Error::Config("queue capacities must be positive".into()));
        }
        if self.agent.trigger_interval_secs.is_nan() || self.agent.trigger_interval_secs < 0.0 {
            return Err(Error::Config("agent.trigger_interval_secs must be >= 0".into()));
        }
        Ok(())
    }

    /// The explicit trigger timeframe, or the last tracked one.
    pub fn trigger_timeframe(&self) -> Timeframe {
        self.pipeline
            .trigger_timeframe
            .clone()
            .or_else(|| self.pipeline.timeframes.last().cloned())
            .unwrap_or_else(|| Timeframe::from("candle1m"))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.pipeline.poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [pipeline]
        symbol = "BTC-USDT"
        timeframes = ["candle4H", "candle15m"]
        history_size = 50

        [queues]
        candles = 16
        backpressure = "drop"

        [strategy]
        type = "breakout"
        name = "btc breakout"

        [strategy.params]
        consolidation_bars = 20
        stop_loss_pct = 0.02

        [[indicator]]
        type = "rsi"
        name = "rsi_14"
        params = { period = 14, smoothing = "wilder" }
    "#;

    #[test]
    fn parses_sample_config() {
        let cfg = PipelineConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.pipeline.symbol, "BTC-USDT");
        assert_eq!(cfg.trigger_timeframe(), Timeframe::from("candle15m"));
        assert_eq!(cfg.pipeline.history_size, 50);
        assert_eq!(cfg.pipeline.max_candle_buffer, 500);
        assert_eq!(cfg.queues.candles, 16);
        assert_eq!(cfg.queues.snapshots, 1_000);
        assert_eq!(cfg.queues.backpressure, Backpressure::Drop);
        assert_eq!(cfg.strategy.kind, "breakout");
        assert_eq!(cfg.strategy.param_usize("consolidation_bars", 0), 20);
        assert_eq!(cfg.strategy.param_f64("stop_loss_pct", 0.0), 0.02);
        assert_eq!(cfg.indicators.len(), 1);
        assert_eq!(cfg.indicators[0].param_str("smoothing", "simple"), "wilder");
        assert!(!cfg.agent.enabled);
    }

    #[test]
    fn strategy_defaults_to_hold() {
        let cfg = PipelineConfig::from_toml_str(
            "[pipeline]\nsymbol = \"X\"\ntimeframes = [\"candle1m\"]\n",
        )
        .unwrap();
        assert_eq!(cfg.strategy.kind, "hold");
        assert!(cfg.indicators.is_empty());
    }

    #[test]
    fn rejects_unknown_trigger_and_duplicates() {
        let bad_trigger = "[pipeline]\nsymbol = \"X\"\ntimeframes = [\"candle1m\"]\ntrigger_timeframe = \"candle5m\"\n";
        assert!(matches!(
            PipelineConfig::from_toml_str(bad_trigger),
            Err(Error::Config(_))
        ));
        let dup = "[pipeline]\nsymbol = \"X\"\ntimeframes = [\"candle1m\", \"candle1m\"]\n";
        assert!(matches!(PipelineConfig::from_toml_str(dup), Err(Error::Config(_))));
    }

    #[test]
    fn integer_params_read_as_float() {
        let c = ComponentConfig::new("rsi", "").param("threshold", 30);
        assert_eq!(c.param_f64("threshold", 0.0), 30.0);
        assert_eq!(c.display_name(), "rsi");
    }
}
