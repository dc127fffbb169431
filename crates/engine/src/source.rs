use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use common::{Candle, Error, Push, QueueSender, Result, StopFlag, Timeframe};

/// Producer of canonical candles feeding the indicator stage.
///
/// Returning from `run` drops `out`, which closes the candle queue and lets
/// the rest of the pipeline drain.
#[async_trait]
pub trait CandleSource: Send {
    async fn run(self: Box<Self>, out: QueueSender<Candle>, stop: StopFlag) -> Result<()>;
}

// ─── Feed message parsing ────────────────────────────────────────────────────

/// Normalize one feed message into zero or more candles.
///
/// Accepts OKX push messages on `candle*` and `tickers` channels as well as a
/// canonical [`Candle`] serialized as JSON. Rows that fail to parse are
/// skipped and logged; control messages (subscribe acks, pings) yield nothing.
pub fn parse_feed_line(text: &str) -> Result<Vec<Candle>> {
    let msg: Value = serde_json::from_str(text)?;

    let Some(rows) = msg.get("data").and_then(Value::as_array) else {
        if msg.get("timeframe").is_some() {
            return Ok(vec![serde_json::from_value(msg)?]);
        }
        return Ok(Vec::new());
    };

    let channel = msg
        .get("arg")
        .and_then(|a| a.get("channel"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let parsed = if channel.starts_with("candle") {
            parse_candle_row(channel, row)
        } else if channel == "tickers" {
            parse_ticker_row(channel, row)
        } else {
            continue;
        };
        match parsed {
            Ok(candle) => candles.push(candle),
            Err(e) => warn!(timeframe = channel, reason = %e, "Skipping malformed feed row"),
        }
    }
    Ok(candles)
}

/// `[ts, open, high, low, close, vol, ...]`, numbers sent as strings.
fn parse_candle_row(channel: &str, row: &Value) -> Result<Candle> {
    let fields = row
        .as_array()
        .filter(|f| f.len() >= 5)
        .ok_or_else(|| Error::Feed("candle row needs at least five fields".into()))?;
    Ok(Candle {
        timeframe: Timeframe::from(channel),
        timestamp: parse_ts(&fields[0])?,
        open: parse_num(&fields[1], "open")?,
        high: parse_num(&fields[2], "high")?,
        low: parse_num(&fields[3], "low")?,
        close: parse_num(&fields[4], "close")?,
        volume: match fields.get(5) {
            Some(v) => parse_num(v, "volume")?,
            None => 0.0,
        },
    })
}

/// A ticker becomes a flat candle at its last traded price.
fn parse_ticker_row(channel: &str, row: &Value) -> Result<Candle> {
    let last = row
        .get("last")
        .ok_or_else(|| Error::Feed("ticker row has no 'last'".into()))
        .and_then(|v| parse_num(v, "last"))?;
    let ts = row
        .get("ts")
        .ok_or_else(|| Error::Feed("ticker row has no 'ts'".into()))
        .and_then(parse_ts)?;
    let volume = match row.get("vol24h") {
        Some(v) => parse_num(v, "vol24h")?,
        None => 0.0,
    };
    Ok(Candle {
        timeframe: Timeframe::from(channel),
        timestamp: ts,
        open: last,
        high: last,
        low: last,
        close: last,
        volume,
    })
}

fn parse_num(v: &Value, field: &str) -> Result<f64> {
    let n = match v {
        Value::String(s) if s.is_empty() => Some(0.0),
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    n.ok_or_else(|| Error::Feed(format!("field '{field}' is not a number: {v}")))
}

fn parse_ts(v: &Value) -> Result<DateTime<Utc>> {
    let ms = match v {
        Value::String(s) => s.parse::<i64>().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    };
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .ok_or_else(|| Error::Feed(format!("bad timestamp: {v}")))
}

// ─── Replay ──────────────────────────────────────────────────────────────────

/// Streams a JSON-lines capture of feed messages through the pipeline.
pub struct ReplaySource {
    path: PathBuf,
    pace: Option<Duration>,
}

impl ReplaySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pace: None,
        }
    }

    /// Sleep between lines to mimic a live feed.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }
}

#[async_trait]
impl CandleSource for ReplaySource {
    async fn run(self: Box<Self>, out: QueueSender<Candle>, stop: StopFlag) -> Result<()> {
        let file = tokio::fs::File::open(&self.path).await.map_err(|e| {
            Error::Feed(format!("cannot open replay file '{}': {e}", self.path.display()))
        })?;
        info!(path = %self.path.display(), "Replaying candle feed");

        let mut lines = BufReader::new(file).lines();
        let mut line_no = 0usize;
        let mut sent = 0usize;
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if stop.is_stopped() {
                info!(line = line_no, "Stop requested, replay interrupted");
                break;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let candles = match parse_feed_line(line) {
                Ok(candles) => candles,
                Err(e) => {
                    warn!(component = "replay", line = line_no, reason = %e, "Dropping unparseable line");
                    continue;
                }
            };
            for candle in candles {
                debug!(timeframe = %candle.timeframe, ts = %candle.timestamp, close = candle.close, "Candle");
                match out.push(candle).await {
                    Push::Sent => sent += 1,
                    Push::Dropped => {}
                    Push::Closed => {
                        warn!(queue = out.name(), "Candle consumer gone, ending replay");
                        return Ok(());
                    }
                }
            }
            if let Some(pace) = self.pace {
                tokio::time::sleep(pace).await;
            }
        }
        info!(lines = line_no, candles = sent, "Replay finished");
        Ok(())
    }
}
