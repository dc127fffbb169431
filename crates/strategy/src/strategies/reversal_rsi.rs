use common::{ComponentConfig, Signal, SignalAction, Timeframe};

use crate::{Phase, Strategy, StrategyContext, StrategyError};

#[derive(Debug, Clone)]
pub struct ReversalRsiParams {
    pub rsi_name: String,
    pub ma_name: String,
    pub consecutive_bearish: usize,
    pub rsi_threshold: f64,
    pub stop_loss_pct: f64,
    /// Timeframe to trade; the pipeline trigger when unset.
    pub timeframe: Option<Timeframe>,
}

impl Default for ReversalRsiParams {
    fn default() -> Self {
        Self {
            rsi_name: "rsi_14".into(),
            ma_name: "ma_20".into(),
            consecutive_bearish: 4,
            rsi_threshold: 30.0,
            stop_loss_pct: 0.02,
            timeframe: None,
        }
    }
}

impl ReversalRsiParams {
    pub fn from_config(cfg: &ComponentConfig) -> Self {
        let d = Self::default();
        Self {
            rsi_name: cfg.param_str("rsi_name", &d.rsi_name).to_string(),
            ma_name: cfg.param_str("ma_name", &d.ma_name).to_string(),
            consecutive_bearish: cfg.param_usize("consecutive_bearish", d.consecutive_bearish).max(1),
            rsi_threshold: cfg.param_f64("rsi_threshold", d.rsi_threshold),
            stop_loss_pct: cfg.param_f64("stop_loss_pct", d.stop_loss_pct),
            timeframe: cfg.params.get("timeframe").and_then(|v| v.as_str()).map(Timeframe::from),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Position {
    Flat,
    Long { entry_price: f64 },
}

/// Mean-reversion entry after a run of bearish bars.
///
/// Entry: `consecutive_bearish` bearish bars, then a bullish bar on which RSI
/// crosses up through `rsi_threshold`. Exit: stop-loss below the entry, or
/// the close reaching the moving average.
pub struct ReversalRsi {
    name: String,
    params: ReversalRsiParams,
    position: Position,
}

impl ReversalRsi {
    pub fn new(name: impl Into<String>, params: ReversalRsiParams) -> Self {
        Self {
            name: name.into(),
            params,
            position: Position::Flat,
        }
    }

    fn evaluate_exit(&mut self, entry_price: f64, ctx: &StrategyContext<'_>, tf: &Timeframe) -> Signal {
        let Some(bar) = ctx.get(tf) else {
            return Signal::hold("no_snapshot");
        };
        let stop_price = entry_price * (1.0 - self.params.stop_loss_pct);
        if bar.low <= stop_price {
            self.position = Position::Flat;
            return Signal::new(SignalAction::StopLoss, 1.0, "stop_loss")
                .with("entry_price", entry_price)
                .with("stop_price", stop_price)
                .with("close", bar.close);
        }
        if let Some(ma) = bar.indicator(&self.params.ma_name) {
            if bar.close >= ma {
                self.position = Position::Flat;
                return Signal::new(SignalAction::Sell, 0.8, "close_reached_ma")
                    .with("entry_price", entry_price)
                    .with("ma", ma)
                    .with("close", bar.close);
            }
        }
        Signal::hold("in_position_holding").with("entry_price", entry_price)
    }

    fn evaluate_entry(&mut self, ctx: &StrategyContext<'_>, tf: &Timeframe) -> Signal {
        let Some(bar) = ctx.get(tf) else {
            return Signal::hold("no_snapshot");
        };
        let need = self.params.consecutive_bearish;
        let prior = ctx.recent_bars(tf, need);
        if prior.len() < need {
            return Signal::hold("insufficient_history")
                .with("need", need)
                .with("have", prior.len());
        }
        if !prior.iter().all(|b| b.is_bearish()) {
            return Signal::hold("no_bearish_run");
        }
        let Some(rsi) = bar.indicator(&self.params.rsi_name) else {
            return Signal::hold("rsi_unavailable");
        };
        let Some(prev_rsi) = prior.last().and_then(|b| b.indicator(&self.params.rsi_name)) else {
            return Signal::hold("no_prev_rsi");
        };
        let threshold = self.params.rsi_threshold;
        if prev_rsi >= threshold || rsi < threshold {
            return Signal::hold("no_rsi_cross")
                .with("prev_rsi", prev_rsi)
                .with("rsi", rsi);
        }
        if !bar.is_bullish() {
            return Signal::hold("current_not_bullish");
        }

        self.position = Position::Long {
            entry_price: bar.close,
        };
        Signal::new(SignalAction::Buy, 0.75, "bearish_run_then_rsi_cross")
            .with("entry_price", bar.close)
            .with("prev_rsi", prev_rsi)
            .with("rsi", rsi)
    }
}

impl Strategy for ReversalRsi {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "reversal_rsi"
    }

    fn phase(&self) -> Phase {
        match self.position {
            Position::Flat => Phase::Idle,
            Position::Long { .. } => Phase::InPosition,
        }
    }

    fn min_history(&self) -> usize {
        self.params.consecutive_bearish
    }

    fn evaluate(&mut self, ctx: &StrategyContext<'_>) -> Result<Signal, StrategyError> {
        let tf = self.params.timeframe.clone().unwrap_or_else(|| ctx.trigger.clone());
        let signal = match self.position {
            Position::Long { entry_price } => self.evaluate_exit(entry_price, ctx, &tf),
            Position::Flat => self.evaluate_entry(ctx, &tf),
        };
        Ok(signal)
    }
}
