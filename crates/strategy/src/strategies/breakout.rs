use common::{ComponentConfig, MarketSnapshot, Signal, SignalAction, Timeframe};

use crate::{Phase, Strategy, StrategyContext, StrategyError};

#[derive(Debug, Clone)]
pub struct BreakoutParams {
    /// Bars before the current one that form the consolidation range.
    pub consolidation_bars: usize,
    pub min_consolidation_range_pct: f64,
    pub consolidation_max_range_pct: f64,
    pub volume_spike_ratio: f64,
    pub ma_name: String,
    pub volume_ma_name: String,
    pub stop_loss_pct: f64,
    pub take_profit_pct: Option<f64>,
    /// Gain over entry that confirms the breakout and starts waiting for a
    /// pullback.
    pub breakout_confirm_pct: f64,
    pub add_position_ma_tolerance_pct: f64,
    pub max_adds: usize,
    pub timeframe: Option<Timeframe>,
}

impl Default for BreakoutParams {
    fn default() -> Self {
        Self {
            consolidation_bars: 20,
            min_consolidation_range_pct: 0.01,
            consolidation_max_range_pct: 0.03,
            volume_spike_ratio: 2.0,
            ma_name: "ma_20".into(),
            volume_ma_name: "volume_sma_20".into(),
            stop_loss_pct: 0.02,
            take_profit_pct: None,
            breakout_confirm_pct: 0.01,
            add_position_ma_tolerance_pct: 0.005,
            max_adds: 1,
            timeframe: None,
        }
    }
}

impl BreakoutParams {
    pub fn from_config(cfg: &ComponentConfig) -> Self {
        let d = Self::default();
        let take_profit = cfg.param_f64("take_profit_pct", 0.0);
        Self {
            consolidation_bars: cfg.param_usize("consolidation_bars", d.consolidation_bars).max(1),
            min_consolidation_range_pct: cfg
                .param_f64("min_consolidation_range_pct", d.min_consolidation_range_pct),
            consolidation_max_range_pct: cfg
                .param_f64("consolidation_max_range_pct", d.consolidation_max_range_pct),
            volume_spike_ratio: cfg.param_f64("volume_spike_ratio", d.volume_spike_ratio),
            ma_name: cfg.param_str("ma_name", &d.ma_name).to_string(),
            volume_ma_name: cfg.param_str("volume_ma_name", &d.volume_ma_name).to_string(),
            stop_loss_pct: cfg.param_f64("stop_loss_pct", d.stop_loss_pct),
            take_profit_pct: (take_profit > 0.0).then_some(take_profit),
            breakout_confirm_pct: cfg.param_f64("breakout_confirm_pct", d.breakout_confirm_pct),
            add_position_ma_tolerance_pct: cfg
                .param_f64("add_position_ma_tolerance_pct", d.add_position_ma_tolerance_pct),
            max_adds: cfg.param_usize("max_adds", d.max_adds),
            timeframe: cfg.params.get("timeframe").and_then(|v| v.as_str()).map(Timeframe::from),
        }
    }
}

/// An open long position and the range it broke out of.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Open {
    entry_price: f64,
    range_low: f64,
    adds: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Idle,
    InPosition(Open),
    WaitingPullback(Open),
}

/// Consolidation → breakout on a volume spike → buy; stop on a failed
/// breakout; add on a pullback to the moving average once confirmed.
pub struct Breakout {
    name: String,
    params: BreakoutParams,
    state: State,
}

impl Breakout {
    pub fn new(name: impl Into<String>, params: BreakoutParams) -> Self {
        Self {
            name: name.into(),
            params,
            state: State::Idle,
        }
    }

    fn evaluate_entry(&mut self, bar: &MarketSnapshot, prior: &[&MarketSnapshot]) -> Signal {
        let need = self.params.consolidation_bars;
        if prior.len() < need {
            return Signal::hold("insufficient_history")
                .with("need", need)
                .with("have", prior.len());
        }
        let range_high = prior.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let range_low = prior.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let range_pct = (range_high - range_low) / bar.close;

        let is_consolidation = (self.params.min_consolidation_range_pct
            ..=self.params.consolidation_max_range_pct)
            .contains(&range_pct);
        let is_breakout = bar.close > range_high;
        let volume_ma = bar
            .indicator(&self.params.volume_ma_name)
            .filter(|v| *v > 0.0);
        let volume_spike =
            volume_ma.is_some_and(|ma| bar.volume >= ma * self.params.volume_spike_ratio);

        if !(is_consolidation && is_breakout && volume_spike) {
            return Signal::hold("waiting_for_breakout")
                .with("is_consolidation", is_consolidation)
                .with("is_breakout", is_breakout)
                .with("volume_spike", volume_spike);
        }

        self.state = State::InPosition(Open {
            entry_price: bar.close,
            range_low,
            adds: 0,
        });
        Signal::new(SignalAction::Buy, 0.85, "breakout_with_volume_spike")
            .with("entry_price", bar.close)
            .with("consolidation_high", range_high)
            .with("consolidation_low", range_low)
            .with("volume", bar.volume)
    }

    fn evaluate_open(&mut self, bar: &MarketSnapshot, open: Open, waiting: bool) -> Signal {
        let p = &self.params;
        let stop_price = open.entry_price * (1.0 - p.stop_loss_pct);
        if bar.low <= stop_price || bar.close < open.range_low {
            self.state = State::Idle;
            return Signal::new(SignalAction::StopLoss, 1.0, "breakout_failed_or_stop_loss")
                .with("entry_price", open.entry_price)
                .with("stop_price", stop_price)
                .with("close", bar.close);
        }

        if let Some(tp) = p.take_profit_pct {
            let target = open.entry_price * (1.0 + tp);
            if bar.close >= target {
                self.state = State::Idle;
                return Signal::new(SignalAction::TakeProfit, 0.9, "take_profit")
                    .with("entry_price", open.entry_price)
                    .with("target", target)
                    .with("close", bar.close);
            }
        }

        if !waiting {
            if bar.close >= open.entry_price * (1.0 + p.breakout_confirm_pct) {
                self.state = State::WaitingPullback(open);
                return Signal::hold("breakout_confirmed").with("entry_price", open.entry_price);
            }
            return Signal::hold("in_position_holding").with("entry_price", open.entry_price);
        }

        if open.adds < p.max_adds {
            if let Some(ma) = bar.indicator(&p.ma_name).filter(|ma| *ma > 0.0) {
                let near_ma = (bar.close - ma).abs() <= ma * p.add_position_ma_tolerance_pct;
                if near_ma && bar.is_bullish() {
                    let adds = open.adds + 1;
                    self.state = State::WaitingPullback(Open { adds, ..open });
                    return Signal::new(SignalAction::AddPosition, 0.8, "pullback_to_ma_support")
                        .with("entry_price", open.entry_price)
                        .with("ma", ma)
                        .with("close", bar.close)
                        .with("adds", adds);
                }
            }
        }
        Signal::hold("waiting_pullback").with("entry_price", open.entry_price)
    }
}

impl Strategy for Breakout {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "breakout"
    }

    fn phase(&self) -> Phase {
        match self.state {
            State::Idle => Phase::Idle,
            State::InPosition(_) => Phase::InPosition,
            State::WaitingPullback(_) => Phase::WaitingPullback,
        }
    }

    fn min_history(&self) -> usize {
        self.params.consolidation_bars
    }

    fn evaluate(&mut self, ctx: &StrategyContext<'_>) -> Result<Signal, StrategyError> {
        let tf = self.params.timeframe.clone().unwrap_or_else(|| ctx.trigger.clone());
        let Some(bar) = ctx.get(&tf) else {
            return Ok(Signal::hold("no_snapshot"));
        };
        if !bar.close.is_finite() || bar.close <= 0.0 {
            return Err(StrategyError::Evaluation(format!(
                "unusable close {} on {tf}",
                bar.close
            )));
        }
        let signal = match self.state {
            State::Idle => {
                let prior = ctx.recent_bars(&tf, self.params.consolidation_bars);
                self.evaluate_entry(bar, &prior)
            }
            State::InPosition(open) => self.evaluate_open(bar, open, false),
            State::WaitingPullback(open) => self.evaluate_open(bar, open, true),
        };
        Ok(signal)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use common::AnnotatedSnapshot;

    use super::*;
    use crate::context::testutil::{bar, view, with};

    const TF: &str = "candle15m";

    struct Harness {
        strategy: Breakout,
        history: VecDeque<Arc<common::MultiTimeframeSnapshot>>,
    }

    impl Harness {
        fn new(params: BreakoutParams) -> Self {
            Self {
                strategy: Breakout::new("bo", params),
                history: VecDeque::new(),
            }
        }

        fn step(&mut self, snap: MarketSnapshot) -> Signal {
            let trigger = Timeframe::from(TF);
            let current = AnnotatedSnapshot::pass_through(view(TF, vec![snap]));
            let ctx = StrategyContext::new(&trigger, &current, &self.history);
            let signal = self.strategy.evaluate(&ctx).unwrap();
            self.history.push_back(Arc::clone(&current.snapshot));
            signal
        }
    }

    fn params() -> BreakoutParams {
        BreakoutParams {
            consolidation_bars: 5,
            take_profit_pct: Some(0.05),
            ..BreakoutParams::default()
        }
    }

    /// Five quiet bars between 99 and 101 (2 % range), then a spike to 102.
    fn enter(h: &mut Harness) -> Signal {
        for i in 0..5 {
            let (o, c) = if i % 2 == 0 { (99.0, 101.0) } else { (101.0, 99.0) };
            assert!(h.step(bar(TF, i * 15, o, c)).is_hold());
        }
        let mut spike = with(bar(TF, 75, 100.5, 102.0), "volume_sma_20", 1.0);
        spike.volume = 3.0;
        h.step(spike)
    }

    #[test]
    fn buys_on_breakout_with_volume_spike() {
        let mut h = Harness::new(params());
        let s = enter(&mut h);
        assert_eq!(s.action, SignalAction::Buy);
        assert_eq!(s.entry_price(), Some(102.0));
        assert_eq!(h.strategy.phase(), Phase::InPosition);
    }

    #[test]
    fn no_entry_without_volume_spike() {
        let mut h = Harness::new(params());
        for i in 0..5 {
            let (o, c) = if i % 2 == 0 { (99.0, 101.0) } else { (101.0, 99.0) };
            h.step(bar(TF, i * 15, o, c));
        }
        let quiet = with(bar(TF, 75, 100.5, 102.0), "volume_sma_20", 1.0);
        assert!(h.step(quiet).is_hold());
    }

    #[test]
    fn confirm_then_add_then_stop() {
        let mut h = Harness::new(params());
        enter(&mut h);
        let confirm = h.step(bar(TF, 90, 102.0, 103.5));
        assert_eq!(confirm.reason, "breakout_confirmed");
        assert_eq!(h.strategy.phase(), Phase::WaitingPullback);

        let pullback = with(bar(TF, 105, 102.5, 103.0), "ma_20", 103.1);
        assert_eq!(h.step(pullback).action, SignalAction::AddPosition);
        // max_adds = 1
        let again = with(bar(TF, 120, 102.5, 103.0), "ma_20", 103.1);
        assert!(h.step(again).is_hold());

        let crash = bar(TF, 135, 102.0, 99.5);
        assert_eq!(h.step(crash).action, SignalAction::StopLoss);
        assert_eq!(h.strategy.phase(), Phase::Idle);
    }

    #[test]
    fn stop_loss_beats_add_position() {
        let mut h = Harness::new(params());
        enter(&mut h);
        h.step(bar(TF, 90, 102.0, 103.5));
        // bullish bar near the MA whose low pierces the stop
        let mut both = with(bar(TF, 105, 99.8, 100.1), "ma_20", 100.0);
        both.low = 99.0;
        assert_eq!(h.step(both).action, SignalAction::StopLoss);
    }

    #[test]
    fn take_profit_closes() {
        let mut h = Harness::new(params());
        enter(&mut h);
        let s = h.step(bar(TF, 90, 103.0, 107.5));
        assert_eq!(s.action, SignalAction::TakeProfit);
        assert_eq!(h.strategy.phase(), Phase::Idle);
    }
}
