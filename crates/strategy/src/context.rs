use std::collections::VecDeque;
use std::sync::Arc;

use common::{AgentAnnotation, AnnotatedSnapshot, MarketSnapshot, MultiTimeframeSnapshot, Timeframe};

/// What a strategy sees on one evaluation: the current composed snapshot and
/// the bounded history of earlier ones, oldest first.
///
/// History never contains the current snapshot nor an earlier revision of
/// the same trigger interval.
pub struct StrategyContext<'a> {
    pub trigger: &'a Timeframe,
    current: &'a AnnotatedSnapshot,
    history: &'a VecDeque<Arc<MultiTimeframeSnapshot>>,
}

impl<'a> StrategyContext<'a> {
    pub fn new(
        trigger: &'a Timeframe,
        current: &'a AnnotatedSnapshot,
        history: &'a VecDeque<Arc<MultiTimeframeSnapshot>>,
    ) -> Self {
        Self {
            trigger,
            current,
            history,
        }
    }

    pub fn snapshot(&self) -> &MultiTimeframeSnapshot {
        &self.current.snapshot
    }

    /// Advisory annotation from the analysis layer, if any.
    pub fn annotation(&self) -> Option<&AgentAnnotation> {
        self.current.annotation.as_ref()
    }

    pub fn get(&self, timeframe: &Timeframe) -> Option<&MarketSnapshot> {
        self.current.snapshot.get(timeframe)
    }

    pub fn trigger_snapshot(&self) -> Option<&MarketSnapshot> {
        self.get(self.trigger)
    }

    pub fn history(&self) -> impl DoubleEndedIterator<Item = &MultiTimeframeSnapshot> {
        self.history.iter().map(Arc::as_ref)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Up to `n` earlier bars of one timeframe, oldest first.
    ///
    /// Composed snapshots reuse a timeframe's latest bar until a newer one
    /// arrives, so repeats are collapsed and only bars strictly older than
    /// the timeframe's current bar are returned.
    pub fn recent_bars(&self, timeframe: &Timeframe, n: usize) -> Vec<&MarketSnapshot> {
        let mut cutoff = self.get(timeframe).map(|s| s.timestamp);
        let mut bars = Vec::with_capacity(n.min(self.history.len()));
        for view in self.history.iter().rev() {
            if bars.len() == n {
                break;
            }
            let Some(bar) = view.get(timeframe) else {
                continue;
            };
            if cutoff.is_some_and(|c| bar.timestamp >= c) {
                continue;
            }
            cutoff = Some(bar.timestamp);
            bars.push(bar);
        }
        bars.reverse();
        bars
    }

    /// The bar of `timeframe` immediately before its current one.
    pub fn previous_bar(&self, timeframe: &Timeframe) -> Option<&MarketSnapshot> {
        self.recent_bars(timeframe, 1).pop()
    }
}
