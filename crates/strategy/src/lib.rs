pub mod context;
pub mod cross;
pub mod engine;
pub mod registry;
pub mod strategies;
pub mod trend;

pub use context::StrategyContext;
pub use cross::{detect_macd_cross, MacdCross};
pub use engine::StrategyEngine;
pub use registry::build_strategy;
pub use trend::{
    ExitEvaluation, ExitEvaluator, PositionSide, RuleBasedExitEvaluator, RuleBasedTrendAnalyzer,
    TrendAnalyzer, TrendDirection, TrendResult,
};

use common::{Signal, Timeframe};
use serde::Serialize;
use thiserror::Error;

/// Coarse position phase a strategy reports for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    InPosition,
    WaitingPullback,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::InPosition => "in_position",
            Phase::WaitingPullback => "waiting_pullback",
        };
        f.write_str(s)
    }
}

/// An evaluation that could not produce a decision. The engine turns it into
/// a hold for the cycle.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("no snapshot for timeframe '{0}'")]
    MissingTimeframe(Timeframe),

    #[error("{0}")]
    Evaluation(String),
}

/// All strategy implementations must satisfy this trait.
///
/// A strategy owns its position state. It must only change that state in the
/// same call that returns the non-hold signal announcing the change.
pub trait Strategy: Send {
    /// Human-readable name of this strategy instance.
    fn name(&self) -> &str;

    /// Registry type identifier, e.g. "breakout".
    fn kind(&self) -> &'static str;

    fn phase(&self) -> Phase;

    /// Earlier bars of its timeframe the strategy needs before it can act.
    fn min_history(&self) -> usize {
        0
    }

    /// Decide on the current snapshot. Too little history is a hold, never
    /// an error.
    fn evaluate(&mut self, ctx: &StrategyContext<'_>) -> Result<Signal, StrategyError>;
}
