use tracing::info;

use common::{ComponentConfig, Error, Result};

use crate::strategies::breakout::BreakoutParams;
use crate::strategies::reversal_rsi::ReversalRsiParams;
use crate::strategies::trend_macd::TrendMacdParams;
use crate::strategies::{Breakout, Hold, ReversalRsi, TrendMacd};
use crate::Strategy;

/// Type identifiers `build_strategy` accepts.
pub const STRATEGY_TYPES: [&str; 4] = ["hold", "reversal_rsi", "breakout", "trend_macd"];

/// Resolve the configured strategy once, at startup. Unknown types and
/// out-of-range parameters are configuration errors.
pub fn build_strategy(cfg: &ComponentConfig) -> Result<Box<dyn Strategy>> {
    let name = cfg.display_name().to_string();
    let kind = cfg.kind.trim().to_ascii_lowercase();
    let strategy: Box<dyn Strategy> = match kind.as_str() {
        "hold" | "" => Box::new(Hold::new(name)),
        "reversal_rsi" => {
            let params = ReversalRsiParams::from_config(cfg);
            check_pct(&name, "stop_loss_pct", params.stop_loss_pct)?;
            Box::new(ReversalRsi::new(name, params))
        }
        "breakout" => {
            let params = BreakoutParams::from_config(cfg);
            check_pct(&name, "stop_loss_pct", params.stop_loss_pct)?;
            if params.min_consolidation_range_pct > params.consolidation_max_range_pct {
                return Err(Error::Config(format!(
                    "strategy '{name}': min_consolidation_range_pct exceeds consolidation_max_range_pct"
                )));
            }
            Box::new(Breakout::new(name, params))
        }
        "trend_macd" => {
            let params = TrendMacdParams::from_config(cfg);
            if params.higher_timeframe == params.lower_timeframe {
                return Err(Error::Config(format!(
                    "strategy '{name}': higher and lower timeframe are both '{}'",
                    params.lower_timeframe
                )));
            }
            Box::new(TrendMacd::new(name, params))
        }
        other => {
            return Err(Error::Config(format!(
                "unknown strategy type '{other}', expected one of {STRATEGY_TYPES:?}"
            )));
        }
    };
    info!(name = %strategy.name(), kind = strategy.kind(), "Registered strategy");
    Ok(strategy)
}

fn check_pct(name: &str, key: &str, value: f64) -> Result<()> {
    if (0.0..1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "strategy '{name}': {key} must be within [0, 1), got {value}"
        )))
    }
}
