use std::collections::HashSet;

use tracing::info;

use common::{ComponentConfig, Error, Result};

use crate::{Atr, CandlePct, Ema, Indicator, Kdj, Macd, PriceField, Rsi, Smoothing, Sma};

/// The indicator set every timeframe gets when the pipeline config lists none.
pub fn default_indicators() -> Vec<ComponentConfig> {
    vec![
        ComponentConfig::new("sma", "ma_20").param("period", 20),
        ComponentConfig::new("ema", "ema_12").param("period", 12),
        ComponentConfig::new("macd", "macd")
            .param("fast", 12)
            .param("slow", 26)
            .param("signal", 9),
        ComponentConfig::new("rsi", "rsi_6").param("period", 6),
        ComponentConfig::new("rsi", "rsi_12").param("period", 12),
        ComponentConfig::new("rsi", "rsi_14").param("period", 14),
        ComponentConfig::new("rsi", "rsi_24").param("period", 24),
        ComponentConfig::new("kdj", "kdj").param("period", 9),
        ComponentConfig::new("candle_pct", "pct").param("window", 10),
        ComponentConfig::new("atr", "atr_14").param("period", 14),
        ComponentConfig::new("volume_sma", "volume_sma_20").param("period", 20),
    ]
}

/// Build one set of indicator instances (one timeframe's worth).
/// An empty list yields [`default_indicators`]. Names must be unique.
pub fn build_indicators(cfgs: &[ComponentConfig]) -> Result<Vec<Box<dyn Indicator>>> {
    let defaults;
    let cfgs = if cfgs.is_empty() {
        defaults = default_indicators();
        &defaults[..]
    } else {
        cfgs
    };

    let mut names = HashSet::new();
    let mut out = Vec::with_capacity(cfgs.len());
    for cfg in cfgs {
        let indicator = build_indicator(cfg)?;
        if !names.insert(indicator.name().to_string()) {
            return Err(Error::Config(format!(
                "indicator name '{}' is used twice",
                indicator.name()
            )));
        }
        out.push(indicator);
    }
    Ok(out)
}

// ─── Indicator builders ───────────────────────────────────────────────────────

/// Resolve one config entry to an indicator. Unknown types and invalid
/// periods are configuration errors.
pub fn build_indicator(cfg: &ComponentConfig) -> Result<Box<dyn Indicator>> {
    let name = cfg.display_name().to_string();
    let indicator: Box<dyn Indicator> = match cfg.kind.as_str() {
        "sma" | "ma" => {
            let period = period(cfg, "period", 20, 1)?;
            Box::new(Sma::new(name, period, PriceField::Close))
        }
        "ema" => {
            let period = period(cfg, "period", 20, 1)?;
            Box::new(Ema::new(name, period))
        }
        "macd" => {
            let fast = period(cfg, "fast", 12, 1)?;
            let slow = period(cfg, "slow", 26, 1)?;
            let signal = period(cfg, "signal", 9, 1)?;
            if fast >= slow {
                return Err(Error::Config(format!(
                    "indicator '{name}': fast period ({fast}) must be below slow ({slow})"
                )));
            }
            Box::new(Macd::new(name, fast, slow, signal))
        }
        "rsi" => {
            let period = period(cfg, "period", 14, 2)?;
            let raw = cfg.param_str("smoothing", "wilder");
            let smoothing = Smoothing::parse(raw).ok_or_else(|| {
                Error::Config(format!("indicator '{name}': unknown smoothing '{raw}'"))
            })?;
            Box::new(Rsi::new(name, period, smoothing))
        }
        "kdj" => {
            let period = period(cfg, "period", 9, 2)?;
            let replay = bounded(cfg, "replay", 10, 0, MAX_KDJ_REPLAY)?;
            Box::new(Kdj::with_replay(name, period, replay))
        }
        "candle_pct" | "pct" => Box::new(CandlePct::new(name, cfg.param_usize("window", 10))),
        "atr" => {
            let period = period(cfg, "period", 14, 1)?;
            Box::new(Atr::new(name, period))
        }
        "volume_sma" => {
            let period = period(cfg, "period", 20, 1)?;
            Box::new(Sma::new(name, period, PriceField::Volume))
        }
        other => {
            return Err(Error::Config(format!("unknown indicator type '{other}'")));
        }
    };
    info!(name = %indicator.name(), kind = %cfg.kind, "Registered indicator");
    Ok(indicator)
}

/// Upper bound on any lookback, so a typo cannot size a buffer at startup.
const MAX_PERIOD: usize = 10_000;
const MAX_KDJ_REPLAY: usize = 1_000;

fn period(cfg: &ComponentConfig, key: &str, default: usize, min: usize) -> Result<usize> {
    bounded(cfg, key, default, min, MAX_PERIOD)
}

fn bounded(cfg: &ComponentConfig, key: &str, default: usize, min: usize, max: usize) -> Result<usize> {
    let value = cfg.param_usize(key, default);
    if !(min..=max).contains(&value) {
        return Err(Error::Config(format!(
            "indicator '{}': {key} must be within [{min}, {max}], got {value}",
            cfg.display_name()
        )));
    }
    Ok(value)
}
