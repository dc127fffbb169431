use common::MarketSnapshot;

/// MACD line crossing its signal line between two consecutive bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacdCross {
    Golden, // MACD crossed above signal line
    Death,  // MACD crossed below signal line
    Neutral,
}

/// Compare `{macd}_macd` against `{macd}_signal` on the previous and current
/// bar. Missing readings on either side count as no cross.
pub fn detect_macd_cross(
    current: &MarketSnapshot,
    previous: Option<&MarketSnapshot>,
    macd: &str,
) -> MacdCross {
    let line_key = format!("{macd}_macd");
    let signal_key = format!("{macd}_signal");
    let readings = |s: &MarketSnapshot| Some((s.indicator(&line_key)?, s.indicator(&signal_key)?));

    let (Some((line, signal)), Some((prev_line, prev_signal))) =
        (readings(current), previous.and_then(readings))
    else {
        return MacdCross::Neutral;
    };

    let was_above = prev_line > prev_signal;
    let is_above = line > signal;
    match (was_above, is_above) {
        (false, true) => MacdCross::Golden,
        (true, false) => MacdCross::Death,
        _ => MacdCross::Neutral,
    }
}
