pub mod breakout;
pub mod hold;
pub mod reversal_rsi;
pub mod trend_macd;

pub use breakout::Breakout;
pub use hold::Hold;
pub use reversal_rsi::ReversalRsi;
pub use trend_macd::TrendMacd;
