// Technical indicators used to derive snapshot analytics
// RSI, moving averages, ATR, market structure and volume helpers

pub mod market_analysis;
pub mod oscillators;
pub mod trend;
pub mod volatility;

pub use market_analysis::{
    analyze_market_structure, percent_change, support_resistance, volume_ratio, MarketStructure,
};
pub use oscillators::calculate_rsi;
pub use trend::{calculate_ema, calculate_sma, classify_trend};
pub use volatility::calculate_atr;
