pub mod candle_buffer;
pub mod orderbook;
pub mod stream;
pub mod trade_flow;

// Re-exports for the common types (e.g. `use crate::market_data::Candle`).
pub use candle_buffer::{Candle, CandleBuffer, CandleKey};
pub use orderbook::DepthSnapshot;
pub use trade_flow::{FlowTrade, TradeFlowAggregator, TradeFlowSummary};
