pub mod levels;
pub mod risk_placement;
pub mod volatility;

pub use levels::LevelsAnalysis;
pub use risk_placement::{StopPlan, TargetPlan};
pub use volatility::{VolatilityEstimate, VolatilityEstimator, WorkingRange};
