pub mod exit;
pub mod fast_tracker;

pub use exit::{ExitDecision, ExitPolicy, PartialState};
pub use fast_tracker::FastSignalTracker;
