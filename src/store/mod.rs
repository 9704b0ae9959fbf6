pub mod db;

pub use db::{ClosureOp, ClosureOutcome, SignalRecord, SignalStore, TradeRow};
