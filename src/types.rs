// =============================================================================
// Shared types used across the Vega signal engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Trade direction of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "LONG")]
    Long,
    #[serde(rename = "SHORT")]
    Short,
}

impl Direction {
    /// Sign multiplier for PnL formulas: +1 for LONG, -1 for SHORT.
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LONG" => Some(Self::Long),
            "SHORT" => Some(Self::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority label derived from the absolute global imbalance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "LOW")]
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HIGH" => Some(Self::High),
            "MEDIUM" => Some(Self::Medium),
            "LOW" => Some(Self::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a signal row. Transitions OPEN -> CLOSED exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStatus {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "CLOSED")]
    Closed,
}

impl SignalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }
}

impl std::fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partial-close progression. Strictly NONE -> TP1_CLOSED -> FULLY_CLOSED;
/// regressions are impossible by construction in the exit state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartialCloseStatus {
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "TP1_CLOSED")]
    Tp1Closed,
    #[serde(rename = "FULLY_CLOSED")]
    FullyClosed,
}

impl PartialCloseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Tp1Closed => "TP1_CLOSED",
            Self::FullyClosed => "FULLY_CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(Self::None),
            "TP1_CLOSED" => Some(Self::Tp1Closed),
            "FULLY_CLOSED" => Some(Self::FullyClosed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PartialCloseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a signal (or half of one) was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    StopLossBreakeven,
    TakeProfit1Partial,
    TakeProfit2,
    ImbalanceReversed,
    /// An invariant violation made the signal untrackable.
    InvariantError,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StopLoss => "STOP_LOSS",
            Self::StopLossBreakeven => "STOP_LOSS_BREAKEVEN",
            Self::TakeProfit1Partial => "TAKE_PROFIT_1_PARTIAL",
            Self::TakeProfit2 => "TAKE_PROFIT_2",
            Self::ImbalanceReversed => "IMBALANCE_REVERSED",
            Self::InvariantError => "INVARIANT_ERROR",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Volatility class derived from ATR as a percentage of price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityClass {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
}

impl std::fmt::Display for VolatilityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => f.write_str("LOW"),
            Self::Medium => f.write_str("MEDIUM"),
            Self::High => f.write_str("HIGH"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_sign_mirrors() {
        assert_eq!(Direction::Long.sign(), 1.0);
        assert_eq!(Direction::Short.sign(), -1.0);
    }

    #[test]
    fn direction_roundtrip() {
        assert_eq!(Direction::parse("LONG"), Some(Direction::Long));
        assert_eq!(Direction::parse("SHORT"), Some(Direction::Short));
        assert_eq!(Direction::parse("long"), None);
        assert_eq!(Direction::Long.to_string(), "LONG");
    }

    #[test]
    fn partial_status_roundtrip() {
        for s in [
            PartialCloseStatus::None,
            PartialCloseStatus::Tp1Closed,
            PartialCloseStatus::FullyClosed,
        ] {
            assert_eq!(PartialCloseStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn exit_reason_strings() {
        assert_eq!(ExitReason::StopLossBreakeven.as_str(), "STOP_LOSS_BREAKEVEN");
        assert_eq!(ExitReason::ImbalanceReversed.as_str(), "IMBALANCE_REVERSED");
        assert_eq!(ExitReason::TakeProfit1Partial.as_str(), "TAKE_PROFIT_1_PARTIAL");
    }
}
