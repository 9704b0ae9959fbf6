// =============================================================================
// Signal Validator & Scorer — hard filters, priority, 0-100 quality score
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::analysis::risk_placement::{StopPlan, TargetPlan};
use crate::runtime_config::EngineConfig;
use crate::types::Priority;

/// Validation verdict for one signal proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    pub is_valid: bool,
    pub priority: Priority,
    /// 0-100, summed over imbalance / large trades / volume / R:R / levels.
    pub quality_score: f64,
    pub rejection_reasons: Vec<String>,
    pub warnings: Vec<String>,
}

/// Validate a fully assembled proposal.
///
/// `imbalance` is the signed global imbalance; `large_trades` counts only
/// the trades matching the signal's side. Stop and target planning failures
/// arrive as `Err(reason)` and turn into rejection reasons here.
pub fn validate(
    config: &EngineConfig,
    imbalance: f64,
    large_trades: u32,
    volume_intensity: f64,
    stop: &Result<StopPlan, String>,
    targets: &Result<TargetPlan, String>,
    total_levels: usize,
) -> Validation {
    let mut rejection_reasons = Vec::new();
    let mut warnings = Vec::new();
    let abs_imbalance = imbalance.abs();

    // ── Hard filters ────────────────────────────────────────────────────
    if abs_imbalance < config.imbalance_entry_threshold {
        rejection_reasons.push(format!(
            "weak imbalance: {:.4} < {}",
            abs_imbalance, config.imbalance_entry_threshold
        ));
    }

    if large_trades < config.min_large_trades {
        rejection_reasons.push(format!(
            "few large trades: {} < {}",
            large_trades, config.min_large_trades
        ));
    }

    if volume_intensity < config.volume_confirmation_multiplier {
        rejection_reasons.push(format!(
            "low volume: {:.2}x < {}x",
            volume_intensity, config.volume_confirmation_multiplier
        ));
    }

    let rr = match (stop, targets) {
        (Err(reason), _) => {
            rejection_reasons.push(format!("invalid stop: {reason}"));
            0.0
        }
        (Ok(_), Err(reason)) => {
            rejection_reasons.push(format!("invalid targets: {reason}"));
            0.0
        }
        (Ok(_), Ok(plan)) => {
            if plan.tp1_rr < config.min_rr {
                rejection_reasons.push(format!("bad R/R: {:.4} < {}", plan.tp1_rr, config.min_rr));
            }
            plan.tp1_rr
        }
    };

    if total_levels == 0 {
        rejection_reasons.push("no clear levels found in working range".to_string());
    }

    // ── Warnings (non-fatal) ────────────────────────────────────────────
    if (config.volume_confirmation_multiplier..2.0).contains(&volume_intensity) {
        warnings.push(format!("volume could be stronger ({volume_intensity:.2}x)"));
    }
    if targets.is_ok() && (config.min_rr..1.5).contains(&rr) {
        warnings.push(format!("R/R acceptable but not ideal ({rr:.2})"));
    }

    let priority = priority_for(config, abs_imbalance);
    let quality_score =
        quality_score(abs_imbalance, large_trades, volume_intensity, rr, total_levels);

    Validation {
        is_valid: rejection_reasons.is_empty(),
        priority,
        quality_score,
        rejection_reasons,
        warnings,
    }
}

/// Priority label from the absolute imbalance.
fn priority_for(config: &EngineConfig, abs_imbalance: f64) -> Priority {
    if abs_imbalance >= config.priority_high {
        Priority::High
    } else if abs_imbalance >= config.priority_medium {
        Priority::Medium
    } else {
        Priority::Low
    }
}

/// 0-100 quality score.
///
/// Components: imbalance 0-30, large trades 0-20, volume 0-20, R/R 0-20,
/// levels clarity 0-10.
fn quality_score(
    abs_imbalance: f64,
    large_trades: u32,
    volume_intensity: f64,
    rr: f64,
    total_levels: usize,
) -> f64 {
    let mut score = 0.0;

    // Imbalance (0-30).
    score += if abs_imbalance >= 0.25 {
        30.0
    } else if abs_imbalance >= 0.20 {
        25.0
    } else if abs_imbalance >= 0.15 {
        15.0
    } else {
        (abs_imbalance * 60.0).max(0.0)
    };

    // Large trades (0-20).
    score += if large_trades >= 5 {
        20.0
    } else if large_trades >= 3 {
        15.0
    } else if large_trades >= 2 {
        10.0
    } else {
        large_trades as f64 * 5.0
    };

    // Volume intensity (0-20).
    score += if volume_intensity >= 3.0 {
        20.0
    } else if volume_intensity >= 2.0 {
        15.0
    } else if volume_intensity >= 1.5 {
        10.0
    } else {
        ((volume_intensity - 1.0) * 20.0).max(0.0)
    };

    // R/R at TP1 (0-20).
    score += if rr >= 2.0 {
        20.0
    } else if rr >= 1.5 {
        15.0
    } else if rr >= 1.0 {
        10.0
    } else if rr >= 0.8 {
        5.0
    } else {
        0.0
    };

    // Levels clarity (0-10).
    score += if total_levels >= 5 {
        10.0
    } else if total_levels >= 3 {
        7.0
    } else if total_levels >= 1 {
        5.0
    } else {
        0.0
    };

    score.min(100.0)
}
