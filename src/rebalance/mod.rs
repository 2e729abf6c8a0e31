//! Price-deviation rebalancing: decision engine, corrective-operation
//! executor, and the audit record they produce.

mod engine;
mod executor;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::amount::Amount;

pub use engine::{EngineError, RebalanceEngine, RebalanceThresholds, ThresholdError, TickDecision};
pub use executor::RebalanceExecutor;

/// Which side of the pool the correction moves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RebalanceDirection {
    /// Mint and single-sided-supply base token into the pool,
    /// diluting an overvalued base price toward target.
    AddBase,
    /// Withdraw base token from the pool and retire it.
    RemoveBase,
}

impl Display for RebalanceDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AddBase => write!(f, "ADD_BASE"),
            Self::RemoveBase => write!(f, "REMOVE_BASE"),
        }
    }
}

/// A bounded correction computed by the engine, pending the
/// scheduler gate.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CorrectionPlan {
    pub direction: RebalanceDirection,
    pub amount: Amount,
    pub before_price: Decimal,
    pub target_price: Decimal,
    pub deviation_pct: Decimal,
    /// Whether the raw delta hit the single-operation cap.
    pub clamped: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceOutcome {
    Success,
    Failed,
    Skipped,
}

impl Display for RebalanceOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Append-only audit record of one rebalancing attempt.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RebalanceOperation {
    pub timestamp: DateTime<Utc>,
    pub before_price: Decimal,
    pub target_price: Decimal,
    pub deviation_pct: Decimal,
    pub direction: Option<RebalanceDirection>,
    pub amount: Option<Amount>,
    pub outcome: RebalanceOutcome,
    pub reason: Option<String>,
}
