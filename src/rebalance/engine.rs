//! Deviation classification and the constant-product correction math.
//!
//! The correction holds `k` from the current pool state: the base
//! reserve that would price the pool at the oracle reference is
//! `sqrt(k / oracle_price)`, and the delta against the current base
//! reserve is the single-sided amount to add or remove.

use rust_decimal::{Decimal, MathematicalOps};
use tracing::debug;

use super::{CorrectionPlan, RebalanceDirection};
use crate::amount::Amount;
use crate::oracle::OracleReading;
use crate::pool::PoolSnapshot;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ThresholdError {
    #[error("deviation thresholds must be positive: {0}")]
    NonPositive(Decimal),
    #[error("thresholds must be strictly ascending: minor {minor} / major {major} / critical {critical}")]
    NotAscending {
        minor: Decimal,
        major: Decimal,
        critical: Decimal,
    },
}

/// Deviation bands, in percent of the oracle price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceThresholds {
    pub minor_pct: Decimal,
    pub major_pct: Decimal,
    pub critical_pct: Decimal,
}

impl RebalanceThresholds {
    pub fn new(
        minor_pct: Decimal,
        major_pct: Decimal,
        critical_pct: Decimal,
    ) -> Result<Self, ThresholdError> {
        for value in [minor_pct, major_pct, critical_pct] {
            if value <= Decimal::ZERO {
                return Err(ThresholdError::NonPositive(value));
            }
        }
        if !(minor_pct < major_pct && major_pct < critical_pct) {
            return Err(ThresholdError::NotAscending {
                minor: minor_pct,
                major: major_pct,
                critical: critical_pct,
            });
        }
        Ok(Self {
            minor_pct,
            major_pct,
            critical_pct,
        })
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("oracle price must be positive, got {0}")]
    NonPositiveOraclePrice(Decimal),
    #[error("correction math failed for k={k}, price={price}")]
    Math { k: Decimal, price: Decimal },
}

/// Outcome of evaluating one control-loop tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickDecision {
    /// Oracle reading is stale; no action, no venue calls.
    SkipStale,
    /// Deviation below the minor threshold.
    NoAction { deviation_pct: Decimal },
    /// Deviation in the monitor band; logged, no state change.
    MonitorOnly { deviation_pct: Decimal },
    /// Computed delta clamped to nothing; skip the tick.
    SkipNonPositiveDelta { deviation_pct: Decimal },
    /// Bounded correction to run through the scheduler gate.
    Correct(CorrectionPlan),
    /// At or beyond the critical band: no auto-correction, escalate.
    CriticalHalt {
        pool_price: Decimal,
        oracle_price: Decimal,
        deviation_pct: Decimal,
    },
}

#[derive(Debug, Clone)]
pub struct RebalanceEngine {
    thresholds: RebalanceThresholds,
    max_single_amount: Amount,
}

impl RebalanceEngine {
    pub fn new(thresholds: RebalanceThresholds, max_single_amount: Amount) -> Self {
        Self {
            thresholds,
            max_single_amount,
        }
    }

    pub fn evaluate(
        &self,
        snapshot: &PoolSnapshot,
        reading: &OracleReading,
    ) -> Result<TickDecision, EngineError> {
        if reading.is_stale {
            return Ok(TickDecision::SkipStale);
        }

        let oracle_price = reading.price;
        if oracle_price <= Decimal::ZERO {
            return Err(EngineError::NonPositiveOraclePrice(oracle_price));
        }

        let pool_price = snapshot.implied_price;
        let deviation_pct =
            (pool_price - oracle_price).abs() / oracle_price * Decimal::ONE_HUNDRED;

        if deviation_pct >= self.thresholds.critical_pct {
            return Ok(TickDecision::CriticalHalt {
                pool_price,
                oracle_price,
                deviation_pct,
            });
        }
        if deviation_pct < self.thresholds.minor_pct {
            return Ok(TickDecision::NoAction { deviation_pct });
        }
        if deviation_pct < self.thresholds.major_pct {
            debug!(%deviation_pct, %pool_price, %oracle_price, "Deviation in monitor band");
            return Ok(TickDecision::MonitorOnly { deviation_pct });
        }

        self.plan_correction(snapshot, oracle_price, deviation_pct)
    }

    fn plan_correction(
        &self,
        snapshot: &PoolSnapshot,
        oracle_price: Decimal,
        deviation_pct: Decimal,
    ) -> Result<TickDecision, EngineError> {
        let math_error = EngineError::Math {
            k: snapshot.k,
            price: oracle_price,
        };

        let target_base = snapshot
            .k
            .checked_div(oracle_price)
            .and_then(|ratio| ratio.sqrt())
            .ok_or(math_error)?;

        let raw_delta = target_base - snapshot.base_reserve;
        let direction = if raw_delta >= Decimal::ZERO {
            RebalanceDirection::AddBase
        } else {
            RebalanceDirection::RemoveBase
        };

        let raw_magnitude = raw_delta.abs();
        let clamped = raw_magnitude > self.max_single_amount.value();
        let magnitude = if clamped {
            self.max_single_amount.value()
        } else {
            raw_magnitude
        };

        if magnitude <= Decimal::ZERO {
            return Ok(TickDecision::SkipNonPositiveDelta { deviation_pct });
        }

        // magnitude > 0 was just checked.
        let amount = Amount::new(magnitude).map_err(|_| EngineError::Math {
            k: snapshot.k,
            price: oracle_price,
        })?;

        Ok(TickDecision::Correct(CorrectionPlan {
            direction,
            amount,
            before_price: snapshot.implied_price,
            target_price: oracle_price,
            deviation_pct,
            clamped,
        }))
    }
}
