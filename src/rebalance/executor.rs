//! Executes approved correction plans against the ledger and records
//! the attempt in the audit trail.

use alloy::primitives::{Address, TxHash};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::{error, info};
use uuid::Uuid;

use super::{CorrectionPlan, RebalanceDirection, RebalanceOperation, RebalanceOutcome};
use crate::audit::{AuditError, AuditLog, OperationKind, OperationRecord};
use crate::events::BridgeEvent;
use crate::ledger::{LedgerConnector, LedgerError};
use crate::reserve::{ReserveError, ReserveLedger, SupplyDelta};

#[derive(Debug, thiserror::Error)]
enum ExecutionFailure {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Reserve(#[from] ReserveError),
}

pub struct RebalanceExecutor {
    ledger: Arc<dyn LedgerConnector>,
    reserve: Arc<Mutex<ReserveLedger>>,
    audit: AuditLog,
    events: broadcast::Sender<BridgeEvent>,
    /// Account that receives minted base token before it is supplied
    /// to the pool, and holds withdrawn base token until it is burned.
    operator: Address,
}

impl RebalanceExecutor {
    pub fn new(
        ledger: Arc<dyn LedgerConnector>,
        reserve: Arc<Mutex<ReserveLedger>>,
        audit: AuditLog,
        events: broadcast::Sender<BridgeEvent>,
        operator: Address,
    ) -> Self {
        Self {
            ledger,
            reserve,
            audit,
            events,
            operator,
        }
    }

    /// Runs the mint-and-supply or withdraw-and-burn sequence for an
    /// approved plan. Ledger failures produce a `failed` audit record
    /// rather than an error; only audit-log writes are fatal.
    pub async fn execute(
        &self,
        plan: &CorrectionPlan,
        now: DateTime<Utc>,
    ) -> Result<RebalanceOperation, AuditError> {
        let (outcome, reason) = match self.apply(plan).await {
            Ok(()) => {
                info!(
                    direction = %plan.direction,
                    amount = %plan.amount,
                    before_price = %plan.before_price,
                    target_price = %plan.target_price,
                    "Rebalance executed"
                );
                (RebalanceOutcome::Success, None)
            }
            Err(failure) => {
                error!(%failure, direction = %plan.direction, "Rebalance execution failed");
                (RebalanceOutcome::Failed, Some(failure.to_string()))
            }
        };

        let operation = RebalanceOperation {
            timestamp: now,
            before_price: plan.before_price,
            target_price: plan.target_price,
            deviation_pct: plan.deviation_pct,
            direction: Some(plan.direction),
            amount: Some(plan.amount),
            outcome,
            reason,
        };
        self.record(&operation).await?;

        if operation.outcome == RebalanceOutcome::Success {
            self.events
                .send(BridgeEvent::RebalanceExecuted {
                    operation: operation.clone(),
                })
                .ok();
        }

        Ok(operation)
    }

    /// Records a tick that was evaluated but not executed (stale
    /// oracle, zero delta, scheduler gate).
    pub async fn record_skip(
        &self,
        before_price: Decimal,
        target_price: Decimal,
        deviation_pct: Decimal,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<RebalanceOperation, AuditError> {
        let operation = RebalanceOperation {
            timestamp: now,
            before_price,
            target_price,
            deviation_pct,
            direction: None,
            amount: None,
            outcome: RebalanceOutcome::Skipped,
            reason: Some(reason.to_string()),
        };
        self.record(&operation).await?;
        Ok(operation)
    }

    async fn apply(&self, plan: &CorrectionPlan) -> Result<(), ExecutionFailure> {
        match plan.direction {
            RebalanceDirection::AddBase => {
                self.ledger
                    .mint(self.operator, plan.amount, rebalance_mint_ref())
                    .await?;
                self.ledger.add_liquidity(plan.amount).await?;
                self.reserve
                    .lock()
                    .await
                    .record_supply_change(SupplyDelta::Minted(plan.amount))?;
            }
            RebalanceDirection::RemoveBase => {
                self.ledger.remove_liquidity(plan.amount).await?;
                self.ledger
                    .burn(self.operator, plan.amount, Uuid::new_v4())
                    .await?;
                self.reserve
                    .lock()
                    .await
                    .record_supply_change(SupplyDelta::Burned(plan.amount))?;
            }
        }
        Ok(())
    }

    async fn record(&self, operation: &RebalanceOperation) -> Result<(), AuditError> {
        self.audit
            .append(&OperationRecord {
                occurred_at: operation.timestamp,
                kind: OperationKind::Rebalance,
                before_state: json!({
                    "pool_price": operation.before_price,
                    "deviation_pct": operation.deviation_pct,
                }),
                after_state: json!({
                    "target_price": operation.target_price,
                    "direction": operation.direction,
                    "amount": operation.amount,
                }),
                outcome: operation.outcome.to_string(),
                reason: operation.reason.clone(),
            })
            .await?;

        Ok(())
    }
}

/// Synthetic reference tagging supply minted by the rebalancer, as
/// opposed to custodian-approved deposits which carry the external
/// deposit hash.
fn rebalance_mint_ref() -> TxHash {
    let mut bytes = [0u8; 32];
    bytes[..16].copy_from_slice(Uuid::new_v4().as_bytes());
    bytes[16..].copy_from_slice(Uuid::new_v4().as_bytes());
    TxHash::new(bytes)
}
