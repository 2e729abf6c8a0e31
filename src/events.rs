//! Domain events broadcast to operators and monitors.

use alloy::primitives::{Address, TxHash};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::amount::Amount;
use crate::coordinator::RequestId;
use crate::rebalance::RebalanceOperation;
use crate::reserve::ReserveSnapshot;

/// Fan-out channel capacity. Slow subscribers lag rather than block
/// the emitting component.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    MintExecuted {
        request_id: RequestId,
        recipient: Address,
        amount: Amount,
        external_ref: TxHash,
    },
    BurnExecuted {
        request_id: RequestId,
        account: Address,
        amount: Amount,
    },
    ReserveAuditAlert {
        snapshot: ReserveSnapshot,
    },
    CriticalDeviation {
        pool_price: Decimal,
        oracle_price: Decimal,
        deviation_pct: Decimal,
    },
    RebalanceExecuted {
        operation: RebalanceOperation,
    },
}
