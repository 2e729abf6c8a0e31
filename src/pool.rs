//! Read-only accessor to the AMM pool's reserves and the derived
//! constant-product snapshot.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

use crate::amount::Amount;
use crate::rpc::{Failover, RpcFailure};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("pool transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Rpc(#[from] RpcFailure),
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("pool has a non-positive {side} reserve: {value}")]
    EmptyReserve { side: &'static str, value: Decimal },
    #[error("constant-product overflow for reserves {base} x {quote}")]
    Overflow { base: Decimal, quote: Decimal },
}

/// Raw reserves as reported by the pool contract. The connector fixes
/// which pooled asset is base and which is quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolReserves {
    pub base: Amount,
    pub quote: Amount,
}

/// Derived pool state for one control-loop tick.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub base_reserve: Decimal,
    pub quote_reserve: Decimal,
    /// quote / base.
    pub implied_price: Decimal,
    /// base * quote, held constant absent deposits/withdrawals.
    pub k: Decimal,
}

impl PoolSnapshot {
    pub fn new(reserves: PoolReserves) -> Result<Self, SnapshotError> {
        let base = reserves.base.value();
        let quote = reserves.quote.value();

        if base <= Decimal::ZERO {
            return Err(SnapshotError::EmptyReserve {
                side: "base",
                value: base,
            });
        }
        if quote <= Decimal::ZERO {
            return Err(SnapshotError::EmptyReserve {
                side: "quote",
                value: quote,
            });
        }

        let k = base
            .checked_mul(quote)
            .ok_or(SnapshotError::Overflow { base, quote })?;

        // base > 0 was checked above.
        let implied_price = quote / base;

        Ok(Self {
            base_reserve: base,
            quote_reserve: quote,
            implied_price,
            k,
        })
    }
}

#[async_trait]
pub trait PoolStateReader: Send + Sync {
    async fn reserves(&self) -> Result<PoolReserves, PoolError>;
}

pub type DynPool = Arc<dyn PoolStateReader>;

#[async_trait]
impl PoolStateReader for Failover<DynPool> {
    async fn reserves(&self) -> Result<PoolReserves, PoolError> {
        self.call(move |pool| async move { pool.reserves().await })
            .await
            .map_err(PoolError::Rpc)
    }
}
