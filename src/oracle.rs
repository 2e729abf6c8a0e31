//! Read-only accessor to the external reference price.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::rpc::{Failover, RpcFailure};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("oracle transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Rpc(#[from] RpcFailure),
}

/// A single oracle reading. `is_stale` marks readings older than the
/// feed's freshness window; the control loop skips stale ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleReading {
    pub price: Decimal,
    pub is_stale: bool,
    pub fetched_at: DateTime<Utc>,
}

#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn price(&self) -> Result<OracleReading, OracleError>;
}

pub type DynOracle = Arc<dyn PriceOracle>;

#[async_trait]
impl PriceOracle for Failover<DynOracle> {
    async fn price(&self) -> Result<OracleReading, OracleError> {
        self.call(move |oracle| async move { oracle.price().await })
            .await
            .map_err(OracleError::Rpc)
    }
}
