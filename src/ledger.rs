//! Write primitives of the underlying ledger/AMM contract layer.
//!
//! The contracts themselves (balance transfer, approval, pool math)
//! are assumed-correct collaborators; this trait is the seam the
//! coordinator and rebalance executor call through. All calls go via
//! [`Failover`] so every write gets a timeout and bounded retry
//! across fallback endpoints.

use alloy::primitives::{Address, TxHash};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::amount::Amount;
use crate::rpc::{Failover, RpcFailure};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger rejected the call outright (bad input, contract revert).
    #[error("ledger rejected call: {0}")]
    Rejected(String),
    /// Transport-level failure on a single endpoint.
    #[error("ledger transport error: {0}")]
    Transport(String),
    /// All fallback endpoints exhausted.
    #[error(transparent)]
    Rpc(#[from] RpcFailure),
}

#[async_trait]
pub trait LedgerConnector: Send + Sync {
    /// Issues new supply to `to`, tagged with the external deposit
    /// reference for traceability.
    async fn mint(&self, to: Address, amount: Amount, external_ref: TxHash)
    -> Result<(), LedgerError>;

    /// Retires supply held by `from`, tagged with a withdraw reference.
    async fn burn(&self, from: Address, amount: Amount, withdraw_ref: Uuid)
    -> Result<(), LedgerError>;

    async fn balance_of(&self, account: Address) -> Result<Amount, LedgerError>;

    /// Single-sided deposit of base token into the pool.
    async fn add_liquidity(&self, base_amount: Amount) -> Result<(), LedgerError>;

    /// Single-sided withdrawal of base token from the pool.
    async fn remove_liquidity(&self, base_amount: Amount) -> Result<(), LedgerError>;
}

pub type DynLedger = Arc<dyn LedgerConnector>;

/// Failover over one connector per configured endpoint.
#[async_trait]
impl LedgerConnector for Failover<DynLedger> {
    async fn mint(
        &self,
        to: Address,
        amount: Amount,
        external_ref: TxHash,
    ) -> Result<(), LedgerError> {
        self.call(move |connector| async move { connector.mint(to, amount, external_ref).await })
            .await
            .map_err(LedgerError::Rpc)
    }

    async fn burn(
        &self,
        from: Address,
        amount: Amount,
        withdraw_ref: Uuid,
    ) -> Result<(), LedgerError> {
        self.call(move |connector| async move { connector.burn(from, amount, withdraw_ref).await })
            .await
            .map_err(LedgerError::Rpc)
    }

    async fn balance_of(&self, account: Address) -> Result<Amount, LedgerError> {
        self.call(move |connector| async move { connector.balance_of(account).await })
            .await
            .map_err(LedgerError::Rpc)
    }

    async fn add_liquidity(&self, base_amount: Amount) -> Result<(), LedgerError> {
        self.call(move |connector| async move { connector.add_liquidity(base_amount).await })
            .await
            .map_err(LedgerError::Rpc)
    }

    async fn remove_liquidity(&self, base_amount: Amount) -> Result<(), LedgerError> {
        self.call(move |connector| async move { connector.remove_liquidity(base_amount).await })
            .await
            .map_err(LedgerError::Rpc)
    }
}
