//! Simulated venue and oracle used by dry-run mode and tests.
//!
//! The venue keeps account balances and pool reserves in one place so
//! mint/burn and single-sided liquidity moves stay coherent: minted
//! base token lands in the operator account, `add_liquidity` moves it
//! into the pool, `remove_liquidity` pulls it back out for burning.

use alloy::primitives::{Address, TxHash};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::amount::Amount;
use crate::ledger::{LedgerConnector, LedgerError};
use crate::oracle::{OracleError, OracleReading, PriceOracle};
use crate::pool::{PoolError, PoolReserves, PoolStateReader};

#[derive(Debug)]
struct VenueState {
    balances: HashMap<Address, Decimal>,
    base_reserve: Decimal,
    quote_reserve: Decimal,
}

/// In-memory ledger + pool double.
#[derive(Debug, Clone)]
pub struct SimulatedVenue {
    state: Arc<Mutex<VenueState>>,
    operator: Address,
}

impl SimulatedVenue {
    pub fn new(operator: Address, base_reserve: Decimal, quote_reserve: Decimal) -> Self {
        Self {
            state: Arc::new(Mutex::new(VenueState {
                balances: HashMap::new(),
                base_reserve,
                quote_reserve,
            })),
            operator,
        }
    }

    fn state(&self) -> MutexGuard<'_, VenueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }

    pub fn balance(&self, account: Address) -> Decimal {
        self.state()
            .balances
            .get(&account)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn base_reserve(&self) -> Decimal {
        self.state().base_reserve
    }

    pub fn quote_reserve(&self) -> Decimal {
        self.state().quote_reserve
    }

    /// Test/setup hook: fund an account directly.
    pub fn credit(&self, account: Address, amount: Decimal) {
        let mut state = self.state();
        *state.balances.entry(account).or_insert(Decimal::ZERO) += amount;
    }
}

#[async_trait]
impl LedgerConnector for SimulatedVenue {
    async fn mint(
        &self,
        to: Address,
        amount: Amount,
        _external_ref: TxHash,
    ) -> Result<(), LedgerError> {
        let mut state = self.state();
        *state.balances.entry(to).or_insert(Decimal::ZERO) += amount.value();
        Ok(())
    }

    async fn burn(
        &self,
        from: Address,
        amount: Amount,
        _withdraw_ref: Uuid,
    ) -> Result<(), LedgerError> {
        let mut state = self.state();
        let balance = state.balances.entry(from).or_insert(Decimal::ZERO);
        if *balance < amount.value() {
            return Err(LedgerError::Rejected(format!(
                "burn of {amount} exceeds balance {balance} of {from}"
            )));
        }
        *balance -= amount.value();
        Ok(())
    }

    async fn balance_of(&self, account: Address) -> Result<Amount, LedgerError> {
        Amount::new(self.balance(account)).map_err(|error| LedgerError::Rejected(error.to_string()))
    }

    async fn add_liquidity(&self, base_amount: Amount) -> Result<(), LedgerError> {
        let mut state = self.state();
        let operator = self.operator;
        let balance = state.balances.entry(operator).or_insert(Decimal::ZERO);
        if *balance < base_amount.value() {
            return Err(LedgerError::Rejected(format!(
                "single-sided supply of {base_amount} exceeds operator balance {balance}"
            )));
        }
        *balance -= base_amount.value();
        state.base_reserve += base_amount.value();
        Ok(())
    }

    async fn remove_liquidity(&self, base_amount: Amount) -> Result<(), LedgerError> {
        let mut state = self.state();
        if state.base_reserve < base_amount.value() {
            return Err(LedgerError::Rejected(format!(
                "withdrawal of {base_amount} exceeds pool base reserve {}",
                state.base_reserve
            )));
        }
        state.base_reserve -= base_amount.value();
        let operator = self.operator;
        *state.balances.entry(operator).or_insert(Decimal::ZERO) += base_amount.value();
        Ok(())
    }
}

#[async_trait]
impl PoolStateReader for SimulatedVenue {
    async fn reserves(&self) -> Result<PoolReserves, PoolError> {
        let state = self.state();
        let base =
            Amount::new(state.base_reserve).map_err(|error| PoolError::Transport(error.to_string()))?;
        let quote = Amount::new(state.quote_reserve)
            .map_err(|error| PoolError::Transport(error.to_string()))?;
        Ok(PoolReserves { base, quote })
    }
}

/// Oracle double returning a configurable price and staleness flag.
#[derive(Debug, Clone)]
pub struct FixedPriceOracle {
    price: Arc<Mutex<Decimal>>,
    stale: Arc<AtomicBool>,
}

impl FixedPriceOracle {
    pub fn new(price: Decimal) -> Self {
        Self {
            price: Arc::new(Mutex::new(price)),
            stale: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_price(&self, price: Decimal) {
        let mut guard = match self.price.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        *guard = price;
    }

    pub fn set_stale(&self, stale: bool) {
        self.stale.store(stale, Ordering::SeqCst);
    }
}

#[async_trait]
impl PriceOracle for FixedPriceOracle {
    async fn price(&self) -> Result<OracleReading, OracleError> {
        let price = match self.price.lock() {
            Ok(guard) => *guard,
            Err(poison) => *poison.into_inner(),
        };
        Ok(OracleReading {
            price,
            is_stale: self.stale.load(Ordering::SeqCst),
            fetched_at: Utc::now(),
        })
    }
}
