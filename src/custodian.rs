//! Custodian registry: the set of parties whose confirmations count
//! toward mint/burn quorum and who may declare backing reserves.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::amount::Amount;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CustodianError {
    #[error("unknown or inactive custodian: {0}")]
    UnknownCustodian(Address),
    #[error("custodian already registered: {0}")]
    DuplicateCustodian(Address),
}

/// An authorized custodian. Deactivation revokes authority but the
/// record (and its declared reserve) is kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Custodian {
    pub address: Address,
    pub display_name: String,
    pub active: bool,
    pub declared_reserve: Amount,
}

#[derive(Debug, Clone, Default)]
pub struct CustodianRegistry {
    custodians: BTreeMap<Address, Custodian>,
}

impl CustodianRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        address: Address,
        display_name: impl Into<String>,
    ) -> Result<(), CustodianError> {
        if self.custodians.contains_key(&address) {
            return Err(CustodianError::DuplicateCustodian(address));
        }

        self.custodians.insert(
            address,
            Custodian {
                address,
                display_name: display_name.into(),
                active: true,
                declared_reserve: Amount::ZERO,
            },
        );

        Ok(())
    }

    pub fn deactivate(&mut self, address: Address) -> Result<(), CustodianError> {
        let custodian = self
            .custodians
            .get_mut(&address)
            .ok_or(CustodianError::UnknownCustodian(address))?;

        custodian.active = false;
        Ok(())
    }

    pub fn is_active(&self, address: &Address) -> bool {
        self.custodians
            .get(address)
            .is_some_and(|custodian| custodian.active)
    }

    /// Replaces the declared reserve of an active custodian.
    pub fn set_declared_reserve(
        &mut self,
        address: Address,
        amount: Amount,
    ) -> Result<(), CustodianError> {
        let custodian = self
            .custodians
            .get_mut(&address)
            .filter(|custodian| custodian.active)
            .ok_or(CustodianError::UnknownCustodian(address))?;

        custodian.declared_reserve = amount;
        Ok(())
    }

    /// Sum of declared reserves across all custodians, including
    /// deactivated ones (their contribution is preserved for audit).
    pub fn total_declared_reserve(&self) -> Amount {
        self.custodians
            .values()
            .fold(Amount::ZERO, |total, custodian| {
                total
                    .checked_add(custodian.declared_reserve)
                    .unwrap_or(total)
            })
    }

    pub fn get(&self, address: &Address) -> Option<&Custodian> {
        self.custodians.get(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Custodian> {
        self.custodians.values()
    }
}
