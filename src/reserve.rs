//! Authoritative record of declared custodian reserves and issued
//! supply, and the backing-ratio invariant derived from them.

use alloy::primitives::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::amount::{Amount, AmountError};
use crate::custodian::{CustodianError, CustodianRegistry};
use crate::events::BridgeEvent;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ReserveError {
    #[error(transparent)]
    Custodian(#[from] CustodianError),
    #[error("burn of {amount} would drive supply below zero (current {supply})")]
    Underflow { supply: Amount, amount: Amount },
    #[error("supply arithmetic failed: {0}")]
    Arithmetic(#[from] AmountError),
}

/// A supply mutation applied after a mint or burn executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupplyDelta {
    Minted(Amount),
    Burned(Amount),
}

/// Point-in-time view of the backing invariant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReserveSnapshot {
    pub total_declared_reserve: Amount,
    pub total_supply: Amount,
    /// `None` when supply is zero (nothing issued, trivially backed).
    pub backing_ratio: Option<Decimal>,
    pub is_fully_backed: bool,
}

/// Tracks declared reserves and issued supply. Single source of truth
/// for the backing invariant; all mutations come through the owning
/// component's lock.
#[derive(Debug)]
pub struct ReserveLedger {
    custodians: CustodianRegistry,
    total_supply: Amount,
    minimum_ratio: Decimal,
    was_fully_backed: bool,
    events: broadcast::Sender<BridgeEvent>,
}

impl ReserveLedger {
    pub fn new(minimum_ratio: Decimal, events: broadcast::Sender<BridgeEvent>) -> Self {
        Self {
            custodians: CustodianRegistry::new(),
            total_supply: Amount::ZERO,
            minimum_ratio,
            was_fully_backed: true,
            events,
        }
    }

    pub fn custodians(&self) -> &CustodianRegistry {
        &self.custodians
    }

    pub fn register_custodian(
        &mut self,
        address: Address,
        display_name: impl Into<String>,
    ) -> Result<(), ReserveError> {
        self.custodians.register(address, display_name)?;
        Ok(())
    }

    pub fn deactivate_custodian(&mut self, address: Address) -> Result<(), ReserveError> {
        self.custodians.deactivate(address)?;
        self.refresh_backing();
        Ok(())
    }

    /// Replaces the custodian's declared reserve and recomputes the
    /// aggregate backing status.
    pub fn declare_reserve(
        &mut self,
        custodian: Address,
        amount: Amount,
    ) -> Result<ReserveSnapshot, ReserveError> {
        self.custodians.set_declared_reserve(custodian, amount)?;

        info!(%custodian, %amount, "Reserve declaration recorded");
        Ok(self.refresh_backing())
    }

    /// Applies a supply change after a mint/burn execution. Burns that
    /// would drive supply negative fail with `Underflow` and leave the
    /// ledger untouched.
    pub fn record_supply_change(
        &mut self,
        delta: SupplyDelta,
    ) -> Result<ReserveSnapshot, ReserveError> {
        let new_supply = match delta {
            SupplyDelta::Minted(amount) => self.total_supply.checked_add(amount)?,
            SupplyDelta::Burned(amount) => {
                self.total_supply
                    .checked_sub(amount)
                    .map_err(|_| ReserveError::Underflow {
                        supply: self.total_supply,
                        amount,
                    })?
            }
        };

        self.total_supply = new_supply;
        Ok(self.refresh_backing())
    }

    /// Current snapshot of the backing invariant.
    pub fn backing_status(&self) -> ReserveSnapshot {
        let total_declared_reserve = self.custodians.total_declared_reserve();
        let supply = self.total_supply.value();

        let backing_ratio = if supply.is_zero() {
            None
        } else {
            total_declared_reserve.value().checked_div(supply)
        };

        let required = supply
            .checked_mul(self.minimum_ratio)
            .unwrap_or(Decimal::MAX);
        let is_fully_backed = total_declared_reserve.value() >= required;

        ReserveSnapshot {
            total_declared_reserve,
            total_supply: self.total_supply,
            backing_ratio,
            is_fully_backed,
        }
    }

    /// Recomputes the backing status and raises a `ReserveAuditAlert`
    /// exactly when the invariant flips from backed to underbacked.
    fn refresh_backing(&mut self) -> ReserveSnapshot {
        let snapshot = self.backing_status();

        if self.was_fully_backed && !snapshot.is_fully_backed {
            error!(
                total_declared_reserve = %snapshot.total_declared_reserve,
                total_supply = %snapshot.total_supply,
                "Issued supply is no longer fully backed by declared reserves"
            );
            self.events
                .send(BridgeEvent::ReserveAuditAlert {
                    snapshot: snapshot.clone(),
                })
                .ok();
        } else if !self.was_fully_backed && snapshot.is_fully_backed {
            info!(
                total_declared_reserve = %snapshot.total_declared_reserve,
                total_supply = %snapshot.total_supply,
                "Backing restored"
            );
        }

        self.was_fully_backed = snapshot.is_fully_backed;
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    use super::*;

    const CUSTODIAN: Address = address!("0x1111111111111111111111111111111111111111");

    fn amt(value: &str) -> Amount {
        Amount::from_str(value).unwrap()
    }

    fn ledger() -> (ReserveLedger, broadcast::Receiver<BridgeEvent>) {
        let (sender, receiver) = broadcast::channel(16);
        let mut ledger = ReserveLedger::new(dec!(1.0), sender);
        ledger.register_custodian(CUSTODIAN, "Prime Custody").unwrap();
        (ledger, receiver)
    }

    #[test]
    fn fresh_ledger_is_fully_backed() {
        let (ledger, _rx) = ledger();

        let snapshot = ledger.backing_status();

        assert!(snapshot.is_fully_backed);
        assert_eq!(snapshot.backing_ratio, None);
        assert!(snapshot.total_supply.is_zero());
    }

    #[test]
    fn backed_iff_reserve_covers_supply() {
        let (mut ledger, _rx) = ledger();
        ledger.declare_reserve(CUSTODIAN, amt("100")).unwrap();

        let snapshot = ledger
            .record_supply_change(SupplyDelta::Minted(amt("100")))
            .unwrap();
        assert!(snapshot.is_fully_backed);
        assert_eq!(snapshot.backing_ratio, Some(dec!(1)));

        let snapshot = ledger
            .record_supply_change(SupplyDelta::Minted(amt("1")))
            .unwrap();
        assert!(!snapshot.is_fully_backed);
    }

    #[test]
    fn underbacked_flip_emits_single_audit_alert() {
        let (mut ledger, mut rx) = ledger();
        ledger.declare_reserve(CUSTODIAN, amt("10")).unwrap();

        // First mint beyond reserves flips the invariant.
        ledger
            .record_supply_change(SupplyDelta::Minted(amt("11")))
            .unwrap();
        // A second mint while already underbacked must not re-alert.
        ledger
            .record_supply_change(SupplyDelta::Minted(amt("1")))
            .unwrap();

        let event = rx.try_recv().unwrap();
        assert!(matches!(event, BridgeEvent::ReserveAuditAlert { .. }));
        assert!(rx.try_recv().is_err(), "expected exactly one alert");
    }

    #[test]
    fn recovery_rearms_the_alert() {
        let (mut ledger, mut rx) = ledger();
        ledger.declare_reserve(CUSTODIAN, amt("10")).unwrap();

        ledger
            .record_supply_change(SupplyDelta::Minted(amt("12")))
            .unwrap();
        assert!(rx.try_recv().is_ok());

        // Burn back under the reserve line, then breach again.
        ledger
            .record_supply_change(SupplyDelta::Burned(amt("4")))
            .unwrap();
        ledger
            .record_supply_change(SupplyDelta::Minted(amt("5")))
            .unwrap();

        assert!(rx.try_recv().is_ok(), "second breach should alert again");
    }

    #[tracing_test::traced_test]
    #[test]
    fn underbacked_flip_logs_at_error_level() {
        let (mut ledger, _rx) = ledger();
        ledger.declare_reserve(CUSTODIAN, amt("10")).unwrap();

        ledger
            .record_supply_change(SupplyDelta::Minted(amt("11")))
            .unwrap();

        assert!(logs_contain(
            "Issued supply is no longer fully backed by declared reserves"
        ));
    }

    #[test]
    fn burn_past_zero_fails_with_underflow() {
        let (mut ledger, _rx) = ledger();
        ledger
            .record_supply_change(SupplyDelta::Minted(amt("5")))
            .unwrap();

        let result = ledger.record_supply_change(SupplyDelta::Burned(amt("6")));

        assert!(matches!(result, Err(ReserveError::Underflow { .. })));
        // Failed burn leaves supply untouched.
        assert_eq!(ledger.backing_status().total_supply, amt("5"));
    }

    #[test]
    fn declare_reserve_by_unknown_custodian_fails() {
        let (mut ledger, _rx) = ledger();
        let stranger = address!("0x9999999999999999999999999999999999999999");

        let result = ledger.declare_reserve(stranger, amt("1"));

        assert_eq!(
            result.unwrap_err(),
            ReserveError::Custodian(CustodianError::UnknownCustodian(stranger))
        );
    }

    #[test]
    fn minimum_ratio_above_one_requires_overcollateralization() {
        let (sender, _rx) = broadcast::channel(16);
        let mut ledger = ReserveLedger::new(dec!(1.5), sender);
        ledger.register_custodian(CUSTODIAN, "Prime Custody").unwrap();
        ledger.declare_reserve(CUSTODIAN, amt("150")).unwrap();

        let snapshot = ledger
            .record_supply_change(SupplyDelta::Minted(amt("100")))
            .unwrap();
        assert!(snapshot.is_fully_backed);

        let snapshot = ledger
            .record_supply_change(SupplyDelta::Minted(amt("1")))
            .unwrap();
        assert!(!snapshot.is_fully_backed);
    }
}
