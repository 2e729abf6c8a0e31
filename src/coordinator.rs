//! Multisig confirmation state machine gating every supply change.
//!
//! Requests are created by merchant-role actors and confirmed by
//! custodians in any order; the confirmation that reaches quorum
//! executes the supply change. All request state sits behind a single
//! lock so the quorum-check-and-execute step is atomic: two
//! confirmations racing to be the one that reaches quorum can never
//! both execute.

use alloy::primitives::{Address, TxHash};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::amount::Amount;
use crate::audit::{AuditLog, OperationKind, OperationRecord};
use crate::events::BridgeEvent;
use crate::ledger::{LedgerConnector, LedgerError};
use crate::reserve::{ReserveError, ReserveLedger, SupplyDelta};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("amount must be greater than zero")]
    InvalidAmount,
    #[error("required confirmations must be at least 1")]
    InvalidQuorum,
    #[error("external transaction {0} was already used by a mint request")]
    DuplicateTransactionHash(TxHash),
    #[error("unknown request: {0}")]
    UnknownRequest(RequestId),
    #[error("request {0} has already executed")]
    AlreadyExecuted(RequestId),
    #[error("custodian {custodian} already confirmed request {request_id}")]
    DuplicateConfirmation {
        request_id: RequestId,
        custodian: Address,
    },
    #[error("unknown or inactive custodian: {0}")]
    UnknownCustodian(Address),
    #[error("account {account} holds {balance}, cannot burn {amount}")]
    InsufficientBalance {
        account: Address,
        balance: Amount,
        amount: Amount,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Reserve(#[from] ReserveError),
}

/// A pending or executed supply-change request. Mints carry the
/// external deposit hash used for dedupe; burns carry none.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SupplyRequest {
    pub id: RequestId,
    pub account: Address,
    pub amount: Amount,
    pub external_ref: Option<TxHash>,
    pub confirmations: BTreeSet<Address>,
    pub required_confirmations: u32,
    pub executed: bool,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
}

impl SupplyRequest {
    fn new(
        id: RequestId,
        account: Address,
        amount: Amount,
        external_ref: Option<TxHash>,
        required_confirmations: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            account,
            amount,
            external_ref,
            confirmations: BTreeSet::new(),
            required_confirmations,
            executed: false,
            approved: false,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Pending { confirmations: u32, required: u32 },
    Executed,
}

#[derive(Debug)]
struct CoordinatorState {
    next_request_id: u64,
    required_confirmations: u32,
    mints: BTreeMap<RequestId, SupplyRequest>,
    burns: BTreeMap<RequestId, SupplyRequest>,
    used_mint_refs: HashSet<TxHash>,
}

impl CoordinatorState {
    fn allocate_id(&mut self) -> RequestId {
        let id = RequestId(self.next_request_id);
        self.next_request_id += 1;
        id
    }
}

pub struct MintBurnCoordinator {
    state: Mutex<CoordinatorState>,
    ledger: Arc<dyn LedgerConnector>,
    reserve: Arc<Mutex<ReserveLedger>>,
    audit: AuditLog,
    events: broadcast::Sender<BridgeEvent>,
}

impl MintBurnCoordinator {
    pub fn new(
        required_confirmations: u32,
        ledger: Arc<dyn LedgerConnector>,
        reserve: Arc<Mutex<ReserveLedger>>,
        audit: AuditLog,
        events: broadcast::Sender<BridgeEvent>,
    ) -> Result<Self, CoordinatorError> {
        if required_confirmations == 0 {
            return Err(CoordinatorError::InvalidQuorum);
        }

        Ok(Self {
            state: Mutex::new(CoordinatorState {
                next_request_id: 1,
                required_confirmations,
                mints: BTreeMap::new(),
                burns: BTreeMap::new(),
                used_mint_refs: HashSet::new(),
            }),
            ledger,
            reserve,
            audit,
            events,
        })
    }

    /// Opens a mint request for a verified external deposit. The
    /// deposit hash is the dedupe key across all mint requests,
    /// pending or executed.
    pub async fn request_mint(
        &self,
        recipient: Address,
        amount: Amount,
        external_ref: TxHash,
        now: DateTime<Utc>,
    ) -> Result<RequestId, CoordinatorError> {
        if !amount.is_positive() {
            return Err(CoordinatorError::InvalidAmount);
        }

        let mut state = self.state.lock().await;
        if state.used_mint_refs.contains(&external_ref) {
            return Err(CoordinatorError::DuplicateTransactionHash(external_ref));
        }

        let id = state.allocate_id();
        let required = state.required_confirmations;
        state.used_mint_refs.insert(external_ref);
        state.mints.insert(
            id,
            SupplyRequest::new(id, recipient, amount, Some(external_ref), required, now),
        );

        info!(request_id = %id, %recipient, %amount, %external_ref, "Mint request opened");
        Ok(id)
    }

    pub async fn request_burn(
        &self,
        account: Address,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<RequestId, CoordinatorError> {
        if !amount.is_positive() {
            return Err(CoordinatorError::InvalidAmount);
        }

        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        let required = state.required_confirmations;
        state
            .burns
            .insert(id, SupplyRequest::new(id, account, amount, None, required, now));

        info!(request_id = %id, %account, %amount, "Burn request opened");
        Ok(id)
    }

    /// Adds a custodian confirmation; the confirmation that reaches
    /// quorum executes the mint. A ledger failure during execution
    /// leaves the request pending with the triggering confirmation
    /// unrecorded, so a later confirmation retries.
    pub async fn confirm_mint(
        &self,
        request_id: RequestId,
        custodian: Address,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome, CoordinatorError> {
        let mut state = self.state.lock().await;
        self.require_active_custodian(custodian).await?;

        let request = state
            .mints
            .get_mut(&request_id)
            .ok_or(CoordinatorError::UnknownRequest(request_id))?;
        if let Some(outcome) = record_confirmation(request, custodian)? {
            return Ok(outcome);
        }

        // This confirmation reaches quorum: execute exactly once.
        let recipient = request.account;
        let amount = request.amount;
        let external_ref = request
            .external_ref
            .unwrap_or(TxHash::ZERO);

        self.warn_if_mint_underbacks(amount).await;

        self.ledger.mint(recipient, amount, external_ref).await?;

        let request = state
            .mints
            .get_mut(&request_id)
            .ok_or(CoordinatorError::UnknownRequest(request_id))?;
        request.confirmations.insert(custodian);
        request.executed = true;
        request.approved = true;

        let snapshot = self
            .reserve
            .lock()
            .await
            .record_supply_change(SupplyDelta::Minted(amount));
        if let Err(reserve_error) = &snapshot {
            error!(%reserve_error, request_id = %request_id, "Supply recorded on ledger but reserve update failed");
        }

        info!(request_id = %request_id, %recipient, %amount, "Mint executed at quorum");
        self.append_execution_record(
            OperationKind::MintExecution,
            request_id,
            recipient,
            amount,
            now,
        )
        .await;
        self.events
            .send(BridgeEvent::MintExecuted {
                request_id,
                recipient,
                amount,
                external_ref,
            })
            .ok();

        Ok(ConfirmOutcome::Executed)
    }

    /// Burn confirmation; symmetric with `confirm_mint` except the
    /// account balance is re-checked at execution time, not request
    /// time, so a drained account fails here even if it was funded
    /// when the request was opened.
    pub async fn confirm_burn(
        &self,
        request_id: RequestId,
        custodian: Address,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome, CoordinatorError> {
        let mut state = self.state.lock().await;
        self.require_active_custodian(custodian).await?;

        let request = state
            .burns
            .get_mut(&request_id)
            .ok_or(CoordinatorError::UnknownRequest(request_id))?;
        if let Some(outcome) = record_confirmation(request, custodian)? {
            return Ok(outcome);
        }

        let account = request.account;
        let amount = request.amount;

        let balance = self.ledger.balance_of(account).await?;
        if balance < amount {
            return Err(CoordinatorError::InsufficientBalance {
                account,
                balance,
                amount,
            });
        }

        self.ledger.burn(account, amount, Uuid::new_v4()).await?;

        let request = state
            .burns
            .get_mut(&request_id)
            .ok_or(CoordinatorError::UnknownRequest(request_id))?;
        request.confirmations.insert(custodian);
        request.executed = true;
        request.approved = true;

        let snapshot = self
            .reserve
            .lock()
            .await
            .record_supply_change(SupplyDelta::Burned(amount));
        if let Err(reserve_error) = &snapshot {
            error!(%reserve_error, request_id = %request_id, "Supply burned on ledger but reserve update failed");
        }

        info!(request_id = %request_id, %account, %amount, "Burn executed at quorum");
        self.append_execution_record(
            OperationKind::BurnExecution,
            request_id,
            account,
            amount,
            now,
        )
        .await;
        self.events
            .send(BridgeEvent::BurnExecuted {
                request_id,
                account,
                amount,
            })
            .ok();

        Ok(ConfirmOutcome::Executed)
    }

    /// Applies to requests created after the change; existing requests
    /// keep the quorum they were opened with.
    pub async fn set_required_confirmations(&self, n: u32) -> Result<(), CoordinatorError> {
        if n == 0 {
            return Err(CoordinatorError::InvalidQuorum);
        }

        let mut state = self.state.lock().await;
        info!(from = state.required_confirmations, to = n, "Required confirmations updated");
        state.required_confirmations = n;
        Ok(())
    }

    pub async fn mint_request(&self, request_id: RequestId) -> Option<SupplyRequest> {
        self.state.lock().await.mints.get(&request_id).cloned()
    }

    pub async fn burn_request(&self, request_id: RequestId) -> Option<SupplyRequest> {
        self.state.lock().await.burns.get(&request_id).cloned()
    }

    async fn require_active_custodian(
        &self,
        custodian: Address,
    ) -> Result<(), CoordinatorError> {
        let reserve = self.reserve.lock().await;
        if !reserve.custodians().is_active(&custodian) {
            return Err(CoordinatorError::UnknownCustodian(custodian));
        }
        Ok(())
    }

    /// Reserve consultation before a mint executes: an execution that
    /// will leave supply underbacked proceeds (the quorum decided) but
    /// is loudly flagged; the post-execution recompute raises the
    /// audit alert.
    async fn warn_if_mint_underbacks(&self, amount: Amount) {
        let reserve = self.reserve.lock().await;
        let snapshot = reserve.backing_status();

        let prospective_supply = snapshot
            .total_supply
            .checked_add(amount)
            .unwrap_or(snapshot.total_supply);
        if snapshot.total_declared_reserve < prospective_supply {
            warn!(
                declared = %snapshot.total_declared_reserve,
                prospective_supply = %prospective_supply,
                "Mint execution will leave supply underbacked"
            );
        }
    }

    async fn append_execution_record(
        &self,
        kind: OperationKind,
        request_id: RequestId,
        account: Address,
        amount: Amount,
        now: DateTime<Utc>,
    ) {
        let snapshot = self.reserve.lock().await.backing_status();

        let append = self
            .audit
            .append(&OperationRecord {
                occurred_at: now,
                kind,
                before_state: json!({ "request_id": request_id, "account": account }),
                after_state: json!({
                    "amount": amount,
                    "total_supply": snapshot.total_supply,
                    "is_fully_backed": snapshot.is_fully_backed,
                }),
                outcome: "success".to_string(),
                reason: None,
            })
            .await;

        if let Err(audit_error) = append {
            error!(%audit_error, request_id = %request_id, "Failed to append execution audit record");
        }
    }
}

/// Shared confirmation bookkeeping. Returns `Some(outcome)` when the
/// confirmation was recorded without reaching quorum, `None` when the
/// caller must execute (the confirmation is recorded only after the
/// execution succeeds).
fn record_confirmation(
    request: &mut SupplyRequest,
    custodian: Address,
) -> Result<Option<ConfirmOutcome>, CoordinatorError> {
    if request.executed {
        return Err(CoordinatorError::AlreadyExecuted(request.id));
    }
    if request.confirmations.contains(&custodian) {
        return Err(CoordinatorError::DuplicateConfirmation {
            request_id: request.id,
            custodian,
        });
    }

    let count_with_this = request.confirmations.len() as u32 + 1;
    if count_with_this < request.required_confirmations {
        request.confirmations.insert(custodian);
        info!(
            request_id = %request.id,
            %custodian,
            confirmations = count_with_this,
            required = request.required_confirmations,
            "Confirmation recorded"
        );
        return Ok(Some(ConfirmOutcome::Pending {
            confirmations: count_with_this,
            required: request.required_confirmations,
        }));
    }

    Ok(None)
}
