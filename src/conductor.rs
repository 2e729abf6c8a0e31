//! Drives the timer-based rebalancing loop and owns its task handle.
//!
//! Every tick reads the oracle and pool through failover transports,
//! runs the decision engine, and routes the outcome: skips are
//! recorded with their reason, corrections pass through the scheduler
//! gate before execution, and critical deviations halt automatic
//! correction for the tick and land in the emergency log.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditError, AuditLog};
use crate::events::BridgeEvent;
use crate::oracle::{OracleError, PriceOracle};
use crate::pool::{PoolError, PoolSnapshot, PoolStateReader, SnapshotError};
use crate::rebalance::{EngineError, RebalanceEngine, RebalanceExecutor, TickDecision};
use crate::scheduler::{GateRejection, OperationScheduler};

#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// One full rebalancing control loop. `tick` is callable directly so
/// tests can drive the loop deterministically.
pub struct RebalanceLoop {
    oracle: Arc<dyn PriceOracle>,
    pool: Arc<dyn PoolStateReader>,
    engine: RebalanceEngine,
    scheduler: Arc<OperationScheduler>,
    executor: RebalanceExecutor,
    audit: AuditLog,
    events: broadcast::Sender<BridgeEvent>,
    tick_interval: Duration,
    max_oracle_staleness: ChronoDuration,
    stale_since: Option<DateTime<Utc>>,
}

impl RebalanceLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        oracle: Arc<dyn PriceOracle>,
        pool: Arc<dyn PoolStateReader>,
        engine: RebalanceEngine,
        scheduler: Arc<OperationScheduler>,
        executor: RebalanceExecutor,
        audit: AuditLog,
        events: broadcast::Sender<BridgeEvent>,
        tick_interval: Duration,
        max_oracle_staleness: ChronoDuration,
    ) -> Self {
        Self {
            oracle,
            pool,
            engine,
            scheduler,
            executor,
            audit,
            events,
            tick_interval,
            max_oracle_staleness,
            stale_since: None,
        }
    }

    async fn run(mut self) {
        info!(interval = ?self.tick_interval, "Rebalance loop started");

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(tick_error) = self.tick(Utc::now()).await {
                // Transient failures (RPC exhaustion included) are
                // fatal for this tick only; the loop keeps going.
                error!(%tick_error, "Rebalance tick failed");
            }
        }
    }

    /// Evaluates and routes a single tick. Returns the engine
    /// decision that was acted on.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<TickDecision, TickError> {
        let reading = self.oracle.price().await?;
        let reserves = self.pool.reserves().await?;
        let snapshot = PoolSnapshot::new(reserves)?;

        let decision = self.engine.evaluate(&snapshot, &reading)?;
        match &decision {
            TickDecision::SkipStale => {
                self.note_stale(now);
                self.executor
                    .record_skip(
                        snapshot.implied_price,
                        reading.price,
                        rust_decimal::Decimal::ZERO,
                        "stale_oracle",
                        now,
                    )
                    .await?;
            }
            TickDecision::NoAction { deviation_pct } => {
                self.stale_since = None;
                debug!(%deviation_pct, "Pool within tolerance");
            }
            TickDecision::MonitorOnly { deviation_pct } => {
                self.stale_since = None;
                info!(
                    %deviation_pct,
                    pool_price = %snapshot.implied_price,
                    oracle_price = %reading.price,
                    "Deviation in monitor band, observing only"
                );
            }
            TickDecision::SkipNonPositiveDelta { deviation_pct } => {
                self.stale_since = None;
                self.executor
                    .record_skip(
                        snapshot.implied_price,
                        reading.price,
                        *deviation_pct,
                        "non_positive_delta",
                        now,
                    )
                    .await?;
            }
            TickDecision::CriticalHalt {
                pool_price,
                oracle_price,
                deviation_pct,
            } => {
                self.stale_since = None;
                error!(
                    %pool_price,
                    %oracle_price,
                    %deviation_pct,
                    "Critical deviation: automatic rebalancing halted, manual intervention required"
                );
                self.audit
                    .record_critical_deviation(now, *pool_price, *oracle_price, *deviation_pct)
                    .await?;
                self.events
                    .send(BridgeEvent::CriticalDeviation {
                        pool_price: *pool_price,
                        oracle_price: *oracle_price,
                        deviation_pct: *deviation_pct,
                    })
                    .ok();
            }
            TickDecision::Correct(plan) => {
                self.stale_since = None;
                match self.scheduler.approve(now).await {
                    Ok(()) => {
                        self.executor.execute(plan, now).await?;
                    }
                    Err(rejection) => {
                        warn!(%rejection, "Rebalance deferred by scheduler gate");
                        self.executor
                            .record_skip(
                                plan.before_price,
                                plan.target_price,
                                plan.deviation_pct,
                                gate_reason(&rejection),
                                now,
                            )
                            .await?;
                    }
                }
            }
        }

        Ok(decision)
    }

    /// Stale readings are routine for one tick; persisting beyond the
    /// configured window is an operator problem.
    fn note_stale(&mut self, now: DateTime<Utc>) {
        let since = *self.stale_since.get_or_insert(now);
        let stale_for = now - since;

        if stale_for > self.max_oracle_staleness {
            error!(
                stale_for_secs = stale_for.num_seconds(),
                "Oracle has been stale beyond the acceptable window"
            );
        } else {
            debug!("Oracle reading stale, skipping tick");
        }
    }
}

fn gate_reason(rejection: &GateRejection) -> &'static str {
    match rejection {
        GateRejection::CooldownActive { .. } => "cooldown_active",
        GateRejection::RateLimitExceeded { .. } => "rate_limit_exceeded",
    }
}

/// Owns the background task handles for the control core.
pub struct Conductor {
    rebalance_task: JoinHandle<()>,
}

impl Conductor {
    pub fn spawn(rebalance_loop: RebalanceLoop) -> Self {
        let rebalance_task = tokio::spawn(rebalance_loop.run());
        Self { rebalance_task }
    }

    pub async fn shutdown(self) {
        info!("Shutting down conductor tasks");
        self.rebalance_task.abort();
        match self.rebalance_task.await {
            Ok(()) => {}
            Err(join_error) if join_error.is_cancelled() => {}
            Err(join_error) => error!(%join_error, "Rebalance task ended abnormally"),
        }
    }
}
