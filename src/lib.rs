//! Control core of a reserve-backed, custodian-operated token bridge:
//! quorum-gated supply changes, a reserve-backing invariant tracker,
//! and a price-deviation rebalancing loop.

use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::info;

pub mod amount;
pub mod audit;
pub mod conductor;
pub mod config;
pub mod coordinator;
pub mod custodian;
pub mod events;
pub mod ledger;
pub mod oracle;
pub mod pool;
pub mod rebalance;
pub mod reserve;
pub mod rpc;
pub mod scheduler;
pub mod sim;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_utils;

use crate::audit::AuditLog;
use crate::conductor::{Conductor, RebalanceLoop};
use crate::config::{Ctx, VenueSection};
use crate::coordinator::MintBurnCoordinator;
use crate::events::{BridgeEvent, EVENT_CHANNEL_CAPACITY};
use crate::ledger::{DynLedger, LedgerConnector};
use crate::oracle::{DynOracle, PriceOracle};
use crate::pool::{DynPool, PoolStateReader};
use crate::rebalance::{RebalanceEngine, RebalanceExecutor};
use crate::reserve::ReserveLedger;
use crate::rpc::Failover;
use crate::scheduler::OperationScheduler;
use crate::sim::{FixedPriceOracle, SimulatedVenue};

/// Assembled control core: the coordinator serving custodian and
/// merchant calls, the shared reserve ledger, and the background
/// rebalancing conductor.
pub struct Bridge {
    pub coordinator: Arc<MintBurnCoordinator>,
    pub reserve: Arc<Mutex<ReserveLedger>>,
    pub audit: AuditLog,
    pub events: broadcast::Sender<BridgeEvent>,
    conductor: Conductor,
}

impl Bridge {
    pub async fn start(ctx: Ctx) -> anyhow::Result<Self> {
        let pool = ctx.sqlite_pool().await?;
        sqlx::migrate!().run(&pool).await?;

        let (events, _) = broadcast::channel::<BridgeEvent>(EVENT_CHANNEL_CAPACITY);
        let audit = AuditLog::new(pool);

        let mut reserve_ledger = ReserveLedger::new(ctx.minimum_backing_ratio, events.clone());
        for seed in &ctx.custodians {
            reserve_ledger.register_custodian(seed.address, seed.display_name.clone())?;
            info!(custodian = %seed.address, name = %seed.display_name, "Custodian registered");
        }
        let reserve = Arc::new(Mutex::new(reserve_ledger));

        let VenueSection::DryRun {
            operator,
            initial_base_reserve,
            initial_quote_reserve,
            oracle_price,
        } = ctx.venue.clone();
        info!(%operator, "Starting with dry-run venue connector");

        let venue = SimulatedVenue::new(operator, initial_base_reserve, initial_quote_reserve);
        let price_feed = FixedPriceOracle::new(oracle_price);

        let ledger: Arc<dyn LedgerConnector> = Arc::new(Failover::new(
            vec![Arc::new(venue.clone()) as DynLedger],
            ctx.retry_policy,
        )?);
        let oracle: Arc<dyn PriceOracle> = Arc::new(Failover::new(
            vec![Arc::new(price_feed) as DynOracle],
            ctx.retry_policy,
        )?);
        let pool_reader: Arc<dyn PoolStateReader> = Arc::new(Failover::new(
            vec![Arc::new(venue) as DynPool],
            ctx.retry_policy,
        )?);

        let coordinator = Arc::new(MintBurnCoordinator::new(
            ctx.required_confirmations,
            Arc::clone(&ledger),
            Arc::clone(&reserve),
            audit.clone(),
            events.clone(),
        )?);

        let scheduler = Arc::new(OperationScheduler::new(
            ctx.scheduler_limits,
            chrono::Utc::now(),
        ));
        let engine = RebalanceEngine::new(ctx.thresholds, ctx.max_single_rebalance);
        let executor = RebalanceExecutor::new(
            ledger,
            Arc::clone(&reserve),
            audit.clone(),
            events.clone(),
            operator,
        );

        let rebalance_loop = RebalanceLoop::new(
            oracle,
            pool_reader,
            engine,
            scheduler,
            executor,
            audit.clone(),
            events.clone(),
            ctx.tick_interval,
            ctx.max_oracle_staleness,
        );
        let conductor = Conductor::spawn(rebalance_loop);

        Ok(Self {
            coordinator,
            reserve,
            audit,
            events,
            conductor,
        })
    }

    /// Blocks until SIGINT, then stops background tasks.
    pub async fn run_until_shutdown(self) -> anyhow::Result<()> {
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
        self.conductor.shutdown().await;
        info!("Shutdown complete");
        Ok(())
    }
}
