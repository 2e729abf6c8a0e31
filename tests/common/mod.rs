//! Shared fixtures for integration tests: in-memory database and a
//! fully wired rebalancing loop against the simulated venue.

use std::sync::Arc;

use alloy::primitives::{Address, address};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::{Mutex, broadcast};

use reserve_bridge::amount::Amount;
use reserve_bridge::audit::AuditLog;
use reserve_bridge::conductor::RebalanceLoop;
use reserve_bridge::events::BridgeEvent;
use reserve_bridge::rebalance::{RebalanceEngine, RebalanceExecutor, RebalanceThresholds};
use reserve_bridge::reserve::ReserveLedger;
use reserve_bridge::scheduler::{OperationScheduler, SchedulerLimits};
use reserve_bridge::sim::{FixedPriceOracle, SimulatedVenue};

pub const OPERATOR: Address = address!("0xcccccccccccccccccccccccccccccccccccccccc");

pub async fn test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("failed to run migrations");

    pool
}

pub struct LoopConfig {
    pub base_reserve: Decimal,
    pub quote_reserve: Decimal,
    pub oracle_price: Decimal,
    pub max_single_rebalance: Decimal,
    pub limits: SchedulerLimits,
}

impl LoopConfig {
    /// Reference pool with generous limits so the gate never
    /// interferes unless a test narrows it.
    pub fn reference(oracle_price: Decimal) -> Self {
        Self {
            base_reserve: Decimal::from(1000),
            quote_reserve: Decimal::from(25),
            oracle_price,
            max_single_rebalance: Decimal::from(1000),
            limits: SchedulerLimits {
                min_operation_interval: chrono::Duration::seconds(0),
                max_daily_operations: 100,
            },
        }
    }
}

pub struct LoopHarness {
    pub venue: SimulatedVenue,
    pub oracle: FixedPriceOracle,
    pub audit: AuditLog,
    pub events: broadcast::Receiver<BridgeEvent>,
    pub reserve: Arc<Mutex<ReserveLedger>>,
    pub rebalance: RebalanceLoop,
}

pub async fn rebalance_harness(config: LoopConfig) -> LoopHarness {
    let pool = test_db().await;
    let audit = AuditLog::new(pool);
    let (events, receiver) = broadcast::channel(64);

    let venue = SimulatedVenue::new(OPERATOR, config.base_reserve, config.quote_reserve);
    let oracle = FixedPriceOracle::new(config.oracle_price);
    let reserve = Arc::new(Mutex::new(ReserveLedger::new(Decimal::ONE, events.clone())));

    let thresholds =
        RebalanceThresholds::new(Decimal::ONE, Decimal::from(5), Decimal::from(10)).unwrap();
    let engine = RebalanceEngine::new(
        thresholds,
        Amount::new(config.max_single_rebalance).unwrap(),
    );
    let scheduler = Arc::new(OperationScheduler::new(config.limits, Utc::now()));
    let executor = RebalanceExecutor::new(
        Arc::new(venue.clone()),
        Arc::clone(&reserve),
        audit.clone(),
        events.clone(),
        OPERATOR,
    );

    let rebalance = RebalanceLoop::new(
        Arc::new(oracle.clone()),
        Arc::new(venue.clone()),
        engine,
        scheduler,
        executor,
        audit.clone(),
        events.clone(),
        std::time::Duration::from_secs(180),
        chrono::Duration::seconds(900),
    );

    LoopHarness {
        venue,
        oracle,
        audit,
        events: receiver,
        reserve,
        rebalance,
    }
}
