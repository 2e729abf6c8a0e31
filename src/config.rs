//! Process entrypoint (clap) and TOML configuration, assembled and
//! validated into the runtime `Ctx`.

use alloy::primitives::Address;
use clap::Parser;
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

use crate::amount::{Amount, AmountError};
use crate::rebalance::{RebalanceThresholds, ThresholdError};
use crate::rpc::RetryPolicy;
use crate::scheduler::SchedulerLimits;

#[derive(Parser, Debug)]
#[command(name = "reserve-bridge")]
#[command(about = "Control core for a reserve-backed, custodian-operated token bridge")]
#[command(version)]
pub struct Env {
    /// Path to the TOML configuration file
    #[clap(long, env = "BRIDGE_CONFIG")]
    pub config: PathBuf,
}

impl Env {
    pub fn load(&self) -> Result<Ctx, ConfigError> {
        let raw = std::fs::read_to_string(&self.config)?;
        Ctx::from_toml(&raw)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("required confirmations must be at least 1")]
    InvalidQuorum,
    #[error("minimum backing ratio must be positive, got {0}")]
    NonPositiveBackingRatio(Decimal),
    #[error("max single rebalance amount must be positive")]
    NonPositiveRebalanceCap,
    #[error(transparent)]
    Threshold(#[from] ThresholdError),
    #[error(transparent)]
    Amount(#[from] AmountError),
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// A custodian seeded at startup; registration afterwards is an admin
/// operation on the reserve ledger.
#[derive(Debug, Clone, Deserialize)]
pub struct CustodianSeed {
    pub address: Address,
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    database_url: String,
    log_level: Option<LogLevel>,
    quorum: QuorumSection,
    reserve: Option<ReserveSection>,
    #[serde(default)]
    custodians: Vec<CustodianSeed>,
    rebalancing: RebalancingSection,
    scheduler: Option<SchedulerSection>,
    rpc: Option<RpcSection>,
    venue: VenueSection,
}

#[derive(Debug, Deserialize)]
struct QuorumSection {
    required_confirmations: u32,
}

#[derive(Debug, Deserialize)]
struct ReserveSection {
    minimum_backing_ratio: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct RebalancingSection {
    minor_deviation_pct: Option<Decimal>,
    major_deviation_pct: Option<Decimal>,
    critical_deviation_pct: Option<Decimal>,
    max_single_rebalance_amount: Decimal,
    tick_interval_secs: Option<u64>,
    max_oracle_staleness_secs: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SchedulerSection {
    min_operation_interval_secs: Option<i64>,
    max_daily_operations: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RpcSection {
    attempt_timeout_ms: Option<u64>,
    max_retry_rounds: Option<u32>,
    initial_backoff_ms: Option<u64>,
}

/// Which venue connector the process runs against. Real ledger
/// connectors live outside this crate; the dry-run venue simulates
/// one in memory.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum VenueSection {
    DryRun {
        operator: Address,
        initial_base_reserve: Decimal,
        initial_quote_reserve: Decimal,
        oracle_price: Decimal,
    },
}

/// Validated runtime context.
#[derive(Debug, Clone)]
pub struct Ctx {
    pub database_url: String,
    pub log_level: LogLevel,
    pub required_confirmations: u32,
    pub minimum_backing_ratio: Decimal,
    pub custodians: Vec<CustodianSeed>,
    pub thresholds: RebalanceThresholds,
    pub max_single_rebalance: Amount,
    pub tick_interval: Duration,
    pub max_oracle_staleness: chrono::Duration,
    pub scheduler_limits: SchedulerLimits,
    pub retry_policy: RetryPolicy,
    pub venue: VenueSection,
}

impl Ctx {
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(raw)?;

        if file.quorum.required_confirmations == 0 {
            return Err(ConfigError::InvalidQuorum);
        }

        let minimum_backing_ratio = file
            .reserve
            .and_then(|section| section.minimum_backing_ratio)
            .unwrap_or(Decimal::ONE);
        if minimum_backing_ratio <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveBackingRatio(minimum_backing_ratio));
        }

        let rebalancing = file.rebalancing;
        let thresholds = RebalanceThresholds::new(
            rebalancing.minor_deviation_pct.unwrap_or(Decimal::ONE),
            rebalancing
                .major_deviation_pct
                .unwrap_or_else(|| Decimal::from(5)),
            rebalancing
                .critical_deviation_pct
                .unwrap_or_else(|| Decimal::from(10)),
        )?;

        let max_single_rebalance = Amount::new(rebalancing.max_single_rebalance_amount)?;
        if !max_single_rebalance.is_positive() {
            return Err(ConfigError::NonPositiveRebalanceCap);
        }

        let scheduler = file.scheduler.unwrap_or(SchedulerSection {
            min_operation_interval_secs: None,
            max_daily_operations: None,
        });
        let rpc = file.rpc.unwrap_or(RpcSection {
            attempt_timeout_ms: None,
            max_retry_rounds: None,
            initial_backoff_ms: None,
        });
        let retry_defaults = RetryPolicy::default();

        Ok(Self {
            database_url: file.database_url,
            log_level: file.log_level.unwrap_or_default(),
            required_confirmations: file.quorum.required_confirmations,
            minimum_backing_ratio,
            custodians: file.custodians,
            thresholds,
            max_single_rebalance,
            tick_interval: Duration::from_secs(rebalancing.tick_interval_secs.unwrap_or(180)),
            max_oracle_staleness: chrono::Duration::seconds(
                rebalancing.max_oracle_staleness_secs.unwrap_or(900),
            ),
            scheduler_limits: SchedulerLimits {
                min_operation_interval: chrono::Duration::seconds(
                    scheduler.min_operation_interval_secs.unwrap_or(300),
                ),
                max_daily_operations: scheduler.max_daily_operations.unwrap_or(24),
            },
            retry_policy: RetryPolicy {
                attempt_timeout: rpc
                    .attempt_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(retry_defaults.attempt_timeout),
                max_rounds: rpc.max_retry_rounds.unwrap_or(retry_defaults.max_rounds),
                initial_backoff: rpc
                    .initial_backoff_ms
                    .map(Duration::from_millis)
                    .unwrap_or(retry_defaults.initial_backoff),
            },
            venue: file.venue,
        })
    }

    pub async fn sqlite_pool(&self) -> Result<SqlitePool, sqlx::Error> {
        let options =
            SqliteConnectOptions::from_str(&self.database_url)?.create_if_missing(true);
        SqlitePoolOptions::new().connect_with(options).await
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    const SAMPLE: &str = r#"
        database_url = "sqlite://bridge.sqlite"
        log_level = "debug"

        [quorum]
        required_confirmations = 2

        [reserve]
        minimum_backing_ratio = "1.0"

        [[custodians]]
        address = "0x1111111111111111111111111111111111111111"
        display_name = "Prime Custody"

        [[custodians]]
        address = "0x2222222222222222222222222222222222222222"
        display_name = "Second Vault"

        [rebalancing]
        minor_deviation_pct = "1"
        major_deviation_pct = "5"
        critical_deviation_pct = "10"
        max_single_rebalance_amount = "250"
        tick_interval_secs = 180

        [scheduler]
        min_operation_interval_secs = 300
        max_daily_operations = 24

        [rpc]
        attempt_timeout_ms = 5000

        [venue]
        type = "dry-run"
        operator = "0xcccccccccccccccccccccccccccccccccccccccc"
        initial_base_reserve = "1000"
        initial_quote_reserve = "25"
        oracle_price = "0.025"
    "#;

    #[test]
    fn sample_config_parses() {
        let ctx = Ctx::from_toml(SAMPLE).unwrap();

        assert_eq!(ctx.required_confirmations, 2);
        assert_eq!(ctx.custodians.len(), 2);
        assert_eq!(ctx.minimum_backing_ratio, dec!(1.0));
        assert_eq!(ctx.thresholds.major_pct, dec!(5));
        assert_eq!(ctx.tick_interval, Duration::from_secs(180));
        assert_eq!(ctx.retry_policy.attempt_timeout, Duration::from_secs(5));
        assert!(matches!(ctx.venue, VenueSection::DryRun { .. }));
    }

    #[test]
    fn zero_quorum_is_rejected() {
        let raw = SAMPLE.replace("required_confirmations = 2", "required_confirmations = 0");

        let result = Ctx::from_toml(&raw);

        assert!(matches!(result, Err(ConfigError::InvalidQuorum)));
    }

    #[test]
    fn unordered_thresholds_are_rejected() {
        let raw = SAMPLE.replace(
            r#"major_deviation_pct = "5""#,
            r#"major_deviation_pct = "20""#,
        );

        let result = Ctx::from_toml(&raw);

        assert!(matches!(result, Err(ConfigError::Threshold(_))));
    }

    #[test]
    fn optional_sections_fall_back_to_defaults() {
        let raw = r#"
            database_url = "sqlite::memory:"

            [quorum]
            required_confirmations = 1

            [rebalancing]
            max_single_rebalance_amount = "100"

            [venue]
            type = "dry-run"
            operator = "0xcccccccccccccccccccccccccccccccccccccccc"
            initial_base_reserve = "1000"
            initial_quote_reserve = "25"
            oracle_price = "0.025"
        "#;

        let ctx = Ctx::from_toml(raw).unwrap();

        assert_eq!(ctx.thresholds.minor_pct, dec!(1));
        assert_eq!(ctx.thresholds.critical_pct, dec!(10));
        assert_eq!(ctx.scheduler_limits.max_daily_operations, 24);
        assert_eq!(
            ctx.scheduler_limits.min_operation_interval,
            chrono::Duration::seconds(300)
        );
        assert!(ctx.custodians.is_empty());
    }

    #[tokio::test]
    async fn sqlite_pool_creates_missing_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.sqlite");
        let raw = SAMPLE.replace(
            "sqlite://bridge.sqlite",
            &format!("sqlite://{}", path.display()),
        );

        let ctx = Ctx::from_toml(&raw).unwrap();
        let pool = ctx.sqlite_pool().await.unwrap();
        sqlx::migrate!().run(&pool).await.unwrap();

        assert!(path.exists());
    }

    #[test]
    fn zero_rebalance_cap_is_rejected() {
        let raw = SAMPLE.replace(
            r#"max_single_rebalance_amount = "250""#,
            r#"max_single_rebalance_amount = "0""#,
        );

        let result = Ctx::from_toml(&raw);

        assert!(matches!(result, Err(ConfigError::NonPositiveRebalanceCap)));
    }
}
