//! Append-only audit trail: one operation-log row per rebalancing
//! attempt and per executed mint/burn, plus a separate emergency log
//! of critical deviations. Rows are write-once; nothing here updates
//! or deletes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::fmt::Display;

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to serialize audit state: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    MintExecution,
    BurnExecution,
    Rebalance,
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MintExecution => write!(f, "mint_execution"),
            Self::BurnExecution => write!(f, "burn_execution"),
            Self::Rebalance => write!(f, "rebalance"),
        }
    }
}

/// One write-once operation record.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub occurred_at: DateTime<Utc>,
    pub kind: OperationKind,
    pub before_state: serde_json::Value,
    pub after_state: serde_json::Value,
    pub outcome: String,
    pub reason: Option<String>,
}

/// A stored operation row, as read back for reporting.
#[derive(Debug, Clone)]
pub struct StoredOperation {
    pub id: i64,
    pub occurred_at: DateTime<Utc>,
    pub kind: String,
    pub before_state: serde_json::Value,
    pub after_state: serde_json::Value,
    pub outcome: String,
    pub reason: Option<String>,
}

/// A stored critical-deviation row.
#[derive(Debug, Clone)]
pub struct CriticalDeviationRecord {
    pub id: i64,
    pub occurred_at: DateTime<Utc>,
    pub pool_price: Decimal,
    pub oracle_price: Decimal,
    pub deviation_pct: Decimal,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    pool: SqlitePool,
}

impl AuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, record: &OperationRecord) -> Result<i64, AuditError> {
        let result = sqlx::query(
            r"
            INSERT INTO operation_log
                (occurred_at, kind, before_state, after_state, outcome, reason)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(record.occurred_at)
        .bind(record.kind.to_string())
        .bind(record.before_state.to_string())
        .bind(record.after_state.to_string())
        .bind(&record.outcome)
        .bind(&record.reason)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn record_critical_deviation(
        &self,
        occurred_at: DateTime<Utc>,
        pool_price: Decimal,
        oracle_price: Decimal,
        deviation_pct: Decimal,
    ) -> Result<i64, AuditError> {
        let result = sqlx::query(
            r"
            INSERT INTO critical_deviations
                (occurred_at, pool_price, oracle_price, deviation_pct)
            VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(occurred_at)
        .bind(pool_price.to_string())
        .bind(oracle_price.to_string())
        .bind(deviation_pct.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent operations first.
    pub async fn recent_operations(&self, limit: i64) -> Result<Vec<StoredOperation>, AuditError> {
        let rows = sqlx::query(
            r"
            SELECT id, occurred_at, kind, before_state, after_state, outcome, reason
            FROM operation_log
            ORDER BY id DESC
            LIMIT ?1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let before: String = row.get("before_state");
                let after: String = row.get("after_state");
                Ok(StoredOperation {
                    id: row.get("id"),
                    occurred_at: row.get("occurred_at"),
                    kind: row.get("kind"),
                    before_state: serde_json::from_str(&before)?,
                    after_state: serde_json::from_str(&after)?,
                    outcome: row.get("outcome"),
                    reason: row.get("reason"),
                })
            })
            .collect()
    }

    pub async fn critical_deviations(&self) -> Result<Vec<CriticalDeviationRecord>, AuditError> {
        let rows = sqlx::query(
            r"
            SELECT id, occurred_at, pool_price, oracle_price, deviation_pct
            FROM critical_deviations
            ORDER BY id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let pool_price: String = row.get("pool_price");
                let oracle_price: String = row.get("oracle_price");
                let deviation_pct: String = row.get("deviation_pct");
                CriticalDeviationRecord {
                    id: row.get("id"),
                    occurred_at: row.get("occurred_at"),
                    pool_price: pool_price.parse().unwrap_or_default(),
                    oracle_price: oracle_price.parse().unwrap_or_default(),
                    deviation_pct: deviation_pct.parse().unwrap_or_default(),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;
    use crate::test_utils::setup_test_db;

    fn record(outcome: &str) -> OperationRecord {
        OperationRecord {
            occurred_at: Utc::now(),
            kind: OperationKind::Rebalance,
            before_state: json!({"pool_price": "0.025"}),
            after_state: json!({"pool_price": "0.0239"}),
            outcome: outcome.to_string(),
            reason: None,
        }
    }

    #[tokio::test]
    async fn append_then_read_back_round_trips() {
        let pool = setup_test_db().await;
        let audit = AuditLog::new(pool);

        let id = audit.append(&record("success")).await.unwrap();
        assert!(id > 0);

        let stored = audit.recent_operations(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].kind, "rebalance");
        assert_eq!(stored[0].outcome, "success");
        assert_eq!(stored[0].before_state["pool_price"], "0.025");
    }

    #[tokio::test]
    async fn recent_operations_returns_newest_first() {
        let pool = setup_test_db().await;
        let audit = AuditLog::new(pool);

        audit.append(&record("success")).await.unwrap();
        audit.append(&record("skipped")).await.unwrap();

        let stored = audit.recent_operations(10).await.unwrap();
        assert_eq!(stored[0].outcome, "skipped");
        assert_eq!(stored[1].outcome, "success");
    }

    #[tokio::test]
    async fn critical_deviation_round_trips() {
        let pool = setup_test_db().await;
        let audit = AuditLog::new(pool);

        audit
            .record_critical_deviation(Utc::now(), dec!(0.025), dec!(0.0225), dec!(11.11))
            .await
            .unwrap();

        let stored = audit.critical_deviations().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].pool_price, dec!(0.025));
        assert_eq!(stored[0].deviation_pct, dec!(11.11));
    }

    #[tokio::test]
    async fn limit_caps_returned_rows() {
        let pool = setup_test_db().await;
        let audit = AuditLog::new(pool);

        for _ in 0..5 {
            audit.append(&record("success")).await.unwrap();
        }

        let stored = audit.recent_operations(2).await.unwrap();
        assert_eq!(stored.len(), 2);
    }
}
