//! Safety envelope gating automated rebalancing: cooldown between
//! operations and a daily operation cap. Human-initiated mint/burn
//! requests are not subject to this gate.

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

/// Deferral, not failure: the conductor retries on the next tick.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum GateRejection {
    #[error("cooldown active, {remaining_secs}s until next operation window")]
    CooldownActive { remaining_secs: i64 },
    #[error("daily operation cap of {limit} reached")]
    RateLimitExceeded { limit: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerLimits {
    pub min_operation_interval: Duration,
    pub max_daily_operations: u32,
}

#[derive(Debug, Clone, Copy)]
struct SchedulerState {
    operations_today: u32,
    last_operation_at: Option<DateTime<Utc>>,
    last_reset_at: DateTime<Utc>,
}

/// Single mutation entry point over the shared counters; callers pass
/// `now` so the daily boundary logic is deterministic under test.
#[derive(Debug)]
pub struct OperationScheduler {
    limits: SchedulerLimits,
    state: Mutex<SchedulerState>,
}

impl OperationScheduler {
    pub fn new(limits: SchedulerLimits, now: DateTime<Utc>) -> Self {
        Self {
            limits,
            state: Mutex::new(SchedulerState {
                operations_today: 0,
                last_operation_at: None,
                last_reset_at: now,
            }),
        }
    }

    /// Checks the gate and, on approval, consumes one operation slot.
    pub async fn approve(&self, now: DateTime<Utc>) -> Result<(), GateRejection> {
        let mut state = self.state.lock().await;

        // Lazy daily reset: exactly one reset per UTC day crossing,
        // independent of traffic.
        if now.date_naive() > state.last_reset_at.date_naive() {
            debug!(
                previous = state.operations_today,
                "Resetting daily operation counter at UTC day boundary"
            );
            state.operations_today = 0;
            state.last_reset_at = now;
        }

        if let Some(last) = state.last_operation_at {
            let elapsed = now - last;
            if elapsed < self.limits.min_operation_interval {
                let remaining = self.limits.min_operation_interval - elapsed;
                return Err(GateRejection::CooldownActive {
                    remaining_secs: remaining.num_seconds(),
                });
            }
        }

        if state.operations_today >= self.limits.max_daily_operations {
            return Err(GateRejection::RateLimitExceeded {
                limit: self.limits.max_daily_operations,
            });
        }

        state.operations_today += 1;
        state.last_operation_at = Some(now);
        Ok(())
    }

    pub async fn operations_today(&self) -> u32 {
        self.state.lock().await.operations_today
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn limits() -> SchedulerLimits {
        SchedulerLimits {
            min_operation_interval: Duration::minutes(5),
            max_daily_operations: 3,
        }
    }

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 6, hour, min, 0).unwrap()
    }

    #[tokio::test]
    async fn first_operation_is_approved() {
        let scheduler = OperationScheduler::new(limits(), at(9, 0));

        scheduler.approve(at(9, 0)).await.unwrap();

        assert_eq!(scheduler.operations_today().await, 1);
    }

    #[tokio::test]
    async fn cooldown_rejects_back_to_back_operations() {
        let scheduler = OperationScheduler::new(limits(), at(9, 0));
        scheduler.approve(at(9, 0)).await.unwrap();

        let rejection = scheduler.approve(at(9, 2)).await.unwrap_err();

        assert_eq!(
            rejection,
            GateRejection::CooldownActive { remaining_secs: 180 }
        );
        // A rejected attempt must not consume a slot.
        assert_eq!(scheduler.operations_today().await, 1);
    }

    #[tokio::test]
    async fn operation_after_cooldown_is_approved() {
        let scheduler = OperationScheduler::new(limits(), at(9, 0));
        scheduler.approve(at(9, 0)).await.unwrap();

        scheduler.approve(at(9, 5)).await.unwrap();

        assert_eq!(scheduler.operations_today().await, 2);
    }

    #[tokio::test]
    async fn daily_cap_rejects_with_rate_limit() {
        let scheduler = OperationScheduler::new(limits(), at(0, 0));
        scheduler.approve(at(0, 0)).await.unwrap();
        scheduler.approve(at(1, 0)).await.unwrap();
        scheduler.approve(at(2, 0)).await.unwrap();

        let rejection = scheduler.approve(at(3, 0)).await.unwrap_err();

        assert_eq!(rejection, GateRejection::RateLimitExceeded { limit: 3 });
    }

    #[tokio::test]
    async fn counter_resets_once_across_utc_day_boundary() {
        let scheduler = OperationScheduler::new(limits(), at(20, 0));
        scheduler.approve(at(20, 0)).await.unwrap();
        scheduler.approve(at(21, 0)).await.unwrap();
        scheduler.approve(at(22, 0)).await.unwrap();
        assert!(scheduler.approve(at(23, 0)).await.is_err());

        // Next day: the counter is fresh.
        let next_day = Utc.with_ymd_and_hms(2026, 8, 7, 0, 10, 0).unwrap();
        scheduler.approve(next_day).await.unwrap();

        assert_eq!(scheduler.operations_today().await, 1);
    }

    #[tokio::test]
    async fn cooldown_still_applies_across_the_day_boundary() {
        let scheduler = OperationScheduler::new(limits(), at(23, 58));
        scheduler.approve(at(23, 58)).await.unwrap();

        let next_day = Utc.with_ymd_and_hms(2026, 8, 7, 0, 1, 0).unwrap();
        let rejection = scheduler.approve(next_day).await.unwrap_err();

        assert!(matches!(rejection, GateRejection::CooldownActive { .. }));
    }
}
