//! Failover transport for calls into the ledger network: per-attempt
//! timeout, rotation across fallback replicas, exponential backoff
//! between rounds.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::warn;

/// Retry envelope applied to every external read and write.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Timeout applied to each individual attempt.
    pub attempt_timeout: Duration,
    /// How many full passes over the replica list to make.
    pub max_rounds: u32,
    /// Backoff before the second round; doubles each round after.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(5),
            max_rounds: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

/// Raised once every replica has been exhausted in every round.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("RPC failed after {attempts} attempts across {replicas} endpoints: {last_error}")]
pub struct RpcFailure {
    pub attempts: u32,
    pub replicas: usize,
    pub last_error: String,
}

#[derive(Debug, thiserror::Error)]
#[error("failover requires at least one endpoint")]
pub struct NoReplicas;

/// A primary client plus fallback replicas, one per configured
/// endpoint. The wrapped operation must be safe to re-issue (the
/// underlying ledger primitives are idempotent per reference).
#[derive(Debug, Clone)]
pub struct Failover<C> {
    replicas: Vec<C>,
    policy: RetryPolicy,
}

impl<C: Clone> Failover<C> {
    pub fn new(replicas: Vec<C>, policy: RetryPolicy) -> Result<Self, NoReplicas> {
        if replicas.is_empty() {
            return Err(NoReplicas);
        }
        Ok(Self { replicas, policy })
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Runs `op` against each replica in turn until one succeeds.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, RpcFailure>
    where
        F: Fn(C) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempts = 0u32;
        let mut last_error = String::from("no attempts made");

        for round in 0..self.policy.max_rounds {
            if round > 0 {
                let backoff = self.policy.initial_backoff * 2u32.pow(round - 1);
                sleep(backoff).await;
            }

            for (index, replica) in self.replicas.iter().enumerate() {
                attempts += 1;

                match timeout(self.policy.attempt_timeout, op(replica.clone())).await {
                    Ok(Ok(value)) => return Ok(value),
                    Ok(Err(error)) => {
                        warn!(endpoint = index, round, %error, "RPC attempt failed");
                        last_error = error.to_string();
                    }
                    Err(_elapsed) => {
                        warn!(endpoint = index, round, "RPC attempt timed out");
                        last_error = format!(
                            "timed out after {:?}",
                            self.policy.attempt_timeout
                        );
                    }
                }
            }
        }

        Err(RpcFailure {
            attempts,
            replicas: self.replicas.len(),
            last_error,
        })
    }
}
