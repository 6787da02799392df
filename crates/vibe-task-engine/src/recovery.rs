//! Heartbeat tracking and retry policy
//!
//! Agents that miss heartbeats go offline and shed their in-flight work;
//! failed or timed-out assignments come back as pending until retries run
//! out.

use crate::agent::Agent;
use crate::config::RecoveryConfig;
use chrono::{DateTime, Utc};

/// Whether an agent's last heartbeat is older than the timeout.
pub fn heartbeat_expired(agent: &Agent, timeout_ms: u64, now: DateTime<Utc>) -> bool {
    let silence = (now - agent.metadata.last_heartbeat).num_milliseconds().max(0) as u64;
    silence > timeout_ms
}

/// Outcome of asking the retry policy about one more attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay_ms: u64,
}

/// Decide whether an assignment that has already failed `retry_count` times
/// gets another attempt.
pub fn next_retry(config: &RecoveryConfig, retry_count: u32) -> RetryDecision {
    if config.auto_retry && retry_count < config.max_retries {
        RetryDecision {
            retry: true,
            delay_ms: config.retry_delay_ms,
        }
    } else {
        RetryDecision { retry: false, delay_ms: 0 }
    }
}
