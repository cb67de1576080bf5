use std::time::Duration;

use crate::timeline::MergePolicy;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PENDING_CONFIRM_CYCLES: u32 = 5;
pub const DEFAULT_CONFIRM_SKEW: Duration = Duration::from_secs(5);
/// Lower bound for `pending_confirm_cycles`: one repeated batch never fails a message.
pub const MIN_PENDING_CONFIRM_CYCLES: u32 = 3;

/// Engine tunables. Front ends layer their own file/env settings on top.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub poll_interval: Duration,
    /// Upper bound for every individual HTTP attempt.
    pub request_timeout: Duration,
    /// Refresh cycles an optimistic message may go unconfirmed before it is marked failed (at least 3).
    pub pending_confirm_cycles: u32,
    /// How far a server timestamp may lag the local send time and still confirm it.
    pub confirm_skew: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            pending_confirm_cycles: DEFAULT_PENDING_CONFIRM_CYCLES,
            confirm_skew: DEFAULT_CONFIRM_SKEW,
        }
    }
}

impl SyncConfig {
    pub fn merge_policy(&self) -> MergePolicy {
        MergePolicy {
            pending_confirm_cycles: self.pending_confirm_cycles.max(MIN_PENDING_CONFIRM_CYCLES),
            confirm_skew: chrono::Duration::from_std(self.confirm_skew)
                .unwrap_or_else(|_| chrono::Duration::zero()),
        }
    }
}
