//! Kernel protocol parameters

use crate::{HOUR, SECOND};
use kernel_common::Integer;
use serde::{Deserialize, Serialize};

/// Protocol parameters every validator of a network must share.
///
/// Durations are nanoseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Time a round stays open after its first snapshot
    pub snapshot_round_gap: u64,
    /// Number of round gaps a snapshot timestamp may run ahead
    pub snapshot_reference_threshold: u64,
    /// Minimum age of every accepted node before a new pledge
    pub pledge_period_minimum: u64,
    /// Maximum time between pledge and accept
    pub accept_period_maximum: u64,
    /// Minimum time a node stays accepted before it may depart
    pub depart_period_minimum: u64,
    /// Inactivity after which another validator may remove a node
    pub remove_inactivity_threshold: u64,
    /// First hour of day (since epoch) accepts are allowed in
    pub accept_time_begin: u64,
    /// Last hour of day (since epoch) accepts are allowed in
    pub accept_time_end: u64,
    /// Lock window of a pending node operation
    pub operation_lock_threshold: u64,
    /// Collateral a pledge must move
    pub pledge_amount: Integer,
    /// Snapshots after which a round is closed
    pub round_capacity: usize,
}

impl KernelConfig {
    /// How far ahead of local time a snapshot may be
    pub fn reference_window(&self) -> u64 {
        self.snapshot_round_gap.saturating_mul(self.snapshot_reference_threshold)
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            snapshot_round_gap: 3 * SECOND,
            snapshot_reference_threshold: 10,
            pledge_period_minimum: 12 * HOUR,
            accept_period_maximum: 12 * HOUR,
            depart_period_minimum: 24 * HOUR,
            remove_inactivity_threshold: 24 * HOUR,
            accept_time_begin: 13,
            accept_time_end: 19,
            operation_lock_threshold: 12 * HOUR,
            pledge_amount: Integer::new(10000),
            round_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: KernelConfig =
            serde_json::from_str(r#"{"accept_time_begin": 1, "pledge_amount": "500"}"#).unwrap();
        assert_eq!(config.accept_time_begin, 1);
        assert_eq!(config.pledge_amount, Integer::new(500));
        assert_eq!(config.accept_time_end, 19);
        assert_eq!(config.reference_window(), 30 * SECOND);
    }

    #[test]
    fn test_reference_window_saturates() {
        let config = KernelConfig {
            snapshot_reference_threshold: u64::MAX,
            ..KernelConfig::default()
        };
        assert_eq!(config.reference_window(), u64::MAX);
    }
}
