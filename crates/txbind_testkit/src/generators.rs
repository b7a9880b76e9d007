//! Property-based test generators using proptest.

use proptest::prelude::*;
use txbind_core::{CompletionStatus, ExecutionMode, SynchronizationOrder};

/// Strategy for execution modes.
pub fn execution_mode_strategy() -> impl Strategy<Value = ExecutionMode> {
    prop_oneof![
        Just(ExecutionMode::Simple),
        Just(ExecutionMode::Reuse),
        Just(ExecutionMode::Batch),
    ]
}

/// Strategy for how the ambient transaction ends.
pub fn completion_status_strategy() -> impl Strategy<Value = CompletionStatus> {
    prop_oneof![
        Just(CompletionStatus::Committed),
        Just(CompletionStatus::RolledBack),
    ]
}

/// Strategy for nested transaction depths.
pub fn nesting_depth_strategy() -> impl Strategy<Value = usize> {
    1usize..=6
}

/// Strategy for the number of acquisitions within one transaction.
pub fn acquire_count_strategy() -> impl Strategy<Value = usize> {
    1usize..=8
}

/// Strategy for synchronization orders, biased towards the well-known
/// values so ties get exercised.
pub fn synchronization_order_strategy() -> impl Strategy<Value = SynchronizationOrder> {
    prop_oneof![
        Just(SynchronizationOrder::CONNECTION),
        Just(SynchronizationOrder::CONNECTION.before()),
        Just(SynchronizationOrder::LOWEST),
        (-10i32..10).prop_map(SynchronizationOrder::new),
    ]
}

/// Configuration for property-based tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn nesting_depth_is_bounded(depth in nesting_depth_strategy()) {
            prop_assert!((1..=6).contains(&depth));
        }

        #[test]
        fn completion_status_is_final(status in completion_status_strategy()) {
            prop_assert_ne!(status, CompletionStatus::Unknown);
        }
    }
}
