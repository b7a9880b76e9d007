//! Property tests for session binding.

use proptest::prelude::*;
use std::sync::Arc;
use txbind_core::{BridgeError, CompletionStatus, ContextRegistry, ExecutionContext, SqlSession};
use txbind_testkit::prelude::*;

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn nested_transactions_close_every_session_once(
        outcomes in nesting_depth_strategy().prop_flat_map(|depth| {
            proptest::collection::vec(completion_status_strategy(), depth)
        })
    ) {
        let mut harness = BridgeHarness::new();
        let mut sessions: Vec<Arc<dyn SqlSession>> = Vec::new();

        for _ in &outcomes {
            harness.driver.begin().unwrap();
            let session = harness.acquire().unwrap();
            harness.release(&session).unwrap();
            sessions.push(session);
        }
        for (outer, inner) in sessions.iter().zip(sessions.iter().skip(1)) {
            prop_assert!(!Arc::ptr_eq(outer, inner));
        }

        // Innermost transaction completes first.
        for outcome in outcomes.iter().rev() {
            match outcome {
                CompletionStatus::Committed => harness.driver.commit().unwrap(),
                _ => harness.driver.rollback().unwrap(),
            }
        }

        prop_assert_eq!(harness.engine.session_count(), outcomes.len());
        for (mock, outcome) in harness.engine.sessions().iter().zip(&outcomes) {
            prop_assert_eq!(mock.closes(), 1);
            let expected = usize::from(*outcome == CompletionStatus::Committed);
            prop_assert_eq!(mock.commits(), expected);
        }
        prop_assert_eq!(harness.context.resource_count(), 0);
        prop_assert_eq!(harness.data_source.open_connections(), 0);
        prop_assert!(!harness.context.is_synchronization_active());
    }

    #[test]
    fn repeated_acquisition_shares_one_session(count in acquire_count_strategy()) {
        let mut harness = BridgeHarness::new();
        harness.driver.begin().unwrap();

        let acquired: Vec<_> = (0..count).map(|_| harness.acquire().unwrap()).collect();
        prop_assert_eq!(harness.engine.session_count(), 1);
        for session in &acquired {
            prop_assert!(Arc::ptr_eq(session, &acquired[0]));
            harness.release(session).unwrap();
        }
        prop_assert!(acquired[0].is_open());

        harness.driver.commit().unwrap();
        let mock = harness.engine.last_session().unwrap();
        prop_assert_eq!(mock.commits(), 1);
        prop_assert_eq!(mock.closes(), 1);
    }

    #[test]
    fn bound_session_keeps_its_execution_mode(
        bound in execution_mode_strategy(),
        requested in execution_mode_strategy(),
    ) {
        let mut harness = BridgeHarness::new();
        harness.driver.begin().unwrap();
        let handle = harness.handle();

        let session = harness
            .manager
            .acquire(&handle, harness.factory.as_ref(), bound, None)
            .unwrap();
        let second = harness
            .manager
            .acquire(&handle, harness.factory.as_ref(), requested, None);

        if bound == requested {
            let second = second.unwrap();
            prop_assert!(Arc::ptr_eq(&session, &second));
            harness.release(&second).unwrap();
        } else {
            let is_conflict = matches!(second, Err(BridgeError::ConfigurationConflict { .. }));
            prop_assert!(is_conflict);
        }
        prop_assert_eq!(session.execution_mode(), bound);

        harness.release(&session).unwrap();
        harness.driver.commit().unwrap();
        prop_assert!(!session.is_open());
    }

    #[test]
    fn synchronizations_fire_in_order(
        orders in proptest::collection::vec(synchronization_order_strategy(), 1..12)
    ) {
        let context = ExecutionContext::new();
        context.init_synchronization().unwrap();
        let log = EventLog::new();

        for (i, order) in orders.iter().enumerate() {
            context
                .register_synchronization(Arc::new(RecordingSynchronization::new(
                    i.to_string(),
                    *order,
                    log.clone(),
                )))
                .unwrap();
        }

        let registered = context.synchronizations();
        prop_assert_eq!(registered.len(), orders.len());
        for pair in registered.windows(2) {
            prop_assert!(pair[0].order() <= pair[1].order());
        }

        context.trigger_before_completion();
        let fired: Vec<usize> = log
            .events()
            .iter()
            .filter_map(|event| event.split(':').next()?.parse().ok())
            .collect();
        let mut expected: Vec<usize> = (0..orders.len()).collect();
        expected.sort_by_key(|&i| orders[i]);
        prop_assert_eq!(fired, expected);
    }
}
