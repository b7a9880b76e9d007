//! Error translation through templates and completion callbacks.

use std::sync::Arc;
use txbind_core::{
    BridgeError, DataAccessKind, ErrorCodes, PersistenceError, SessionFactoryBuilder,
    SessionTemplate, SqlError, SqlErrorCodeTranslator, SqlSession, TransactionError,
};
use txbind_testkit::prelude::*;

fn template_for(harness: &BridgeHarness) -> SessionTemplate {
    SessionTemplate::builder()
        .factory(harness.factory.clone())
        .manager(harness.manager.clone())
        .build()
        .unwrap()
}

#[test]
fn commit_failure_is_translated_and_transaction_rolled_back() {
    init_tracing();
    let mut harness = BridgeHarness::new();
    let template = template_for(&harness);
    harness.driver.begin().unwrap();

    template
        .execute(&harness.handle(), |_| Ok(()))
        .unwrap();
    let mock = harness.engine.last_session().unwrap();
    mock.fail_next_commit(PersistenceError::sql(
        "flush users",
        SqlError::new("Unique index or primary key violation").with_error_code(23505),
    ));

    let err = harness.driver.commit().unwrap_err();

    assert_eq!(err.data_access_kind(), Some(DataAccessKind::DuplicateKey));
    assert_eq!(mock.commits(), 0);
    assert_eq!(mock.closes(), 1);
    let connection = harness.data_source.connections()[0].clone();
    assert_eq!(connection.rollbacks(), 1);
    assert_eq!(connection.commits(), 0);
    assert_eq!(harness.driver.depth(), 0);
    assert_eq!(harness.manager.stats().translations(), 1);
}

#[test]
fn commit_failure_without_translator_stays_raw() {
    let mut harness = BridgeHarness::new();
    harness.driver.begin().unwrap();

    let session = harness.acquire().unwrap();
    harness.release(&session).unwrap();
    harness
        .engine
        .last_session()
        .unwrap()
        .fail_next_commit(PersistenceError::new("flush failed"));

    let err = harness.driver.commit().unwrap_err();

    assert!(matches!(err, BridgeError::Persistence(_)));
    assert!(!session.is_open());
    assert_eq!(harness.manager.stats().translations(), 0);
}

#[test]
fn transaction_failures_pass_through_unwrapped() {
    let mut harness = BridgeHarness::new();
    let template = template_for(&harness);
    harness.driver.begin().unwrap();

    template.execute(&harness.handle(), |_| Ok(())).unwrap();
    harness
        .engine
        .last_session()
        .unwrap()
        .fail_next_commit(PersistenceError::transaction(
            "flush",
            TransactionError::new("transaction timed out"),
        ));

    match harness.driver.commit().unwrap_err() {
        BridgeError::Transaction(inner) => assert_eq!(inner.message, "transaction timed out"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn work_failure_outside_transaction_is_translated() {
    let harness = BridgeHarness::new();
    let template = template_for(&harness);

    let result: Result<(), BridgeError> = template.execute(&harness.handle(), |_| {
        Err(PersistenceError::wrapping(
            "query failed",
            PersistenceError::sql(
                "select from missing",
                SqlError::new("Table not found").with_error_code(42102),
            ),
        ))
    });

    let err = result.unwrap_err();
    assert_eq!(err.data_access_kind(), Some(DataAccessKind::BadSqlGrammar));
    assert!(!harness.engine.last_session().unwrap().is_open());
}

#[test]
fn failure_without_sql_cause_is_uncategorized() {
    let harness = BridgeHarness::new();
    let template = template_for(&harness);

    let result: Result<(), BridgeError> = template.execute(&harness.handle(), |_| {
        Err(PersistenceError::other(
            "mapping failed",
            std::io::Error::other("bad column type"),
        ))
    });

    match result.unwrap_err() {
        BridgeError::UnmappedSystem { cause } => assert_eq!(cause.message(), "mapping failed"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn template_reuses_the_transaction_session() {
    let mut harness = BridgeHarness::new();
    let template = template_for(&harness);
    harness.driver.begin().unwrap();
    let handle = harness.handle();

    template.execute(&handle, |_| Ok(())).unwrap();
    template.execute(&handle, |_| Ok(())).unwrap();
    assert_eq!(harness.engine.session_count(), 1);
    assert_eq!(harness.engine.last_session().unwrap().commits(), 0);

    harness.driver.commit().unwrap();
    let session = harness.engine.last_session().unwrap();
    assert_eq!(session.commits(), 1);
    assert_eq!(session.closes(), 1);
}

#[test]
fn mysql_deadlock_is_transient() {
    let translator = SqlErrorCodeTranslator::with_codes(ErrorCodes::mysql());
    let err = translator.translate(
        "update stock",
        &SqlError::new("Deadlock found when trying to get lock").with_error_code(1213),
    );

    let kind = err.data_access_kind().unwrap();
    assert_eq!(kind, DataAccessKind::DeadlockLoser);
    assert!(kind.is_transient());
}

#[test]
fn unknown_product_falls_back_to_sql_state_class() {
    let data_source = MockDataSource::new().product(Some("Informix"));
    let translator = SqlErrorCodeTranslator::new(&data_source);
    assert!(translator.codes().is_none());

    let kind = translator.kind_for(
        &SqlError::new("could not serialize")
            .with_sql_state("40001")
            .with_error_code(-243),
    );
    assert_eq!(kind, DataAccessKind::ConcurrencyFailure);
}

#[test]
fn missing_metadata_still_translates_by_sql_state() {
    let data_source = MockDataSource::new().product(None);
    let translator = SqlErrorCodeTranslator::new(&data_source);

    let kind = translator.kind_for(&SqlError::new("link failure").with_sql_state("08S01"));
    assert_eq!(kind, DataAccessKind::DataAccessResourceFailure);
}

#[test]
fn builders_reject_missing_inputs() {
    let engine = Arc::new(MockEngine::new());
    let data_source = Arc::new(MockDataSource::new());

    assert!(matches!(
        SessionFactoryBuilder::new().engine(engine).build(),
        Err(BridgeError::Precondition { .. })
    ));
    assert!(matches!(
        SessionFactoryBuilder::new().data_source(data_source).build(),
        Err(BridgeError::Precondition { .. })
    ));
    assert!(matches!(
        SessionTemplate::builder().build(),
        Err(BridgeError::Precondition { .. })
    ));
}
