use std::sync::Arc;
use std::time::Duration;

use polystore::backends::dynamo::DynamoBackend;
use polystore::backends::oql::OqlBackend;
use polystore::backends::redis::RedisBackend;
use polystore::{
    Backend, DataType, Datastore, DatastoreConfig, DbError, EntityData, MappingContext,
    PersistentEntity, PersistentProperty, Value,
};

fn datastore(backend: Box<dyn Backend>) -> Arc<Datastore> {
    let mut context = MappingContext::new();
    context.register(
        PersistentEntity::build("Account")
            .property(PersistentProperty::new("balance", DataType::Integer)),
    );
    Arc::new(
        Datastore::new(context, backend, DatastoreConfig::default()).unwrap(),
    )
}

fn stored_account(datastore: &Arc<Datastore>) -> Value {
    let mut session = datastore.connect();
    let account = EntityData::new("Account")
        .with("balance", 100i64)
        .into_handle();
    let id = session.persist(&account).unwrap();
    session.flush().unwrap();
    id
}

#[test]
fn test_redis_lock_and_unlock() {
    let datastore = datastore(Box::new(RedisBackend::in_memory()));
    let id = stored_account(&datastore);
    let mut session = datastore.connect();

    session.lock("Account", &id, None).unwrap();
    assert!(session.is_locked("Account", &id).unwrap());

    session.unlock("Account", &id).unwrap();
    assert!(!session.is_locked("Account", &id).unwrap());

    // Released locks can be re-acquired
    session.lock("Account", &id, None).unwrap();
    session.unlock("Account", &id).unwrap();
}

#[test]
fn test_redis_contended_lock_times_out() {
    let datastore = datastore(Box::new(RedisBackend::in_memory()));
    let id = stored_account(&datastore);
    let mut session = datastore.connect();

    session.lock("Account", &id, None).unwrap();
    let outcome = session.lock("Account", &id, Some(Duration::from_millis(50)));
    assert!(matches!(outcome, Err(DbError::CannotAcquireLock(_))));

    session.unlock("Account", &id).unwrap();
}

#[test]
fn test_oql_lock_and_contention() {
    let datastore = datastore(Box::new(OqlBackend::in_memory()));
    let id = stored_account(&datastore);
    let mut session = datastore.connect();

    session.lock("Account", &id, None).unwrap();
    let outcome = session.lock("Account", &id, Some(Duration::from_millis(50)));
    assert!(matches!(outcome, Err(DbError::CannotAcquireLock(_))));

    session.unlock("Account", &id).unwrap();
    session.lock("Account", &id, None).unwrap();
}

#[test]
fn test_dynamo_locks_unsupported() {
    let datastore = datastore(Box::new(DynamoBackend::in_memory()));
    let id = stored_account(&datastore);
    let mut session = datastore.connect();

    assert!(matches!(
        session.lock("Account", &id, None),
        Err(DbError::UnsupportedOperation(_))
    ));
}
