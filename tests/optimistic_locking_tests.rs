use std::sync::Arc;

use polystore::backends::oql::OqlBackend;
use polystore::{
    DataType, Datastore, DatastoreConfig, DbError, EntityData, MappingContext, PersistentEntity,
    PersistentProperty, Value,
};

fn datastore() -> Arc<Datastore> {
    let mut context = MappingContext::new();
    context.register(
        PersistentEntity::build("Document")
            .versioned()
            .property(PersistentProperty::new("title", DataType::Text)),
    );
    Arc::new(
        Datastore::new(
            context,
            Box::new(OqlBackend::in_memory()),
            DatastoreConfig::default(),
        )
        .unwrap(),
    )
}

#[test]
fn test_insert_starts_at_version_one() {
    let datastore = datastore();
    let mut session = datastore.connect();

    let doc = EntityData::new("Document").with("title", "v1").into_handle();
    session.persist(&doc).unwrap();
    session.flush().unwrap();

    assert_eq!(doc.borrow().get("version"), Some(&Value::Integer(1)));
}

#[test]
fn test_update_bumps_version() {
    let datastore = datastore();
    let mut session = datastore.connect();

    let doc = EntityData::new("Document").with("title", "v1").into_handle();
    let id = session.persist(&doc).unwrap();
    session.flush().unwrap();

    doc.borrow_mut().set("title", "v2");
    session.persist(&doc).unwrap();
    session.flush().unwrap();

    // Bumped in memory and in the store
    assert_eq!(doc.borrow().get("version"), Some(&Value::Integer(2)));
    let mut probe = datastore.connect();
    let stored = probe.retrieve("Document", id).unwrap().unwrap();
    assert_eq!(stored.borrow().get("version"), Some(&Value::Integer(2)));
}

#[test]
fn test_concurrent_update_fails_with_optimistic_locking() {
    let datastore = datastore();
    let mut first = datastore.connect();

    let doc = EntityData::new("Document").with("title", "v1").into_handle();
    let id = first.persist(&doc).unwrap();
    first.flush().unwrap();

    // A second session updates the same record first
    let mut second = datastore.connect();
    let theirs = second.retrieve("Document", id.clone()).unwrap().unwrap();
    theirs.borrow_mut().set("title", "theirs");
    second.persist(&theirs).unwrap();
    second.flush().unwrap();

    // The first session still holds version 1 and must lose
    doc.borrow_mut().set("title", "mine");
    first.persist(&doc).unwrap();
    let outcome = first.flush();
    assert!(matches!(outcome, Err(DbError::OptimisticLocking(_))));

    let mut probe = datastore.connect();
    let stored = probe.retrieve("Document", id).unwrap().unwrap();
    assert_eq!(
        stored.borrow().get("title"),
        Some(&Value::Text("theirs".into()))
    );
    assert_eq!(stored.borrow().get("version"), Some(&Value::Integer(2)));
}

#[test]
fn test_flush_after_error_is_noop_until_clear() {
    let datastore = datastore();
    let mut first = datastore.connect();

    let doc = EntityData::new("Document").with("title", "v1").into_handle();
    let id = first.persist(&doc).unwrap();
    first.flush().unwrap();

    let mut second = datastore.connect();
    let theirs = second.retrieve("Document", id.clone()).unwrap().unwrap();
    theirs.borrow_mut().set("title", "theirs");
    second.persist(&theirs).unwrap();
    second.flush().unwrap();

    doc.borrow_mut().set("title", "mine");
    first.persist(&doc).unwrap();
    assert!(first.flush().is_err());
    assert!(first.has_error());

    // Poisoned session: further flushes succeed but write nothing
    doc.borrow_mut().set("title", "mine again");
    first.persist(&doc).unwrap();
    first.flush().unwrap();

    let mut probe = datastore.connect();
    let stored = probe.retrieve("Document", id.clone()).unwrap().unwrap();
    assert_eq!(
        stored.borrow().get("title"),
        Some(&Value::Text("theirs".into()))
    );

    // clear() resets the latch; a fresh read-modify-write goes through
    first.clear();
    assert!(!first.has_error());
    let fresh = first.retrieve("Document", id.clone()).unwrap().unwrap();
    fresh.borrow_mut().set("title", "resolved");
    first.persist(&fresh).unwrap();
    first.flush().unwrap();

    let mut verify = datastore.connect();
    let stored = verify.retrieve("Document", id).unwrap().unwrap();
    assert_eq!(
        stored.borrow().get("title"),
        Some(&Value::Text("resolved".into()))
    );
    assert_eq!(stored.borrow().get("version"), Some(&Value::Integer(3)));
}
